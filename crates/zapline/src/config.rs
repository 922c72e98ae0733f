// SPDX-FileCopyrightText: 2026 Zapline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `zapline config check` command implementation.

use zapline_config::ZaplineConfig;
use zapline_core::ZaplineError;

/// Print the effective configuration as TOML with secrets masked.
///
/// Loading already validated it, so reaching this point means it is valid.
pub fn run_check(config: &ZaplineConfig) -> Result<(), ZaplineError> {
    println!("{}", render_effective(config)?);
    eprintln!("zapline: configuration is valid");
    Ok(())
}

fn render_effective(config: &ZaplineConfig) -> Result<String, ZaplineError> {
    let mut shown = config.clone();
    if shown.gateway.bearer_token.is_some() {
        shown.gateway.bearer_token = Some("[redacted]".to_string());
    }
    toml::to_string_pretty(&shown)
        .map_err(|e| ZaplineError::Internal(format!("failed to render configuration: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_config_masks_bearer_token() {
        let mut config = ZaplineConfig::default();
        config.gateway.bearer_token = Some("super-secret".into());
        let rendered = render_effective(&config).unwrap();
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("[redacted]"));
        assert!(rendered.contains("[supervisor]"));
    }

    #[test]
    fn effective_config_round_trips_through_loader() {
        let rendered = render_effective(&ZaplineConfig::default()).unwrap();
        let reloaded = zapline_config::load_and_validate_str(&rendered).unwrap();
        assert_eq!(reloaded.gateway.port, ZaplineConfig::default().gateway.port);
    }
}
