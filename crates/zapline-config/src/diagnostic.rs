// SPDX-FileCopyrightText: 2026 Zapline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration diagnostics.
//!
//! Turns figment extraction failures into miette reports that point at the
//! offending line of `zapline.toml` (or name the `ZAPLINE_*` variable) and
//! suggest the key that was probably meant.

#![allow(unused_assignments)] // miette's Diagnostic derive generates code triggering this lint

use figment::error::{Actual, Kind};
use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

/// Every section of `zapline.toml` and the keys it accepts.
pub const SECTIONS: &[(&str, &[&str])] = &[
    ("service", &["name", "log_level"]),
    ("gateway", &["host", "port", "bearer_token", "allowed_origins"]),
    ("storage", &["database_path", "wal_mode"]),
    (
        "supervisor",
        &[
            "reconnect_base_ms",
            "reconnect_cap_ms",
            "close_timeout_secs",
            "idle_timeout_secs",
            "idle_sweep_secs",
            "resume_on_start",
            "default_driver",
        ],
    ),
    ("broadcast", &["queue_capacity"]),
    ("drivers.baileys", &["endpoint", "send_timeout_secs"]),
    ("drivers.webjs", &["endpoint", "send_timeout_secs"]),
    ("prometheus", &["enabled"]),
];

/// Minimum Jaro-Winkler similarity for a "did you mean" hint
/// (`prot` -> `port`, `reconect_cap_ms` -> `reconnect_cap_ms`).
const SUGGESTION_THRESHOLD: f64 = 0.75;

/// A configuration problem, rendered by miette with spans and hints.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    /// A key no section accepts, or a key placed in the wrong section.
    #[error("unknown key `{key}` in {}", section_label(.section))]
    #[diagnostic(code(zapline::config::unknown_key), help("{hint}"))]
    UnknownKey {
        /// The unrecognized key.
        key: String,
        /// Dotted section the key appeared in; empty at the top level.
        section: String,
        /// Closest accepted key in the same section, if any.
        suggestion: Option<String>,
        /// Rendered hint.
        hint: String,
        #[label("not a zapline setting")]
        span: Option<SourceSpan>,
        #[source_code]
        src: Option<NamedSource<String>>,
    },

    /// A value that does not fit its key.
    #[error("invalid value for `{key}`: {detail}")]
    #[diagnostic(code(zapline::config::invalid_value), help("{hint}"))]
    InvalidValue {
        /// Dotted path of the key.
        key: String,
        /// What was found against what was expected.
        detail: String,
        /// Rendered hint.
        hint: String,
        #[label("here")]
        span: Option<SourceSpan>,
        #[source_code]
        src: Option<NamedSource<String>>,
    },

    /// A value that parsed but breaks a cross-field rule.
    #[error("validation error: {message}")]
    #[diagnostic(code(zapline::config::validation))]
    Validation {
        /// Description of the validation failure.
        message: String,
    },

    /// Anything figment reports that has no better shape.
    #[error("configuration error: {0}")]
    #[diagnostic(code(zapline::config::other))]
    Other(String),
}

/// Where a failing value came from.
enum Origin<'a> {
    File { path: &'a str, content: &'a str },
    Env,
    Unknown,
}

/// Convert a `figment::Error` into one diagnostic per underlying failure.
///
/// `toml_sources` holds `(path, content)` pairs used to place labels; an
/// inline string source is registered under the path `<inline>`.
pub fn figment_to_config_errors(
    err: figment::Error,
    toml_sources: &[(String, String)],
) -> Vec<ConfigError> {
    err.into_iter()
        .map(|error| {
            let origin = origin_of(&error, toml_sources);
            match &error.kind {
                Kind::UnknownField(field, expected) => {
                    unknown_key(field, &error.path, expected, &origin)
                }
                Kind::UnknownVariant(variant, expected) => invalid_value(
                    &error.path,
                    format!("unknown variant `{variant}`"),
                    match suggest_key(variant, expected) {
                        Some(s) => format!("did you mean `{s}`? expected one of: {}", expected.join(", ")),
                        None => format!("expected one of: {}", expected.join(", ")),
                    },
                    &origin,
                ),
                Kind::InvalidType(actual, expected) | Kind::InvalidValue(actual, expected) => {
                    invalid_value(
                        &error.path,
                        format!("found {}, expected {expected}", describe(actual)),
                        format!("expected {expected}"),
                        &origin,
                    )
                }
                _ => ConfigError::Other(error.to_string()),
            }
        })
        .collect()
}

fn origin_of<'a>(error: &figment::error::Error, toml_sources: &'a [(String, String)]) -> Origin<'a> {
    let Some(metadata) = &error.metadata else {
        return Origin::Unknown;
    };
    if metadata.name.contains("environment") {
        return Origin::Env;
    }
    let wanted = match &metadata.source {
        Some(figment::Source::File(path)) => path.display().to_string(),
        Some(figment::Source::Code(_)) => "<inline>".to_string(),
        _ => return Origin::Unknown,
    };
    toml_sources
        .iter()
        .find(|(path, _)| *path == wanted)
        .map_or(Origin::Unknown, |(path, content)| Origin::File { path, content })
}

fn unknown_key(field: &str, path: &[String], expected: &[&str], origin: &Origin<'_>) -> ConfigError {
    let section = path.join(".");
    let suggestion = suggest_key(field, expected);

    let mut help = match (&suggestion, origin) {
        (Some(s), Origin::Env) => format!("did you mean `{}`?", env_var_name(&section, s)),
        (Some(s), _) => format!("did you mean `{s}`?"),
        (None, _) => format!("{} accepts: {}", section_label(&section), expected.join(", ")),
    };
    if let Some(home) = home_section(field).filter(|home| *home != section) {
        help.push_str(&format!(" `{field}` belongs in [{home}]."));
    }

    let (span, src) = locate(origin, &section, field);
    ConfigError::UnknownKey {
        key: field.to_string(),
        section,
        suggestion,
        hint: help,
        span,
        src,
    }
}

fn invalid_value(path: &[String], detail: String, help: String, origin: &Origin<'_>) -> ConfigError {
    let key = path.join(".");
    let (section, field) = match path.split_last() {
        Some((field, section)) => (section.join("."), field.as_str()),
        None => (String::new(), ""),
    };
    let help = match origin {
        Origin::Env => format!("{help} (set by `{}`)", env_var_name(&section, field)),
        _ => help,
    };
    let (span, src) = locate(origin, &section, field);
    ConfigError::InvalidValue {
        key,
        detail,
        hint: help,
        span,
        src,
    }
}

fn locate(origin: &Origin<'_>, section: &str, field: &str) -> (Option<SourceSpan>, Option<NamedSource<String>>) {
    match origin {
        Origin::File { path, content } => match find_key_offset(content, section, field) {
            Some(offset) => (
                Some(SourceSpan::new(offset.into(), field.len())),
                Some(NamedSource::new(*path, content.to_string())),
            ),
            None => (None, None),
        },
        Origin::Env | Origin::Unknown => (None, None),
    }
}

fn describe(actual: &Actual) -> String {
    match actual {
        Actual::Str(s) => format!("string \"{s}\""),
        other => other.to_string(),
    }
}

fn section_label(section: &str) -> String {
    if section.is_empty() {
        "the top level".to_string()
    } else {
        format!("[{section}]")
    }
}

/// The single section that accepts `field`, if exactly one does.
fn home_section(field: &str) -> Option<&'static str> {
    let mut homes = SECTIONS
        .iter()
        .filter(|(_, keys)| keys.contains(&field))
        .map(|(section, _)| *section);
    let home = homes.next()?;
    homes.next().is_none().then_some(home)
}

/// `drivers.baileys` + `endpoint` -> `ZAPLINE_DRIVERS_BAILEYS_ENDPOINT`.
pub fn env_var_name(section: &str, key: &str) -> String {
    let mut name = String::from("ZAPLINE_");
    for part in section.split('.').filter(|p| !p.is_empty()) {
        name.push_str(part);
        name.push('_');
    }
    name.push_str(key);
    name.to_ascii_uppercase()
}

/// Byte offset of `field` inside the `[section]` table of a TOML document.
///
/// Scans line by line, tracking the current table header. An empty
/// `section` means the keys before the first header.
pub fn find_key_offset(content: &str, section: &str, field: &str) -> Option<usize> {
    let mut current = String::new();
    let mut offset = 0;

    for line in content.split_inclusive('\n') {
        let trimmed = line.trim_start();
        let indent = line.len() - trimmed.len();

        if let Some(header) = trimmed.strip_prefix('[') {
            if let Some(end) = header.find(']') {
                current = header[..end].trim().to_string();
            }
        } else if current == section
            && let Some(rest) = trimmed.strip_prefix(field)
            && rest.trim_start().starts_with('=')
        {
            return Some(offset + indent);
        }
        offset += line.len();
    }

    None
}

/// Closest candidate to `unknown` by Jaro-Winkler similarity, above the threshold.
pub fn suggest_key(unknown: &str, candidates: &[&str]) -> Option<String> {
    candidates
        .iter()
        .map(|candidate| (strsim::jaro_winkler(unknown, candidate), *candidate))
        .filter(|(score, _)| *score > SUGGESTION_THRESHOLD)
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, candidate)| candidate.to_string())
}

/// Render diagnostics to stderr using miette's graphical handler.
pub fn render_errors(errors: &[ConfigError]) {
    let handler = miette::GraphicalReportHandler::new();
    for error in errors {
        let mut buf = String::new();
        match handler.render_report(&mut buf, error as &dyn Diagnostic) {
            Ok(()) => eprint!("{buf}"),
            Err(_) => eprintln!("Error: {error}"),
        }
    }
}
