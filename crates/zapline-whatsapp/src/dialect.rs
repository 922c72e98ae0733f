// SPDX-FileCopyrightText: 2026 Zapline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Engine dialects: translation of native sidecar events into driver events.

use chrono::{DateTime, Utc};
use serde_json::Value;
use zapline_core::{DriverEvent, DriverKind};

/// Native event vocabulary of one engine.
pub trait Dialect: Send + Sync + 'static {
    const KIND: DriverKind;

    /// Suffix appended to bare phone numbers to form a user jid.
    fn jid_suffix(&self) -> &'static str;

    /// Translate one native event. Unknown events yield nothing.
    fn translate(&self, event: &str, data: &Value) -> Vec<DriverEvent>;

    /// Turn a caller-supplied target into a jid the engine accepts.
    fn normalize_target(&self, target: &str) -> String {
        if target.contains('@') {
            return target.to_string();
        }
        let digits: String = target.chars().filter(char::is_ascii_digit).collect();
        format!("{digits}{}", self.jid_suffix())
    }
}

/// Phone number part of a jid: `5511999:12@s.whatsapp.net` -> `5511999`.
pub fn phone_from_jid(jid: &str) -> String {
    jid.split(['@', ':']).next().unwrap_or_default().to_string()
}

/// Engines report epoch seconds as numbers, numeric strings, or `{low, high}` longs.
pub fn parse_timestamp(value: Option<&Value>) -> DateTime<Utc> {
    let secs = match value {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.parse::<i64>().ok(),
        Some(Value::Object(map)) => map.get("low").and_then(Value::as_i64),
        _ => None,
    };
    secs.and_then(|s| DateTime::from_timestamp(s, 0))
        .unwrap_or_else(Utc::now)
}

/// Serialize a credential payload back to the opaque blob we persist.
pub(crate) fn credential_blob(value: &Value) -> Option<String> {
    if value.is_null() {
        return None;
    }
    serde_json::to_string(value).ok()
}
