// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Secret redaction for audit payloads.

use std::collections::HashSet;

use serde_json::Value;

/// Replacement for redacted values.
pub const PLACEHOLDER: &str = "[FILTERED]";

/// Keys redacted by default.
pub const DEFAULT_KEYS: [&str; 5] = [
    "password",
    "token",
    "newPassword",
    "confirmPassword",
    "oldPassword",
];

/// Replaces the value of every denylisted key, at any depth, with
/// [`PLACEHOLDER`]. Keys match ignoring case, `_` and `-`, so `new_password`,
/// `newPassword` and `NEW-PASSWORD` are the same key.
#[derive(Debug, Clone)]
pub struct Redactor {
    keys: HashSet<String>,
}

fn canonical(key: &str) -> String {
    key.chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

impl Default for Redactor {
    fn default() -> Self {
        Self::new(std::iter::empty::<&str>())
    }
}

impl Redactor {
    /// Default keys plus `extra`.
    pub fn new<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keys = DEFAULT_KEYS
            .iter()
            .map(|k| canonical(k))
            .chain(extra.into_iter().map(|k| canonical(k.as_ref())))
            .filter(|k| !k.is_empty())
            .collect();
        Self { keys }
    }

    pub fn is_sensitive(&self, key: &str) -> bool {
        self.keys.contains(&canonical(key))
    }

    /// Redacted deep copy of `value`. The input is never modified.
    pub fn redact(&self, value: &Value) -> Value {
        match value {
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| {
                        let v = if self.is_sensitive(k) {
                            Value::String(PLACEHOLDER.to_string())
                        } else {
                            self.redact(v)
                        };
                        (k.clone(), v)
                    })
                    .collect(),
            ),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.redact(v)).collect()),
            other => other.clone(),
        }
    }

    /// Parse and redact a captured body. Empty or non-JSON bodies yield `None`.
    pub fn redact_body(&self, bytes: &[u8]) -> Option<Value> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return None;
        }
        serde_json::from_slice::<Value>(bytes)
            .ok()
            .map(|value| self.redact(&value))
    }
}
