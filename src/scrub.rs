// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Payload scrubbing.
//!
//! Configured field names are replaced with a fixed marker wherever they
//! appear in a JSON payload, at any depth. Matching ignores ASCII case.

use serde_json::Value;
use std::collections::HashSet;

pub const REDACTED: &str = "[REDACTED]";

#[derive(Debug, Clone, Default)]
pub struct Scrubber {
    fields: HashSet<String>,
}

impl Scrubber {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let fields = fields
            .into_iter()
            .map(|f| f.as_ref().trim().to_ascii_lowercase())
            .filter(|f| !f.is_empty())
            .collect();
        Self { fields }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Redact in place. Returns the number of fields replaced.
    pub fn scrub(&self, payload: &mut Value) -> usize {
        if self.fields.is_empty() {
            return 0;
        }
        self.scrub_value(payload)
    }

    fn scrub_value(&self, value: &mut Value) -> usize {
        match value {
            Value::Object(map) => {
                let mut redacted = 0;
                for (key, child) in map.iter_mut() {
                    if self.fields.contains(&key.to_ascii_lowercase()) {
                        *child = Value::String(REDACTED.to_string());
                        redacted += 1;
                    } else {
                        redacted += self.scrub_value(child);
                    }
                }
                redacted
            }
            Value::Array(items) => items.iter_mut().map(|item| self.scrub_value(item)).sum(),
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scrub_nested_fields_case_insensitive() {
        let scrubber = Scrubber::new(["api_key", "Password"]);
        let mut payload = json!({
            "user": "ada",
            "API_KEY": "sk-123",
            "nested": {
                "password": "hunter2",
                "items": [{"api_key": "x"}, {"other": 1}]
            }
        });

        assert_eq!(scrubber.scrub(&mut payload), 3);
        assert_eq!(payload["API_KEY"], REDACTED);
        assert_eq!(payload["nested"]["password"], REDACTED);
        assert_eq!(payload["nested"]["items"][0]["api_key"], REDACTED);
        assert_eq!(payload["nested"]["items"][1]["other"], 1);
        assert_eq!(payload["user"], "ada");
    }

    #[test]
    fn test_redacts_whole_subtree() {
        let scrubber = Scrubber::new(["credentials"]);
        let mut payload = json!({"credentials": {"token": "t", "secret": "s"}});
        assert_eq!(scrubber.scrub(&mut payload), 1);
        assert_eq!(payload, json!({"credentials": REDACTED}));
    }

    #[test]
    fn test_empty_scrubber_is_noop() {
        let scrubber = Scrubber::new(Vec::<String>::new());
        let mut payload = json!({"password": "p"});
        assert_eq!(scrubber.scrub(&mut payload), 0);
        assert_eq!(payload["password"], "p");
        assert!(Scrubber::new([" "]).is_empty());
    }
}
