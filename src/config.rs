// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Fabric configuration.
//!
//! Retention, payload size and subscriber backlog have no built-in
//! defaults: every deployment states them explicitly.

use crate::error::{FabricError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_SEGMENT_MAX_BYTES: u64 = 64 * 1024 * 1024;
pub const DEFAULT_MAX_PENDING_PUBLISHES: usize = 1024;
pub const DEFAULT_PUBLISH_BLOCK_TIMEOUT_MS: u64 = 250;

/// What happens when a live subscriber falls behind its backlog limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Drop the slow subscriber; it receives `Overflow` and must resync via `since`.
    #[default]
    DropSubscriber,
    /// Hold admission until every subscriber has room, bounded by `publish_block_timeout_ms`.
    BlockPublisher,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FabricConfig {
    /// Directory holding the segment files.
    pub archive_dir: PathBuf,
    /// Ring Buffer size.
    pub retention_count: usize,
    /// Maximum serialized payload size in bytes.
    pub payload_size_limit: usize,
    #[serde(default)]
    pub module_allowlist: BTreeSet<String>,
    /// Field names redacted from payloads, matched case-insensitively at any depth.
    #[serde(default)]
    pub sensitive_fields: Vec<String>,
    pub subscriber_backlog_limit: usize,
    #[serde(default)]
    pub subscriber_overflow_policy: OverflowPolicy,
    #[serde(default = "default_segment_max_bytes")]
    pub segment_max_bytes: u64,
    #[serde(default = "default_max_pending_publishes")]
    pub max_pending_publishes: usize,
    #[serde(default = "default_publish_block_timeout_ms")]
    pub publish_block_timeout_ms: u64,
}

fn default_segment_max_bytes() -> u64 {
    DEFAULT_SEGMENT_MAX_BYTES
}

fn default_max_pending_publishes() -> usize {
    DEFAULT_MAX_PENDING_PUBLISHES
}

fn default_publish_block_timeout_ms() -> u64 {
    DEFAULT_PUBLISH_BLOCK_TIMEOUT_MS
}

impl FabricConfig {
    pub fn new(
        archive_dir: impl Into<PathBuf>,
        retention_count: usize,
        payload_size_limit: usize,
        subscriber_backlog_limit: usize,
    ) -> Self {
        Self {
            archive_dir: archive_dir.into(),
            retention_count,
            payload_size_limit,
            module_allowlist: BTreeSet::new(),
            sensitive_fields: Vec::new(),
            subscriber_backlog_limit,
            subscriber_overflow_policy: OverflowPolicy::default(),
            segment_max_bytes: DEFAULT_SEGMENT_MAX_BYTES,
            max_pending_publishes: DEFAULT_MAX_PENDING_PUBLISHES,
            publish_block_timeout_ms: DEFAULT_PUBLISH_BLOCK_TIMEOUT_MS,
        }
    }

    pub fn with_allowed_modules<I, S>(mut self, modules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.module_allowlist = modules.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_sensitive_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sensitive_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.subscriber_overflow_policy = policy;
        self
    }

    pub fn with_segment_max_bytes(mut self, bytes: u64) -> Self {
        self.segment_max_bytes = bytes;
        self
    }

    pub fn with_max_pending_publishes(mut self, pending: usize) -> Self {
        self.max_pending_publishes = pending;
        self
    }

    pub fn with_publish_block_timeout(mut self, timeout: Duration) -> Self {
        self.publish_block_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn publish_block_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_block_timeout_ms)
    }

    /// Reject bounds that are zero; every limit must be finite and explicit.
    pub fn validate(&self) -> Result<()> {
        let checks = [
            ("retention_count", self.retention_count as u64),
            ("payload_size_limit", self.payload_size_limit as u64),
            ("subscriber_backlog_limit", self.subscriber_backlog_limit as u64),
            ("segment_max_bytes", self.segment_max_bytes),
            ("max_pending_publishes", self.max_pending_publishes as u64),
        ];
        for (name, value) in checks {
            if value == 0 {
                return Err(FabricError::InvalidConfig(format!("{name} must be greater than zero")));
            }
        }
        if self.module_allowlist.iter().any(|m| m.trim().is_empty()) {
            return Err(FabricError::InvalidConfig(
                "module_allowlist must not contain empty identities".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_zero_bounds() {
        let cfg = FabricConfig::new("/tmp/fabric", 0, 1024, 8);
        match cfg.validate() {
            Err(FabricError::InvalidConfig(msg)) => assert!(msg.contains("retention_count")),
            other => panic!("Expected InvalidConfig, got {:?}", other),
        }

        let cfg = FabricConfig::new("/tmp/fabric", 8, 1024, 0);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_blank_module() {
        let cfg = FabricConfig::new("/tmp/fabric", 8, 1024, 8).with_allowed_modules(["planning", " "]);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_overflow_policy_serde_names() {
        let json = serde_json::to_string(&OverflowPolicy::BlockPublisher).unwrap();
        assert_eq!(json, "\"block-publisher\"");
        let parsed: OverflowPolicy = serde_json::from_str("\"drop-subscriber\"").unwrap();
        assert_eq!(parsed, OverflowPolicy::DropSubscriber);
    }

    #[test]
    fn test_optional_fields_default_when_deserialized() {
        let cfg: FabricConfig = serde_json::from_value(serde_json::json!({
            "archive_dir": "/var/lib/fabric",
            "retention_count": 2048,
            "payload_size_limit": 65536,
            "subscriber_backlog_limit": 256
        }))
        .unwrap();

        assert_eq!(cfg.subscriber_overflow_policy, OverflowPolicy::DropSubscriber);
        assert_eq!(cfg.segment_max_bytes, DEFAULT_SEGMENT_MAX_BYTES);
        assert_eq!(cfg.publish_block_timeout(), Duration::from_millis(250));
        assert!(cfg.module_allowlist.is_empty());
        assert!(cfg.validate().is_ok());
    }
}
