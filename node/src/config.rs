// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Node configuration.
//!
//! Loaded from the TOML file named by `FABRIC_CONFIG` (if set), then
//! overridden by `FABRIC_BIND_ADDR`, `FABRIC_AUTH_TOKEN` and
//! `FABRIC_ARCHIVE_DIR`.

use experience_fabric::FabricConfig;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_RETENTION_COUNT: usize = 2048;
pub const DEFAULT_PAYLOAD_SIZE_LIMIT: usize = 64 * 1024;
pub const DEFAULT_SUBSCRIBER_BACKLOG: usize = 256;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Invalid value for {var}: {value:?}")]
    InvalidEnv { var: &'static str, value: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    #[serde(default)]
    pub auth_token: Option<String>,
    pub fabric: FabricConfig,
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 3000))
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            auth_token: None,
            fabric: FabricConfig::new(
                "./fabric-data",
                DEFAULT_RETENTION_COUNT,
                DEFAULT_PAYLOAD_SIZE_LIMIT,
                DEFAULT_SUBSCRIBER_BACKLOG,
            )
            .with_allowed_modules(["planning", "reasoning", "action", "knowledge", "learning"]),
        }
    }
}

impl NodeConfig {
    pub fn from_toml_str(raw: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw, path)
    }

    /// File named by `FABRIC_CONFIG` (or defaults), then environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut cfg = match std::env::var_os("FABRIC_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        cfg.apply_overrides(|var| std::env::var(var).ok())?;
        Ok(cfg)
    }

    /// Apply overrides from `lookup` (the process environment in `load`).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        if let Some(value) = lookup("FABRIC_BIND_ADDR") {
            self.bind_addr = value.parse().map_err(|_| ConfigError::InvalidEnv {
                var: "FABRIC_BIND_ADDR",
                value,
            })?;
        }
        if let Some(token) = lookup("FABRIC_AUTH_TOKEN") {
            self.auth_token = Some(token).filter(|t| !t.is_empty());
        }
        if let Some(dir) = lookup("FABRIC_ARCHIVE_DIR") {
            self.fabric.archive_dir = PathBuf::from(dir);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use experience_fabric::OverflowPolicy;

    #[test]
    fn test_parse_toml() {
        let raw = r#"
            bind_addr = "0.0.0.0:8080"
            auth_token = "secret"

            [fabric]
            archive_dir = "/var/lib/fabric"
            retention_count = 512
            payload_size_limit = 32768
            subscriber_backlog_limit = 64
            subscriber_overflow_policy = "block-publisher"
            module_allowlist = ["planning", "reasoning"]
            sensitive_fields = ["api_key"]
        "#;
        let cfg = NodeConfig::from_toml_str(raw, Path::new("fabric.toml")).unwrap();
        assert_eq!(cfg.bind_addr.port(), 8080);
        assert_eq!(cfg.auth_token.as_deref(), Some("secret"));
        assert_eq!(cfg.fabric.retention_count, 512);
        assert_eq!(cfg.fabric.subscriber_overflow_policy, OverflowPolicy::BlockPublisher);
        assert!(cfg.fabric.module_allowlist.contains("reasoning"));
        assert!(cfg.fabric.validate().is_ok());
    }

    #[test]
    fn test_example_config_parses() {
        let cfg = NodeConfig::from_toml_str(
            include_str!("../fabric.example.toml"),
            Path::new("fabric.example.toml"),
        )
        .unwrap();
        assert_eq!(cfg.fabric.retention_count, DEFAULT_RETENTION_COUNT);
        assert_eq!(cfg.fabric.payload_size_limit, DEFAULT_PAYLOAD_SIZE_LIMIT);
        assert_eq!(cfg.fabric.subscriber_backlog_limit, DEFAULT_SUBSCRIBER_BACKLOG);
        assert!(cfg.fabric.validate().is_ok());
    }

    #[test]
    fn test_missing_required_bound_fails() {
        let raw = r#"
            [fabric]
            archive_dir = "/tmp/f"
            retention_count = 16
            subscriber_backlog_limit = 4
        "#;
        assert!(matches!(
            NodeConfig::from_toml_str(raw, Path::new("x.toml")),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_env_overrides() {
        let mut cfg = NodeConfig::default();
        cfg.apply_overrides(|var| match var {
            "FABRIC_BIND_ADDR" => Some("127.0.0.1:9999".to_string()),
            "FABRIC_AUTH_TOKEN" => Some("t0k".to_string()),
            "FABRIC_ARCHIVE_DIR" => Some("/data/fabric".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(cfg.bind_addr.port(), 9999);
        assert_eq!(cfg.auth_token.as_deref(), Some("t0k"));
        assert_eq!(cfg.fabric.archive_dir, PathBuf::from("/data/fabric"));

        let err = cfg.apply_overrides(|var| (var == "FABRIC_BIND_ADDR").then(|| "nope".to_string()));
        assert!(matches!(err, Err(ConfigError::InvalidEnv { .. })));
    }
}
