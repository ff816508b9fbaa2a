//! Configuration management with environment variable support.
//!
//! This module provides [`Config`] for loading and validating virtual file
//! settings from JSON files and environment variables.
//!
//! ## Environment Variables
//!
//! - `ENCTEMPFILE_BLOCK_SIZE`: Override block size in bytes
//! - `ENCTEMPFILE_BACKING`: Override backing store (`tempfile` or `memory`)
//! - `ENCTEMPFILE_CONFIG`: Override config file path

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::backing_store::BackingKind;
use crate::virtual_file::DEFAULT_BLOCK_SIZE;

/// Environment variable names for configuration overrides
pub const ENV_BLOCK_SIZE: &str = "ENCTEMPFILE_BLOCK_SIZE";
pub const ENV_BACKING: &str = "ENCTEMPFILE_BACKING";
pub const ENV_CONFIG_PATH: &str = "ENCTEMPFILE_CONFIG";

const SMALL_BLOCK_WARNING: usize = 4 * 1024;
const LARGE_BLOCK_WARNING: usize = 1024 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub block_size: usize,
    pub backing: BackingKind,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            backing: BackingKind::TempFile,
        }
    }
}

impl Config {
    /// Load config from file path
    pub fn load(path: &str) -> Result<Self> {
        let s =
            fs::read_to_string(path).with_context(|| format!("reading config file {}", path))?;
        let mut config: Config =
            serde_json::from_str(&s).with_context(|| format!("parsing config file {}", path))?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load config with environment variable overrides
    /// Priority: ENV vars > config file > defaults
    pub fn load_with_env(path: Option<&str>) -> Result<Self> {
        let config_path = path
            .map(String::from)
            .or_else(|| env::var(ENV_CONFIG_PATH).ok());

        let mut config = match config_path {
            Some(ref p) if Path::new(p).exists() => {
                info!(path = p, "loading config from file");
                let s = fs::read_to_string(p)
                    .with_context(|| format!("reading config file {}", p))?;
                serde_json::from_str(&s).with_context(|| format!("parsing config file {}", p))?
            }
            _ => {
                debug!("using default configuration");
                Config::default()
            }
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|name| env::var(name).ok())
    }

    /// Apply overrides from any variable source (the process environment in
    /// normal use).
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_BLOCK_SIZE) {
            let block_size = raw
                .trim()
                .parse::<usize>()
                .with_context(|| format!("{} must be a byte count, got '{}'", ENV_BLOCK_SIZE, raw))?;
            debug!(block_size, "overriding block_size from environment");
            self.block_size = block_size;
        }

        if let Some(raw) = lookup(ENV_BACKING) {
            let backing = raw
                .parse::<BackingKind>()
                .map_err(|e| anyhow::anyhow!("{}: {}", ENV_BACKING, e))?;
            debug!(backing = ?backing, "overriding backing from environment");
            self.backing = backing;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            bail!("block_size must be positive");
        }

        if self.block_size < SMALL_BLOCK_WARNING {
            warn!(
                block_size = self.block_size,
                "small block size: every block costs a key, a nonce and a tag"
            );
        }

        if self.block_size > LARGE_BLOCK_WARNING {
            warn!(
                block_size = self.block_size,
                "large block size: a whole block of plaintext is held in memory while in use"
            );
        }

        Ok(())
    }

    /// Create a new config with explicit values
    pub fn new(block_size: usize, backing: BackingKind) -> Self {
        Self {
            block_size,
            backing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.block_size, 16 * 1024 * 1024);
        assert_eq!(cfg.backing, BackingKind::TempFile);
        cfg.validate().expect("defaults are valid");
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("config.json");
        fs::write(&path, r#"{ "block_size": 5000 }"#).expect("write");

        // Same steps as `Config::load`, isolated from the process environment
        let s = fs::read_to_string(&path).expect("read");
        let mut cfg: Config = serde_json::from_str(&s).expect("parse");
        cfg.apply_overrides_from(|_| None).expect("overrides");
        cfg.validate().expect("valid");
        assert_eq!(cfg.block_size, 5000);
        assert_eq!(cfg.backing, BackingKind::TempFile);
    }

    #[test]
    fn test_overrides() {
        let env = vars(&[(ENV_BLOCK_SIZE, "8192"), (ENV_BACKING, "memory")]);
        let mut cfg = Config::default();
        cfg.apply_overrides_from(|name| env.get(name).cloned())
            .expect("overrides");
        assert_eq!(cfg, Config::new(8192, BackingKind::Memory));
    }

    #[test]
    fn test_bad_overrides_rejected() {
        let env = vars(&[(ENV_BLOCK_SIZE, "lots")]);
        let mut cfg = Config::default();
        assert!(cfg.apply_overrides_from(|name| env.get(name).cloned()).is_err());

        let env = vars(&[(ENV_BACKING, "tape")]);
        assert!(cfg.apply_overrides_from(|name| env.get(name).cloned()).is_err());
    }

    #[test]
    fn test_zero_block_size_invalid() {
        assert!(Config::new(0, BackingKind::Memory).validate().is_err());
    }
}
