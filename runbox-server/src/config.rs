use std::fs;
use std::path::Path;

use anyhow::{format_err, Result};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
pub struct Config {
    #[validate]
    pub server: Server,

    #[validate]
    pub executor: runbox_executor::Config,

    #[validate]
    pub interactive: Interactive,
}

#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
pub struct Server {
    #[validate(length(min = 1))]
    pub host: String,

    pub port: u16,
}

#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
pub struct Interactive {
    #[validate(range(min = 1000, max = 3600000))]
    pub time_limit: u64, // milliseconds

    pub strip_control_sequences: bool,

    #[validate(range(min = 1, max = 1000))]
    pub rows: u16,

    #[validate(range(min = 1, max = 1000))]
    pub cols: u16,
}

static GLOBAL_CONFIG: OnceCell<Config> = OnceCell::new();

impl Config {
    pub fn from_toml(content: &str) -> Result<Config> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn init_from_file(path: impl AsRef<Path>) -> Result<&'static Config> {
        let content = fs::read_to_string(&path)?;
        let config = Self::from_toml(&content)?;
        let _ = GLOBAL_CONFIG.set(config);
        Self::try_global()
    }

    pub fn try_global() -> Result<&'static Config> {
        GLOBAL_CONFIG
            .get()
            .ok_or_else(|| format_err!("config is not initialized"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = include_str!("../../runbox.toml");

    #[test]
    fn parse_sample_config() {
        let config = Config::from_toml(SAMPLE).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.executor.compiler.bin, "g++");
        assert_eq!(config.executor.limits.source.as_u64(), 1024 * 1024);
        assert_eq!(config.interactive.time_limit, 300000);
        assert!(config.interactive.strip_control_sequences);
    }

    #[test]
    fn nested_sections_are_validated() {
        let content = SAMPLE.replace("image = \"runbox-runner:latest\"", "image = \"\"");
        assert!(Config::from_toml(&content).is_err());

        let content = SAMPLE.replace("rows = 24", "rows = 0");
        assert!(Config::from_toml(&content).is_err());
    }
}
