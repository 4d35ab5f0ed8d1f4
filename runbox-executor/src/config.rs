use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use ubyte::ByteUnit;
use validator::Validate;

#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
pub struct Config {
    pub workspace_root: PathBuf,

    pub docker: PathBuf,

    #[validate(length(min = 1))]
    pub image: String,

    pub uid: u32,

    pub gid: u32,

    #[validate]
    pub compiler: Compiler,

    #[validate]
    pub limits: Limits,
}

#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
pub struct Compiler {
    #[validate(length(min = 1))]
    pub bin: String,

    pub flags: Vec<String>,

    #[validate(length(min = 1))]
    pub source_name: String,

    #[validate(length(min = 1))]
    pub artifact_name: String,

    #[validate(range(min = 1000, max = 120000))]
    pub time_limit: u64, // milliseconds
}

#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
pub struct Limits {
    pub source: ByteUnit,

    pub input: ByteUnit,

    pub output: ByteUnit,

    pub memory: ByteUnit,

    #[validate(range(min = 0.01, max = 64.0))]
    pub cpus: f64,

    #[validate(range(min = 1, max = 4096))]
    pub pids: u32,

    #[validate(range(min = 100, max = 600000))]
    pub time_limit: u64, // milliseconds

    #[validate(range(min = 100, max = 10000))]
    pub kill_after: u64, // milliseconds

    #[validate(range(min = 100, max = 60000))]
    pub supervisor_grace: u64, // milliseconds
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Config> {
        let content = fs::read_to_string(&path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Config> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn input_name(&self) -> &str {
        "input.txt"
    }
}

impl Limits {
    /// The outer deadline for an invocation whose in-container deadline is
    /// `inner_ms`. Always strictly larger than `inner_ms + kill_after`.
    pub fn supervisor_deadline(&self, inner_ms: u64) -> Duration {
        Duration::from_millis(inner_ms + self.kill_after + self.supervisor_grace)
    }
}

#[cfg(test)]
pub(crate) const TEST_CONFIG: &str = r#"
workspace_root = "/tmp/runbox-test"
docker = "/nonexistent/docker"
image = "runbox-runner:latest"
uid = 1000
gid = 1000

[compiler]
bin = "g++"
flags = ["-std=c++17", "-Wall", "-O2"]
source_name = "main.cpp"
artifact_name = "main"
time_limit = 10000

[limits]
source = "1 MiB"
input = "1 MiB"
output = "64 KiB"
memory = "256 MiB"
cpus = 0.5
pids = 64
time_limit = 5000
kill_after = 1000
supervisor_grace = 3000
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_config() {
        let config = Config::from_toml(TEST_CONFIG).unwrap();
        assert_eq!(config.limits.memory.as_u64(), 256 * 1024 * 1024);
        assert_eq!(config.limits.output.as_u64(), 64 * 1024);
        assert_eq!(config.compiler.flags, ["-std=c++17", "-Wall", "-O2"]);
        assert_eq!(
            config.limits.supervisor_deadline(5000),
            Duration::from_millis(9000)
        );
    }

    #[test]
    fn reject_invalid_limits() {
        let content = TEST_CONFIG.replace("pids = 64", "pids = 0");
        assert!(Config::from_toml(&content).is_err());

        let content = TEST_CONFIG.replace("cpus = 0.5", "cpus = 0.0");
        assert!(Config::from_toml(&content).is_err());
    }
}
