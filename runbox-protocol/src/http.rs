use serde::{Deserialize, Serialize};
use validator::Validate;

/// POST /v1/execute
#[derive(Debug, Validate, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    #[validate(length(min = 1))]
    pub source_code: String,

    #[serde(default, alias = "suppliedInput")]
    pub input: Option<String>,
}

/// Exactly one side is populated: either `compile_error` is non-empty, or
/// the run fields (`stdout`, `stderr`, `exit_code`, `timed_out`) are.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteOutput {
    pub stdout: String,
    pub stderr: String,
    pub compile_error: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

impl ExecuteOutput {
    pub fn compile_error(message: String) -> Self {
        Self {
            compile_error: message,
            ..Self::default()
        }
    }

    pub fn executed(stdout: String, stderr: String, exit_code: i32, timed_out: bool) -> Self {
        Self {
            stdout,
            stderr,
            compile_error: String::new(),
            exit_code: Some(exit_code),
            timed_out,
        }
    }
}

/// GET /v1/health
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthOutput {
    pub status: String,
    pub active_sessions: u64,
    pub uptime_secs: u64,
}
