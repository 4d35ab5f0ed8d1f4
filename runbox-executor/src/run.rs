use crate::build::container_name;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::sandbox::{self, SandboxArgs, TIMEOUT_STATUS};
use crate::workspace::Workspace;

use std::io;

use tracing::info;

/// Exit code reported whenever a deadline fired.
pub const TIMEOUT_EXIT_CODE: i32 = TIMEOUT_STATUS;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub timed_out: bool,
}

/// The in-container path of the compiled artifact.
pub(crate) fn artifact_path(config: &Config, workspace: &Workspace) -> Result<String> {
    let artifact = &config.compiler.artifact_name;
    if !workspace.file(artifact).exists() {
        return Err(Error::Workspace {
            context: format!("artifact {} is missing", artifact),
            source: io::Error::from(io::ErrorKind::NotFound),
        });
    }
    Ok(format!("./{}", artifact))
}

/// Runs the compiled artifact with the supplied-input file as stdin.
#[tracing::instrument(skip_all, fields(id = %workspace.id()))]
pub async fn run(config: &Config, workspace: &Workspace) -> Result<ExecutionOutcome> {
    let bin = artifact_path(config, workspace)?;
    let stdin = workspace.file(config.input_name());
    let time_limit = config.limits.time_limit;

    let sandbox_args = SandboxArgs {
        name: container_name(workspace, "run"),
        workspace: workspace.path().to_owned(),
        bin,
        args: Vec::new(),
        stdin: true,
        tty: false,
        time_limit,
    };

    let output = sandbox::exec(config, &sandbox_args, Some(&stdin)).await?;

    let timed_out = output.is_timeout(time_limit);
    let exit_code = match output.exit_code() {
        _ if timed_out => TIMEOUT_EXIT_CODE,
        Some(code) => code,
        None => TIMEOUT_EXIT_CODE,
    };

    let outcome = ExecutionOutcome {
        stdout: output.stdout.to_string_lossy(),
        stderr: output.stderr.to_string_lossy(),
        exit_code,
        timed_out,
    };

    info!(
        exit_code = outcome.exit_code,
        timed_out = outcome.timed_out,
        stdout_truncated = output.stdout.truncated,
        stderr_truncated = output.stderr.truncated,
        "run finished"
    );
    Ok(outcome)
}
