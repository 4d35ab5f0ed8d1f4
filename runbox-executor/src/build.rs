use crate::config::Config;
use crate::error::Result;
use crate::sandbox::{self, SandboxArgs};
use crate::workspace::Workspace;

use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildResult {
    /// Compiler diagnostics, verbatim. Never empty when the build failed.
    pub diagnostics: String,
    pub succeeded: bool,
    pub timed_out: bool,
}

pub fn container_name(workspace: &Workspace, stage: &str) -> String {
    format!("runbox-{}-{}", workspace.id().simple(), stage)
}

/// Compiles the workspace source into the artifact, inside a container.
#[tracing::instrument(skip_all, fields(id = %workspace.id()))]
pub async fn build(config: &Config, workspace: &Workspace) -> Result<BuildResult> {
    let compiler = &config.compiler;

    let mut args = compiler.flags.clone();
    args.push("-o".into());
    args.push(compiler.artifact_name.clone());
    args.push(compiler.source_name.clone());

    let sandbox_args = SandboxArgs {
        name: container_name(workspace, "build"),
        workspace: workspace.path().to_owned(),
        bin: compiler.bin.clone(),
        args,
        stdin: false,
        tty: false,
        time_limit: compiler.time_limit,
    };

    let output = sandbox::exec(config, &sandbox_args, None).await?;
    debug!(code = ?output.exit_code(), real_time = ?output.real_time, "compiler finished");

    let stderr = output.stderr.to_string_lossy();
    let stdout = output.stdout.to_string_lossy();

    let result = if output.is_timeout(compiler.time_limit) {
        let mut diagnostics = format!(
            "compilation exceeded the time limit of {} ms\n",
            compiler.time_limit
        );
        diagnostics.push_str(&stderr);
        BuildResult {
            diagnostics,
            succeeded: false,
            timed_out: true,
        }
    } else if output.is_success() {
        BuildResult {
            diagnostics: stderr,
            succeeded: true,
            timed_out: false,
        }
    } else {
        let diagnostics = if !stderr.is_empty() {
            stderr
        } else if !stdout.is_empty() {
            stdout
        } else {
            format!("compiler exited with status {}", output.exit_code().unwrap_or(-1))
        };
        BuildResult {
            diagnostics,
            succeeded: false,
            timed_out: false,
        }
    };

    info!(succeeded = result.succeeded, timed_out = result.timed_out, "build finished");
    Ok(result)
}
