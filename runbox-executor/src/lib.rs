#![deny(clippy::all)]

mod build;
mod config;
mod error;
mod filter;
mod run;
mod sandbox;
mod terminal;
mod workspace;

pub use self::build::BuildResult;
pub use self::config::{Compiler, Config, Limits};
pub use self::error::{Error, Result};
pub use self::filter::ControlFilter;
pub use self::run::{ExecutionOutcome, TIMEOUT_EXIT_CODE};
pub use self::sandbox::Container;
pub use self::terminal::{TerminalExit, TerminalOptions, TerminalProcess};
pub use self::workspace::{Workspace, WorkspaceManager};

use self::sandbox::SandboxArgs;

use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Batch,
    Interactive,
}

#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub source_code: String,
    /// Only meaningful in batch mode.
    pub supplied_input: Option<String>,
    pub mode: Mode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    CompileFailed(BuildResult),
    Executed(ExecutionOutcome),
}

/// Owns the configuration and the workspace root. Cheap to share behind an
/// `Arc`; every request gets its own workspace.
#[derive(Debug)]
pub struct Executor {
    config: Config,
    workspaces: WorkspaceManager,
}

impl ExecutionRequest {
    pub fn batch(source_code: impl Into<String>, supplied_input: Option<String>) -> Self {
        Self {
            source_code: source_code.into(),
            supplied_input,
            mode: Mode::Batch,
        }
    }

    pub fn interactive(source_code: impl Into<String>) -> Self {
        Self {
            source_code: source_code.into(),
            supplied_input: None,
            mode: Mode::Interactive,
        }
    }
}

impl Executor {
    pub fn new(config: Config) -> Result<Self> {
        let workspaces = WorkspaceManager::new(config.workspace_root.clone(), config.uid, config.gid)?;
        Ok(Self { config, workspaces })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn workspaces(&self) -> &WorkspaceManager {
        &self.workspaces
    }

    /// Checks a request before any resource is allocated for it.
    pub fn validate(&self, request: &ExecutionRequest) -> Result<()> {
        let limits = &self.config.limits;

        if request.source_code.is_empty() {
            return Err(Error::InvalidInput("source code is empty".into()));
        }
        if request.source_code.len() as u64 > limits.source.as_u64() {
            return Err(Error::InvalidInput(format!(
                "source code exceeds {} bytes",
                limits.source.as_u64()
            )));
        }
        match (request.mode, &request.supplied_input) {
            (Mode::Interactive, Some(_)) => {
                return Err(Error::InvalidInput(
                    "interactive runs take input from the session".into(),
                ))
            }
            (Mode::Batch, Some(input)) if input.len() as u64 > limits.input.as_u64() => {
                return Err(Error::InvalidInput(format!(
                    "input exceeds {} bytes",
                    limits.input.as_u64()
                )))
            }
            _ => {}
        }
        Ok(())
    }

    /// Validates the request, then allocates a workspace holding the source
    /// and, in batch mode, the supplied-input file.
    pub fn prepare(&self, request: &ExecutionRequest) -> Result<Workspace> {
        self.validate(request)?;

        let workspace = self.workspaces.allocate(Uuid::new_v4())?;
        workspace.write_file(&self.config.compiler.source_name, &request.source_code)?;
        if request.mode == Mode::Batch {
            let input = request.supplied_input.as_deref().unwrap_or("");
            workspace.write_file(self.config.input_name(), input)?;
        }
        Ok(workspace)
    }

    pub async fn build(&self, workspace: &Workspace) -> Result<BuildResult> {
        build::build(&self.config, workspace).await
    }

    pub async fn run(&self, workspace: &Workspace) -> Result<ExecutionOutcome> {
        run::run(&self.config, workspace).await
    }

    /// Starts the built artifact attached to a terminal. The process gets a
    /// container of its own, removed when the process is killed.
    pub fn spawn_terminal(&self, workspace: &Workspace, rows: u16, cols: u16, time_limit: u64) -> Result<TerminalProcess> {
        let bin = run::artifact_path(&self.config, workspace)?;
        let args = SandboxArgs {
            name: build::container_name(workspace, "run"),
            workspace: workspace.path().to_owned(),
            bin,
            args: Vec::new(),
            stdin: true,
            tty: true,
            time_limit,
        };
        let opts = TerminalOptions {
            rows,
            cols,
            time_limit,
            deadline: self.config.limits.supervisor_deadline(time_limit),
        };
        let cmd = args.to_cmd(&self.config);
        TerminalProcess::spawn(&cmd, Some(args.container(&self.config)), &opts)
    }

    /// Runs a batch request end to end. The workspace is gone when this
    /// returns, whatever the result.
    #[tracing::instrument(skip_all, err)]
    pub async fn execute(&self, request: &ExecutionRequest) -> Result<Outcome> {
        if request.mode != Mode::Batch {
            return Err(Error::InvalidInput("interactive requests need a session".into()));
        }

        let mut workspace = self.prepare(request)?;
        let id = workspace.id();
        let result = self.build_and_run(&workspace).await;
        workspace.destroy();

        match &result {
            Ok(Outcome::CompileFailed(build)) => info!(%id, timed_out = build.timed_out, "compile failed"),
            Ok(Outcome::Executed(outcome)) => {
                info!(%id, exit_code = outcome.exit_code, timed_out = outcome.timed_out, "executed")
            }
            Err(err) => warn!(%id, %err, "execution failed"),
        }
        result
    }

    async fn build_and_run(&self, workspace: &Workspace) -> Result<Outcome> {
        let build = self.build(workspace).await?;
        if !build.succeeded {
            return Ok(Outcome::CompileFailed(build));
        }
        let outcome = self.run(workspace).await?;
        Ok(Outcome::Executed(outcome))
    }
}
