//! One isolated invocation = one named `docker run` of the runner image.
//!
//! Every container gets the same caps: no network, memory ceiling without
//! swap, cpu share, pid ceiling, unprivileged user, read-only root, and the
//! workspace as the only bind mount. The deadline is enforced twice: by
//! `timeout` inside the container and by a supervisory timer around the
//! docker client.

use crate::config::Config;
use crate::error::{Error, Result};

use runbox_utils::os_cmd::OsCmd;

use std::fs::File;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use scopeguard::ScopeGuard;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::runtime::Handle;
use tokio::time;
use tracing::{debug, warn};

/// Exit status of `timeout` when the deadline fired.
pub const TIMEOUT_STATUS: i32 = 124;

/// Exit status of `timeout` when the child ignored SIGTERM and was killed
/// after the grace period.
pub const TIMEOUT_KILLED_STATUS: i32 = 128 + 9;

/// docker's own failure status: the container could not be created.
const DOCKER_FAILED_STATUS: i32 = 125;

pub const MOUNT_POINT: &str = "/workspace";

#[derive(Debug, Clone)]
pub struct SandboxArgs {
    pub name: String,
    pub workspace: PathBuf,
    pub bin: String,
    pub args: Vec<String>,
    pub stdin: bool,
    pub tty: bool,
    pub time_limit: u64, // milliseconds
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Capture {
    pub bytes: Vec<u8>,
    pub truncated: bool,
}

#[derive(Debug)]
pub struct SandboxOutput {
    /// `None` when the supervisor had to kill the docker client.
    pub status: Option<ExitStatus>,
    pub stdout: Capture,
    pub stderr: Capture,
    pub real_time: Duration,
}

/// A named container that may need to be force-removed.
#[derive(Debug, Clone)]
pub struct Container {
    pub docker: PathBuf,
    pub name: String,
}

fn fmt_secs(ms: u64) -> String {
    format!("{}.{:03}", ms / 1000, ms % 1000)
}

impl SandboxArgs {
    pub fn to_cmd(&self, config: &Config) -> OsCmd {
        let limits = &config.limits;
        let memory = limits.memory.as_u64().to_string();

        let mut volume = self.workspace.as_os_str().to_owned();
        volume.push(":");
        volume.push(MOUNT_POINT);
        volume.push(":rw");

        let mut cmd = OsCmd::new(&config.docker);
        cmd.arg("run").arg("--rm");
        cmd.opt("--name", &self.name);

        cmd.opt("--network", "none");
        cmd.opt("--memory", &memory);
        cmd.opt("--memory-swap", &memory);
        cmd.opt("--cpus", limits.cpus.to_string());
        cmd.opt("--pids-limit", limits.pids.to_string());
        cmd.opt("--user", format!("{}:{}", config.uid, config.gid));
        cmd.opt("--cap-drop", "ALL");
        cmd.opt("--security-opt", "no-new-privileges");
        cmd.arg("--read-only");
        cmd.opt("--tmpfs", "/tmp:rw,nosuid,size=64m");
        cmd.opt("-v", volume);
        cmd.opt("-w", MOUNT_POINT);

        cmd.arg_if(self.stdin, "-i");
        cmd.arg_if(self.tty, "-t");

        cmd.arg(&config.image);

        cmd.arg("timeout");
        cmd.opt("-k", fmt_secs(limits.kill_after));
        cmd.arg(fmt_secs(self.time_limit));
        cmd.arg(&self.bin);
        cmd.args(&self.args);

        cmd
    }

    pub fn container(&self, config: &Config) -> Container {
        Container {
            docker: config.docker.clone(),
            name: self.name.clone(),
        }
    }
}

impl Capture {
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

impl SandboxOutput {
    /// Exit code of the docker client, with signal deaths mapped to 128+n.
    pub fn exit_code(&self) -> Option<i32> {
        let status = self.status?;
        status.code().or_else(|| status.signal().map(|sig| 128 + sig))
    }

    pub fn is_success(&self) -> bool {
        self.exit_code() == Some(0)
    }

    /// Whether either deadline fired for an invocation limited to
    /// `time_limit` milliseconds.
    pub fn is_timeout(&self, time_limit: u64) -> bool {
        match self.exit_code() {
            None => true,
            Some(code) => is_timeout_status(code, self.real_time, time_limit),
        }
    }
}

pub(crate) fn is_timeout_status(code: i32, elapsed: Duration, time_limit: u64) -> bool {
    matches!(code, TIMEOUT_STATUS | TIMEOUT_KILLED_STATUS)
        && elapsed >= Duration::from_millis(time_limit)
}

impl Container {
    pub async fn remove(&self) {
        let result = Command::new(&self.docker)
            .arg("rm")
            .arg("-f")
            .arg(&self.name)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        match result {
            Ok(status) if status.success() => debug!(name = %self.name, "container removed"),
            Ok(status) => debug!(name = %self.name, ?status, "container was already gone"),
            Err(err) => warn!(name = %self.name, %err, "failed to remove container"),
        }
    }

    /// Removes the container without waiting. Usable from `Drop`.
    pub fn reap_detached(self) {
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { self.remove().await });
            }
            Err(_) => {
                let result = std::process::Command::new(&self.docker)
                    .arg("rm")
                    .arg("-f")
                    .arg(&self.name)
                    .stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .status();
                if let Err(err) = result {
                    warn!(name = %self.name, %err, "failed to remove container");
                }
            }
        }
    }
}

/// Reads `reader` to the end, keeping at most `limit` bytes. The rest is
/// drained so the writer never blocks on a full pipe.
pub(crate) async fn read_capped<R>(mut reader: R, limit: usize, capture: &mut Capture) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        let room = limit.saturating_sub(capture.bytes.len());
        if n > room {
            capture.truncated = true;
        }
        capture.bytes.extend_from_slice(&buf[..n.min(room)]);
    }
}

fn missing_pipe(name: &str) -> Error {
    Error::Isolation {
        context: format!("docker {} is not captured", name),
        source: io::Error::new(io::ErrorKind::BrokenPipe, name.to_owned()),
    }
}

/// Runs one container to completion, capturing stdout and stderr separately.
pub async fn exec(config: &Config, args: &SandboxArgs, stdin: Option<&Path>) -> Result<SandboxOutput> {
    let cmd = args.to_cmd(config);
    debug!("executing command\n{:?}\n", cmd);

    let stdin = match stdin {
        Some(path) => Stdio::from(File::open(path).map_err(Error::workspace(format!(
            "failed to open stdin file: path = {}",
            path.display()
        )))?),
        None => Stdio::null(),
    };

    let mut command = Command::from(cmd.to_command());
    command
        .stdin(stdin)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    // Armed until the container is known to be gone. Dropping this future
    // early (client disconnect) force-removes the container.
    let reaper = scopeguard::guard(args.container(config), Container::reap_detached);

    let t0 = Instant::now();
    let mut child = command
        .spawn()
        .map_err(Error::isolation("failed to spawn docker"))?;

    let child_stdout = child.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;
    let child_stderr = child.stderr.take().ok_or_else(|| missing_pipe("stderr"))?;

    let limit = config.limits.output.as_u64() as usize;
    let mut stdout = Capture::default();
    let mut stderr = Capture::default();

    let supervised = async {
        let (_, _, status) = tokio::try_join!(
            read_capped(child_stdout, limit, &mut stdout),
            read_capped(child_stderr, limit, &mut stderr),
            child.wait(),
        )?;
        io::Result::Ok(status)
    };

    let deadline = config.limits.supervisor_deadline(args.time_limit);
    let supervised = time::timeout(deadline, supervised).await;
    let status = match supervised {
        Ok(Ok(status)) => Some(status),
        Ok(Err(err)) => return Err(Error::isolation("failed to wait for docker")(err)),
        Err(_) => {
            warn!(name = %args.name, ?deadline, "supervisor deadline exceeded");
            if let Err(err) = child.kill().await {
                warn!(name = %args.name, %err, "failed to kill docker client");
            }
            reaper.remove().await;
            None
        }
    };
    let real_time = t0.elapsed();
    let _ = ScopeGuard::into_inner(reaper);

    let output = SandboxOutput {
        status,
        stdout,
        stderr,
        real_time,
    };

    debug!(
        name = %args.name,
        code = ?output.exit_code(),
        real_time = ?output.real_time,
        stdout_len = output.stdout.bytes.len(),
        stderr_len = output.stderr.bytes.len(),
        "container finished"
    );

    if output.exit_code() == Some(DOCKER_FAILED_STATUS) && output.stderr.bytes.starts_with(b"docker:") {
        return Err(Error::Isolation {
            context: "docker could not start the container".to_owned(),
            source: io::Error::new(io::ErrorKind::Other, output.stderr.to_string_lossy()),
        });
    }

    Ok(output)
}
