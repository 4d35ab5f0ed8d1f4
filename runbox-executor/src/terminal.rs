//! A program attached to a pseudo-terminal, for interactive sessions.
//!
//! The pty is driven from blocking threads. Output chunks arrive on a bounded
//! channel in emission order; input is written in arrival order. A
//! supervisor task kills the process once its deadline passes.

use crate::error::{Error, Result};
use crate::run::TIMEOUT_EXIT_CODE;
use crate::sandbox::{is_timeout_status, Container};

use runbox_utils::os_cmd::OsCmd;

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{self, JoinHandle};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
pub struct TerminalOptions {
    pub rows: u16,
    pub cols: u16,
    /// In-program deadline, milliseconds.
    pub time_limit: u64,
    /// Hard deadline after which the supervisor kills the process.
    pub deadline: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalExit {
    pub exit_code: i32,
    pub timed_out: bool,
}

/// How long `terminate` waits for a killed process to be reaped.
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TerminalProcess {
    input: mpsc::Sender<Vec<u8>>,
    output: mpsc::Receiver<Vec<u8>>,
    exit: Option<oneshot::Receiver<i32>>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    supervisor: JoinHandle<()>,
    deadline_fired: Arc<AtomicBool>,
    container: Option<Container>,
    pid: Option<u32>,
    started: Instant,
    time_limit: u64,
    finished: bool,
    _master: Box<dyn MasterPty + Send>,
}

fn pty_error(context: &'static str) -> impl FnOnce(anyhow::Error) -> Error {
    move |err| Error::Isolation {
        context: context.to_owned(),
        source: io::Error::new(io::ErrorKind::Other, err.to_string()),
    }
}

impl TerminalProcess {
    /// Starts `cmd` on a fresh pty. `container` names the container behind
    /// `cmd`, if any, so that it can be removed when the process is killed.
    pub fn spawn(cmd: &OsCmd, container: Option<Container>, opts: &TerminalOptions) -> Result<Self> {
        debug!("spawning terminal command\n{:?}\n", cmd);

        let pair = native_pty_system()
            .openpty(PtySize {
                rows: opts.rows,
                cols: opts.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(pty_error("failed to open pty"))?;

        let mut builder = CommandBuilder::new(&cmd.bin);
        builder.args(&cmd.args);

        let mut child = pair
            .slave
            .spawn_command(builder)
            .map_err(pty_error("failed to spawn terminal process"))?;
        let started = Instant::now();
        let pid = child.process_id();
        // The reader only sees EOF once every slave handle is closed.
        drop(pair.slave);

        let killer = child.clone_killer();
        let mut supervisor_killer = child.clone_killer();

        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(pty_error("failed to open pty reader"))?;
        let mut writer = pair
            .master
            .take_writer()
            .map_err(pty_error("failed to open pty writer"))?;

        let (output_tx, output_rx) = mpsc::channel::<Vec<u8>>(64);
        task::spawn_blocking(move || {
            let mut buf = [0u8; 4096];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if output_tx.blocking_send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                    // EIO once the slave side is gone
                    Err(_) => break,
                }
            }
        });

        let (input_tx, mut input_rx) = mpsc::channel::<Vec<u8>>(64);
        task::spawn_blocking(move || {
            while let Some(bytes) = input_rx.blocking_recv() {
                if let Err(err) = writer.write_all(&bytes).and_then(|()| writer.flush()) {
                    debug!(%err, "terminal input closed");
                    break;
                }
            }
        });

        let (exit_tx, exit_rx) = oneshot::channel::<i32>();
        task::spawn_blocking(move || {
            let code = match child.wait() {
                Ok(status) => status.exit_code() as i32,
                Err(err) => {
                    warn!(%err, "failed to wait for terminal process");
                    -1
                }
            };
            let _ = exit_tx.send(code);
        });

        let deadline_fired = Arc::new(AtomicBool::new(false));
        let supervisor = {
            let fired = deadline_fired.clone();
            let container = container.clone();
            let deadline = opts.deadline;
            tokio::spawn(async move {
                tokio::time::sleep(deadline).await;
                warn!(?deadline, "terminal deadline exceeded");
                fired.store(true, Ordering::SeqCst);
                if let Err(err) = supervisor_killer.kill() {
                    debug!(%err, "terminal process already gone");
                }
                if let Some(container) = container {
                    container.remove().await;
                }
            })
        };

        Ok(Self {
            input: input_tx,
            output: output_rx,
            exit: Some(exit_rx),
            killer,
            supervisor,
            deadline_fired,
            container,
            pid,
            started,
            time_limit: opts.time_limit,
            finished: false,
            _master: pair.master,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Queues bytes for the program's terminal without waiting. Returns
    /// `Ok(false)` when the program has stopped draining its input and the
    /// bytes were dropped.
    pub fn write(&self, data: Vec<u8>) -> Result<bool> {
        match self.input.try_send(data) {
            Ok(()) => Ok(true),
            Err(TrySendError::Full(_)) => Ok(false),
            Err(TrySendError::Closed(_)) => Err(Error::Isolation {
                context: "terminal input is closed".to_owned(),
                source: io::Error::from(io::ErrorKind::BrokenPipe),
            }),
        }
    }

    /// Next chunk of terminal output. `None` once the terminal is closed.
    pub async fn read(&mut self) -> Option<Vec<u8>> {
        self.output.recv().await
    }

    /// Waits for the program to exit.
    pub async fn wait(&mut self) -> TerminalExit {
        let code = match self.exit.take() {
            Some(rx) => rx.await.unwrap_or(-1),
            None => -1,
        };
        self.finished = true;
        self.supervisor.abort();

        let elapsed = self.started.elapsed();
        let timed_out = self.deadline_fired.load(Ordering::SeqCst)
            || is_timeout_status(code, elapsed, self.time_limit);

        TerminalExit {
            exit_code: if timed_out { TIMEOUT_EXIT_CODE } else { code },
            timed_out,
        }
    }

    /// Kills the process and waits until both the process and its container
    /// are gone.
    pub async fn terminate(&mut self) {
        if self.finished {
            return;
        }
        self.supervisor.abort();
        if let Err(err) = self.killer.kill() {
            debug!(%err, "terminal process already gone");
        }
        if let Some(container) = self.container.take() {
            container.remove().await;
        }
        if let Some(rx) = self.exit.take() {
            if tokio::time::timeout(REAP_TIMEOUT, rx).await.is_err() {
                warn!(pid = ?self.pid, "terminal process did not exit after kill");
            }
        }
        self.finished = true;
    }

    pub fn kill(&mut self) {
        if let Err(err) = self.killer.kill() {
            debug!(%err, "terminal process already gone");
        }
        if let Some(container) = self.container.take() {
            container.reap_detached();
        }
    }
}

impl Drop for TerminalProcess {
    fn drop(&mut self) {
        self.supervisor.abort();
        if !self.finished {
            self.kill();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::ControlFilter;

    use nix::sys::signal;
    use nix::unistd::Pid;

    fn is_alive(pid: u32) -> bool {
        signal::kill(Pid::from_raw(pid as i32), None).is_ok()
    }

    fn sleeper() -> OsCmd {
        let mut cmd = OsCmd::new("/bin/sh");
        cmd.arg("-c").arg("exec sleep 30");
        cmd
    }

    fn options(deadline: Duration) -> TerminalOptions {
        TerminalOptions {
            rows: 24,
            cols: 80,
            time_limit: 5000,
            deadline,
        }
    }

    async fn read_all(process: &mut TerminalProcess) -> String {
        let mut filter = ControlFilter::new(true);
        let mut text = String::new();
        while let Some(chunk) = process.read().await {
            text.push_str(&filter.push(&chunk));
        }
        text.push_str(&filter.finish());
        text
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn echo_through_terminal() {
        let mut cmd = OsCmd::new("/bin/sh");
        cmd.arg("-c").arg("read x; echo got:$x");

        let mut process = TerminalProcess::spawn(&cmd, None, &options(Duration::from_secs(10))).unwrap();
        assert!(process.write(b"hello\n".to_vec()).unwrap());

        let text = read_all(&mut process).await;
        assert!(text.contains("got:hello"), "{:?}", text);
        assert!(!text.contains('\r'));

        let exit = process.wait().await;
        assert_eq!(exit, TerminalExit { exit_code: 0, timed_out: false });
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn exit_code_is_reported() {
        let mut cmd = OsCmd::new("/bin/sh");
        cmd.arg("-c").arg("exit 3");

        let mut process = TerminalProcess::spawn(&cmd, None, &options(Duration::from_secs(10))).unwrap();
        let _ = read_all(&mut process).await;
        let exit = process.wait().await;
        assert_eq!(exit.exit_code, 3);
        assert!(!exit.timed_out);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn deadline_kills_the_process() {
        let mut cmd = OsCmd::new("/bin/sh");
        cmd.arg("-c").arg("exec sleep 30");

        let t0 = Instant::now();
        let mut process = TerminalProcess::spawn(&cmd, None, &options(Duration::from_millis(300))).unwrap();
        let _ = read_all(&mut process).await;
        let exit = process.wait().await;

        assert!(exit.timed_out);
        assert_eq!(exit.exit_code, TIMEOUT_EXIT_CODE);
        assert!(t0.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn terminate_reaps_the_process() {
        let mut process = TerminalProcess::spawn(&sleeper(), None, &options(Duration::from_secs(60))).unwrap();
        let pid = process.pid().unwrap();
        assert!(is_alive(pid));

        let t0 = Instant::now();
        process.terminate().await;
        assert!(t0.elapsed() < REAP_TIMEOUT);
        assert!(!is_alive(pid));

        // idempotent, and drop after terminate does nothing more
        process.terminate().await;
        drop(process);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn drop_kills_the_process() {
        let process = TerminalProcess::spawn(&sleeper(), None, &options(Duration::from_secs(60))).unwrap();
        let pid = process.pid().unwrap();
        drop(process);

        let t0 = Instant::now();
        while is_alive(pid) {
            assert!(t0.elapsed() < Duration::from_secs(5), "pid {} survived drop", pid);
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unread_input_never_blocks() {
        let mut process = TerminalProcess::spawn(&sleeper(), None, &options(Duration::from_secs(60))).unwrap();
        let pid = process.pid().unwrap();

        let line = b"0123456789012345678901234567890123456789\n".to_vec();
        let mut dropped = 0;
        for _ in 0..2000 {
            if !process.write(line.clone()).unwrap() {
                dropped += 1;
            }
        }
        // 80 KiB against a program that never reads: the pty and the queue fill up
        assert!(dropped > 0);

        let t0 = Instant::now();
        process.terminate().await;
        assert!(t0.elapsed() < REAP_TIMEOUT);
        assert!(!is_alive(pid));
    }
}
