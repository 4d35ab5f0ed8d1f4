//! The interactive websocket bridge.
//!
//! One session runs one program: it waits for the source, builds it, then
//! relays terminal output to the client and client input to the terminal
//! until the program exits or the client leaves.

use crate::errors::error_info;
use crate::App;

use runbox_executor::{ControlFilter, ExecutionRequest, TerminalProcess, Workspace};
use runbox_protocol::ws_json::{ClientMessage, ServerMessage};
use runbox_protocol::{ErrorCode, ErrorInfo};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::SplitStream;
use futures::{StreamExt, TryFutureExt};
use tokio::sync::mpsc;
use tokio::task;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use warp::ws::{self, WebSocket};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingCode,
    Compiling,
    Running,
    Closed,
}

/// Registry entry, for liveness reporting only.
#[derive(Debug, Clone, Copy)]
pub struct SessionInfo {
    pub state: SessionState,
    pub opened_at: DateTime<Utc>,
}

pub struct InteractiveSession {
    id: Uuid,
    app: Arc<App>,
    state: SessionState,
    opened_at: DateTime<Utc>,
    workspace: Option<Workspace>,
    process: Option<TerminalProcess>,
    outbox: mpsc::Sender<ws::Message>,
}

enum Inbound {
    Message(ClientMessage),
    Invalid(String),
    Closed,
}

async fn next_inbound(stream: &mut SplitStream<WebSocket>) -> Inbound {
    loop {
        let msg = match stream.next().await {
            Some(Ok(m)) => m,
            Some(Err(err)) => {
                warn!(%err, "ws receive error");
                return Inbound::Closed;
            }
            None => return Inbound::Closed,
        };

        if msg.is_close() {
            return Inbound::Closed;
        }

        let text = match msg.to_str() {
            Ok(t) => t,
            Err(()) => {
                debug!("ignore non-text message");
                continue;
            }
        };

        return match serde_json::from_str::<ClientMessage>(text) {
            Ok(m) => Inbound::Message(m),
            Err(err) => Inbound::Invalid(err.to_string()),
        };
    }
}

async fn send(outbox: &mpsc::Sender<ws::Message>, msg: &ServerMessage) {
    let text = match serde_json::to_string(msg) {
        Ok(t) => t,
        Err(err) => return error!(%err, "failed to serialize server message"),
    };
    if outbox.send(ws::Message::text(text)).await.is_err() {
        debug!("ws outbox is closed");
    }
}

async fn fail(id: Uuid, outbox: &mpsc::Sender<ws::Message>, info: ErrorInfo) {
    warn!(%id, error = %info, "session failed");
    send(outbox, &ServerMessage::Error(info)).await;
}

/// Serves one websocket connection until the session closes.
pub async fn run(app: Arc<App>, socket: WebSocket) {
    let (ws_sink, mut ws_stream) = socket.split();

    let (tx, rx) = mpsc::channel::<ws::Message>(256);
    let forward = task::spawn(
        ReceiverStream::new(rx)
            .map(Ok)
            .forward(ws_sink)
            .inspect_err(|err| debug!(%err, "ws forward error")),
    );

    let mut session = InteractiveSession::new(app, tx);
    info!(id = %session.id, "session opened");

    session.drive(&mut ws_stream).await;
    session.close().await;
    drop(session);

    let _ = forward.await;
}

impl InteractiveSession {
    fn new(app: Arc<App>, outbox: mpsc::Sender<ws::Message>) -> Self {
        let id = Uuid::new_v4();
        let opened_at = Utc::now();
        let state = SessionState::AwaitingCode;
        app.sessions.insert(id, SessionInfo { state, opened_at });
        Self {
            id,
            app,
            state,
            opened_at,
            workspace: None,
            process: None,
            outbox,
        }
    }

    fn transition(&mut self, next: SessionState) {
        debug!(id = %self.id, from = ?self.state, to = ?next, "session state");
        self.state = next;
        if let Some(mut entry) = self.app.sessions.get_mut(&self.id) {
            entry.state = next;
        }
    }

    async fn drive(&mut self, stream: &mut SplitStream<WebSocket>) {
        let source_code = loop {
            match next_inbound(stream).await {
                Inbound::Message(ClientMessage::Code { source_code }) => break source_code,
                Inbound::Message(ClientMessage::Input { .. }) => {
                    warn!(id = %self.id, "input discarded: no program is running")
                }
                Inbound::Invalid(msg) => {
                    return fail(self.id, &self.outbox, ErrorInfo::new(ErrorCode::InvalidRequest, msg)).await;
                }
                Inbound::Closed => return,
            }
        };

        self.transition(SessionState::Compiling);
        if !self.compile(stream, source_code).await {
            return;
        }

        if let Err(err) = self.spawn() {
            return fail(self.id, &self.outbox, error_info(&err)).await;
        }
        self.transition(SessionState::Running);
        self.relay(stream).await
    }

    /// Prepares the workspace and builds the program while still watching the
    /// connection. Returns whether the session should go on running it.
    async fn compile(&mut self, stream: &mut SplitStream<WebSocket>, source_code: String) -> bool {
        let executor = self.app.executor.clone();

        let request = ExecutionRequest::interactive(source_code);
        match executor.prepare(&request) {
            Ok(ws) => self.workspace = Some(ws),
            Err(err) => {
                fail(self.id, &self.outbox, error_info(&err)).await;
                return false;
            }
        }

        let result = {
            let workspace = match self.workspace.as_ref() {
                Some(ws) => ws,
                None => return false,
            };
            let build = executor.build(workspace);
            tokio::pin!(build);

            loop {
                tokio::select! {
                    result = &mut build => break result,
                    inbound = next_inbound(stream) => match inbound {
                        Inbound::Message(ClientMessage::Code { .. }) => {
                            warn!(id = %self.id, "code discarded: already compiling")
                        }
                        Inbound::Message(ClientMessage::Input { .. }) => {
                            warn!(id = %self.id, "input discarded: program is compiling")
                        }
                        Inbound::Invalid(msg) => {
                            fail(self.id, &self.outbox, ErrorInfo::new(ErrorCode::InvalidRequest, msg)).await;
                            return false;
                        }
                        Inbound::Closed => {
                            info!(id = %self.id, "client left while compiling");
                            return false;
                        }
                    }
                }
            }
        };

        match result {
            Ok(build) if build.succeeded => true,
            Ok(build) => {
                info!(id = %self.id, timed_out = build.timed_out, "compile failed");
                let msg = ServerMessage::CompileError {
                    message: build.diagnostics,
                };
                send(&self.outbox, &msg).await;
                false
            }
            Err(err) => {
                fail(self.id, &self.outbox, error_info(&err)).await;
                false
            }
        }
    }

    fn spawn(&mut self) -> runbox_executor::Result<()> {
        let interactive = &self.app.config.interactive;
        let workspace = match self.workspace.as_ref() {
            Some(ws) => ws,
            None => return Ok(()),
        };
        let process = self.app.executor.spawn_terminal(
            workspace,
            interactive.rows,
            interactive.cols,
            interactive.time_limit,
        )?;
        self.process = Some(process);
        Ok(())
    }

    async fn relay(&mut self, stream: &mut SplitStream<WebSocket>) {
        let id = self.id;
        let outbox = &self.outbox;
        let process = match self.process.as_mut() {
            Some(p) => p,
            None => return,
        };
        let mut filter = ControlFilter::new(self.app.config.interactive.strip_control_sequences);

        loop {
            tokio::select! {
                chunk = process.read() => match chunk {
                    Some(bytes) => {
                        let data = filter.push(&bytes);
                        if !data.is_empty() {
                            send(outbox, &ServerMessage::Output { data }).await;
                        }
                    }
                    None => break,
                },
                inbound = next_inbound(stream) => match inbound {
                    Inbound::Message(ClientMessage::Input { data }) => {
                        match process.write(data.into_bytes()) {
                            Ok(true) => {}
                            Ok(false) => warn!(%id, "input dropped: program is not reading"),
                            Err(err) => warn!(%id, %err, "failed to forward input"),
                        }
                    }
                    Inbound::Message(ClientMessage::Code { .. }) => {
                        warn!(%id, "code discarded: a program is already running")
                    }
                    Inbound::Invalid(msg) => {
                        return fail(id, outbox, ErrorInfo::new(ErrorCode::InvalidRequest, msg)).await;
                    }
                    Inbound::Closed => {
                        return info!(%id, "client left while running");
                    }
                }
            }
        }

        let data = filter.finish();
        if !data.is_empty() {
            send(outbox, &ServerMessage::Output { data }).await;
        }

        let exit = process.wait().await;
        info!(%id, exit_code = exit.exit_code, timed_out = exit.timed_out, "program exited");
        let msg = ServerMessage::Exit {
            exit_code: exit.exit_code,
            timed_out: exit.timed_out,
        };
        send(outbox, &msg).await;
    }

    /// Kills the program if it still runs, then destroys the workspace.
    async fn close(&mut self) {
        if let Some(mut process) = self.process.take() {
            process.terminate().await;
        }
        if let Some(mut workspace) = self.workspace.take() {
            workspace.destroy();
        }
        self.transition(SessionState::Closed);
        self.app.sessions.remove(&self.id);

        let _ = self.outbox.send(ws::Message::close()).await;
        let lifetime = Utc::now() - self.opened_at;
        info!(id = %self.id, lifetime_ms = lifetime.num_milliseconds(), "session closed");
    }
}
