#![deny(clippy::all)]

pub mod config;
pub mod errors;
pub mod routes;
pub mod session;

use crate::config::Config;
use crate::session::SessionInfo;

use runbox_executor::Executor;

use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use dashmap::DashMap;
use tracing::info;
use uuid::Uuid;

pub struct App {
    pub config: Config,
    pub executor: Arc<Executor>,
    pub sessions: DashMap<Uuid, SessionInfo>,
    started: Instant,
}

impl App {
    pub fn new(config: Config) -> Result<Arc<Self>> {
        info!("initializing executor");
        let executor = Arc::new(Executor::new(config.executor.clone())?);
        info!(root = %executor.workspaces().root().display(), "executor is initialized");

        Ok(Arc::new(Self {
            config,
            executor,
            sessions: DashMap::new(),
            started: Instant::now(),
        }))
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }
}

pub async fn run() -> Result<()> {
    let app = App::new(Config::try_global()?.clone())?;
    serve(app, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
}

/// Serves `app` until `shutdown` resolves.
pub async fn serve(app: Arc<App>, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
    let host: IpAddr = app.config.server.host.parse()?;
    let addr = SocketAddr::new(host, app.config.server.port);

    let routes = routes::routes(app);
    let (addr, server) = warp::serve(routes).try_bind_with_graceful_shutdown(addr, async {
        shutdown.await;
        info!("shutting down");
    })?;
    info!("server is listening {}", addr);

    server.await;
    Ok(())
}
