use crate::errors::{self, reject_error, reject_executor};
use crate::session;
use crate::App;

use runbox_executor::{ExecutionRequest, Outcome};
use runbox_protocol::http::{ExecuteOutput, ExecuteRequest, HealthOutput};
use runbox_protocol::ErrorCode;

use std::convert::Infallible;
use std::sync::Arc;

use validator::Validate;
use warp::filters::ws;
use warp::reply::{self, Response};
use warp::{Filter, Rejection, Reply};

macro_rules! impl_filter{
    () => {
        impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone + Send + Sync + 'static
    };
    ($($ty:ty,)+) => {
        impl Filter<Extract = ($($ty,)+), Error = Infallible> + Clone + Send + Sync + 'static
    };
}

/// Room for JSON framing and escaping on top of the raw payload limits.
const JSON_OVERHEAD: u64 = 64 * 1024;

pub fn routes(app: Arc<App>) -> impl_filter!() {
    let prefix = warp::path("v1");
    prefix
        .and(execute_route(&app).or(health_route(&app)).or(interactive_route(&app)))
        .recover(errors::recover)
}

fn with_app(app: &Arc<App>) -> impl_filter!(Arc<App>,) {
    let app = app.clone();
    warp::any().map(move || app.clone())
}

/// Upper bound on a request body that can still carry valid payloads.
fn body_limit(app: &App) -> u64 {
    let limits = &app.config.executor.limits;
    (limits.source.as_u64() + limits.input.as_u64()) * 2 + JSON_OVERHEAD
}

fn execute_route(app: &Arc<App>) -> impl_filter!() {
    warp::path("execute")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::content_length_limit(body_limit(app)))
        .and(with_app(app))
        .and(warp::body::json())
        .and_then(execute)
}

fn health_route(app: &Arc<App>) -> impl_filter!() {
    warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_app(app))
        .and_then(health)
}

fn interactive_route(app: &Arc<App>) -> impl_filter!() {
    warp::path("interactive")
        .and(warp::path::end())
        .and(with_app(app))
        .and(warp::ws())
        .map(|app: Arc<App>, ws: ws::Ws| {
            let max_size = body_limit(&app) as usize;
            ws.max_message_size(max_size)
                .on_upgrade(move |socket| session::run(app, socket))
        })
}

/// POST /v1/execute
/// JSON: ExecuteRequest => ExecuteOutput
async fn execute(app: Arc<App>, body: ExecuteRequest) -> Result<Response, Rejection> {
    let limits = &app.config.executor.limits;

    if body.source_code.len() as u64 > limits.source.as_u64() {
        return Err(reject_error(
            ErrorCode::PayloadTooLarge,
            Some(format!("source code exceeds {}", limits.source)),
        ));
    }
    if let Some(ref input) = body.input {
        if input.len() as u64 > limits.input.as_u64() {
            return Err(reject_error(
                ErrorCode::PayloadTooLarge,
                Some(format!("input exceeds {}", limits.input)),
            ));
        }
    }
    if let Err(err) = body.validate() {
        return Err(reject_error(ErrorCode::InvalidRequest, Some(err.to_string())));
    }

    let request = ExecutionRequest::batch(body.source_code, body.input);
    let outcome = app.executor.execute(&request).await.map_err(reject_executor)?;

    let output = match outcome {
        Outcome::CompileFailed(build) => ExecuteOutput::compile_error(build.diagnostics),
        Outcome::Executed(run) => ExecuteOutput::executed(run.stdout, run.stderr, run.exit_code, run.timed_out),
    };
    Ok(reply::json(&output).into_response())
}

/// GET /v1/health
async fn health(app: Arc<App>) -> Result<Response, Rejection> {
    let output = HealthOutput {
        status: "ok".to_owned(),
        active_sessions: app.sessions.len() as u64,
        uptime_secs: app.uptime().as_secs(),
    };
    Ok(reply::json(&output).into_response())
}
