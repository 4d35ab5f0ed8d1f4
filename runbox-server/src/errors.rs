use runbox_executor::Error as ExecutorError;
use runbox_protocol::{ErrorCode, ErrorInfo};

use warp::hyper::StatusCode;
use warp::reject::{self, Reject};
use warp::{reply, Rejection, Reply};

#[derive(Debug)]
struct Error(ErrorInfo);
impl Reject for Error {}

pub fn reject_error(code: ErrorCode, message: Option<String>) -> Rejection {
    warp::reject::custom(Error(ErrorInfo { code, message }))
}

pub fn reject_executor(err: ExecutorError) -> Rejection {
    warp::reject::custom(Error(error_info(&err)))
}

/// The wire form of a pipeline failure.
pub fn error_info(err: &ExecutorError) -> ErrorInfo {
    let code = match err {
        ExecutorError::InvalidInput(_) => ErrorCode::InvalidRequest,
        ExecutorError::Workspace { .. } => ErrorCode::WorkspaceFailure,
        ExecutorError::Isolation { .. } => ErrorCode::IsolationFailure,
    };
    ErrorInfo::new(code, err.to_string())
}

pub async fn recover(rejection: Rejection) -> Result<impl Reply, Rejection> {
    let info = if let Some(Error(err)) = rejection.find() {
        err.clone()
    } else if rejection.find::<reject::PayloadTooLarge>().is_some() {
        ErrorInfo::new(ErrorCode::PayloadTooLarge, "request body is too large")
    } else if let Some(err) = rejection.find::<warp::body::BodyDeserializeError>() {
        ErrorInfo::new(ErrorCode::InvalidRequest, err.to_string())
    } else {
        return Err(rejection);
    };
    let status: StatusCode = info.code.as_status();
    Ok(reply::with_status(reply::json(&info), status))
}
