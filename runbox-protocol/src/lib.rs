#![deny(clippy::all)]

pub mod error;
pub mod http;
pub mod ws_json;

pub use self::error::{ErrorCode, ErrorInfo};
