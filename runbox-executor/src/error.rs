use std::io;

/// Failures of the pipeline itself. Compile errors, crashes and timeouts of
/// the submitted program are results, not errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("workspace failure: {context}")]
    Workspace {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("isolation failure: {context}")]
    Isolation {
        context: String,
        #[source]
        source: io::Error,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub(crate) fn workspace(context: impl Into<String>) -> impl FnOnce(io::Error) -> Self {
        let context = context.into();
        move |source| Error::Workspace { context, source }
    }

    pub(crate) fn isolation(context: impl Into<String>) -> impl FnOnce(io::Error) -> Self {
        let context = context.into();
        move |source| Error::Isolation { context, source }
    }
}
