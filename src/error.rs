//! Unified error type.

/// The error type returned by keel's fallible setup operations.
///
/// Application-level failures (404, 422, a handler blowing up) are
/// [`Fault`](crate::Fault)s and always end up as a [`Response`](crate::Response).
/// This type surfaces the failures for which no response can exist: binding a
/// port, accepting a connection, or assembling a middleware stack that names
/// something nobody registered.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid socket address `{addr}`")]
    InvalidAddress { addr: String },

    #[error("middleware `{name}` could not be resolved: {reason}")]
    MiddlewareResolution { name: String, reason: &'static str },

    #[error("invalid route `{path}`: {source}")]
    Route {
        path: String,
        #[source]
        source: matchit::InsertError,
    },
}

impl Error {
    pub(crate) fn unresolved(name: &str, reason: &'static str) -> Self {
        Self::MiddlewareResolution { name: name.to_owned(), reason }
    }
}
