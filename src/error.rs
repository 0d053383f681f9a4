use std::sync::Arc;

use thiserror::Error;

/// A `Result` typedef to use with the [`Error`] type
pub type Result<T> = std::result::Result<T, Error>;

/// A boxed error for values surfaced by external collaborators
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A generic error for the caching pipeline
#[derive(Error, Debug)]
pub enum Error {
    /// The lower transport failed to produce a response
    #[error("transport error: {0}")]
    Transport(#[source] BoxError),
    /// A backing-store operation failed
    #[error("cache store error: {0}")]
    Store(String),
    /// A record or envelope could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(#[from] postcard::Error),
    /// Error from http
    #[error(transparent)]
    Http(#[from] http::Error),
    /// Body compression or decompression failed
    #[error("compression error: {0}")]
    Compression(#[from] std::io::Error),
    /// An error produced by a coalesced origin call, shared by every waiter
    #[error("{0}")]
    Shared(Arc<Error>),
}

impl Error {
    /// Wraps an arbitrary transport failure
    pub fn transport(err: impl Into<BoxError>) -> Self {
        Self::Transport(err.into())
    }

    /// Wraps an arbitrary backing-store failure
    pub fn store(err: impl std::fmt::Display) -> Self {
        Self::Store(err.to_string())
    }
}

impl From<Arc<Error>> for Error {
    fn from(err: Arc<Error>) -> Self {
        Self::Shared(err)
    }
}
