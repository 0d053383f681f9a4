//! HTTP body plumbing shared by the pipeline and the lower transport.
//!
//! A [`Body`] is either fully buffered (cached responses, small origin
//! responses) or a stream of chunks handed through from the upstream
//! transport. The pipeline drains streaming bodies chunk by chunk during
//! storage so that a size-capped ingestion can stop early without losing
//! the bytes already read.

use std::fmt;

use bytes::Bytes;
use futures::{stream, Stream, StreamExt};

use crate::error::BoxError;

/// A pinned, boxed stream of body chunks.
pub type ChunkStream = stream::BoxStream<'static, Result<Bytes, BoxError>>;

/// A response (or request) body, buffered or streamed.
pub enum Body {
    /// The whole body, available immediately.
    Full(Bytes),
    /// Chunks delivered as the upstream produces them.
    Stream(ChunkStream),
}

impl Body {
    /// An empty buffered body.
    #[must_use]
    pub fn empty() -> Self {
        Self::Full(Bytes::new())
    }

    /// A buffered body from anything convertible to [`Bytes`].
    pub fn full(data: impl Into<Bytes>) -> Self {
        Self::Full(data.into())
    }

    /// A streaming body from a chunk stream.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, BoxError>>
            + Send
            + 'static,
    {
        Self::Stream(stream.boxed())
    }

    /// The body length, when known without draining.
    #[must_use]
    pub fn len_hint(&self) -> Option<usize> {
        match self {
            Self::Full(data) => Some(data.len()),
            Self::Stream(_) => None,
        }
    }

    /// Drains the body into a single buffer.
    pub async fn collect(self) -> Result<Bytes, BoxError> {
        match self {
            Self::Full(data) => Ok(data),
            Self::Stream(mut chunks) => {
                let mut buf = bytes::BytesMut::new();
                while let Some(chunk) = chunks.next().await {
                    buf.extend_from_slice(&chunk?);
                }
                Ok(buf.freeze())
            }
        }
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(data) => {
                f.debug_tuple("Full").field(&data.len()).finish()
            }
            Self::Stream(_) => f.debug_tuple("Stream").finish(),
        }
    }
}

impl From<Bytes> for Body {
    fn from(data: Bytes) -> Self {
        Self::Full(data)
    }
}

impl From<Vec<u8>> for Body {
    fn from(data: Vec<u8>) -> Self {
        Self::Full(data.into())
    }
}

impl From<&'static str> for Body {
    fn from(data: &'static str) -> Self {
        Self::Full(Bytes::from_static(data.as_bytes()))
    }
}

/// Builds a body that replays `prefix` chunks before the remaining stream.
///
/// Used when a size-capped ingestion rejects a response mid-read: the bytes
/// already consumed are handed back to the caller ahead of the untouched
/// remainder.
pub(crate) fn replay_then(prefix: Vec<Bytes>, rest: ChunkStream) -> Body {
    Body::Stream(stream::iter(prefix.into_iter().map(Ok)).chain(rest).boxed())
}
