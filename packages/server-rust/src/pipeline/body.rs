//! Streaming message body shared by the front door, policies and connectors.
//!
//! Bodies stay streams end to end unless something explicitly buffers them
//! with [`Body::collect`], so large payloads pass through with bounded memory.

use std::fmt;

use bytes::{Bytes, BytesMut};
use futures_util::stream::{self, BoxStream, StreamExt, TryStreamExt};

/// Boxed error type carried by body streams.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Transport-neutral message body.
#[derive(Default)]
pub enum Body {
    #[default]
    Empty,
    Full(Bytes),
    Streaming(BoxStream<'static, Result<Bytes, BoxError>>),
}

impl Body {
    /// Wraps any fallible byte stream.
    pub fn from_stream<S, E>(stream: S) -> Self
    where
        S: futures_util::Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Into<BoxError>,
    {
        Self::Streaming(stream.map_err(|e| -> BoxError { e.into() }).boxed())
    }

    /// Returns `true` for a body known to carry no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Full(bytes) => bytes.is_empty(),
            Self::Streaming(_) => false,
        }
    }

    /// Exposes the body as a stream regardless of representation.
    #[must_use]
    pub fn into_stream(self) -> BoxStream<'static, Result<Bytes, BoxError>> {
        match self {
            Self::Empty => stream::empty().boxed(),
            Self::Full(bytes) => stream::once(async move { Ok(bytes) }).boxed(),
            Self::Streaming(s) => s,
        }
    }

    /// Buffers the whole body in memory.
    ///
    /// # Errors
    ///
    /// Returns the first error produced by the underlying stream.
    pub async fn collect(self) -> Result<Bytes, BoxError> {
        match self {
            Self::Empty => Ok(Bytes::new()),
            Self::Full(bytes) => Ok(bytes),
            Self::Streaming(mut s) => {
                let mut buf = BytesMut::new();
                while let Some(chunk) = s.next().await {
                    buf.extend_from_slice(&chunk?);
                }
                Ok(buf.freeze())
            }
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Body::Empty"),
            Self::Full(bytes) => write!(f, "Body::Full({} bytes)", bytes.len()),
            Self::Streaming(_) => f.write_str("Body::Streaming"),
        }
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Self::Full(bytes)
    }
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        Self::Full(Bytes::from(s))
    }
}

impl From<&'static str> for Body {
    fn from(s: &'static str) -> Self {
        Self::Full(Bytes::from_static(s.as_bytes()))
    }
}

impl From<Vec<u8>> for Body {
    fn from(v: Vec<u8>) -> Self {
        Self::Full(Bytes::from(v))
    }
}
