//! Request and response body plumbing.
//!
//! Responses are one of three things here: nothing (most mutating
//! methods), one pre-rendered XML or text buffer (LOCK, PROPPATCH,
//! errors), or a chunk stream (GET, streaming PROPFIND). [`Body`]
//! models exactly those, and implements `http_body::Body` so it can be
//! handed to hyper as-is. On the request side, [`request_chunks`]
//! turns an incoming `http_body` PUT payload into the chunk stream the
//! filesystem backends consume.

use std::error::Error as StdError;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes};
use futures_util::stream::{BoxStream, Stream};
use http::header::HeaderMap;
use http_body::Body as HttpBody;
use pin_utils::pin_mut;

/// Response body returned by the webdav handler.
pub struct Body {
    inner: Inner,
}

enum Inner {
    Empty,
    // a single buffer, handed out on the first poll.
    Full(Bytes),
    // multistatus and file contents arrive chunk by chunk.
    Chunked(BoxStream<'static, io::Result<Bytes>>),
}

impl Body {
    /// An empty body.
    pub fn empty() -> Body {
        Body {
            inner: Inner::Empty,
        }
    }

    /// A body produced incrementally by a stream.
    pub fn stream(chunks: impl Stream<Item = io::Result<Bytes>> + Send + 'static) -> Body {
        Body {
            inner: Inner::Chunked(Box::pin(chunks)),
        }
    }
}

impl HttpBody for Body {
    type Data = Bytes;
    type Error = io::Error;

    fn poll_data(
        self: Pin<&mut Self>,
        cx: &mut Context,
    ) -> Poll<Option<Result<Self::Data, Self::Error>>> {
        // Inner holds no self-references, so Body is Unpin.
        let this = self.get_mut();
        match &mut this.inner {
            Inner::Empty => Poll::Ready(None),
            Inner::Full(buf) => {
                let buf = std::mem::take(buf);
                this.inner = Inner::Empty;
                Poll::Ready(if buf.is_empty() { None } else { Some(Ok(buf)) })
            }
            Inner::Chunked(chunks) => chunks.as_mut().poll_next(cx),
        }
    }

    fn poll_trailers(
        self: Pin<&mut Self>,
        _cx: &mut Context,
    ) -> Poll<Result<Option<HeaderMap>, Self::Error>> {
        Poll::Ready(Ok(None))
    }

    fn is_end_stream(&self) -> bool {
        matches!(self.inner, Inner::Empty)
    }
}

impl From<Bytes> for Body {
    fn from(buf: Bytes) -> Body {
        Body {
            inner: Inner::Full(buf),
        }
    }
}

impl From<String> for Body {
    fn from(text: String) -> Body {
        Bytes::from(text).into()
    }
}

impl From<&str> for Body {
    fn from(text: &str) -> Body {
        Bytes::from(text.to_string()).into()
    }
}

// Turn a request HttpBody into the chunk stream the filesystem
// backends consume. Transport errors surface as UnexpectedEof so a
// half-written PUT target gets cleaned up by the backend.
pub(crate) fn request_chunks<ReqBody, ReqData, ReqError>(
    body: ReqBody,
) -> impl Stream<Item = io::Result<Bytes>> + Send
where
    ReqBody: HttpBody<Data = ReqData, Error = ReqError> + Send + 'static,
    ReqData: Buf + Send + 'static,
    ReqError: StdError + Send + Sync + 'static,
{
    async_stream::stream! {
        pin_mut!(body);
        while let Some(chunk) = body.data().await {
            match chunk {
                Ok(mut buf) => yield Ok(buf.copy_to_bytes(buf.remaining())),
                Err(_) => {
                    yield Err(io::Error::new(io::ErrorKind::UnexpectedEof, "request body error"));
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(body: Body) -> Vec<u8> {
        pin_mut!(body);
        let mut data = Vec::new();
        while let Some(chunk) = body.data().await {
            data.extend_from_slice(&chunk.unwrap());
        }
        data
    }

    #[tokio::test]
    async fn empty_and_full() {
        assert!(collect(Body::empty()).await.is_empty());
        assert_eq!(collect(Body::from("hello")).await, b"hello");
        // a zero-length buffer behaves like an empty body.
        assert!(collect(Body::from(Bytes::new())).await.is_empty());
    }

    #[tokio::test]
    async fn chunked() {
        let chunks = futures_util::stream::iter(vec![
            Ok(Bytes::from_static(b"a")),
            Ok(Bytes::from_static(b"b")),
        ]);
        assert_eq!(collect(Body::stream(chunks)).await, b"ab");
    }
}
