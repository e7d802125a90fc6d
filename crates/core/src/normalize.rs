//! Turns a provider's raw chunk stream into a stream of non-empty text
//! fragments.
//!
//! One upstream chunk yields at most one fragment, in arrival order. Chunks
//! with empty or missing content are skipped. The first fatal error is yielded
//! once and the stream is then exhausted.

use futures::Stream;
use pin_project_lite::pin_project;
use std::{
    pin::Pin,
    task::{Context, Poll},
};
use tracing::{debug, trace};

use crate::{Fragment, RawChunk, RawStream, RelayError};

pin_project! {
    pub struct FragmentStream<S> {
        #[pin]
        inner: S,
        done: bool,
    }
}

impl<S> FragmentStream<S> {
    pub fn new(inner: S) -> Self {
        Self { inner, done: false }
    }
}

pub fn normalize(raw: RawStream) -> FragmentStream<RawStream> {
    FragmentStream::new(raw)
}

impl<S> Stream for FragmentStream<S>
where
    S: Stream<Item = Result<RawChunk, RelayError>>,
{
    type Item = Result<Fragment, RelayError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        if *this.done {
            return Poll::Ready(None);
        }
        loop {
            match this.inner.as_mut().poll_next(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(None) => {
                    *this.done = true;
                    return Poll::Ready(None);
                }
                Poll::Ready(Some(Ok(chunk))) => match delta_content(&chunk) {
                    Ok(Some(text)) => match Fragment::new(text) {
                        Some(f) => return Poll::Ready(Some(Ok(f))),
                        None => continue,
                    },
                    Ok(None) => {
                        trace!(target: "core::normalize", "chunk without content skipped");
                        continue;
                    }
                    Err(e) => {
                        debug!(target: "core::normalize", "skipping chunk: {}", e);
                        continue;
                    }
                },
                Poll::Ready(Some(Err(RelayError::MalformedChunk(m)))) => {
                    debug!(target: "core::normalize", "skipping malformed chunk: {}", m);
                    continue;
                }
                Poll::Ready(Some(Err(e))) => {
                    *this.done = true;
                    return Poll::Ready(Some(Err(e)));
                }
            }
        }
    }
}

/// Extracts `choices[0].delta.content`. A chunk without a `choices` array is
/// malformed; a chunk whose content is absent, null or empty has no fragment.
pub fn delta_content(chunk: &RawChunk) -> Result<Option<&str>, RelayError> {
    let choices = chunk
        .0
        .get("choices")
        .and_then(|c| c.as_array())
        .ok_or_else(|| RelayError::MalformedChunk("missing choices array".into()))?;
    let Some(first) = choices.first() else {
        return Ok(None);
    };
    Ok(first
        .get("delta")
        .and_then(|d| d.get("content"))
        .and_then(|c| c.as_str())
        .filter(|s| !s.is_empty()))
}
