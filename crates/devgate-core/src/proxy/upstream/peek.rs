//! First-chunk peek before committing response headers.
//!
//! A streaming upstream can fail after its status line but before any body
//! byte arrives. The handler must not write the 200 and SSE headers until a
//! body chunk is actually in hand, so that such failures still surface as a
//! proper HTTP error instead of a mid-stream event.

use crate::error::{AppError, AppResult};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::pin::Pin;

pub type PeekedStream<E> = Pin<Box<dyn Stream<Item = Result<Bytes, E>> + Send>>;

/// Await the first non-empty body chunk, then hand back a stream that
/// replays it ahead of the rest. A stream error or end-of-stream before any
/// byte is a backend failure.
pub async fn peek_first_chunk<E>(
    mut stream: PeekedStream<E>,
    trace_id: &str,
) -> AppResult<PeekedStream<E>>
where
    E: std::fmt::Display + Send + 'static,
{
    loop {
        match stream.next().await {
            Some(Ok(bytes)) => {
                if bytes.is_empty() {
                    continue;
                }
                return Ok(Box::pin(
                    futures::stream::once(async move { Ok(bytes) }).chain(stream),
                ));
            }
            Some(Err(e)) => {
                tracing::warn!("[{}] Stream error before first chunk: {}", trace_id, e);
                return Err(AppError::backend(
                    502,
                    &format!("Stream error before first chunk: {e}"),
                ));
            }
            None => {
                tracing::warn!("[{}] Stream ended before first chunk (empty body)", trace_id);
                return Err(AppError::backend(502, "Empty response stream from upstream"));
            }
        }
    }
}
