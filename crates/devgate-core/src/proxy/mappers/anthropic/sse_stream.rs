//! SSE stream transformation: OpenAI → Anthropic framing.
//!
//! Wraps the pure [`StreamTranslator`] state machine in the async plumbing:
//! line reassembly, client-disconnect cleanup, and keep-alive pings.

use super::streaming::StreamTranslator;
use bytes::{Bytes, BytesMut};
use futures::Stream;
use std::pin::Pin;

/// Guard that aborts a spawned task when dropped (client disconnect cleanup).
struct AbortOnDrop<T>(tokio::task::JoinHandle<T>);
impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

const MAX_BUFFER_SIZE: usize = 10 * 1024 * 1024;
const HEARTBEAT_SECS: u64 = 15;

/// Convert an upstream OpenAI SSE byte stream into Anthropic SSE frames.
///
/// The returned stream is single-consumer and releases the upstream reader on
/// completion, failure, or early drop.
pub fn create_anthropic_sse_stream(
    mut upstream: Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>,
    mut translator: StreamTranslator,
    trace_id: String,
) -> Pin<Box<dyn Stream<Item = Result<Bytes, String>> + Send>> {
    use async_stream::stream;
    use futures::StreamExt;
    use tokio::time::MissedTickBehavior;

    Box::pin(stream! {
        let mut buffer = BytesMut::new();

        yield Ok(translator.begin());

        let (tx, mut rx) = tokio::sync::mpsc::channel::<Result<Bytes, reqwest::Error>>(2);
        let pump = tokio::spawn(async move {
            while let Some(item) = upstream.next().await {
                if tx.send(item).await.is_err() {
                    break;
                }
            }
        });
        let _pump_guard = AbortOnDrop(pump);

        let mut heartbeat =
            tokio::time::interval(std::time::Duration::from_secs(HEARTBEAT_SECS));
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        heartbeat.tick().await;

        loop {
            tokio::select! {
                maybe_chunk = rx.recv() => {
                    match maybe_chunk {
                        Some(Ok(chunk)) => {
                            buffer.extend_from_slice(&chunk);

                            if buffer.len() > MAX_BUFFER_SIZE {
                                tracing::error!(
                                    "[{}] SSE buffer exceeded {}MB limit, aborting stream",
                                    trace_id,
                                    MAX_BUFFER_SIZE / 1024 / 1024
                                );
                                yield Err("SSE buffer overflow: response too large".to_string());
                                break;
                            }

                            while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                                let line_raw = buffer.split_to(pos + 1);
                                let line = match std::str::from_utf8(&line_raw) {
                                    Ok(s) => s,
                                    Err(e) => {
                                        tracing::warn!(
                                            "[{}] SSE line UTF-8 decode error: {} | {} bytes",
                                            trace_id, e, line_raw.len()
                                        );
                                        continue;
                                    }
                                };
                                for frame in translator.process_line(line) {
                                    yield Ok(frame);
                                }
                            }
                        }
                        Some(Err(e)) => {
                            tracing::warn!("[{}] Upstream stream error: {}", trace_id, e);
                            for frame in translator.finish() {
                                yield Ok(frame);
                            }
                            yield Err(format!("Stream error: {e}"));
                            return;
                        }
                        None => break,
                    }
                }
                _ = heartbeat.tick() => {
                    yield Ok(Bytes::from(": ping\n\n"));
                }
            }
        }

        // Trailing data without a newline still counts.
        if !buffer.is_empty() {
            if let Ok(line) = std::str::from_utf8(&buffer) {
                for frame in translator.process_line(line) {
                    yield Ok(frame);
                }
            }
        }

        for frame in translator.finish() {
            yield Ok(frame);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn upstream_from(
        chunks: Vec<&'static str>,
    ) -> Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>> {
        Box::pin(futures::stream::iter(
            chunks.into_iter().map(|c| Ok(Bytes::from(c))),
        ))
    }

    async fn drain(stream: Pin<Box<dyn Stream<Item = Result<Bytes, String>> + Send>>) -> String {
        stream
            .filter_map(|item| async move { item.ok() })
            .map(|b| String::from_utf8(b.to_vec()).unwrap())
            .collect::<Vec<_>>()
            .await
            .join("")
    }

    #[tokio::test]
    async fn lines_split_across_chunks_are_reassembled() {
        let upstream = upstream_from(vec![
            "data: {\"choices\":[{\"delta\":{\"content\":\"He\"},\"finish",
            "_reason\":null}]}\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"llo\"},\"finish_reason\":\"stop\"}]}\n\n",
            "data: [DONE]\n\n",
        ]);

        let translator =
            StreamTranslator::new("msg_1".to_string(), "gpt-4o".to_string(), "gpt-4o", 3);
        let out = drain(create_anthropic_sse_stream(
            upstream,
            translator,
            "trace".to_string(),
        ))
        .await;

        assert!(out.contains("message_start"));
        assert!(out.contains(r#""text":"He""#));
        assert!(out.contains(r#""text":"llo""#));
        assert!(out.contains("message_stop"));
    }

    #[tokio::test]
    async fn stream_without_done_sentinel_still_terminates() {
        let upstream = upstream_from(vec![
            "data: {\"choices\":[{\"delta\":{\"content\":\"hi\"},\"finish_reason\":null}]}\n\n",
        ]);

        let translator =
            StreamTranslator::new("msg_1".to_string(), "gpt-4o".to_string(), "gpt-4o", 1);
        let out = drain(create_anthropic_sse_stream(
            upstream,
            translator,
            "trace".to_string(),
        ))
        .await;

        assert!(out.contains("message_stop"));
        assert_eq!(
            out.matches("\"type\":\"content_block_start\"").count(),
            out.matches("\"type\":\"content_block_stop\"").count()
        );
    }
}
