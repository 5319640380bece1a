use eventsource_stream::Eventsource;
use futures::StreamExt;
use futures::stream;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::warn;

use crate::convert::{GeminiSseState, ResponsesSseState};
use crate::error::ProxyError;
use switchboard_thoughtsig::SignatureSniffer;
use switchboard_schema::codeassist::unwrap_response;
use switchboard_schema::openai::{ChatCompletionChunk, ResponsesSseEvent};

use super::ChunkStream;

/// No single gap between upstream frames may exceed this.
const IDLE_TIMEOUT_SECS: u64 = 120;

const DONE_MARKER: &str = "[DONE]";

type EventResult = Result<eventsource_stream::Event, ProxyError>;

/// Upstream SSE events with the idle timeout applied. Malformed transport
/// errors surface; empty frames are dropped.
fn sse_events(resp: reqwest::Response) -> impl futures::Stream<Item = EventResult> {
    // Path-qualified so tokio_stream's StreamExt never enters method
    // resolution alongside the futures one.
    tokio_stream::StreamExt::timeout(
        resp.bytes_stream().eventsource(),
        Duration::from_secs(IDLE_TIMEOUT_SECS),
    )
    .map(|item| match item {
        Ok(Ok(event)) => Ok(event),
        Ok(Err(e)) => Err(ProxyError::UpstreamTransient(format!(
            "upstream SSE error: {e}"
        ))),
        Err(_) => Err(ProxyError::UpstreamTransient(
            "upstream stream idle timeout".to_string(),
        )),
    })
}

/// Code Assist SSE -> chat.completion.chunk stream.
///
/// Frames that fail to decode are protocol noise: logged, dropped, and the
/// stream continues. The terminal usage chunk is appended after the
/// upstream ends. When a sniffer is supplied, every decoded frame passes
/// through it so thought signatures land in the cache.
pub(crate) fn gemini_chunk_stream(
    resp: reqwest::Response,
    state: GeminiSseState,
    sniffer: Option<SignatureSniffer>,
) -> ChunkStream {
    let state = Arc::new(Mutex::new((state, sniffer)));
    let tail_state = state.clone();

    let body = sse_events(resp).flat_map(move |event| {
        let chunks: Vec<Result<ChatCompletionChunk, ProxyError>> = match event {
            Ok(event) if event.data.is_empty() || event.data == DONE_MARKER => Vec::new(),
            Ok(event) => match serde_json::from_str::<serde_json::Value>(&event.data) {
                Ok(value) => match unwrap_response(value) {
                    Some(response) => {
                        let mut guard = state.lock().expect("gemini sse state poisoned");
                        if let Some(sniffer) = guard.1.as_mut() {
                            sniffer.inspect(&response);
                        }
                        guard.0.transform_chunk(&response).into_iter().map(Ok).collect()
                    }
                    None => Vec::new(),
                },
                Err(e) => {
                    warn!(error = %e, "Skipping malformed upstream frame: {:.80}", event.data);
                    Vec::new()
                }
            },
            Err(e) => vec![Err(e)],
        };
        stream::iter(chunks)
    });

    let tail = stream::once(async move {
        let mut guard = tail_state.lock().expect("gemini sse state poisoned");
        // Dropping the sniffer flushes any signature still buffered.
        guard.1.take();
        guard.0.flush()
    })
    .filter_map(|chunk| async move { chunk.map(Ok) });

    body.chain(tail).boxed()
}

/// Responses-API SSE -> chat.completion.chunk stream.
pub(crate) fn responses_chunk_stream(
    resp: reqwest::Response,
    state: ResponsesSseState,
) -> ChunkStream {
    let state = Arc::new(Mutex::new(state));

    sse_events(resp)
        .flat_map(move |event| {
            let chunks: Vec<Result<ChatCompletionChunk, ProxyError>> = match event {
                Ok(event) if event.data.is_empty() || event.data == DONE_MARKER => Vec::new(),
                Ok(event) => match serde_json::from_str::<ResponsesSseEvent>(&event.data) {
                    Ok(parsed) => state
                        .lock()
                        .expect("responses sse state poisoned")
                        .transform_event(&parsed)
                        .into_iter()
                        .map(Ok)
                        .collect(),
                    Err(e) => {
                        warn!(error = %e, "Skipping malformed Responses frame: {:.80}", event.data);
                        Vec::new()
                    }
                },
                Err(e) => vec![Err(e)],
            };
            stream::iter(chunks)
        })
        .boxed()
}

/// Already-OpenAI SSE -> chat.completion.chunk stream (passthrough
/// providers). Frames are re-parsed so malformed ones can be dropped
/// instead of corrupting the downstream stream.
pub(crate) fn passthrough_chunk_stream(resp: reqwest::Response) -> ChunkStream {
    sse_events(resp)
        .filter_map(|event| async move {
            match event {
                Ok(event) if event.data.is_empty() || event.data == DONE_MARKER => None,
                Ok(event) => match serde_json::from_str::<ChatCompletionChunk>(&event.data) {
                    Ok(chunk) => Some(Ok(chunk)),
                    Err(e) => {
                        warn!(error = %e, "Skipping malformed passthrough frame: {:.80}", event.data);
                        None
                    }
                },
                Err(e) => Some(Err(e)),
            }
        })
        .boxed()
}

/// Drain a chunk stream into a Vec (used when the caller asked for a
/// buffered response but the upstream only streams).
pub(crate) async fn collect_chunks(
    mut stream: ChunkStream,
) -> Result<Vec<ChatCompletionChunk>, ProxyError> {
    let mut chunks = Vec::new();
    while let Some(item) = stream.next().await {
        chunks.push(item?);
    }
    Ok(chunks)
}
