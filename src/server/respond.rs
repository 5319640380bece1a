use axum::{
    Json,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures::StreamExt;
use futures::stream;
use std::convert::Infallible;

use crate::error::ProxyError;
use crate::providers::{ChunkStream, ProviderResponse};
use switchboard_schema::openai::ChatCompletionChunk;

const DONE_FRAME: &str = "[DONE]";

/// Turn a provider response into the HTTP response for the caller.
pub(crate) fn provider_response(response: ProviderResponse) -> Response {
    match response {
        ProviderResponse::Completion(body) => Json(*body).into_response(),
        ProviderResponse::Stream(chunks) => sse_response(chunks),
    }
}

enum Phase {
    Body,
    Done,
    Finished,
}

/// SSE stream with the protocol tail handled here: a mid-stream error
/// becomes a final `data: {"error": ...}` frame, and `data: [DONE]` is
/// always the last line exactly once.
fn sse_response(chunks: ChunkStream) -> Response {
    let events = stream::unfold(
        (chunks, Phase::Body),
        |(mut chunks, phase)| async move {
            match phase {
                Phase::Body => match chunks.next().await {
                    Some(Ok(chunk)) => {
                        Some((chunk_event(&chunk), (chunks, Phase::Body)))
                    }
                    Some(Err(err)) => {
                        tracing::warn!(error = %err, "Stream failed mid-flight");
                        Some((error_event(&err), (chunks, Phase::Done)))
                    }
                    None => Some((done_event(), (chunks, Phase::Finished))),
                },
                Phase::Done => Some((done_event(), (chunks, Phase::Finished))),
                Phase::Finished => None,
            }
        },
    )
    .map(Ok::<Event, Infallible>);

    Sse::new(events).keep_alive(KeepAlive::default()).into_response()
}

fn chunk_event(chunk: &ChatCompletionChunk) -> Event {
    match serde_json::to_string(chunk) {
        Ok(json) => Event::default().data(json),
        // Serialization of our own chunk type cannot realistically fail;
        // degrade to an SSE comment rather than breaking the stream.
        Err(_) => Event::default().comment("serialization failure"),
    }
}

fn error_event(err: &ProxyError) -> Event {
    match serde_json::to_string(&err.to_stream_frame()) {
        Ok(json) => Event::default().data(json),
        Err(_) => Event::default().data(r#"{"error":{"message":"stream error","type":"api_error"}}"#),
    }
}

fn done_event() -> Event {
    Event::default().data(DONE_FRAME)
}
