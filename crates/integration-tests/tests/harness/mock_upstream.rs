//! Mock upstream speaking every supported provider wire format
//!
//! Replies are scripted per test and handed out in order to whichever
//! endpoint asks next. Once the script runs dry every request is answered
//! with [`GREETING`].

use std::collections::VecDeque;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router, routing};
use bytes::Bytes;
use futures_util::{StreamExt, stream};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

/// Text served when no reply is scripted
pub const GREETING: &str = "Hello from mock upstream";

/// One scripted answer
#[derive(Debug, Clone)]
pub enum Reply {
    Text(String),
    ToolCall {
        id: String,
        name: String,
        arguments: Value,
    },
    /// Non-success status with an error body
    Fail(StatusCode),
    /// Streams the opening events and then goes silent; JSON requests never get an answer
    Stall,
    /// Streams `text` with a pause before every frame; JSON requests are answered at once
    Slow { text: String, pace: Duration },
}

impl Reply {
    pub fn text(text: &str) -> Self {
        Self::Text(text.to_owned())
    }

    pub fn slow(text: &str, pace: Duration) -> Self {
        Self::Slow {
            text: text.to_owned(),
            pace,
        }
    }

    pub fn tool_call(id: &str, name: &str, arguments: Value) -> Self {
        Self::ToolCall {
            id: id.to_owned(),
            name: name.to_owned(),
            arguments,
        }
    }
}

/// A request as the upstream saw it
#[derive(Debug, Clone)]
pub struct Recorded {
    pub path: String,
    /// Credential from whichever auth header the wire format uses
    pub api_key: Option<String>,
    pub body: Value,
}

/// Mock upstream bound to a random local port
pub struct MockUpstream {
    addr: SocketAddr,
    shutdown: CancellationToken,
    state: Arc<MockState>,
}

struct MockState {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<Recorded>>,
    request_count: AtomicU32,
}

impl MockState {
    fn record(&self, path: String, headers: &HeaderMap, body: Value) -> Reply {
        self.request_count.fetch_add(1, Ordering::Relaxed);

        let api_key = ["x-api-key", "x-goog-api-key", "authorization"]
            .iter()
            .find_map(|name| headers.get(*name))
            .and_then(|value| value.to_str().ok())
            .map(|value| value.trim_start_matches("Bearer ").to_owned());

        self.requests.lock().unwrap().push(Recorded { path, api_key, body });
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Reply::text(GREETING))
    }
}

impl MockUpstream {
    /// Start a mock that always greets
    pub async fn start() -> anyhow::Result<Self> {
        Self::scripted([]).await
    }

    /// Start a mock that serves `replies` in order
    pub async fn scripted(replies: impl IntoIterator<Item = Reply>) -> anyhow::Result<Self> {
        let state = Arc::new(MockState {
            replies: Mutex::new(replies.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
            request_count: AtomicU32::new(0),
        });

        let app = Router::new()
            .route("/v1/messages", routing::post(handle_anthropic))
            .route("/v1/responses", routing::post(handle_openai))
            .route("/v1/chat/completions", routing::post(handle_openai_chat))
            .route("/v1beta/models/{action}", routing::post(handle_gemini))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();
        let shutdown_clone = shutdown.clone();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    shutdown_clone.cancelled().await;
                })
                .await
                .ok();
        });

        Ok(Self { addr, shutdown, state })
    }

    /// Base URL without a version segment
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Total requests received across all endpoints
    pub fn request_count(&self) -> u32 {
        self.state.request_count.load(Ordering::Relaxed)
    }

    /// Every request received so far, oldest first
    pub fn requests(&self) -> Vec<Recorded> {
        self.state.requests.lock().unwrap().clone()
    }
}

impl Drop for MockUpstream {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

// -- Handlers --

async fn handle_anthropic(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let streaming = wants_stream(&body);
    let model = model_field(&body);
    let reply = state.record("/v1/messages".to_owned(), &headers, body);
    respond(
        reply,
        streaming,
        |reply| anthropic_json(&model, reply),
        |reply| anthropic_frames(&model, reply),
    )
    .await
}

async fn handle_openai(State(state): State<Arc<MockState>>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    let streaming = wants_stream(&body);
    let model = model_field(&body);
    let reply = state.record("/v1/responses".to_owned(), &headers, body);
    respond(
        reply,
        streaming,
        |reply| openai_json(&model, reply),
        |reply| openai_frames(&model, reply),
    )
    .await
}

async fn handle_openai_chat(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let streaming = wants_stream(&body);
    let model = model_field(&body);
    let reply = state.record("/v1/chat/completions".to_owned(), &headers, body);
    respond(
        reply,
        streaming,
        |reply| openai_chat_json(&model, reply),
        |reply| openai_chat_frames(&model, reply),
    )
    .await
}

/// `models/{model}:generateContent` and `models/{model}:streamGenerateContent`
async fn handle_gemini(
    State(state): State<Arc<MockState>>,
    Path(action): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let (model, method) = action.split_once(':').unwrap_or((action.as_str(), ""));
    let streaming = method == "streamGenerateContent";
    let model = model.to_owned();
    let reply = state.record(format!("/v1beta/models/{action}"), &headers, body);
    respond(
        reply,
        streaming,
        |reply| gemini_json(&model, reply),
        |reply| gemini_frames(&model, reply),
    )
    .await
}

async fn respond(
    reply: Reply,
    streaming: bool,
    json: impl FnOnce(&Reply) -> Value,
    frames: impl FnOnce(&Reply) -> Vec<String>,
) -> Response {
    match reply {
        Reply::Fail(status) => failure(status),
        Reply::Stall if streaming => sse(frames(&Reply::text(GREETING)).into_iter().take(2).collect(), true),
        Reply::Stall => std::future::pending().await,
        Reply::Slow { text, pace } if streaming => paced_sse(frames(&Reply::Text(text)), pace),
        Reply::Slow { text, .. } => Json(json(&Reply::Text(text))).into_response(),
        reply if streaming => sse(frames(&reply), false),
        reply => Json(json(&reply)).into_response(),
    }
}

fn failure(status: StatusCode) -> Response {
    let body = json!({
        "error": {
            "message": "mock upstream failure",
            "type": "mock_error"
        }
    });
    (status, Json(body)).into_response()
}

fn sse(frames: Vec<String>, stall: bool) -> Response {
    let head = stream::iter(frames).map(|frame| Ok::<_, Infallible>(Bytes::from(frame)));
    let body = if stall {
        Body::from_stream(head.chain(stream::pending()))
    } else {
        Body::from_stream(head)
    };
    ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
}

fn paced_sse(frames: Vec<String>, pace: Duration) -> Response {
    let body = stream::iter(frames).then(move |frame| async move {
        tokio::time::sleep(pace).await;
        Ok::<_, Infallible>(Bytes::from(frame))
    });
    ([(header::CONTENT_TYPE, "text/event-stream")], Body::from_stream(body)).into_response()
}

// -- Wire helpers --

fn wants_stream(body: &Value) -> bool {
    body.get("stream").and_then(Value::as_bool).unwrap_or(false)
}

fn model_field(body: &Value) -> String {
    body.get("model").and_then(Value::as_str).unwrap_or_default().to_owned()
}

fn frame(event: Option<&str>, data: &Value) -> String {
    match event {
        Some(event) => format!("event: {event}\ndata: {data}\n\n"),
        None => format!("data: {data}\n\n"),
    }
}

fn text_of(reply: &Reply) -> &str {
    match reply {
        Reply::Text(text) => text,
        _ => GREETING,
    }
}

/// Word-sized deltas that concatenate back to `text`
fn pieces(text: &str) -> Vec<&str> {
    text.split_inclusive(' ').collect()
}

/// Split at the middle character
fn halves(text: &str) -> (&str, &str) {
    let middle = text
        .char_indices()
        .nth(text.chars().count() / 2)
        .map_or(text.len(), |(index, _)| index);
    text.split_at(middle)
}

// -- Anthropic Messages --

fn anthropic_json(model: &str, reply: &Reply) -> Value {
    let (content, stop_reason) = match reply {
        Reply::ToolCall { id, name, arguments } => (
            json!([{ "type": "tool_use", "id": id, "name": name, "input": arguments }]),
            "tool_use",
        ),
        other => (json!([{ "type": "text", "text": text_of(other) }]), "end_turn"),
    };

    json!({
        "id": "msg_mock",
        "type": "message",
        "role": "assistant",
        "model": model,
        "content": content,
        "stop_reason": stop_reason,
        "usage": { "input_tokens": 10, "output_tokens": 5 }
    })
}

fn anthropic_frames(model: &str, reply: &Reply) -> Vec<String> {
    let mut frames = vec![frame(
        Some("message_start"),
        &json!({
            "type": "message_start",
            "message": {
                "id": "msg_mock",
                "type": "message",
                "role": "assistant",
                "model": model,
                "content": [],
                "usage": { "input_tokens": 10, "output_tokens": 0 }
            }
        }),
    )];

    let stop_reason = match reply {
        Reply::ToolCall { id, name, arguments } => {
            frames.push(frame(
                Some("content_block_start"),
                &json!({
                    "type": "content_block_start",
                    "index": 0,
                    "content_block": { "type": "tool_use", "id": id, "name": name, "input": {} }
                }),
            ));
            let arguments = arguments.to_string();
            let (head, tail) = halves(&arguments);
            for part in [head, tail] {
                frames.push(frame(
                    Some("content_block_delta"),
                    &json!({
                        "type": "content_block_delta",
                        "index": 0,
                        "delta": { "type": "input_json_delta", "partial_json": part }
                    }),
                ));
            }
            "tool_use"
        }
        other => {
            frames.push(frame(
                Some("content_block_start"),
                &json!({
                    "type": "content_block_start",
                    "index": 0,
                    "content_block": { "type": "text", "text": "" }
                }),
            ));
            for piece in pieces(text_of(other)) {
                frames.push(frame(
                    Some("content_block_delta"),
                    &json!({
                        "type": "content_block_delta",
                        "index": 0,
                        "delta": { "type": "text_delta", "text": piece }
                    }),
                ));
            }
            "end_turn"
        }
    };

    frames.push(frame(
        Some("content_block_stop"),
        &json!({ "type": "content_block_stop", "index": 0 }),
    ));
    frames.push(frame(
        Some("message_delta"),
        &json!({
            "type": "message_delta",
            "delta": { "stop_reason": stop_reason },
            "usage": { "output_tokens": 5 }
        }),
    ));
    frames.push(frame(Some("message_stop"), &json!({ "type": "message_stop" })));
    frames
}

// -- OpenAI Responses --

fn openai_output_item(reply: &Reply) -> Value {
    match reply {
        Reply::ToolCall { id, name, arguments } => json!({
            "type": "function_call",
            "id": "fc_mock",
            "call_id": id,
            "name": name,
            "arguments": arguments.to_string(),
            "status": "completed"
        }),
        other => json!({
            "type": "message",
            "id": "msg_mock",
            "role": "assistant",
            "status": "completed",
            "content": [{ "type": "output_text", "text": text_of(other), "annotations": [] }]
        }),
    }
}

fn openai_json(model: &str, reply: &Reply) -> Value {
    json!({
        "id": "resp_mock",
        "object": "response",
        "model": model,
        "status": "completed",
        "output": [openai_output_item(reply)],
        "usage": { "input_tokens": 10, "output_tokens": 5 }
    })
}

fn openai_frames(model: &str, reply: &Reply) -> Vec<String> {
    let mut frames = vec![frame(
        Some("response.created"),
        &json!({
            "type": "response.created",
            "response": { "id": "resp_mock", "model": model, "status": "in_progress", "output": [] }
        }),
    )];

    match reply {
        Reply::ToolCall { id, name, arguments } => {
            frames.push(frame(
                Some("response.output_item.added"),
                &json!({
                    "type": "response.output_item.added",
                    "output_index": 0,
                    "item": { "type": "function_call", "call_id": id, "name": name, "arguments": "" }
                }),
            ));
            let arguments = arguments.to_string();
            let (head, tail) = halves(&arguments);
            for part in [head, tail] {
                frames.push(frame(
                    Some("response.function_call_arguments.delta"),
                    &json!({
                        "type": "response.function_call_arguments.delta",
                        "output_index": 0,
                        "delta": part
                    }),
                ));
            }
        }
        other => {
            frames.push(frame(
                Some("response.output_item.added"),
                &json!({
                    "type": "response.output_item.added",
                    "output_index": 0,
                    "item": { "type": "message", "content": [] }
                }),
            ));
            for piece in pieces(text_of(other)) {
                frames.push(frame(
                    Some("response.output_text.delta"),
                    &json!({
                        "type": "response.output_text.delta",
                        "output_index": 0,
                        "content_index": 0,
                        "delta": piece
                    }),
                ));
            }
        }
    }

    frames.push(frame(
        Some("response.output_item.done"),
        &json!({
            "type": "response.output_item.done",
            "output_index": 0,
            "item": openai_output_item(reply)
        }),
    ));
    frames.push(frame(
        Some("response.completed"),
        &json!({ "type": "response.completed", "response": openai_json(model, reply) }),
    ));
    frames
}

// -- Gemini generateContent --

fn gemini_chunk(model: &str, part: Value, finish: bool) -> Value {
    let mut candidate = json!({ "content": { "role": "model", "parts": [part] }, "index": 0 });
    let mut chunk = json!({ "modelVersion": model, "responseId": "gem_mock" });
    if finish {
        candidate["finishReason"] = json!("STOP");
        chunk["usageMetadata"] = json!({ "promptTokenCount": 10, "candidatesTokenCount": 5, "totalTokenCount": 15 });
    }
    chunk["candidates"] = json!([candidate]);
    chunk
}

fn gemini_part(reply: &Reply) -> Value {
    match reply {
        Reply::ToolCall { name, arguments, .. } => json!({ "functionCall": { "name": name, "args": arguments } }),
        other => json!({ "text": text_of(other) }),
    }
}

fn gemini_json(model: &str, reply: &Reply) -> Value {
    gemini_chunk(model, gemini_part(reply), true)
}

fn gemini_frames(model: &str, reply: &Reply) -> Vec<String> {
    if let Reply::ToolCall { .. } = reply {
        return vec![frame(None, &gemini_chunk(model, gemini_part(reply), true))];
    }

    let pieces = pieces(text_of(reply));
    let last = pieces.len().saturating_sub(1);
    pieces
        .into_iter()
        .enumerate()
        .map(|(i, piece)| frame(None, &gemini_chunk(model, json!({ "text": piece }), i == last)))
        .collect()
}

// -- OpenAI-compatible Chat Completions --

fn openai_chat_json(model: &str, reply: &Reply) -> Value {
    let (message, finish_reason) = match reply {
        Reply::ToolCall { id, name, arguments } => (
            json!({
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": id,
                    "type": "function",
                    "function": { "name": name, "arguments": arguments.to_string() }
                }]
            }),
            "tool_calls",
        ),
        other => (json!({ "role": "assistant", "content": text_of(other) }), "stop"),
    };

    json!({
        "id": "chatcmpl-mock",
        "object": "chat.completion",
        "created": 1_700_000_000,
        "model": model,
        "choices": [{ "index": 0, "message": message, "finish_reason": finish_reason }],
        "usage": { "prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15 }
    })
}

fn openai_chat_chunk(model: &str, delta: Value, finish_reason: Option<&str>) -> String {
    frame(
        None,
        &json!({
            "id": "chatcmpl-mock",
            "object": "chat.completion.chunk",
            "created": 1_700_000_000,
            "model": model,
            "choices": [{ "index": 0, "delta": delta, "finish_reason": finish_reason }]
        }),
    )
}

fn openai_chat_frames(model: &str, reply: &Reply) -> Vec<String> {
    let mut frames = Vec::new();

    let finish_reason = match reply {
        Reply::ToolCall { id, name, arguments } => {
            frames.push(openai_chat_chunk(
                model,
                json!({
                    "role": "assistant",
                    "tool_calls": [{
                        "index": 0,
                        "id": id,
                        "type": "function",
                        "function": { "name": name, "arguments": "" }
                    }]
                }),
                None,
            ));
            let arguments = arguments.to_string();
            let (head, tail) = halves(&arguments);
            for part in [head, tail] {
                frames.push(openai_chat_chunk(
                    model,
                    json!({ "tool_calls": [{ "index": 0, "function": { "arguments": part } }] }),
                    None,
                ));
            }
            "tool_calls"
        }
        other => {
            for piece in pieces(text_of(other)) {
                frames.push(openai_chat_chunk(model, json!({ "content": piece }), None));
            }
            "stop"
        }
    };

    frames.push(openai_chat_chunk(model, json!({}), Some(finish_reason)));
    frames.push("data: [DONE]\n\n".to_owned());
    frames
}
