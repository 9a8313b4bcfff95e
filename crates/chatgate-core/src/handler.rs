use std::convert::Infallible;
use std::sync::Arc;

use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use chatgate_protocol::openai::{
    ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, ChunkChoice, ChunkDelta,
    CompletionChoice, CompletionMessage, ErrorEnvelope, ListModelsResponse, ModelObject, Usage,
};
use chatgate_protocol::{DONE_LINE, encode_data};
use chatgate_provider_core::{
    ByteStream, ChatInput, DEFAULT_SESSION_KEY, FinishReason, StreamEvent, StreamTranslator,
    TranslateOptions, build_prompt, collect,
};
use futures_util::{Stream, StreamExt};
use http::header::{CACHE_CONTROL, CONTENT_TYPE};
use serde_json::{Map, Value, json};
use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

use crate::chat::open_stream;
use crate::core::GatewayState;
use crate::error::GatewayError;
use crate::stats::{estimate_completion_tokens, estimate_prompt_tokens};

const SESSION_HEADER: &str = "x-session-id";
const STRIP_REASONING_HEADER: &str = "x-strip-reasoning";
const CLEAN_MODE_HEADER: &str = "x-clean-mode";

pub async fn list_models(State(state): State<Arc<GatewayState>>) -> Json<ListModelsResponse> {
    let data = state
        .registry
        .models()
        .into_iter()
        .map(|model| ModelObject::new(model.id, model.owned_by))
        .collect();
    Json(ListModelsResponse::new(data))
}

pub async fn health(State(state): State<Arc<GatewayState>>) -> Json<Value> {
    let mut providers = Map::new();
    let mut any_credentials = false;
    for provider in state.registry.providers() {
        let record = match provider.credential_record().await {
            Ok(record) => record,
            Err(err) => {
                warn!(provider = %provider.id(), error = %err, "credential lookup failed");
                None
            }
        };
        any_credentials |= record.is_some();
        providers.insert(
            provider.id().to_string(),
            json!({
                "has_credentials": record.is_some(),
                "captured_at": record.as_ref().and_then(|record| record.captured_at_rfc3339()),
            }),
        );
    }
    Json(json!({
        "status": if any_credentials { "ok" } else { "no_credentials" },
        "providers": providers,
    }))
}

pub async fn chat_completions(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, GatewayError> {
    let request: ChatCompletionRequest = serde_json::from_slice(&body)
        .map_err(|err| GatewayError::BadRequest(format!("invalid request body: {err}")))?;
    if request.model.trim().is_empty() {
        return Err(GatewayError::BadRequest("`model` is required".to_string()));
    }
    if request.messages.is_empty() {
        return Err(GatewayError::BadRequest(
            "`messages` must not be empty".to_string(),
        ));
    }

    let provider = state.registry.resolve(&request.model)?;
    let options = TranslateOptions {
        strip_reasoning: flag_header(&headers, STRIP_REASONING_HEADER)
            .or(request.strip_reasoning)
            .unwrap_or(false),
        clean_mode: flag_header(&headers, CLEAN_MODE_HEADER)
            .or(request.clean_mode)
            .unwrap_or(false),
    };
    let session_key = headers
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(DEFAULT_SESSION_KEY)
        .to_string();
    let prompt = build_prompt(&request.messages);
    let prompt_tokens = estimate_prompt_tokens(prompt.chars().count());
    let input = ChatInput {
        model: provider.map_model(&request.model),
        prompt,
    };
    info!(
        provider = %provider.id(),
        model = %request.model,
        upstream_model = %input.model,
        session_key = %session_key,
        is_stream = request.stream,
        "chat completion"
    );
    state.stats.record_request(prompt_tokens);

    let upstream = open_stream(provider.as_ref(), &session_key, &input).await?;
    let translator = provider.translator(options);
    let meta = CompletionMeta::new(request.model);

    if request.stream {
        let body = Body::from_stream(completion_stream(upstream, translator, meta, state));
        let mut response = Response::new(body);
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
        response
            .headers_mut()
            .insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        response
            .headers_mut()
            .insert("x-accel-buffering", HeaderValue::from_static("no"));
        return Ok(response);
    }

    let collected = collect(upstream, translator).await?;
    let output_chars = collected.content.chars().count()
        + collected
            .reasoning
            .as_deref()
            .map_or(0, |reasoning| reasoning.chars().count());
    let completion_tokens = estimate_completion_tokens(output_chars);
    state.stats.record_output(completion_tokens);

    let response = ChatCompletionResponse {
        id: meta.id,
        object: ChatCompletionResponse::OBJECT.to_string(),
        created: meta.created,
        model: meta.model,
        choices: vec![CompletionChoice {
            index: 0,
            message: CompletionMessage {
                role: "assistant".to_string(),
                content: collected.content,
                reasoning_content: collected.reasoning,
            },
            finish_reason: FinishReason::Stop.as_str().to_string(),
        }],
        usage: Usage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        },
    };
    Ok(Json(response).into_response())
}

/// `1`/`true` enables, `0`/`false` disables, anything else defers to the body.
fn flag_header(headers: &HeaderMap, name: &str) -> Option<bool> {
    let value = headers.get(name)?.to_str().ok()?.trim();
    if value == "1" || value.eq_ignore_ascii_case("true") {
        Some(true)
    } else if value == "0" || value.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

struct CompletionMeta {
    id: String,
    created: i64,
    model: String,
}

impl CompletionMeta {
    fn new(model: String) -> Self {
        let uuid = Uuid::new_v4().simple().to_string();
        Self {
            id: format!("chatcmpl-{}", &uuid[..8]),
            created: OffsetDateTime::now_utc().unix_timestamp(),
            model,
        }
    }
}

/// Renders stream events as OpenAI chunks; the terminal chunk is written once.
struct ChunkWriter {
    meta: CompletionMeta,
    output_chars: usize,
    finished: bool,
}

impl ChunkWriter {
    fn chunk(&self, delta: ChunkDelta, finish_reason: Option<&str>) -> Option<Bytes> {
        encode_data(&ChatCompletionChunk {
            id: self.meta.id.clone(),
            object: ChatCompletionChunk::OBJECT.to_string(),
            created: self.meta.created,
            model: self.meta.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason: finish_reason.map(str::to_string),
            }],
        })
    }

    fn write(&mut self, event: StreamEvent) -> Option<Bytes> {
        match event {
            StreamEvent::Content(text) => {
                self.output_chars += text.chars().count();
                self.chunk(
                    ChunkDelta {
                        content: Some(text),
                        reasoning_content: None,
                    },
                    None,
                )
            }
            StreamEvent::Reasoning(text) => {
                self.output_chars += text.chars().count();
                self.chunk(
                    ChunkDelta {
                        content: None,
                        reasoning_content: Some(text),
                    },
                    None,
                )
            }
            StreamEvent::Terminal(reason) => {
                if self.finished {
                    return None;
                }
                self.finished = true;
                self.chunk(ChunkDelta::default(), Some(reason.as_str()))
            }
        }
    }
}

fn completion_stream(
    mut upstream: ByteStream,
    mut translator: Box<dyn StreamTranslator>,
    meta: CompletionMeta,
    state: Arc<GatewayState>,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send {
    async_stream::stream! {
        let mut writer = ChunkWriter { meta, output_chars: 0, finished: false };
        let mut failure = None;
        while let Some(chunk) = upstream.next().await {
            let events = match chunk {
                Ok(chunk) => translator.transform(&chunk),
                Err(err) => {
                    warn!(error = %err, "upstream stream failed");
                    failure = Some(err);
                    break;
                }
            };
            for event in events {
                if let Some(bytes) = writer.write(event) {
                    yield Ok(bytes);
                }
            }
            if writer.finished {
                break;
            }
        }

        if let Some(err) = failure {
            let envelope = ErrorEnvelope::new(err.to_string(), "api_error", Some(err.code().to_string()));
            if let Some(bytes) = encode_data(&envelope) {
                yield Ok(bytes);
            }
        } else if !writer.finished {
            for event in translator.finalize() {
                if let Some(bytes) = writer.write(event) {
                    yield Ok(bytes);
                }
            }
        }
        yield Ok(Bytes::from_static(DONE_LINE.as_bytes()));
        state
            .stats
            .record_output(estimate_completion_tokens(writer.output_chars));
    }
}
