//! OpenAI-shaped public surface.
//!
//! Every endpoint accepts a `Bearer` header carrying one session token or
//! a comma-separated pool; one token is drawn at random per request.

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, FromRequest, Multipart, Request, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Value, json};
use tokio_stream::wrappers::ReceiverStream;

use crate::AppState;
use crate::error::{GatewayError, Result};
use crate::jimeng::generate::{self, GenerationSettings, ImageRequest, VideoRequest};
use crate::jimeng::image::ImageInput;
use crate::jimeng::models;
use crate::jimeng::{UpstreamClient, chat, message};
use crate::pool::TokenPool;

const BODY_LIMIT: usize = 50 * 1024 * 1024;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .route("/v1/models", get(list_models))
        .route("/v1/images/generations", post(images_generations))
        .route("/v1/images/compositions", post(images_compositions))
        .route("/v1/videos/generations", post(videos_generations))
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/session/generate", post(session_generate))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .with_state(state)
}

async fn ping() -> &'static str {
    "pong"
}

async fn list_models() -> Json<Value> {
    let mut data: Vec<Value> = Vec::new();
    let mut ids: Vec<&str> = models::image_model_map().into_keys().collect();
    ids.extend(models::video_model_map().into_keys());
    ids.sort_unstable();
    for id in ids {
        data.push(json!({ "id": id, "object": "model" }));
    }
    Json(json!({ "object": "list", "data": data }))
}

/// Draw one upstream client from the request's token pool.
fn pick_upstream(state: &AppState, headers: &HeaderMap) -> Result<UpstreamClient> {
    let header_value = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| GatewayError::Auth("missing Authorization header".into()))?;
    let pool = TokenPool::from_bearer(header_value)?;
    let token = pool.pick()?;
    tracing::debug!(pool_size = pool.len(), region = token.region.as_str(), "session token picked");
    Ok(UpstreamClient::new(state.http.clone(), &token))
}

fn settings_of(state: &AppState) -> GenerationSettings<'_> {
    GenerationSettings {
        max_poll_count: state.config.max_poll_count,
        stall_ticks: state.config.stall_ticks,
        strict_international_models: state.config.strict_international_models,
        table: &state.status_table,
    }
}

/// Fixed pixel sizes are not part of this API; geometry is always
/// `ratio` + `resolution`.
fn reject_fixed_size_fields(body: &Value) -> Result<()> {
    for key in ["size", "width", "height"] {
        if body.get(key).is_some() {
            return Err(GatewayError::Validation(format!(
                "unsupported field `{key}`: use `ratio` and `resolution`"
            )));
        }
    }
    Ok(())
}

fn required_prompt(body: &Value) -> Result<String> {
    body.get("prompt")
        .and_then(|v| v.as_str())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .ok_or_else(|| GatewayError::Validation("prompt is required".into()))
}

fn image_request_from(body: &Value, default_model: &str) -> Result<ImageRequest> {
    Ok(ImageRequest {
        model: body
            .get("model")
            .and_then(|v| v.as_str())
            .unwrap_or(default_model)
            .to_string(),
        prompt: required_prompt(body)?,
        ratio: body
            .get("ratio")
            .and_then(|v| v.as_str())
            .unwrap_or("1:1")
            .to_string(),
        resolution: body
            .get("resolution")
            .and_then(|v| v.as_str())
            .unwrap_or("2k")
            .to_string(),
        negative_prompt: body
            .get("negative_prompt")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string(),
        sample_strength: body
            .get("sample_strength")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.5)
            .clamp(0.0, 1.0),
    })
}

/// `duration` arrives as a JSON integer, or as a string in multipart form.
/// Non-integers are rejected, bounds are checked downstream.
fn parse_duration(value: Option<&Value>) -> Result<u32> {
    match value {
        None | Some(Value::Null) => Ok(5),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(|d| d as u32)
            .ok_or_else(|| GatewayError::Validation("duration must be an integer".into())),
        Some(Value::String(s)) => s
            .trim()
            .parse::<u32>()
            .map_err(|_| GatewayError::Validation(format!("invalid duration `{s}`"))),
        Some(other) => Err(GatewayError::Validation(format!(
            "invalid duration `{other}`"
        ))),
    }
}

/// `file_paths` (or `filePaths`) as a list of path/URL strings.
fn collect_file_paths(body: &Value) -> Vec<String> {
    body.get("file_paths")
        .or_else(|| body.get("filePaths"))
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default()
}

/// An image entry in a composition body: a bare string or an object with
/// one of the known keys.
fn image_from_value(value: &Value) -> Option<ImageInput> {
    match value {
        Value::String(s) => Some(ImageInput::classify(s)),
        Value::Object(_) => {
            if let Some(url) = value
                .pointer("/image_url/url")
                .or_else(|| value.get("image_url"))
                .or_else(|| value.get("url"))
                .and_then(|v| v.as_str())
            {
                return Some(ImageInput::classify(url));
            }
            for key in ["b64_json", "base64", "image_base64"] {
                if let Some(b64) = value.get(key).and_then(|v| v.as_str()) {
                    return Some(ImageInput::from_base64(b64));
                }
            }
            None
        }
        _ => None,
    }
}

fn created_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Render the artifact list, downloading and inlining when the caller
/// asked for `b64_json`.
async fn image_response(
    state: &AppState,
    urls: Vec<String>,
    response_format: Option<&str>,
) -> Result<Json<Value>> {
    let data: Vec<Value> = if response_format == Some("b64_json") {
        let mut entries = Vec::with_capacity(urls.len());
        for url in urls {
            let bytes = ImageInput::Url(url).into_bytes(&state.http).await?;
            entries.push(json!({ "b64_json": BASE64.encode(bytes) }));
        }
        entries
    } else {
        urls.into_iter().map(|url| json!({ "url": url })).collect()
    };
    Ok(Json(json!({ "created": created_now(), "data": data })))
}

async fn images_generations(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<Value>> {
    reject_fixed_size_fields(&body)?;
    let req = image_request_from(&body, models::DEFAULT_IMAGE_MODEL)?;
    let response_format = body
        .get("response_format")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let up = pick_upstream(&state, &headers)?;
    let urls = generate::generate_images(&up, &settings_of(&state), &req).await?;
    image_response(&state, urls, response_format.as_deref()).await
}

/// Multipart form for a composition: text fields plus 1..=10 image parts.
async fn composition_from_multipart(mut form: Multipart) -> Result<(Value, Vec<ImageInput>)> {
    let mut fields = serde_json::Map::new();
    let mut images = Vec::new();

    while let Some(field) = form
        .next_field()
        .await
        .map_err(|e| GatewayError::Validation(e.to_string()))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "image" | "images" | "file" | "files" => {
                if field.file_name().is_some() {
                    let bytes = field
                        .bytes()
                        .await
                        .map_err(|e| GatewayError::Validation(e.to_string()))?;
                    images.push(ImageInput::Bytes(bytes.to_vec()));
                } else {
                    let text = field
                        .text()
                        .await
                        .map_err(|e| GatewayError::Validation(e.to_string()))?;
                    images.push(ImageInput::classify(&text));
                }
            }
            "" => {}
            _ => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| GatewayError::Validation(e.to_string()))?;
                fields.insert(name, Value::String(text));
            }
        }
    }
    Ok((Value::Object(fields), images))
}

async fn images_compositions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    request: Request,
) -> Result<Json<Value>> {
    let content_type = request
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let (body, images) = if content_type.starts_with("multipart/") {
        let form = Multipart::from_request(request, &())
            .await
            .map_err(|e| GatewayError::Validation(e.to_string()))?;
        composition_from_multipart(form).await?
    } else {
        let bytes = axum::body::to_bytes(request.into_body(), BODY_LIMIT)
            .await
            .map_err(|e| GatewayError::Validation(e.to_string()))?;
        let body: Value = serde_json::from_slice(&bytes)
            .map_err(|e| GatewayError::Validation(format!("invalid JSON body: {e}")))?;
        let images = body
            .get("images")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(image_from_value).collect())
            .unwrap_or_default();
        (body, images)
    };

    let req = image_request_from(&body, models::DEFAULT_IMAGE_MODEL)?;
    let response_format = body
        .get("response_format")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let up = pick_upstream(&state, &headers)?;
    let urls =
        generate::generate_image_composition(&up, &settings_of(&state), &req, images).await?;
    image_response(&state, urls, response_format.as_deref()).await
}

/// Multipart form for a video: text fields, `duration` as string,
/// repeated `file_paths` entries.
async fn video_body_from_multipart(mut form: Multipart) -> Result<Value> {
    let mut fields = serde_json::Map::new();
    let mut file_paths: Vec<Value> = Vec::new();

    while let Some(field) = form
        .next_field()
        .await
        .map_err(|e| GatewayError::Validation(e.to_string()))?
    {
        let name = field.name().unwrap_or("").to_string();
        let text = field
            .text()
            .await
            .map_err(|e| GatewayError::Validation(e.to_string()))?;
        match name.as_str() {
            "file_paths" | "filePaths" => file_paths.push(Value::String(text)),
            "" => {}
            _ => {
                fields.insert(name, Value::String(text));
            }
        }
    }
    fields.insert("file_paths".to_string(), Value::Array(file_paths));
    Ok(Value::Object(fields))
}

async fn videos_generations(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    request: Request,
) -> Result<Json<Value>> {
    let content_type = request
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let body = if content_type.starts_with("multipart/") {
        let form = Multipart::from_request(request, &())
            .await
            .map_err(|e| GatewayError::Validation(e.to_string()))?;
        video_body_from_multipart(form).await?
    } else {
        let bytes = axum::body::to_bytes(request.into_body(), BODY_LIMIT)
            .await
            .map_err(|e| GatewayError::Validation(e.to_string()))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| GatewayError::Validation(format!("invalid JSON body: {e}")))?
    };

    let req = VideoRequest {
        model: body
            .get("model")
            .and_then(|v| v.as_str())
            .unwrap_or(models::DEFAULT_VIDEO_MODEL)
            .to_string(),
        prompt: required_prompt(&body)?,
        ratio: body
            .get("ratio")
            .and_then(|v| v.as_str())
            .unwrap_or("16:9")
            .to_string(),
        resolution: body
            .get("resolution")
            .and_then(|v| v.as_str())
            .unwrap_or("720p")
            .to_string(),
        duration: parse_duration(body.get("duration"))?,
        file_paths: collect_file_paths(&body),
    };

    let up = pick_upstream(&state, &headers)?;
    let url = generate::generate_video(&up, &settings_of(&state), &req).await?;
    Ok(Json(json!({
        "created": created_now(),
        "data": [{ "url": url }],
    })))
}

async fn chat_completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Response> {
    let messages = body
        .get("messages")
        .and_then(|v| v.as_array())
        .ok_or_else(|| GatewayError::Validation("messages is required".into()))?;
    let parsed = message::parse_messages(messages);
    if parsed.text.is_empty() && !parsed.has_images {
        return Err(GatewayError::Validation("empty conversation".into()));
    }
    let model = body
        .get("model")
        .and_then(|v| v.as_str())
        .unwrap_or(models::DEFAULT_IMAGE_MODEL)
        .to_string();
    let stream = body.get("stream").and_then(|v| v.as_bool()).unwrap_or(false);

    let up = pick_upstream(&state, &headers)?;

    if !stream {
        let content = chat::complete(&up, &settings_of(&state), &model, &parsed).await?;
        return Ok(Json(chat::completion_response(&model, &content)).into_response());
    }

    let (tx, rx) = tokio::sync::mpsc::channel::<std::result::Result<Event, std::convert::Infallible>>(16);
    tokio::spawn(async move {
        let id = chat::new_chunk_id();
        let created = created_now();
        let send = |event: Event| {
            let tx = tx.clone();
            async move {
                // A closed channel means the client went away; stop quietly.
                tx.send(Ok(event)).await.is_ok()
            }
        };

        let role = chat::chunk_value(
            &id,
            created,
            &model,
            json!({"role": "assistant", "content": ""}),
            None,
        );
        if !send(Event::default().data(role.to_string())).await {
            return;
        }

        let settings = settings_of(&state);
        match chat::complete(&up, &settings, &model, &parsed).await {
            Ok(content) => {
                let delta =
                    chat::chunk_value(&id, created, &model, json!({"content": content}), None);
                if !send(Event::default().data(delta.to_string())).await {
                    return;
                }
                let stop = chat::chunk_value(&id, created, &model, json!({}), Some("stop"));
                if !send(Event::default().data(stop.to_string())).await {
                    return;
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "chat generation failed mid-stream");
                let err = json!({"error": {"type": e.kind(), "message": e.to_string()}});
                if !send(Event::default().data(err.to_string())).await {
                    return;
                }
            }
        }
        let _ = send(Event::default().data("[DONE]")).await;
    });

    Ok(Sse::new(ReceiverStream::new(rx))
        .keep_alive(KeepAlive::default())
        .into_response())
}

async fn session_generate(State(state): State<Arc<AppState>>) -> Result<Json<Value>> {
    let session_id = state.session_provider.generate_session().await?;
    tracing::info!("session generated");
    Ok(Json(json!({
        "sessionId": session_id,
        "message": "session generated",
        "timestamp": created_now(),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_size_fields_are_rejected() {
        for key in ["size", "width", "height"] {
            let body = json!({ "prompt": "p", key: "1024" });
            let err = reject_fixed_size_fields(&body).unwrap_err();
            assert_eq!(err.kind(), "validation");
        }
        assert!(reject_fixed_size_fields(&json!({"prompt": "p", "ratio": "1:1"})).is_ok());
    }

    #[test]
    fn duration_accepts_integers_and_numeric_strings() {
        assert_eq!(parse_duration(Some(&json!(10))).unwrap(), 10);
        assert_eq!(parse_duration(Some(&json!("10"))).unwrap(), 10);
        assert_eq!(parse_duration(None).unwrap(), 5);
        assert_eq!(parse_duration(Some(&json!(4.5))).unwrap_err().kind(), "validation");
        assert_eq!(parse_duration(Some(&json!("ten"))).unwrap_err().kind(), "validation");
        assert_eq!(parse_duration(Some(&json!([10]))).unwrap_err().kind(), "validation");
    }

    #[test]
    fn file_paths_accepts_both_key_spellings() {
        assert_eq!(
            collect_file_paths(&json!({"file_paths": ["a", "b"]})),
            vec!["a".to_string(), "b".to_string()]
        );
        assert_eq!(
            collect_file_paths(&json!({"filePaths": ["c"]})),
            vec!["c".to_string()]
        );
        assert!(collect_file_paths(&json!({})).is_empty());
    }

    #[test]
    fn composition_images_accept_strings_and_objects() {
        assert_eq!(
            image_from_value(&json!("https://x/y.png")),
            Some(ImageInput::Url("https://x/y.png".into()))
        );
        assert_eq!(
            image_from_value(&json!({"image_url": {"url": "https://x/y.png"}})),
            Some(ImageInput::Url("https://x/y.png".into()))
        );
        assert_eq!(
            image_from_value(&json!({"b64_json": "aGVsbG8gd29ybGQh"})),
            Some(ImageInput::Base64("aGVsbG8gd29ybGQh".into()))
        );
        assert_eq!(image_from_value(&json!(42)), None);
    }

    #[test]
    fn image_request_defaults_apply() {
        let req = image_request_from(&json!({"prompt": "a red fox"}), models::DEFAULT_IMAGE_MODEL)
            .unwrap();
        assert_eq!(req.model, models::DEFAULT_IMAGE_MODEL);
        assert_eq!(req.ratio, "1:1");
        assert_eq!(req.resolution, "2k");
        assert_eq!(req.sample_strength, 0.5);
    }

    #[test]
    fn missing_prompt_is_a_validation_error() {
        let err =
            image_request_from(&json!({"model": "jimeng-4.0"}), models::DEFAULT_IMAGE_MODEL)
                .unwrap_err();
        assert_eq!(err.kind(), "validation");
    }
}
