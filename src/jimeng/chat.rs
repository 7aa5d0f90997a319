//! Chat-completions bridge: a conversation becomes one generation call and
//! the artifacts come back as markdown, plain or as OpenAI SSE chunks.

use serde_json::{Value, json};

use crate::error::Result;
use crate::jimeng::UpstreamClient;
use crate::jimeng::generate::{self, GenerationSettings, ImageRequest};
use crate::jimeng::message::ParsedMessages;

/// Run the generation a conversation asks for. Messages with image inputs
/// route to composition, text-only ones to plain text-to-image.
pub async fn complete(
    up: &UpstreamClient,
    settings: &GenerationSettings<'_>,
    model: &str,
    parsed: &ParsedMessages,
) -> Result<String> {
    let req = ImageRequest {
        model: model.to_string(),
        prompt: parsed.text.clone(),
        ratio: "1:1".to_string(),
        resolution: "2k".to_string(),
        negative_prompt: String::new(),
        sample_strength: 0.5,
    };
    let urls = if parsed.has_images {
        generate::generate_image_composition(up, settings, &req, parsed.images.clone()).await?
    } else {
        generate::generate_images(up, settings, &req).await?
    };
    Ok(render_markdown(&urls))
}

/// One markdown image per artifact, in item order.
pub fn render_markdown(urls: &[String]) -> String {
    urls.iter()
        .enumerate()
        .map(|(i, url)| format!("![image_{}]({url})", i + 1))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn new_chunk_id() -> String {
    format!("chatcmpl-{}", uuid::Uuid::new_v4().simple())
}

/// A non-streaming `chat.completion` body.
pub fn completion_response(model: &str, content: &str) -> Value {
    json!({
        "id": new_chunk_id(),
        "object": "chat.completion",
        "created": chrono::Utc::now().timestamp(),
        "model": model,
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop",
        }],
        "usage": {"prompt_tokens": 0, "completion_tokens": 0, "total_tokens": 0},
    })
}

/// One `chat.completion.chunk` SSE payload.
pub fn chunk_value(
    id: &str,
    created: i64,
    model: &str,
    delta: Value,
    finish_reason: Option<&str>,
) -> Value {
    json!({
        "id": id,
        "object": "chat.completion.chunk",
        "created": created,
        "model": model,
        "choices": [{
            "index": 0,
            "delta": delta,
            "finish_reason": finish_reason,
        }]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markdown_lists_every_artifact_in_order() {
        let urls = vec!["https://a/1".to_string(), "https://a/2".to_string()];
        assert_eq!(
            render_markdown(&urls),
            "![image_1](https://a/1)\n![image_2](https://a/2)"
        );
    }

    #[test]
    fn chunk_shape_matches_the_openai_wire_format() {
        let chunk = chunk_value(
            "chatcmpl-x",
            1_700_000_000,
            "jimeng-4.0",
            json!({"content": "hi"}),
            None,
        );
        assert_eq!(chunk["object"], "chat.completion.chunk");
        assert_eq!(chunk["choices"][0]["delta"]["content"], "hi");
        assert!(chunk["choices"][0]["finish_reason"].is_null());

        let last = chunk_value("chatcmpl-x", 1_700_000_000, "jimeng-4.0", json!({}), Some("stop"));
        assert_eq!(last["choices"][0]["finish_reason"], "stop");
    }

    #[test]
    fn completion_response_carries_the_content() {
        let resp = completion_response("jimeng-4.0", "![image_1](https://a/1)");
        assert_eq!(resp["object"], "chat.completion");
        assert_eq!(
            resp["choices"][0]["message"]["content"],
            "![image_1](https://a/1)"
        );
        assert_eq!(resp["choices"][0]["finish_reason"], "stop");
    }
}
