//! Normalization of the OpenAI chat message family into `{text, images}`.

use serde_json::{Value, json};

use crate::jimeng::image::ImageInput;

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedMessages {
    pub text: String,
    pub images: Vec<ImageInput>,
    pub has_images: bool,
}

/// Flatten a conversation into one prompt plus its image inputs.
///
/// Accepts string content, arrays of typed parts (`text`, `input_text`,
/// `image_url`, `input_image`, `image`) and bare objects carrying one of
/// the known image keys.
pub fn parse_messages(messages: &[Value]) -> ParsedMessages {
    let mut text_parts: Vec<String> = Vec::new();
    let mut images: Vec<ImageInput> = Vec::new();

    for message in messages {
        match message.get("content") {
            Some(Value::String(s)) => push_text(&mut text_parts, s),
            Some(Value::Array(parts)) => {
                for part in parts {
                    parse_part(part, &mut text_parts, &mut images);
                }
            }
            Some(part @ Value::Object(_)) => parse_part(part, &mut text_parts, &mut images),
            _ => {}
        }
    }

    let has_images = !images.is_empty();
    ParsedMessages {
        text: text_parts.join("\n"),
        images,
        has_images,
    }
}

fn parse_part(part: &Value, text_parts: &mut Vec<String>, images: &mut Vec<ImageInput>) {
    if let Value::String(s) = part {
        push_text(text_parts, s);
        return;
    }

    let part_type = part.get("type").and_then(|v| v.as_str()).unwrap_or("");
    match part_type {
        "text" | "input_text" => {
            if let Some(s) = part.get("text").and_then(|v| v.as_str()) {
                push_text(text_parts, s);
            }
        }
        "image_url" | "input_image" | "image" => {
            if let Some(image) = extract_image(part) {
                images.push(image);
            }
        }
        _ => {
            // Untyped object: image keys first, then a text fallback.
            if let Some(image) = extract_image(part) {
                images.push(image);
            } else if let Some(s) = part.get("text").and_then(|v| v.as_str()) {
                push_text(text_parts, s);
            }
        }
    }
}

/// Pull an image out of a part, trying the OpenAI key family in order.
fn extract_image(part: &Value) -> Option<ImageInput> {
    // `image_url` is either a bare string or `{url: ...}`.
    match part.get("image_url") {
        Some(Value::String(s)) => return Some(ImageInput::classify(s)),
        Some(Value::Object(obj)) => {
            if let Some(url) = obj.get("url").and_then(|v| v.as_str()) {
                return Some(ImageInput::classify(url));
            }
        }
        _ => {}
    }
    if let Some(url) = part.get("url").and_then(|v| v.as_str()) {
        return Some(ImageInput::classify(url));
    }
    for key in ["b64_json", "base64", "image_base64"] {
        if let Some(b64) = part.get(key).and_then(|v| v.as_str()) {
            return Some(ImageInput::from_base64(b64));
        }
    }
    match part.get("image_bytes") {
        Some(Value::String(b64)) => {
            return Some(ImageInput::from_base64(b64));
        }
        Some(Value::Array(values)) => {
            let bytes: Vec<u8> = values
                .iter()
                .filter_map(|v| v.as_u64().map(|n| n as u8))
                .collect();
            if !bytes.is_empty() {
                return Some(ImageInput::Bytes(bytes));
            }
        }
        _ => {}
    }
    None
}

fn push_text(parts: &mut Vec<String>, s: &str) {
    let s = s.trim();
    if !s.is_empty() {
        parts.push(s.to_string());
    }
}
