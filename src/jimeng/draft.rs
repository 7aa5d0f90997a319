//! Draft document construction and submission.
//!
//! A draft is a nested, versioned JSON tree; every node carries a fresh
//! uuid. The tree is built as `serde_json` values and serialized once into
//! the `draft_content` string of the generate call.

use serde_json::{Value, json};

use crate::error::{GatewayError, Result};
use crate::jimeng::models::ImageParams;
use crate::jimeng::{UpstreamClient, auth};

const IMAGE_DRAFT_VERSION: &str = "3.0.2";

/// A fully-assembled `aigc_draft/generate` request body.
#[derive(Debug, Clone)]
pub struct DraftPayload {
    pub submit_id: String,
    pub body: Value,
}

/// Inputs shared by both image modes.
pub struct ImageDraftSpec<'a> {
    pub model_key: &'a str,
    pub prompt: &'a str,
    pub negative_prompt: &'a str,
    pub sample_strength: f64,
    pub params: ImageParams,
    pub assistant_id: u64,
}

fn generation_seed() -> u64 {
    rand::random_range(2_500_000_000u64..2_600_000_000u64)
}

fn node_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn metadata_node() -> Value {
    json!({
        "type": "",
        "id": node_id(),
        "created_platform": 3,
        "created_platform_version": "",
        "created_time_in_ms": chrono::Utc::now().timestamp_millis(),
        "created_did": "",
    })
}

/// The core parameter block echoed into every generation ability.
fn core_param(spec: &ImageDraftSpec<'_>, prompt: &str) -> Value {
    json!({
        "type": "",
        "id": node_id(),
        "model": spec.model_key,
        "prompt": prompt,
        "negative_prompt": spec.negative_prompt,
        "seed": generation_seed(),
        "sample_strength": spec.sample_strength,
        "image_ratio": spec.params.image_ratio,
        "large_image_info": {
            "type": "",
            "id": node_id(),
            "height": spec.params.height,
            "width": spec.params.width,
            "resolution_type": spec.params.resolution_type,
        },
        "intelligent_ratio": false,
    })
}

fn draft_document(component: Value, component_id: &str) -> Value {
    json!({
        "type": "draft",
        "id": node_id(),
        "min_version": IMAGE_DRAFT_VERSION,
        "min_features": [],
        "is_from_tsn": true,
        "version": IMAGE_DRAFT_VERSION,
        "main_component_id": component_id,
        "component_list": [component],
    })
}

fn generate_body(spec_aid: u64, root_model: &str, submit_id: &str, metrics_extra: &str, draft: &Value) -> Value {
    json!({
        "extend": {
            "root_model": root_model,
            "template_id": "",
        },
        "submit_id": submit_id,
        "metrics_extra": metrics_extra,
        "draft_content": draft.to_string(),
        "http_common_info": { "aid": spec_aid },
    })
}

fn image_metrics_extra(submit_id: &str) -> String {
    json!({
        "enterFrom": "click",
        "isDefaultSeed": 1,
        "promptSource": "custom",
        "isRegenerate": false,
        "originSubmitId": submit_id,
    })
    .to_string()
}

/// Text-to-image draft: one component with a `generate` ability.
pub fn text_to_image_payload(spec: &ImageDraftSpec<'_>) -> DraftPayload {
    let component_id = node_id();
    let submit_id = node_id();

    let component = json!({
        "type": "image_base_component",
        "id": component_id,
        "min_version": IMAGE_DRAFT_VERSION,
        "metadata": metadata_node(),
        "generate_type": "generate",
        "aigc_mode": "workbench",
        "abilities": {
            "type": "",
            "id": node_id(),
            "generate": {
                "type": "",
                "id": node_id(),
                "core_param": core_param(spec, spec.prompt),
                "history_option": { "type": "", "id": node_id() },
            }
        }
    });

    let draft = draft_document(component, &component_id);
    let metrics_extra = image_metrics_extra(&submit_id);
    DraftPayload {
        body: generate_body(spec.assistant_id, spec.model_key, &submit_id, &metrics_extra, &draft),
        submit_id,
    }
}

/// Image-to-image draft: one `blend` ability entry per uploaded URI, in
/// submission order, indexed by a parallel placeholder list.
pub fn blend_payload(spec: &ImageDraftSpec<'_>, image_uris: &[String]) -> DraftPayload {
    let component_id = node_id();
    let submit_id = node_id();
    let prompt = format!("##{}", spec.prompt);

    let ability_list: Vec<Value> = image_uris
        .iter()
        .map(|uri| {
            json!({
                "type": "",
                "id": node_id(),
                "name": "byte_edit",
                "image_uri_list": [uri],
                "image_list": [{
                    "type": "image",
                    "id": node_id(),
                    "source_from": "upload",
                    "platform_type": 1,
                    "name": "",
                    "image_uri": uri,
                    "width": 0,
                    "height": 0,
                    "format": "",
                    "uri": uri,
                }],
                "strength": spec.sample_strength,
            })
        })
        .collect();

    let placeholder_list: Vec<Value> = (0..image_uris.len())
        .map(|i| {
            json!({
                "type": "",
                "id": node_id(),
                "ability_index": i,
            })
        })
        .collect();

    let component = json!({
        "type": "image_base_component",
        "id": component_id,
        "min_version": IMAGE_DRAFT_VERSION,
        "metadata": metadata_node(),
        "generate_type": "blend",
        "aigc_mode": "workbench",
        "abilities": {
            "type": "",
            "id": node_id(),
            "blend": {
                "type": "",
                "id": node_id(),
                "min_features": [],
                "core_param": core_param(spec, &prompt),
                "ability_list": ability_list,
                "prompt_placeholder_info_list": placeholder_list,
                "postedit_param": { "type": "", "id": node_id(), "generate_type": 0 },
            }
        }
    });

    let draft = draft_document(component, &component_id);
    let metrics_extra = image_metrics_extra(&submit_id);
    DraftPayload {
        body: generate_body(spec.assistant_id, spec.model_key, &submit_id, &metrics_extra, &draft),
        submit_id,
    }
}

/// Inputs for the video draft.
pub struct VideoDraftSpec<'a> {
    pub model_key: &'a str,
    pub draft_version: &'a str,
    pub prompt: &'a str,
    pub width: u32,
    pub height: u32,
    pub duration_secs: u32,
    pub ratio: &'a str,
    pub resolution: &'a str,
    pub first_frame_uri: Option<&'a str>,
    pub end_frame_uri: Option<&'a str>,
    pub assistant_id: u64,
}

fn frame_node(uri: &str, width: u32, height: u32) -> Value {
    json!({
        "format": "",
        "height": height,
        "id": node_id(),
        "image_uri": uri,
        "name": "",
        "platform_type": 1,
        "source_from": "upload",
        "type": "image",
        "uri": uri,
        "width": width,
    })
}

/// Text/image-to-video draft. A supplied end frame pins the 3.0 model.
pub fn video_payload(spec: &VideoDraftSpec<'_>) -> DraftPayload {
    let component_id = node_id();
    let submit_id = node_id();

    let metrics_extra = json!({
        "enterFrom": "click",
        "isDefaultSeed": 1,
        "promptSource": "custom",
        "isRegenerate": false,
        "originSubmitId": submit_id,
    })
    .to_string();

    let first_frame = spec
        .first_frame_uri
        .map(|uri| frame_node(uri, spec.width, spec.height));
    let end_frame = spec
        .end_frame_uri
        .map(|uri| frame_node(uri, spec.width, spec.height));

    let root_model = if end_frame.is_some() {
        "dreamina_ic_generate_video_model_vgfm_3.0"
    } else {
        spec.model_key
    };

    let draft = json!({
        "type": "draft",
        "id": node_id(),
        "min_version": "3.0.5",
        "is_from_tsn": true,
        "version": spec.draft_version,
        "main_component_id": component_id,
        "component_list": [{
            "type": "video_base_component",
            "id": component_id,
            "min_version": "1.0.0",
            "metadata": metadata_node(),
            "generate_type": "gen_video",
            "aigc_mode": "workbench",
            "abilities": {
                "type": "",
                "id": node_id(),
                "gen_video": {
                    "id": node_id(),
                    "type": "",
                    "text_to_video_params": {
                        "type": "",
                        "id": node_id(),
                        "model_req_key": spec.model_key,
                        "priority": 0,
                        "seed": generation_seed(),
                        "video_aspect_ratio": spec.ratio,
                        "video_gen_inputs": [{
                            "duration_ms": spec.duration_secs * 1000,
                            "first_frame_image": first_frame,
                            "end_frame_image": end_frame,
                            "fps": 24,
                            "id": node_id(),
                            "min_version": "3.0.5",
                            "prompt": spec.prompt,
                            "resolution": spec.resolution,
                            "type": "",
                            "video_mode": 2,
                        }]
                    },
                    "video_task_extra": metrics_extra,
                }
            }
        }],
    });

    let body = json!({
        "extend": {
            "root_model": root_model,
            "m_video_commerce_info": {
                "benefit_type": "basic_video_operation_vgfm_v_three",
                "resource_id": "generate_video",
                "resource_id_type": "str",
                "resource_sub_type": "aigc",
            },
            "m_video_commerce_info_list": [{
                "benefit_type": "basic_video_operation_vgfm_v_three",
                "resource_id": "generate_video",
                "resource_id_type": "str",
                "resource_sub_type": "aigc",
            }]
        },
        "submit_id": submit_id,
        "metrics_extra": metrics_extra,
        "draft_content": draft.to_string(),
        "http_common_info": { "aid": spec.assistant_id },
    });

    DraftPayload { submit_id, body }
}

/// Submit a draft and return the upstream `history_record_id`.
pub async fn submit_draft(
    up: &UpstreamClient,
    payload: &DraftPayload,
    da_version: Option<&str>,
) -> Result<String> {
    let uri = "/mweb/v1/aigc_draft/generate";
    let headers = auth::build_headers(&up.region, &up.secret, uri);
    let mut params = auth::standard_query_params(&up.region);
    if let Some(version) = da_version {
        params.push(("da_version", version.to_string()));
    }

    let resp = up
        .http
        .post(up.api_url(uri))
        .headers(headers)
        .query(&params)
        .json(&payload.body)
        .send()
        .await
        .map_err(|e| GatewayError::DraftSubmit(e.to_string()))?;

    let http_status = resp.status();
    if http_status == 401 || http_status == 403 {
        return Err(GatewayError::Auth(format!(
            "draft submit rejected: HTTP {http_status}"
        )));
    }

    let text = resp
        .text()
        .await
        .map_err(|e| GatewayError::DraftSubmit(e.to_string()))?;
    let body: Value = serde_json::from_str(&text).map_err(|e| {
        GatewayError::DraftSubmit(format!(
            "parse error: {e}, body: {}",
            &text[..text.len().min(500)]
        ))
    })?;

    let ret = match body.get("ret") {
        Some(Value::String(s)) => s.parse::<i64>().unwrap_or(0),
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0),
        _ => 0,
    };
    if ret != 0 {
        let errmsg = body
            .get("errmsg")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        return Err(GatewayError::DraftSubmit(format!("[ret={ret}] {errmsg}")));
    }

    let history_id = body
        .pointer("/data/aigc_data/history_record_id")
        .or_else(|| body.pointer("/data/history_record_id"))
        .or_else(|| body.pointer("/aigc_data/history_record_id"));

    match history_id {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(GatewayError::DraftSubmit(format!(
            "no history_record_id in response: {}",
            &text[..text.len().min(500)]
        ))),
    }
}
