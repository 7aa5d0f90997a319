//! Generation orchestration: the public operations composed from the
//! uploader, draft builders and poller.

use crate::error::{GatewayError, Result};
use crate::jimeng::draft::{self, ImageDraftSpec, VideoDraftSpec};
use crate::jimeng::image::ImageInput;
use crate::jimeng::models::{self, ImageParams};
use crate::jimeng::poll::{self, GenerationKind, PollConfig, StatusTable};
use crate::jimeng::{UpstreamClient, credit, upload};

/// Per-process knobs the orchestrator needs from configuration.
pub struct GenerationSettings<'a> {
    pub max_poll_count: u32,
    pub stall_ticks: u32,
    pub strict_international_models: bool,
    pub table: &'a StatusTable,
}

#[derive(Debug, Clone)]
pub struct ImageRequest {
    pub model: String,
    pub prompt: String,
    pub ratio: String,
    pub resolution: String,
    pub negative_prompt: String,
    pub sample_strength: f64,
}

#[derive(Debug, Clone)]
pub struct VideoRequest {
    pub model: String,
    pub prompt: String,
    pub ratio: String,
    pub resolution: String,
    pub duration: u32,
    pub file_paths: Vec<String>,
}

/// Geometry for a model, honoring the nanobanana override.
pub fn effective_image_params(model: &str, resolution: &str, ratio: &str) -> Result<ImageParams> {
    if model == models::NANOBANANA_MODEL {
        let params = models::nanobanana_params();
        tracing::info!(
            requested_resolution = resolution,
            requested_ratio = ratio,
            "nanobanana: forcing 1024x1024 / 2k"
        );
        return Ok(params);
    }
    models::image_params(resolution, ratio)
}

/// How many artifacts a text-to-image call should wait for.
pub fn expected_image_count(model: &str, prompt: &str) -> u32 {
    if model == models::NANOBANANA_MODEL {
        return 1;
    }
    if model == "jimeng-4.0" {
        if let Some(n) = models::multi_image_count(prompt) {
            return n;
        }
    }
    4
}

/// Text-to-image. Returns artifact URLs in item order.
pub async fn generate_images(
    up: &UpstreamClient,
    settings: &GenerationSettings<'_>,
    req: &ImageRequest,
) -> Result<Vec<String>> {
    let params = effective_image_params(&req.model, &req.resolution, &req.ratio)?;
    let model_key = models::resolve_image_model(
        &req.model,
        up.region.is_international,
        settings.strict_international_models,
    )?;
    let expected = expected_image_count(&req.model, &req.prompt);

    credit::ensure_credit(up).await;

    let payload = draft::text_to_image_payload(&ImageDraftSpec {
        model_key,
        prompt: &req.prompt,
        negative_prompt: &req.negative_prompt,
        sample_strength: req.sample_strength,
        params,
        assistant_id: up.region.assistant_id,
    });
    let history_id = draft::submit_draft(up, &payload, None).await?;
    tracing::info!(history_id, model = req.model, expected, "image draft submitted");

    let config = PollConfig::image(expected, settings.max_poll_count, settings.stall_ticks);
    let outcome = poll::poll(&config, settings.table, || {
        poll::fetch_history(up, &history_id, GenerationKind::Image)
    })
    .await?;

    let urls = poll::extract_image_urls(&outcome.data);
    tracing::info!(
        history_id,
        count = urls.len(),
        ticks = outcome.ticks,
        elapsed_ms = outcome.elapsed.as_millis() as u64,
        "image generation finished"
    );
    if urls.is_empty() {
        return Err(GatewayError::Server(
            "finished record carries no image URLs".into(),
        ));
    }
    Ok(urls)
}

/// Image-to-image with 1..=10 reference inputs. Uploads run strictly in
/// order: the draft's ability list is positional.
pub async fn generate_image_composition(
    up: &UpstreamClient,
    settings: &GenerationSettings<'_>,
    req: &ImageRequest,
    images: Vec<ImageInput>,
) -> Result<Vec<String>> {
    if images.is_empty() || images.len() > 10 {
        return Err(GatewayError::Validation(format!(
            "composition requires 1..=10 images, got {}",
            images.len()
        )));
    }

    let params = effective_image_params(&req.model, &req.resolution, &req.ratio)?;
    let model_key = models::resolve_image_model(
        &req.model,
        up.region.is_international,
        settings.strict_international_models,
    )?;

    credit::ensure_credit(up).await;

    let mut uris = Vec::with_capacity(images.len());
    for (index, input) in images.into_iter().enumerate() {
        let bytes = input.into_bytes(&up.http).await?;
        let uri = upload::upload_image(up, &bytes).await?;
        tracing::debug!(index, uri, "reference image uploaded");
        uris.push(uri);
    }

    let payload = draft::blend_payload(
        &ImageDraftSpec {
            model_key,
            prompt: &req.prompt,
            negative_prompt: &req.negative_prompt,
            sample_strength: req.sample_strength,
            params,
            assistant_id: up.region.assistant_id,
        },
        &uris,
    );
    let history_id = draft::submit_draft(up, &payload, None).await?;
    tracing::info!(history_id, inputs = uris.len(), "blend draft submitted");

    let config = PollConfig::image(1, settings.max_poll_count, settings.stall_ticks);
    let outcome = poll::poll(&config, settings.table, || {
        poll::fetch_history(up, &history_id, GenerationKind::Image)
    })
    .await?;

    let urls = poll::extract_image_urls(&outcome.data);
    if urls.is_empty() {
        return Err(GatewayError::Server(
            "finished record carries no image URLs".into(),
        ));
    }
    Ok(urls)
}

/// Text/image-to-video. Returns the single artifact URL.
pub async fn generate_video(
    up: &UpstreamClient,
    settings: &GenerationSettings<'_>,
    req: &VideoRequest,
) -> Result<String> {
    if !(4..=15).contains(&req.duration) {
        return Err(GatewayError::Validation(format!(
            "duration must be an integer in [4, 15], got {}",
            req.duration
        )));
    }
    if req.file_paths.len() > 2 {
        return Err(GatewayError::Validation(format!(
            "at most 2 frame inputs are supported, got {}",
            req.file_paths.len()
        )));
    }

    let model_key = models::resolve_video_model(&req.model);
    let draft_version = models::draft_version(&req.model);
    let (width, height) = models::video_resolution(&req.resolution, &req.ratio)?;

    credit::ensure_credit(up).await;

    // First frame before last frame.
    let mut frame_uris = Vec::with_capacity(req.file_paths.len());
    for path in &req.file_paths {
        let bytes = ImageInput::classify(path).into_bytes(&up.http).await?;
        frame_uris.push(upload::upload_image(up, &bytes).await?);
    }

    let payload = draft::video_payload(&VideoDraftSpec {
        model_key,
        draft_version,
        prompt: &req.prompt,
        width,
        height,
        duration_secs: req.duration,
        ratio: &req.ratio,
        resolution: &req.resolution,
        first_frame_uri: frame_uris.first().map(|s| s.as_str()),
        end_frame_uri: frame_uris.get(1).map(|s| s.as_str()),
        assistant_id: up.region.assistant_id,
    });
    let history_id = draft::submit_draft(up, &payload, Some(draft_version)).await?;
    tracing::info!(history_id, model = req.model, "video draft submitted");

    let config = PollConfig::video(settings.max_poll_count, settings.stall_ticks);
    let outcome = poll::poll(&config, settings.table, || {
        poll::fetch_history(up, &history_id, GenerationKind::Video)
    })
    .await?;

    poll::extract_video_url(&outcome.data)
        .ok_or_else(|| GatewayError::Server("finished record carries no video URL".into()))
}
