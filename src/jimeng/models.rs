//! Model name mappings and resolution/ratio tables.

use std::collections::HashMap;

use crate::error::{GatewayError, Result};

pub const DEFAULT_IMAGE_MODEL: &str = "jimeng-4.0";
pub const DEFAULT_VIDEO_MODEL: &str = "jimeng-video-3.0";
/// External model with a fixed output geometry (see [`nanobanana_params`]).
pub const NANOBANANA_MODEL: &str = "nanobanana";

/// Map user-facing image model names to internal model keys (mainland).
pub fn image_model_map() -> HashMap<&'static str, &'static str> {
    HashMap::from([
        ("jimeng-4.0", "high_aes_general_v40"),
        ("jimeng-3.1", "high_aes_general_v30l_art_fangzhou:general_v3.0_18b"),
        ("jimeng-3.0", "high_aes_general_v30l:general_v3.0_18b"),
        ("jimeng-2.1", "high_aes_general_v21_L:general_v2.1_L"),
        ("jimeng-2.0-pro", "high_aes_general_v20_L:general_v2.0_L"),
        ("jimeng-2.0", "high_aes_general_v20:general_v2.0"),
        ("jimeng-1.4", "high_aes_general_v14:general_v1.4"),
        ("jimeng-xl-pro", "text2img_xl_sft"),
        ("nanobanana", "external_model_nanobanana"),
    ])
}

/// International (Dreamina) image model keys. Smaller set; unknown names
/// are rejected there instead of falling back.
pub fn international_image_model_map() -> HashMap<&'static str, &'static str> {
    HashMap::from([
        ("jimeng-4.0", "high_aes_general_v40"),
        ("jimeng-3.0", "high_aes_general_v30l:general_v3.0_18b"),
        ("nanobanana", "external_model_nanobanana"),
    ])
}

/// Resolve an image model name against the regional table.
///
/// Mainland falls back to the default model on unknown names; the
/// international table rejects them while `strict` holds.
pub fn resolve_image_model(
    model: &str,
    is_international: bool,
    strict_international: bool,
) -> Result<&'static str> {
    if is_international {
        let map = international_image_model_map();
        match map.get(model).copied() {
            Some(key) => Ok(key),
            None if strict_international => Err(GatewayError::Validation(format!(
                "model {model} is not available on the international backend"
            ))),
            None => Ok(map[DEFAULT_IMAGE_MODEL]),
        }
    } else {
        let map = image_model_map();
        Ok(map
            .get(model)
            .copied()
            .unwrap_or(map[DEFAULT_IMAGE_MODEL]))
    }
}

/// Map user-facing video model names to internal model keys.
pub fn video_model_map() -> HashMap<&'static str, &'static str> {
    HashMap::from([
        ("jimeng-video-3.5-pro", "dreamina_ic_generate_video_model_vgfm_3.5_pro"),
        ("jimeng-video-3.0-pro", "dreamina_ic_generate_video_model_vgfm_3.0_pro"),
        ("jimeng-video-3.0", "dreamina_ic_generate_video_model_vgfm_3.0"),
        ("jimeng-video-2.0", "dreamina_ic_generate_video_model_vgfm_lite"),
        ("jimeng-video-2.0-pro", "dreamina_ic_generate_video_model_vgfm1.0"),
    ])
}

pub fn resolve_video_model(model: &str) -> &'static str {
    let map = video_model_map();
    map.get(model).copied().unwrap_or(map[DEFAULT_VIDEO_MODEL])
}

/// Map video model names to their draft content version.
pub fn draft_version(model: &str) -> &'static str {
    match model {
        "jimeng-video-3.5-pro" => "3.3.4",
        _ => "3.2.8",
    }
}

/// Per-generation image geometry handed into every core parameter block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageParams {
    pub width: u32,
    pub height: u32,
    /// Upstream ratio enum.
    pub image_ratio: u32,
    pub resolution_type: &'static str,
}

/// Upstream ratio enum values.
fn ratio_code(ratio: &str) -> Option<u32> {
    match ratio {
        "1:1" => Some(1),
        "3:4" => Some(2),
        "16:9" => Some(3),
        "4:3" => Some(4),
        "9:16" => Some(5),
        "2:3" => Some(6),
        "3:2" => Some(7),
        "21:9" => Some(8),
        "9:21" => Some(9),
        _ => None,
    }
}

/// Resolve image dimensions from `(resolution, ratio)`.
pub fn image_params(resolution: &str, ratio: &str) -> Result<ImageParams> {
    let table: HashMap<(&str, &str), (u32, u32)> = HashMap::from([
        // 1k
        (("1k", "1:1"), (1328, 1328)),
        (("1k", "4:3"), (1472, 1104)),
        (("1k", "3:4"), (1104, 1472)),
        (("1k", "16:9"), (1664, 936)),
        (("1k", "9:16"), (936, 1664)),
        (("1k", "21:9"), (2016, 864)),
        (("1k", "9:21"), (864, 2016)),
        (("1k", "3:2"), (1584, 1056)),
        (("1k", "2:3"), (1056, 1584)),
        // 2k
        (("2k", "1:1"), (2048, 2048)),
        (("2k", "4:3"), (2304, 1728)),
        (("2k", "3:4"), (1728, 2304)),
        (("2k", "16:9"), (2560, 1440)),
        (("2k", "9:16"), (1440, 2560)),
        (("2k", "21:9"), (3024, 1296)),
        (("2k", "9:21"), (1296, 3024)),
        (("2k", "3:2"), (2496, 1664)),
        (("2k", "2:3"), (1664, 2496)),
        // 4k
        (("4k", "1:1"), (4096, 4096)),
        (("4k", "4:3"), (4608, 3456)),
        (("4k", "3:4"), (3456, 4608)),
        (("4k", "16:9"), (5120, 2880)),
        (("4k", "9:16"), (2880, 5120)),
        (("4k", "21:9"), (6048, 2592)),
        (("4k", "9:21"), (2592, 6048)),
        (("4k", "3:2"), (4992, 3328)),
        (("4k", "2:3"), (3328, 4992)),
    ]);

    let (width, height) = *table.get(&(resolution, ratio)).ok_or_else(|| {
        GatewayError::Validation(format!("unsupported resolution/ratio: {resolution}/{ratio}"))
    })?;
    let resolution_type: &'static str = match resolution {
        "1k" => "1k",
        "2k" => "2k",
        "4k" => "4k",
        _ => unreachable!("table lookup already validated resolution"),
    };
    Ok(ImageParams {
        width,
        height,
        image_ratio: ratio_code(ratio)
            .ok_or_else(|| GatewayError::Validation(format!("unsupported ratio: {ratio}")))?,
        resolution_type,
    })
}

/// nanobanana ignores requested geometry entirely.
pub fn nanobanana_params() -> ImageParams {
    ImageParams {
        width: 1024,
        height: 1024,
        image_ratio: 1,
        resolution_type: "2k",
    }
}

/// Video resolution dimensions (resolution string × ratio).
pub fn video_resolution(resolution: &str, ratio: &str) -> Result<(u32, u32)> {
    let table: HashMap<(&str, &str), (u32, u32)> = HashMap::from([
        // 480p
        (("480p", "1:1"), (480, 480)),
        (("480p", "4:3"), (640, 480)),
        (("480p", "3:4"), (480, 640)),
        (("480p", "16:9"), (854, 480)),
        (("480p", "9:16"), (480, 854)),
        // 720p
        (("720p", "1:1"), (720, 720)),
        (("720p", "4:3"), (960, 720)),
        (("720p", "3:4"), (720, 960)),
        (("720p", "16:9"), (1280, 720)),
        (("720p", "9:16"), (720, 1280)),
        // 1080p
        (("1080p", "1:1"), (1080, 1080)),
        (("1080p", "4:3"), (1440, 1080)),
        (("1080p", "3:4"), (1080, 1440)),
        (("1080p", "16:9"), (1920, 1080)),
        (("1080p", "9:16"), (1080, 1920)),
    ]);

    table.get(&(resolution, ratio)).copied().ok_or_else(|| {
        GatewayError::Validation(format!(
            "unsupported video resolution/ratio: {resolution}/{ratio}"
        ))
    })
}

lazy_static::lazy_static! {
    static ref MULTI_IMAGE_RE: regex::Regex =
        regex::Regex::new(r"连续|绘本|故事|\d+张").unwrap();
    static ref IMAGE_COUNT_RE: regex::Regex =
        regex::Regex::new(r"(\d+)张").unwrap();
}

/// Detect a jimeng-4.0 multi-image prompt and its requested frame count
/// (`N张`, default 4).
pub fn multi_image_count(prompt: &str) -> Option<u32> {
    if !MULTI_IMAGE_RE.is_match(prompt) {
        return None;
    }
    let count = IMAGE_COUNT_RE
        .captures(prompt)
        .and_then(|cap| cap[1].parse::<u32>().ok())
        .unwrap_or(4);
    Some(count.max(1))
}
