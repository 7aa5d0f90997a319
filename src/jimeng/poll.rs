//! Adaptive polling of generation history records.
//!
//! The upstream produces artifacts progressively and exposes no push
//! channel. The poller starts on a short interval, widens it additively
//! while the item count is flat, resets on progress, and classifies
//! terminal states through an updatable status table.

use std::future::Future;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{GatewayError, Result};
use crate::jimeng::{UpstreamClient, auth};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationKind {
    Image,
    Video,
}

/// Fixed per-call polling configuration.
#[derive(Debug, Clone)]
pub struct PollConfig {
    pub max_poll_count: u32,
    pub expected_item_count: u32,
    pub kind: GenerationKind,
    /// Progress-less ticks tolerated before the run counts as stalled.
    pub stall_ticks: u32,
    /// Consecutive transport faults tolerated before giving up.
    pub max_transport_errors: u32,
    pub base_interval: Duration,
    pub max_interval: Duration,
    /// Flat ticks before the interval starts widening.
    pub widen_after: u32,
    pub widen_step: Duration,
}

impl PollConfig {
    pub fn image(expected_item_count: u32, max_poll_count: u32, stall_ticks: u32) -> Self {
        Self {
            max_poll_count,
            expected_item_count: expected_item_count.max(1),
            kind: GenerationKind::Image,
            stall_ticks,
            max_transport_errors: 3,
            base_interval: Duration::from_secs(2),
            max_interval: Duration::from_secs(10),
            widen_after: 3,
            widen_step: Duration::from_secs(2),
        }
    }

    pub fn video(max_poll_count: u32, stall_ticks: u32) -> Self {
        Self {
            kind: GenerationKind::Video,
            ..Self::image(1, max_poll_count, stall_ticks)
        }
    }
}

/// Terminal status classification, overridable without code changes.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusTable {
    pub success: Vec<i64>,
    pub failure: Vec<i64>,
    #[serde(default)]
    pub transient_fail_codes: Vec<String>,
}

impl Default for StatusTable {
    fn default() -> Self {
        Self {
            success: vec![50],
            failure: vec![30],
            transient_fail_codes: vec!["2169".to_string()],
        }
    }
}

impl StatusTable {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn is_success(&self, status: i64) -> bool {
        self.success.contains(&status)
    }

    pub fn is_failure(&self, status: i64) -> bool {
        self.failure.contains(&status)
    }

    pub fn is_transient_fail_code(&self, code: &str) -> bool {
        self.transient_fail_codes.iter().any(|c| c == code)
    }
}

/// One tick's view of the remote history record.
#[derive(Debug, Clone)]
pub struct PollingStatus {
    pub status: i64,
    pub fail_code: Option<String>,
    pub item_count: usize,
    pub finish_time: i64,
    pub history_id: String,
}

#[derive(Debug)]
pub struct PollOutcome<T> {
    pub data: T,
    pub elapsed: Duration,
    pub ticks: u32,
}

/// Drive the tick closure until a terminal state.
///
/// The loop owns all timing; the closure performs exactly one remote read
/// per call. Transport faults are retried up to a bound of consecutive
/// occurrences; terminal upstream errors are not.
pub async fn poll<T, F, Fut>(
    config: &PollConfig,
    table: &StatusTable,
    mut tick: F,
) -> Result<PollOutcome<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(PollingStatus, T)>>,
{
    let started = tokio::time::Instant::now();
    let mut interval = config.base_interval;
    let mut last_item_count: Option<usize> = None;
    let mut stagnant: u32 = 0;
    let mut transport_errors: u32 = 0;

    tracing::debug!(
        kind = ?config.kind,
        max_poll_count = config.max_poll_count,
        expected = config.expected_item_count,
        "polling started"
    );

    for iteration in 1..=config.max_poll_count {
        if iteration > 1 {
            tokio::time::sleep(interval).await;
        }

        let (status, data) = match tick().await {
            Ok(ok) => {
                transport_errors = 0;
                ok
            }
            Err(e) if e.is_transport() => {
                transport_errors += 1;
                if transport_errors > config.max_transport_errors {
                    return Err(e);
                }
                tracing::warn!(
                    error = %e,
                    consecutive = transport_errors,
                    "poll tick transport fault, retrying"
                );
                continue;
            }
            Err(e) => return Err(e),
        };

        if let Some(prev) = last_item_count {
            if status.item_count < prev {
                return Err(GatewayError::PollRemoteFailed {
                    status: status.status,
                    fail_code: status.fail_code,
                    message: format!(
                        "item count regressed from {prev} to {} for {}",
                        status.item_count, status.history_id
                    ),
                });
            }
            if status.item_count > prev {
                stagnant = 0;
                interval = config.base_interval;
            } else {
                stagnant += 1;
                if stagnant >= config.widen_after {
                    interval = (interval + config.widen_step).min(config.max_interval);
                }
            }
        }
        last_item_count = Some(status.item_count);

        tracing::debug!(
            history_id = status.history_id,
            status = status.status,
            items = status.item_count,
            tick = iteration,
            "poll tick"
        );

        if table.is_success(status.status)
            && (status.item_count as u32 >= config.expected_item_count || status.finish_time > 0)
        {
            return Ok(PollOutcome {
                data,
                elapsed: started.elapsed(),
                ticks: iteration,
            });
        }

        let terminal_fail_code = status
            .fail_code
            .as_deref()
            .filter(|c| !c.is_empty() && !table.is_transient_fail_code(c));
        if table.is_failure(status.status) || terminal_fail_code.is_some() {
            return Err(GatewayError::PollRemoteFailed {
                status: status.status,
                message: format!("upstream generation failed for {}", status.history_id),
                fail_code: status.fail_code,
            });
        }

        if stagnant > config.stall_ticks && status.finish_time == 0 {
            return Err(GatewayError::PollStall { ticks: stagnant });
        }
    }

    Err(GatewayError::PollTimeout {
        ticks: config.max_poll_count,
    })
}

/// One HTTP tick against `get_history_by_ids`.
pub async fn fetch_history(
    up: &UpstreamClient,
    history_id: &str,
    kind: GenerationKind,
) -> Result<(PollingStatus, Value)> {
    let uri = "/mweb/v1/get_history_by_ids";
    let headers = auth::build_headers(&up.region, &up.secret, uri);
    let params = auth::standard_query_params(&up.region);

    let mut body = serde_json::json!({ "history_ids": [history_id] });
    if kind == GenerationKind::Image {
        body["image_info"] = serde_json::json!({
            "width": 2048,
            "height": 2048,
            "format": "webp",
            "image_scene_list": [
                {"scene": "smart_crop", "width": 360, "height": 360, "uniq_key": "smart_crop-w:360-h:360", "format": "webp"},
                {"scene": "normal", "width": 2400, "height": 2400, "uniq_key": "2400", "format": "webp"},
            ],
        });
    }

    let resp = up
        .http
        .post(up.api_url(uri))
        .headers(headers)
        .query(&params)
        .json(&body)
        .send()
        .await?;

    let http_status = resp.status();
    if http_status == 401 || http_status == 403 {
        return Err(GatewayError::Auth(format!("poll rejected: HTTP {http_status}")));
    }
    if http_status.is_server_error() {
        return Err(GatewayError::Server(format!("poll HTTP {http_status}")));
    }

    let text = resp.text().await?;
    let payload: Value = serde_json::from_str(&text).map_err(|e| {
        GatewayError::Server(format!(
            "poll parse error: {e}, body: {}",
            &text[..text.len().min(500)]
        ))
    })?;

    let data = payload.get("data").unwrap_or(&payload);
    let record = data
        .get(history_id)
        .or_else(|| data.pointer("/history_list/0"))
        .or_else(|| data.pointer("/history_records/0"))
        // A record can lag the submit by a tick; let the poller retry.
        .ok_or_else(|| {
            GatewayError::Transport(format!("history record {history_id} not visible yet"))
        })?;

    let status = record
        .get("status")
        .or_else(|| record.pointer("/task/status"))
        .and_then(|v| v.as_i64())
        .unwrap_or(20);

    let fail_code = record
        .get("fail_code")
        .or_else(|| record.get("error_code"))
        .and_then(|v| {
            v.as_str()
                .map(|s| s.to_string())
                .or_else(|| v.as_i64().map(|n| n.to_string()))
        })
        .filter(|s| !s.is_empty() && s != "0");

    let item_count = record
        .get("item_list")
        .and_then(|v| v.as_array())
        .map(|a| a.len())
        .unwrap_or(0);

    let finish_time = record
        .pointer("/task/finish_time")
        .or_else(|| record.get("finish_time"))
        .and_then(|v| v.as_i64())
        .unwrap_or(0);

    let polling_status = PollingStatus {
        status,
        fail_code,
        item_count,
        finish_time,
        history_id: history_id.to_string(),
    };
    Ok((polling_status, record.clone()))
}

/// Pull finished image URLs out of a history record, in item order.
pub fn extract_image_urls(record: &Value) -> Vec<String> {
    record
        .get("item_list")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    item.pointer("/image/large_images/0/image_url")
                        .or_else(|| item.pointer("/common_attr/cover_url"))
                        .or_else(|| item.pointer("/image/url"))
                        .and_then(|v| v.as_str())
                        .filter(|s| !s.is_empty())
                        .map(|s| s.to_string())
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Pull the finished video URL out of a history record.
pub fn extract_video_url(record: &Value) -> Option<String> {
    let first = record.get("item_list").and_then(|v| v.as_array())?.first()?;
    first
        .pointer("/video/transcoded_video/origin/video_url")
        .or_else(|| first.pointer("/video/play_url"))
        .or_else(|| first.pointer("/video/download_url"))
        .or_else(|| first.pointer("/video/url"))
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}
