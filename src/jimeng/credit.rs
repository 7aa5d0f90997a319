//! Best-effort credit bookkeeping around submissions.

use serde_json::Value;

use crate::error::{GatewayError, Result};
use crate::jimeng::{UpstreamClient, auth};

#[derive(Debug, Clone, Copy, Default)]
pub struct Credit {
    pub gift: i64,
    pub purchase: i64,
    pub vip: i64,
    pub total: i64,
}

/// Read the account's credit balance from `/token/points`.
pub async fn fetch_credit(up: &UpstreamClient) -> Result<Credit> {
    let uri = "/token/points";
    let headers = auth::build_headers(&up.region, &up.secret, uri);
    let params = auth::standard_query_params(&up.region);

    let resp = up
        .http
        .post(up.api_url(uri))
        .headers(headers)
        .query(&params)
        .json(&serde_json::json!({}))
        .send()
        .await?;

    let text = resp.text().await?;
    let payload: Value = serde_json::from_str(&text)
        .map_err(|e| GatewayError::Server(format!("points parse error: {e}")))?;

    let points = payload
        .pointer("/data/0/points")
        .or_else(|| payload.pointer("/0/points"))
        .ok_or_else(|| GatewayError::Server("no points entry in response".into()))?;

    Ok(Credit {
        gift: points.get("giftCredit").and_then(|v| v.as_i64()).unwrap_or(0),
        purchase: points
            .get("purchaseCredit")
            .and_then(|v| v.as_i64())
            .unwrap_or(0),
        vip: points.get("vipCredit").and_then(|v| v.as_i64()).unwrap_or(0),
        total: points
            .get("totalCredit")
            .and_then(|v| v.as_i64())
            .unwrap_or(0),
    })
}

/// Claim the daily gift credit.
pub async fn receive_daily_credit(up: &UpstreamClient) -> Result<i64> {
    let uri = "/commerce/v1/benefits/credit_receive";
    let headers = auth::build_headers(&up.region, &up.secret, uri);
    let params = auth::standard_query_params(&up.region);

    let resp = up
        .http
        .post(up.api_url(uri))
        .headers(headers)
        .query(&params)
        .json(&serde_json::json!({ "time_zone": "Asia/Shanghai" }))
        .send()
        .await?;

    let payload: Value = resp.json().await?;
    Ok(payload
        .pointer("/data/receive_quota")
        .and_then(|v| v.as_i64())
        .unwrap_or(0))
}

/// Check the balance before a submission and top up from the daily gift
/// when empty. Never fails the request: problems are logged and skipped.
pub async fn ensure_credit(up: &UpstreamClient) {
    match fetch_credit(up).await {
        Ok(credit) if credit.total > 0 => {
            tracing::debug!(
                total = credit.total,
                gift = credit.gift,
                purchase = credit.purchase,
                vip = credit.vip,
                "credit balance ok"
            );
        }
        Ok(_) => match receive_daily_credit(up).await {
            Ok(received) => tracing::info!(received, "claimed daily credit"),
            Err(e) => tracing::warn!(error = %e, "daily credit claim failed"),
        },
        Err(e) => tracing::warn!(error = %e, "credit check failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jimeng::region::{Region, RegionInfo};
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn mock_upstream(server: &MockServer) -> UpstreamClient {
        UpstreamClient {
            http: reqwest::Client::new(),
            region: RegionInfo {
                region: Region::Cn,
                is_international: false,
                imagex_host: server.uri(),
                origin: server.uri(),
                aws_region: "cn-north-1".to_string(),
                assistant_id: 513695,
                referer: server.uri(),
            },
            secret: "secret".to_string(),
        }
    }

    #[tokio::test]
    async fn reads_the_first_points_entry() {
        let server = MockServer::start().await;
        let up = mock_upstream(&server);
        Mock::given(method("POST"))
            .and(path("/token/points"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{
                    "points": {"giftCredit": 10, "purchaseCredit": 5, "vipCredit": 0, "totalCredit": 15}
                }]
            })))
            .mount(&server)
            .await;

        let credit = fetch_credit(&up).await.unwrap();
        assert_eq!(credit.gift, 10);
        assert_eq!(credit.purchase, 5);
        assert_eq!(credit.total, 15);
    }

    #[tokio::test]
    async fn ensure_credit_swallows_failures() {
        let server = MockServer::start().await;
        let up = mock_upstream(&server);
        Mock::given(method("POST"))
            .and(path("/token/points"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        // Must not panic or error out.
        ensure_credit(&up).await;
    }
}
