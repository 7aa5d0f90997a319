//! Image upload to the ImageX object store.
//!
//! Four phases per input, strictly in order:
//! get_upload_token → ApplyImageUpload (signed) → raw PUT → CommitImageUpload
//! (signed). Any non-2xx or `ResponseMetadata.Error` fails the phase hard;
//! there are no retries below this level.

use serde_json::Value;

use crate::error::{GatewayError, Result};
use crate::jimeng::signer::{SigningRequest, authorization_header, sha256_hex};
use crate::jimeng::{UpstreamClient, auth};

/// Short-lived credentials minted for a single upload.
#[derive(Debug, Clone)]
pub struct UploadContext {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub service_id: String,
}

/// Store slot returned by ApplyImageUpload.
#[derive(Debug, Clone)]
struct UploadSlot {
    upload_host: String,
    store_uri: String,
    store_auth: String,
    session_key: String,
}

/// CRC32 of a byte slice (hex, zero-padded to 8 chars).
fn crc32_hex(data: &[u8]) -> String {
    format!("{:08x}", crc32fast::hash(data))
}

fn aws_timestamp() -> String {
    chrono::Utc::now().format("%Y%m%dT%H%M%SZ").to_string()
}

/// Upload hosts are usually bare hostnames, occasionally full URLs.
fn upload_base(host: &str) -> String {
    if host.starts_with("http://") || host.starts_with("https://") {
        host.trim_end_matches('/').to_string()
    } else {
        format!("https://{host}")
    }
}

/// Phase 1: mint upload credentials (`scene = 2` for images).
pub async fn request_upload_token(up: &UpstreamClient) -> Result<UploadContext> {
    let uri = "/mweb/v1/get_upload_token";
    let headers = auth::build_headers(&up.region, &up.secret, uri);
    let params = auth::standard_query_params(&up.region);

    let resp = up
        .http
        .post(up.api_url(uri))
        .headers(headers)
        .query(&params)
        .json(&serde_json::json!({ "scene": 2 }))
        .send()
        .await
        .map_err(|e| GatewayError::UploadToken(e.to_string()))?;

    let http_status = resp.status();
    if http_status == 401 || http_status == 403 {
        return Err(GatewayError::Auth(format!(
            "get_upload_token rejected: HTTP {http_status}"
        )));
    }
    let text = resp
        .text()
        .await
        .map_err(|e| GatewayError::UploadToken(e.to_string()))?;
    let payload: Value = serde_json::from_str(&text).map_err(|e| {
        GatewayError::UploadToken(format!("parse error: {e}, body: {}", truncate(&text)))
    })?;

    if let Some(ret) = ret_code(&payload) {
        if ret != 0 {
            let errmsg = payload
                .get("errmsg")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown");
            return Err(GatewayError::UploadToken(format!("[ret={ret}] {errmsg}")));
        }
    }

    let data = payload.get("data").unwrap_or(&payload);
    let access_key_id = data["access_key_id"].as_str().unwrap_or("").to_string();
    let secret_access_key = data["secret_access_key"].as_str().unwrap_or("").to_string();
    let session_token = data["session_token"].as_str().unwrap_or("").to_string();

    // International accounts address the store by space name.
    let service_id = if up.region.is_international {
        data["space_name"].as_str().unwrap_or("").to_string()
    } else {
        data["service_id"].as_str().unwrap_or("").to_string()
    };

    if access_key_id.is_empty()
        || secret_access_key.is_empty()
        || session_token.is_empty()
        || service_id.is_empty()
    {
        return Err(GatewayError::UploadToken(
            "missing credential fields in get_upload_token response".into(),
        ));
    }

    Ok(UploadContext {
        access_key_id,
        secret_access_key,
        session_token,
        service_id,
    })
}

/// Phase 2: reserve a store slot for `file_size` bytes.
async fn apply_image_upload(
    up: &UpstreamClient,
    ctx: &UploadContext,
    file_size: usize,
) -> Result<UploadSlot> {
    let tag = uuid::Uuid::new_v4().simple().to_string();
    let rand_tag = &tag[..10];
    let apply_url = format!(
        "{}/?Action=ApplyImageUpload&Version=2018-08-01&ServiceId={}&FileSize={file_size}&s={rand_tag}",
        up.region.imagex_host, ctx.service_id
    );

    let timestamp = aws_timestamp();
    let sign_headers = vec![
        ("x-amz-date".to_string(), timestamp.clone()),
        ("x-amz-security-token".to_string(), ctx.session_token.clone()),
    ];
    let authorization = authorization_header(&SigningRequest {
        method: "GET",
        url: &apply_url,
        headers: &sign_headers,
        payload: "",
        access_key_id: &ctx.access_key_id,
        secret_access_key: &ctx.secret_access_key,
        session_token: Some(&ctx.session_token),
        aws_region: &up.region.aws_region,
    })?;

    let resp = up
        .http
        .get(&apply_url)
        .header("accept", "*/*")
        .header("authorization", &authorization)
        .header("origin", &up.region.origin)
        .header("referer", &up.region.referer)
        .header("user-agent", auth::user_agent())
        .header("x-amz-date", &timestamp)
        .header("x-amz-security-token", &ctx.session_token)
        .send()
        .await
        .map_err(|e| GatewayError::UploadApply(e.to_string()))?;

    let text = resp
        .text()
        .await
        .map_err(|e| GatewayError::UploadApply(e.to_string()))?;
    let payload: Value = serde_json::from_str(&text)
        .map_err(|e| GatewayError::UploadApply(format!("parse error: {e}")))?;

    if let Some(err) = payload.pointer("/ResponseMetadata/Error") {
        return Err(GatewayError::UploadApply(err.to_string()));
    }

    let address = payload
        .pointer("/Result/UploadAddress")
        .ok_or_else(|| GatewayError::UploadApply("no UploadAddress in response".into()))?;
    let store_info = address
        .pointer("/StoreInfos/0")
        .ok_or_else(|| GatewayError::UploadApply("no StoreInfos in upload address".into()))?;
    let upload_host = address
        .pointer("/UploadHosts/0")
        .and_then(|v| v.as_str())
        .ok_or_else(|| GatewayError::UploadApply("no UploadHosts".into()))?;

    Ok(UploadSlot {
        upload_host: upload_host.to_string(),
        store_uri: store_info["StoreUri"].as_str().unwrap_or("").to_string(),
        store_auth: store_info["Auth"].as_str().unwrap_or("").to_string(),
        session_key: address["SessionKey"].as_str().unwrap_or("").to_string(),
    })
}

/// Phase 3: PUT the raw bytes against the store slot.
async fn put_object(up: &UpstreamClient, slot: &UploadSlot, data: &[u8]) -> Result<()> {
    let upload_url = format!(
        "{}/upload/v1/{}",
        upload_base(&slot.upload_host),
        slot.store_uri
    );
    let crc32 = crc32_hex(data);

    let resp = up
        .http
        .post(&upload_url)
        .header("Authorization", &slot.store_auth)
        .header("Content-CRC32", &crc32)
        .header("Content-Disposition", "attachment; filename=\"undefined\"")
        .header("Content-Type", "application/octet-stream")
        .header("Origin", &up.region.origin)
        .header("User-Agent", auth::user_agent())
        .body(data.to_vec())
        .send()
        .await
        .map_err(|e| GatewayError::UploadPut(e.to_string()))?;

    if !resp.status().is_success() {
        return Err(GatewayError::UploadPut(format!("HTTP {}", resp.status())));
    }
    Ok(())
}

/// Phase 4: commit the slot; `UriStatus` 2000 is the only success.
async fn commit_image_upload(
    up: &UpstreamClient,
    ctx: &UploadContext,
    session_key: &str,
) -> Result<String> {
    let commit_url = format!(
        "{}/?Action=CommitImageUpload&Version=2018-08-01&ServiceId={}",
        up.region.imagex_host, ctx.service_id
    );
    let timestamp = aws_timestamp();
    let body = serde_json::json!({
        "SessionKey": session_key,
        "SuccessActionStatus": "200",
    })
    .to_string();

    let payload_hash = sha256_hex(body.as_bytes());
    let sign_headers = vec![
        ("x-amz-date".to_string(), timestamp.clone()),
        ("x-amz-security-token".to_string(), ctx.session_token.clone()),
        ("x-amz-content-sha256".to_string(), payload_hash.clone()),
    ];
    let authorization = authorization_header(&SigningRequest {
        method: "POST",
        url: &commit_url,
        headers: &sign_headers,
        payload: &body,
        access_key_id: &ctx.access_key_id,
        secret_access_key: &ctx.secret_access_key,
        session_token: Some(&ctx.session_token),
        aws_region: &up.region.aws_region,
    })?;

    let resp = up
        .http
        .post(&commit_url)
        .header("authorization", &authorization)
        .header("content-type", "application/json")
        .header("origin", &up.region.origin)
        .header("user-agent", auth::user_agent())
        .header("x-amz-date", &timestamp)
        .header("x-amz-security-token", &ctx.session_token)
        .header("x-amz-content-sha256", &payload_hash)
        .body(body)
        .send()
        .await
        .map_err(|e| GatewayError::UploadCommit(e.to_string()))?;

    let text = resp
        .text()
        .await
        .map_err(|e| GatewayError::UploadCommit(e.to_string()))?;
    let payload: Value = serde_json::from_str(&text)
        .map_err(|e| GatewayError::UploadCommit(format!("parse error: {e}")))?;

    if let Some(err) = payload.pointer("/ResponseMetadata/Error") {
        return Err(GatewayError::UploadCommit(err.to_string()));
    }

    let result = payload
        .pointer("/Result/Results/0")
        .ok_or_else(|| GatewayError::UploadCommit(format!("no Results in response: {}", truncate(&text))))?;
    let uri_status = result["UriStatus"].as_i64().unwrap_or(0);
    if uri_status != 2000 {
        return Err(GatewayError::UploadCommit(format!(
            "UriStatus {uri_status} (expected 2000)"
        )));
    }
    let uri = result["Uri"]
        .as_str()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| GatewayError::UploadCommit("no Uri in commit result".into()))?;

    Ok(uri.to_string())
}

/// Upload one in-memory image and return its opaque store URI.
pub async fn upload_image(up: &UpstreamClient, data: &[u8]) -> Result<String> {
    let ctx = request_upload_token(up).await?;
    let slot = apply_image_upload(up, &ctx, data.len()).await?;
    put_object(up, &slot, data).await?;
    let uri = commit_image_upload(up, &ctx, &slot.session_key).await?;
    tracing::debug!(uri, bytes = data.len(), "image uploaded");
    Ok(uri)
}

fn ret_code(payload: &Value) -> Option<i64> {
    match payload.get("ret") {
        Some(Value::String(s)) => s.parse::<i64>().ok(),
        Some(Value::Number(n)) => n.as_i64(),
        _ => None,
    }
}

fn truncate(text: &str) -> &str {
    &text[..text.len().min(500)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jimeng::region::{Region, RegionInfo};
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn mock_client(server: &MockServer) -> UpstreamClient {
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
            secret: "test-secret".to_string(),
        }
    }

    async fn mount_token(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/mweb/v1/get_upload_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ret": "0",
                "data": {
                    "access_key_id": "AKID",
                    "secret_access_key": "SECRET",
                    "session_token": "STS",
                    "service_id": "svc123",
                    "space_name": "space456",
                }
            })))
            .mount(server)
            .await;
    }

    async fn mount_apply(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/"))
            .and(query_param("Action", "ApplyImageUpload"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "Result": {
                    "UploadAddress": {
                        "StoreInfos": [{"StoreUri": "store/abc", "Auth": "SLOT-AUTH"}],
                        "UploadHosts": [server.uri()],
                        "SessionKey": "sess-key",
                    }
                }
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn upload_walks_all_four_phases() {
        let server = MockServer::start().await;
        let up = mock_client(&server);
        let image = b"fake png bytes".to_vec();

        mount_token(&server).await;
        mount_apply(&server).await;

        // The PUT must carry the CRC32 of the exact body bytes.
        Mock::given(method("POST"))
            .and(path("/upload/v1/store/abc"))
            .and(header("Content-CRC32", crc32_hex(&image).as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        // The commit signature hashes the exact JSON body.
        let commit_body = json!({"SessionKey": "sess-key", "SuccessActionStatus": "200"}).to_string();
        Mock::given(method("POST"))
            .and(path("/"))
            .and(query_param("Action", "CommitImageUpload"))
            .and(header("x-amz-content-sha256", sha256_hex(commit_body.as_bytes()).as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "Result": {"Results": [{"Uri": "store/abc", "UriStatus": 2000}]}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let uri = upload_image(&up, &image).await.unwrap();
        assert_eq!(uri, "store/abc");
    }

    #[tokio::test]
    async fn commit_uri_status_other_than_2000_fails() {
        let server = MockServer::start().await;
        let up = mock_client(&server);

        mount_token(&server).await;
        mount_apply(&server).await;
        Mock::given(method("POST"))
            .and(path("/upload/v1/store/abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/"))
            .and(query_param("Action", "CommitImageUpload"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "Result": {"Results": [{"Uri": "store/abc", "UriStatus": 4001}]}
            })))
            .mount(&server)
            .await;

        let err = upload_image(&up, b"bytes").await.unwrap_err();
        assert_eq!(err.kind(), "upload-commit");
    }

    #[tokio::test]
    async fn apply_error_payload_fails_the_apply_phase() {
        let server = MockServer::start().await;
        let up = mock_client(&server);

        mount_token(&server).await;
        Mock::given(method("GET"))
            .and(path("/"))
            .and(query_param("Action", "ApplyImageUpload"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ResponseMetadata": {"Error": {"Code": "AccessDenied", "Message": "no"}}
            })))
            .mount(&server)
            .await;

        let err = upload_image(&up, b"bytes").await.unwrap_err();
        assert_eq!(err.kind(), "upload-apply");
    }

    #[tokio::test]
    async fn missing_token_fields_fail_the_token_phase() {
        let server = MockServer::start().await;
        let up = mock_client(&server);

        Mock::given(method("POST"))
            .and(path("/mweb/v1/get_upload_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ret": "0",
                "data": {"access_key_id": "AKID"}
            })))
            .mount(&server)
            .await;

        let err = upload_image(&up, b"bytes").await.unwrap_err();
        assert_eq!(err.kind(), "upload-token");
    }

    #[tokio::test]
    async fn international_tokens_use_the_space_name() {
        let server = MockServer::start().await;
        let mut up = mock_client(&server);
        up.region.is_international = true;

        mount_token(&server).await;
        let ctx = request_upload_token(&up).await.unwrap();
        assert_eq!(ctx.service_id, "space456");

        up.region.is_international = false;
        let ctx = request_upload_token(&up).await.unwrap();
        assert_eq!(ctx.service_id, "svc123");
    }

    #[test]
    fn upload_base_only_adds_missing_scheme() {
        assert_eq!(upload_base("tos.example.com"), "https://tos.example.com");
        assert_eq!(upload_base("http://127.0.0.1:9"), "http://127.0.0.1:9");
    }
}
