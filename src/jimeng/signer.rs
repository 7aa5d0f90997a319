//! AWS Signature V4 for the ImageX object-store API.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::error::{GatewayError, Result};

type HmacSha256 = Hmac<Sha256>;

/// The object-store service name used in the credential scope.
const SERVICE: &str = "imagex";

/// One signable request. `headers` must carry `x-amz-date`; the security
/// token and content hash are appended to the signed set when absent.
pub struct SigningRequest<'a> {
    pub method: &'a str,
    pub url: &'a str,
    pub headers: &'a [(String, String)],
    pub payload: &'a str,
    pub access_key_id: &'a str,
    pub secret_access_key: &'a str,
    pub session_token: Option<&'a str>,
    pub aws_region: &'a str,
}

/// Produce the `Authorization` header value for a request.
pub fn authorization_header(req: &SigningRequest<'_>) -> Result<String> {
    let timestamp = req
        .headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("x-amz-date"))
        .map(|(_, v)| v.as_str())
        .ok_or_else(|| GatewayError::Validation("signing request missing x-amz-date".into()))?;
    let date = &timestamp[..8];

    let (canonical, signed_headers) = canonical_request(req)?;
    let credential_scope = format!("{date}/{}/{SERVICE}/aws4_request", req.aws_region);
    let to_sign = string_to_sign(timestamp, &credential_scope, &canonical);

    let signing_key = derive_signing_key(req.secret_access_key, date, req.aws_region, SERVICE);
    let signature = hex::encode(hmac_sha256(&signing_key, to_sign.as_bytes()));

    Ok(format!(
        "AWS4-HMAC-SHA256 Credential={}/{credential_scope}, SignedHeaders={signed_headers}, Signature={signature}",
        req.access_key_id
    ))
}

/// Assemble the canonical request. Returns the request text and the
/// `;`-joined signed header list.
fn canonical_request(req: &SigningRequest<'_>) -> Result<(String, String)> {
    let parsed = reqwest::Url::parse(req.url)
        .map_err(|e| GatewayError::Validation(format!("unsignable url {}: {e}", req.url)))?;

    let mut query_pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(k, v)| {
            (
                urlencoding::encode(&k).into_owned(),
                urlencoding::encode(&v).into_owned(),
            )
        })
        .collect();
    query_pairs.sort();
    let canonical_query = query_pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    let mut sign_headers: Vec<(String, String)> = req
        .headers
        .iter()
        .map(|(k, v)| (k.to_lowercase(), v.trim().to_string()))
        .collect();
    if let Some(token) = req.session_token {
        if !sign_headers.iter().any(|(k, _)| k == "x-amz-security-token") {
            sign_headers.push(("x-amz-security-token".to_string(), token.to_string()));
        }
    }

    let payload_hash = if req.method.eq_ignore_ascii_case("POST") && !req.payload.is_empty() {
        let hash = sha256_hex(req.payload.as_bytes());
        if !sign_headers.iter().any(|(k, _)| k == "x-amz-content-sha256") {
            sign_headers.push(("x-amz-content-sha256".to_string(), hash.clone()));
        }
        hash
    } else {
        sha256_hex(b"")
    };

    sign_headers.sort();
    let signed_headers = sign_headers
        .iter()
        .map(|(k, _)| k.as_str())
        .collect::<Vec<_>>()
        .join(";");
    let canonical_headers = sign_headers
        .iter()
        .map(|(k, v)| format!("{k}:{v}\n"))
        .collect::<String>();

    let canonical = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        req.method.to_uppercase(),
        parsed.path(),
        canonical_query,
        canonical_headers,
        signed_headers,
        payload_hash,
    );
    Ok((canonical, signed_headers))
}

fn string_to_sign(timestamp: &str, credential_scope: &str, canonical_request: &str) -> String {
    format!(
        "AWS4-HMAC-SHA256\n{timestamp}\n{credential_scope}\n{}",
        sha256_hex(canonical_request.as_bytes())
    )
}

/// HMAC("AWS4"+secret, date) → region → service → "aws4_request".
pub(crate) fn derive_signing_key(secret: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{secret}").as_bytes(), date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC key");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    fn request<'a>(method: &'a str, url: &'a str, headers: &'a [(String, String)], payload: &'a str) -> SigningRequest<'a> {
        SigningRequest {
            method,
            url,
            headers,
            payload,
            access_key_id: "AKID",
            secret_access_key: "SECRET",
            session_token: Some("STS"),
            aws_region: "cn-north-1",
        }
    }

    #[test]
    fn signing_key_matches_the_published_derivation_vector() {
        let key = derive_signing_key(
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "20150830",
            "us-east-1",
            "iam",
        );
        assert_eq!(
            hex::encode(key),
            "c4afb1cc5771d871763a393e44b703571b55cc28424d1a5e86da6ed3c154a4b9"
        );
    }

    #[test]
    fn get_uses_the_empty_payload_hash() {
        let headers = vec![("x-amz-date".to_string(), "20240101T000000Z".to_string())];
        let req = request("GET", "https://imagex.example.com/?B=2&A=1", &headers, "");
        let (canonical, _) = canonical_request(&req).unwrap();
        assert!(canonical.ends_with(EMPTY_SHA256));
        // Query pairs sorted.
        assert!(canonical.contains("A=1&B=2"));
    }

    #[test]
    fn signed_headers_are_sorted_and_include_the_security_token() {
        let headers = vec![("x-amz-date".to_string(), "20240101T000000Z".to_string())];
        let req = request("GET", "https://imagex.example.com/", &headers, "");
        let (_, signed) = canonical_request(&req).unwrap();
        assert_eq!(signed, "x-amz-date;x-amz-security-token");
    }

    #[test]
    fn post_payload_is_hashed_into_the_canonical_request() {
        let headers = vec![("x-amz-date".to_string(), "20240101T000000Z".to_string())];
        let body = r#"{"SessionKey":"abc"}"#;
        let req = request("POST", "https://imagex.example.com/?Action=CommitImageUpload", &headers, body);
        let (canonical, signed) = canonical_request(&req).unwrap();
        assert!(canonical.ends_with(&sha256_hex(body.as_bytes())));
        assert!(signed.contains("x-amz-content-sha256"));
    }

    #[test]
    fn authorization_header_carries_scope_and_signature() {
        let headers = vec![("x-amz-date".to_string(), "20240101T000000Z".to_string())];
        let req = request("GET", "https://imagex.example.com/?Action=ApplyImageUpload", &headers, "");
        let auth = authorization_header(&req).unwrap();
        assert!(auth.starts_with("AWS4-HMAC-SHA256 Credential=AKID/20240101/cn-north-1/imagex/aws4_request"));
        assert!(auth.contains("SignedHeaders=x-amz-date;x-amz-security-token"));
        let sig = auth.rsplit("Signature=").next().unwrap();
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn missing_date_header_is_an_error() {
        let headers: Vec<(String, String)> = vec![];
        let req = request("GET", "https://imagex.example.com/", &headers, "");
        assert!(authorization_header(&req).is_err());
    }
}
