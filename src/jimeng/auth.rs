//! Browser-identity headers for the Jimeng/Dreamina web API: session
//! cookie assembly and the md5 `Sign` header.

use md5::{Digest, Md5};
use reqwest::header::{HeaderMap, HeaderValue};

use crate::jimeng::region::{RegionInfo, format_auth};

/// API version code.
const VERSION_CODE: &str = "8.4.0";
/// Platform code (web).
const PLATFORM_CODE: &str = "7";
/// `sid_guard` validity window, 60 days like the web client issues.
const SID_GUARD_LIFETIME_SECS: i64 = 5_184_000;
/// Pipe-delimited salts bracketing every Sign input.
const SIGN_PREFIX: &str = "9e2c";
const SIGN_SUFFIX: &str = "11ac";
/// Trailing characters of the request path covered by the Sign header.
const SIGN_URI_WINDOW: usize = 7;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.0.0 Safari/537.36";

lazy_static::lazy_static! {
    static ref WEB_ID: u64 = rand::random::<u64>() % 999999999999999999 + 7000000000000000000;
    static ref USER_ID: String = uuid::Uuid::new_v4().to_string().replace("-", "");
}

fn unix_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

/// `sid_guard` value: the secret, its issue time, the validity window, and
/// the matching expiry date, pipe-joined and percent-encoded as one cookie
/// value.
fn sid_guard_value(secret: &str, issued_at: u64) -> String {
    let expiry = chrono::Utc::now() + chrono::TimeDelta::seconds(SID_GUARD_LIFETIME_SECS);
    let raw = format!(
        "{secret}|{issued_at}|{SID_GUARD_LIFETIME_SECS}|{}",
        expiry.format("%a, %d-%b-%Y %H:%M:%S GMT"),
    );
    urlencoding::encode(&raw).into_owned()
}

/// Assemble the session cookie the web client would carry.
pub fn generate_cookie(secret: &str) -> String {
    let now = unix_timestamp();
    let pairs: Vec<(&str, String)> = vec![
        ("_tea_web_id", WEB_ID.to_string()),
        ("is_staff_user", "false".to_string()),
        ("store-region", "cn-gd".to_string()),
        ("store-region-src", "uid".to_string()),
        ("sid_guard", sid_guard_value(secret, now)),
        ("uid_tt", USER_ID.clone()),
        ("uid_tt_ss", USER_ID.clone()),
        ("sid_tt", secret.to_string()),
        ("sessionid", secret.to_string()),
        ("sessionid_ss", secret.to_string()),
    ];
    pairs
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join("; ")
}

/// The Sign header only covers the tail of the request path.
fn uri_sign_window(uri: &str) -> &str {
    let start = uri.len().saturating_sub(SIGN_URI_WINDOW);
    &uri[start..]
}

/// The cleartext the Sign digest is computed over.
fn sign_input(uri: &str, timestamp: u64) -> String {
    format!(
        "{SIGN_PREFIX}|{window}|{PLATFORM_CODE}|{VERSION_CODE}|{timestamp}||{SIGN_SUFFIX}",
        window = uri_sign_window(uri),
    )
}

fn md5_hex(input: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Compute the `Sign` header for a request path at a given device time.
pub fn compute_sign(uri: &str, timestamp: u64) -> String {
    md5_hex(&sign_input(uri, timestamp))
}

/// Build the full set of fake browser headers for an API request.
pub fn build_headers(region: &RegionInfo, secret: &str, uri: &str) -> HeaderMap {
    let timestamp = unix_timestamp();
    let sign = compute_sign(uri, timestamp);
    let cookie = generate_cookie(secret);

    let mut headers = HeaderMap::new();
    headers.insert(
        "Authorization",
        HeaderValue::from_str(&format_auth(region.region, secret)).unwrap(),
    );
    headers.insert("Accept", HeaderValue::from_static("application/json, text/plain, */*"));
    headers.insert("Accept-Encoding", HeaderValue::from_static("gzip, deflate, br, zstd"));
    headers.insert("Accept-Language", HeaderValue::from_static("zh-CN,zh;q=0.9"));
    headers.insert("App-Sdk-Version", HeaderValue::from_static("48.0.0"));
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    headers.insert("Appid", HeaderValue::from_str(&region.assistant_id.to_string()).unwrap());
    headers.insert("Appvr", HeaderValue::from_static(VERSION_CODE));
    headers.insert("Lan", HeaderValue::from_static("zh-Hans"));
    headers.insert("Loc", HeaderValue::from_str(region.region.as_str()).unwrap());
    headers.insert("Origin", HeaderValue::from_str(&region.origin).unwrap());
    headers.insert("Pragma", HeaderValue::from_static("no-cache"));
    headers.insert("Referer", HeaderValue::from_str(&region.referer).unwrap());
    headers.insert("Pf", HeaderValue::from_static(PLATFORM_CODE));
    headers.insert("User-Agent", HeaderValue::from_static(USER_AGENT));
    headers.insert("Cookie", HeaderValue::from_str(&cookie).unwrap());
    headers.insert("Device-Time", HeaderValue::from_str(&timestamp.to_string()).unwrap());
    headers.insert("Sign", HeaderValue::from_str(&sign).unwrap());
    headers.insert("Sign-Ver", HeaderValue::from_static("1"));

    headers
}

/// Standard query parameters appended to all API requests.
pub fn standard_query_params(region: &RegionInfo) -> Vec<(&'static str, String)> {
    vec![
        ("aid", region.assistant_id.to_string()),
        ("device_platform", "web".to_string()),
        ("region", region.region.as_str().to_string()),
        ("webId", WEB_ID.to_string()),
        ("da_version", "3.3.2".to_string()),
        ("web_component_open_flag", "1".to_string()),
        ("web_version", "7.5.0".to_string()),
        ("aigc_features", "app_lip_sync".to_string()),
    ]
}

pub fn user_agent() -> &'static str {
    USER_AGENT
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jimeng::region::{Region, resolve_region};

    #[test]
    fn md5_matches_the_published_vectors() {
        // RFC 1321 appendix A.5.
        assert_eq!(md5_hex(""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(md5_hex("abc"), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn sign_window_takes_the_uri_tail() {
        assert_eq!(uri_sign_window("/mweb/v1/aigc_draft/generate"), "enerate");
        assert_eq!(uri_sign_window("enerate"), "enerate");
        // Shorter paths are covered whole.
        assert_eq!(uri_sign_window("abc"), "abc");
    }

    #[test]
    fn sign_input_follows_the_salted_template() {
        assert_eq!(
            sign_input("/mweb/v1/aigc_draft/generate", 1_700_000_000),
            "9e2c|enerate|7|8.4.0|1700000000||11ac"
        );
    }

    #[test]
    fn sign_depends_only_on_the_uri_window() {
        let a = compute_sign("/mweb/v1/aigc_draft/generate", 1_700_000_000);
        let b = compute_sign("enerate", 1_700_000_000);
        assert_eq!(a, b);
        assert_eq!(a, md5_hex("9e2c|enerate|7|8.4.0|1700000000||11ac"));
        // A different device time changes the digest.
        assert_ne!(a, compute_sign("enerate", 1_700_000_001));
    }

    #[test]
    fn cookie_carries_every_session_field() {
        let cookie = generate_cookie("sekrit");
        for field in ["sid_tt=sekrit", "sessionid=sekrit", "sessionid_ss=sekrit"] {
            assert!(cookie.contains(field), "missing {field} in {cookie}");
        }
        assert_eq!(cookie.matches("; ").count(), 9);
    }

    #[test]
    fn sid_guard_embeds_secret_issue_time_and_lifetime() {
        let guard = sid_guard_value("sekrit", 1_700_000_000);
        // Pipes are percent-encoded into the cookie value.
        assert!(guard.starts_with("sekrit%7C1700000000%7C5184000%7C"));
        assert!(guard.contains("GMT"));
    }

    #[test]
    fn headers_follow_the_region() {
        let info = resolve_region(Region::Us);
        let headers = build_headers(&info, "tok", "/mweb/v1/get_upload_token");
        assert_eq!(headers.get("Loc").unwrap(), "us");
        assert_eq!(
            headers.get("Origin").unwrap().to_str().unwrap(),
            info.origin
        );
        assert_eq!(
            headers.get("Appid").unwrap().to_str().unwrap(),
            info.assistant_id.to_string()
        );
    }
}
