//! Region selection derived from the session token prefix.
//!
//! A session value may be prefixed with `us-`, `hk-`, `jp-` or `sg-` to pick
//! the international backend; a bare value targets the mainland (`cn`)
//! deployment.

use crate::error::{GatewayError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    Cn,
    Us,
    Hk,
    Jp,
    Sg,
}

impl Region {
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "us" => Some(Self::Us),
            "hk" => Some(Self::Hk),
            "jp" => Some(Self::Jp),
            "sg" => Some(Self::Sg),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cn => "cn",
            Self::Us => "us",
            Self::Hk => "hk",
            Self::Jp => "jp",
            Self::Sg => "sg",
        }
    }

    /// Prefix reattached when forming outbound Authorization values.
    pub fn auth_prefix(&self) -> &'static str {
        match self {
            Self::Cn => "",
            Self::Us => "us-",
            Self::Hk => "hk-",
            Self::Jp => "jp-",
            Self::Sg => "sg-",
        }
    }
}

/// Per-region backend identity, fixed for the duration of one request.
#[derive(Debug, Clone)]
pub struct RegionInfo {
    pub region: Region,
    pub is_international: bool,
    pub imagex_host: String,
    pub origin: String,
    pub aws_region: String,
    pub assistant_id: u64,
    pub referer: String,
}

/// A session credential split into its region tag and raw secret.
#[derive(Debug, Clone)]
pub struct SessionToken {
    pub region: Region,
    pub secret: String,
}

impl SessionToken {
    /// Split on the first `-`: a known prefix selects the international
    /// backend, anything else leaves the whole value as the cn secret.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(GatewayError::Auth("empty session token".into()));
        }
        if let Some((prefix, rest)) = raw.split_once('-') {
            if let Some(region) = Region::from_prefix(prefix) {
                if rest.is_empty() {
                    return Err(GatewayError::Auth("empty session token".into()));
                }
                return Ok(Self {
                    region,
                    secret: rest.to_string(),
                });
            }
        }
        Ok(Self {
            region: Region::Cn,
            secret: raw.to_string(),
        })
    }

    pub fn info(&self) -> RegionInfo {
        resolve_region(self.region)
    }
}

/// `"Bearer " + prefix + secret`, the credential form used on both sides
/// of the gateway.
pub fn format_auth(region: Region, secret: &str) -> String {
    format!("Bearer {}{}", region.auth_prefix(), secret)
}

const DOMESTIC_ORIGIN: &str = "https://jimeng.jianying.com";
const INTERNATIONAL_ORIGIN: &str = "https://dreamina.capcut.com";

/// Pure lookup from region to backend identity. No I/O.
pub fn resolve_region(region: Region) -> RegionInfo {
    let (imagex_host, origin, aws_region, assistant_id) = match region {
        Region::Cn => (
            "https://imagex.bytedanceapi.com",
            DOMESTIC_ORIGIN,
            "cn-north-1",
            513695,
        ),
        Region::Us => (
            "https://imagex-us-east-1.bytedanceapi.com",
            INTERNATIONAL_ORIGIN,
            "us-east-1",
            513641,
        ),
        Region::Hk => (
            "https://imagex-ap-singapore-1.bytedanceapi.com",
            INTERNATIONAL_ORIGIN,
            "ap-singapore-1",
            513642,
        ),
        Region::Jp => (
            "https://imagex-ap-singapore-1.bytedanceapi.com",
            INTERNATIONAL_ORIGIN,
            "ap-singapore-1",
            513643,
        ),
        Region::Sg => (
            "https://imagex-ap-singapore-1.bytedanceapi.com",
            INTERNATIONAL_ORIGIN,
            "ap-singapore-1",
            513644,
        ),
    };
    RegionInfo {
        region,
        is_international: region != Region::Cn,
        imagex_host: imagex_host.to_string(),
        origin: origin.to_string(),
        aws_region: aws_region.to_string(),
        assistant_id,
        referer: format!("{origin}/ai-tool/generate"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_token_is_cn() {
        let t = SessionToken::parse("abc123def").unwrap();
        assert_eq!(t.region, Region::Cn);
        assert_eq!(t.secret, "abc123def");
        assert!(!t.info().is_international);
    }

    #[test]
    fn known_prefixes_are_stripped() {
        for (raw, region) in [
            ("us-tok", Region::Us),
            ("hk-tok", Region::Hk),
            ("jp-tok", Region::Jp),
            ("sg-tok", Region::Sg),
        ] {
            let t = SessionToken::parse(raw).unwrap();
            assert_eq!(t.region, region);
            assert_eq!(t.secret, "tok");
            assert!(t.info().is_international);
        }
    }

    #[test]
    fn unknown_prefix_stays_in_secret() {
        let t = SessionToken::parse("eu-tok").unwrap();
        assert_eq!(t.region, Region::Cn);
        assert_eq!(t.secret, "eu-tok");
    }

    #[test]
    fn format_auth_round_trips_the_raw_token() {
        for raw in ["plaintoken", "us-abc", "hk-x-y-z", "sg-1"] {
            let t = SessionToken::parse(raw).unwrap();
            assert_eq!(format_auth(t.region, &t.secret), format!("Bearer {raw}"));
        }
    }

    #[test]
    fn empty_token_is_rejected() {
        assert!(SessionToken::parse("").is_err());
        assert!(SessionToken::parse("   ").is_err());
        assert!(SessionToken::parse("us-").is_err());
    }

    #[test]
    fn region_tables_are_complete() {
        for region in [Region::Cn, Region::Us, Region::Hk, Region::Jp, Region::Sg] {
            let info = resolve_region(region);
            assert!(info.imagex_host.starts_with("https://"));
            assert!(info.origin.starts_with("https://"));
            assert!(!info.aws_region.is_empty());
            assert!(info.assistant_id > 0);
            assert!(info.referer.starts_with(&info.origin));
        }
        assert_eq!(resolve_region(Region::Cn).aws_region, "cn-north-1");
    }
}
