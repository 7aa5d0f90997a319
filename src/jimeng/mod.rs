//! Direct connection to the Jimeng/Dreamina generative media API.

pub mod auth;
pub mod chat;
pub mod credit;
pub mod draft;
pub mod generate;
pub mod image;
pub mod message;
pub mod models;
pub mod poll;
pub mod region;
pub mod signer;
pub mod upload;

use crate::jimeng::region::{RegionInfo, SessionToken};

/// Everything one request needs to talk to the upstream: a shared HTTP
/// client, the resolved regional backend, and the raw session secret.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    pub http: reqwest::Client,
    pub region: RegionInfo,
    pub secret: String,
}

impl UpstreamClient {
    pub fn new(http: reqwest::Client, token: &SessionToken) -> Self {
        Self {
            http,
            region: token.info(),
            secret: token.secret.clone(),
        }
    }

    pub fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.region.origin, path)
    }
}
