//! Session token pool carried in the client's Authorization header.
//!
//! The header value is a comma-separated list of session tokens. The pool
//! is an immutable per-request slice; selection is random and mutates
//! nothing.

use crate::error::{GatewayError, Result};
use crate::jimeng::region::SessionToken;

#[derive(Debug, Clone)]
pub struct TokenPool {
    tokens: Vec<String>,
}

impl TokenPool {
    /// Split a `Bearer` header value into a pool.
    pub fn from_bearer(header_value: &str) -> Result<Self> {
        let raw = header_value
            .strip_prefix("Bearer ")
            .or_else(|| header_value.strip_prefix("bearer "))
            .ok_or_else(|| GatewayError::Auth("missing Bearer authorization".into()))?;

        let tokens: Vec<String> = raw
            .split(',')
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .map(|t| t.to_string())
            .collect();

        if tokens.is_empty() {
            return Err(GatewayError::TokenPoolExhausted);
        }
        Ok(Self { tokens })
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Pick one token at random and parse its region tag.
    pub fn pick(&self) -> Result<SessionToken> {
        if self.tokens.is_empty() {
            return Err(GatewayError::TokenPoolExhausted);
        }
        let index = rand::random_range(0..self.tokens.len());
        SessionToken::parse(&self.tokens[index])
    }
}
