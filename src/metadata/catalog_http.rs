//! Blocking JSON transport used by the catalog lookups.

use std::time::Duration;

use serde_json::Value;

use crate::error::PresenceError;

/// Issues one GET request and returns the decoded JSON body.
///
/// Implementations must map every failure (connect, timeout, non-2xx,
/// unreadable or non-JSON body) to an error rather than panicking.
pub trait JsonTransport: Send + Sync {
    fn get_json(&self, url: &str, query: &[(&str, &str)]) -> Result<Value, PresenceError>;
}

/// Builds the full request URL for logging.
pub fn request_url(url: &str, query: &[(&str, &str)]) -> String {
    let mut full = url.to_string();
    if query.is_empty() {
        return full;
    }

    full.push('?');
    for (index, (key, value)) in query.iter().enumerate() {
        if index > 0 {
            full.push('&');
        }
        full.push_str(key);
        full.push('=');
        full.push_str(urlencoding::encode(value).as_ref());
    }
    full
}

/// `ureq`-backed transport with short connect/read timeouts.
pub struct UreqTransport {
    http_client: ureq::Agent,
    user_agent: String,
}

impl UreqTransport {
    pub fn new(timeout: Duration, user_agent: &str) -> Self {
        let http_client = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .timeout_write(timeout)
            .build();

        Self {
            http_client,
            user_agent: user_agent.to_string(),
        }
    }
}

impl JsonTransport for UreqTransport {
    fn get_json(&self, url: &str, query: &[(&str, &str)]) -> Result<Value, PresenceError> {
        let mut request = self
            .http_client
            .get(url)
            .set("User-Agent", &self.user_agent)
            .set("Accept", "application/json");
        for (key, value) in query {
            request = request.query(key, value);
        }
        let response = request.call()?;
        let body = response
            .into_string()
            .map_err(|error| PresenceError::Transport(format!("Failed to read response: {error}")))?;
        parse_json_body(&body)
    }
}

fn parse_json_body(body: &str) -> Result<Value, PresenceError> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Err(PresenceError::Parse("empty response body".to_string()));
    }
    if trimmed.starts_with('<') {
        return Err(PresenceError::Parse("non-JSON response body".to_string()));
    }
    serde_json::from_str(trimmed).map_err(|error| {
        let snippet: String = trimmed.chars().take(120).collect();
        PresenceError::Parse(format!("Invalid JSON response: {error}; prefix={snippet}"))
    })
}
