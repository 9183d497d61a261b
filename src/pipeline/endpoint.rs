//! # Stage Endpoint
//!
//! The HTTP seam used for stage calls and for posting results to the
//! catalog. [`HttpStageEndpoint`] is the reqwest implementation; tests
//! substitute a scripted fake.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl EndpointRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl EndpointResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

#[async_trait]
pub trait StageEndpoint: Send + Sync {
    /// POST `request.body` to `request.url`. Any HTTP status is a response;
    /// only transport failures are errors.
    async fn post(&self, request: EndpointRequest) -> PipelineResult<EndpointResponse>;
}

#[derive(Debug, Clone)]
pub struct HttpStageEndpoint {
    client: Client,
}

impl HttpStageEndpoint {
    /// Client with a per-call timeout
    pub fn new(timeout: Duration) -> PipelineResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::endpoint("<client>", e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl StageEndpoint for HttpStageEndpoint {
    async fn post(&self, request: EndpointRequest) -> PipelineResult<EndpointResponse> {
        let mut builder = self.client.post(&request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder
            .body(request.body)
            .send()
            .await
            .map_err(|e| PipelineError::endpoint(&request.url, e.to_string()))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| PipelineError::endpoint(&request.url, e.to_string()))?
            .to_vec();

        debug!(url = %request.url, status = status, bytes = body.len(), "🌐 Endpoint responded");
        Ok(EndpointResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_lookup_ignores_case() {
        let response = EndpointResponse::new(200, "{}").with_header("Retry-After", "3");
        assert_eq!(response.header("retry-after"), Some("3"));
        assert!(response.is_success());
        assert!(!EndpointResponse::new(503, "").is_success());
    }

    #[test]
    fn test_http_endpoint_builds() {
        assert!(HttpStageEndpoint::new(Duration::from_secs(5)).is_ok());
    }
}
