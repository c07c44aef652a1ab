//! In-memory HTTP client for testing.

use crate::client::{HttpClient, HttpResponse};
use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use url::Url;

/// Serves canned responses keyed by absolute URL and records every request.
///
/// URLs without a canned response answer 404.
#[derive(Debug, Default)]
pub struct MockClient {
    responses: Mutex<HashMap<String, HttpResponse>>,
    requests: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

impl MockClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every response, so tests can act while requests are in flight.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_body(self, url: &str, body: impl Into<Vec<u8>>) -> Self {
        self.with_response(url, 200, body)
    }

    pub fn with_response(self, url: &str, status: u16, body: impl Into<Vec<u8>>) -> Self {
        let mut responses = self.responses.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        responses.insert(
            url.to_string(),
            HttpResponse {
                status,
                body: body.into(),
            },
        );
        drop(responses);
        self
    }

    /// Panics if `value` cannot be serialized. If test setup is wrong, then
    /// test should not pass.
    pub fn with_json(self, url: &str, value: Value) -> Self {
        let body = serde_json::to_vec(&value).expect("serializable test fixture");
        self.with_body(url, body)
    }

    /// An error status carrying a JSON body.
    pub fn with_status_json(self, url: &str, status: u16, value: Value) -> Self {
        let body = serde_json::to_vec(&value).expect("serializable test fixture");
        self.with_response(url, status, body)
    }

    pub fn with_status(self, url: &str, status: u16) -> Self {
        self.with_response(url, status, Vec::new())
    }

    /// Every requested URL, in request order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }

    pub fn clear_requests(&self) {
        self.requests.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clear();
    }
}

#[async_trait]
impl HttpClient for MockClient {
    async fn send(&self, url: &Url) -> Result<HttpResponse> {
        let key = url.to_string();
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(key.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let response = self
            .responses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&key)
            .cloned();
        Ok(response.unwrap_or(HttpResponse {
            status: 404,
            body: Vec::new(),
        }))
    }
}
