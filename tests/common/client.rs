//! HTTP client for end-to-end tests
//!
//! Wraps reqwest with one method per scheduler endpoint. When API routes or
//! request formats change, update only this file.

use super::constants::*;
use reqwest::Response;
use serde_json::Value;
use std::time::Duration;

/// HTTP test client
pub struct TestClient {
    /// The underlying reqwest client (public for custom requests in tests)
    pub client: reqwest::Client,
    /// The base URL of the test server
    pub base_url: String,
}

impl TestClient {
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to build reqwest client");

        Self { client, base_url }
    }

    pub async fn home(&self) -> Response {
        self.client
            .get(format!("{}/", self.base_url))
            .send()
            .await
            .expect("Home request failed")
    }

    // ========================================================================
    // Jobs
    // ========================================================================

    pub async fn list_jobs(&self) -> Response {
        self.client
            .get(format!("{}/v1/jobs", self.base_url))
            .send()
            .await
            .expect("List jobs request failed")
    }

    pub async fn get_job(&self, job_id: &str) -> Response {
        self.client
            .get(format!("{}/v1/jobs/{}", self.base_url, job_id))
            .send()
            .await
            .expect("Get job request failed")
    }

    /// Triggers `job_id`, optionally with JSON params and a caller-chosen
    /// correlation id.
    pub async fn trigger_job(
        &self,
        job_id: &str,
        params: Option<Value>,
        correlation_id: Option<&str>,
    ) -> Response {
        let mut request = self
            .client
            .post(format!("{}/v1/jobs/{}/trigger", self.base_url, job_id));
        if let Some(params) = params {
            request = request.json(&params);
        }
        if let Some(id) = correlation_id {
            request = request.header("X-Correlation-ID", id);
        }
        request.send().await.expect("Trigger job request failed")
    }
}
