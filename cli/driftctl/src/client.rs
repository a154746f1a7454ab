//! HTTP client for API communication.

use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::config::Config;
use crate::error::CliError;

/// Problem document shape returned by the control plane.
#[derive(Debug, Deserialize)]
struct Problem {
    #[serde(default)]
    code: String,
    #[serde(default)]
    detail: String,
    #[serde(default)]
    request_id: Option<String>,
}

/// API client for communicating with the control plane.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    /// Create a new API client from config.
    pub fn new(config: &Config) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: config.api_url().trim_end_matches('/').to_string(),
        })
    }

    /// Build a URL for an endpoint.
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Make a GET request.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, CliError> {
        let response = self.client.get(self.url(path)).send().await?;
        self.handle_response(response).await
    }

    /// Make a POST request with a JSON body.
    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, CliError> {
        let response = self.client.post(self.url(path)).json(body).send().await?;
        self.handle_response(response).await
    }

    /// Make a POST request without a body.
    pub async fn post_empty<T: DeserializeOwned>(&self, path: &str) -> Result<T, CliError> {
        let response = self.client.post(self.url(path)).send().await?;
        self.handle_response(response).await
    }

    /// Make a DELETE request (expects an empty response).
    pub async fn delete(&self, path: &str) -> Result<(), CliError> {
        let response = self.client.delete(self.url(path)).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            self.handle_error(response).await
        }
    }

    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, CliError> {
        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            self.handle_error(response).await
        }
    }

    async fn handle_error<T>(&self, response: reqwest::Response) -> Result<T, CliError> {
        let status = response.status().as_u16();
        let problem: Problem = response.json().await.unwrap_or(Problem {
            code: "unknown".to_string(),
            detail: "unparseable error response".to_string(),
            request_id: None,
        });

        Err(CliError::api(
            status,
            problem.code,
            problem.detail,
            problem.request_id,
        ))
    }
}
