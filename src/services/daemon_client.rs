use reqwest::header::AUTHORIZATION;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;

use crate::error::{ParcelExchangeError, Result};

/// Thin HTTP client for a running daemon, used by the CLI.
pub struct DaemonClient {
    base_url: String,
    token: String,
    client: reqwest::Client,
}

impl DaemonClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ParcelExchangeError::Http(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into(),
            token: token.into(),
            client,
        })
    }

    pub async fn health(&self) -> Result<Value> {
        self.get_json("/health", &[]).await
    }

    pub async fn matches(
        &self,
        parcel_id: i32,
        sort: Option<&str>,
        min_score: Option<u8>,
        limit: Option<usize>,
    ) -> Result<Value> {
        let mut query = Vec::new();
        if let Some(sort) = sort {
            query.push(("sort", sort.to_string()));
        }
        if let Some(min_score) = min_score {
            query.push(("min_score", min_score.to_string()));
        }
        if let Some(limit) = limit {
            query.push(("limit", limit.to_string()));
        }
        self.get_json(&format!("/parcels/{parcel_id}/matches"), &query)
            .await
    }

    pub async fn stats(&self) -> Result<Value> {
        self.get_json("/realtime/stats", &[]).await
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let mut request = self.client.get(join_url(&self.base_url, path));
        if !query.is_empty() {
            request = request.query(query);
        }
        if !self.token.trim().is_empty() {
            request = request.header(AUTHORIZATION, format!("Bearer {}", self.token.trim()));
        }
        let response = request
            .send()
            .await
            .map_err(|e| ParcelExchangeError::Http(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, body));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| ParcelExchangeError::Serialization(e.to_string()))
    }
}

fn status_error(status: StatusCode, body: String) -> ParcelExchangeError {
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
        .unwrap_or(body);
    match status {
        StatusCode::UNAUTHORIZED => ParcelExchangeError::Unauthorized(message),
        StatusCode::FORBIDDEN => ParcelExchangeError::Forbidden(message),
        StatusCode::NOT_FOUND => ParcelExchangeError::NotFound(message),
        StatusCode::BAD_REQUEST => ParcelExchangeError::Validation(message),
        _ => ParcelExchangeError::Http(format!("{status}: {message}")),
    }
}

fn join_url(base_url: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}
