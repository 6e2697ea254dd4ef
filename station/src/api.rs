use crate::errors::{Error, Result};
use crate::metrics::record_submission;
use crate::model::Measurement;
use crate::retry::{retry, RetryPolicy};
use crate::token::TokenManager;
use futures::future::join_all;
use reqwest::StatusCode;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Posts measurements to the backend's HTTP endpoints.
pub struct ApiClient {
    http: reqwest::Client,
    tokens: Arc<TokenManager>,
    retry: RetryPolicy,
}

impl ApiClient {
    pub fn new(http: reqwest::Client, tokens: Arc<TokenManager>, retry: RetryPolicy) -> Self {
        Self {
            http,
            tokens,
            retry,
        }
    }

    /// Posts one measurement, retrying transient failures.
    pub async fn add_measurement(&self, endpoint: &str, measurement: &Measurement) -> Result<()> {
        let label = format!("POST {}", endpoint);
        retry(self.retry, &label, move || self.post(endpoint, measurement)).await
    }

    /// Posts every pair concurrently. One failure never stops the others;
    /// results come back in input order.
    pub async fn add_measurements(&self, batch: &[(String, Measurement)]) -> Vec<Result<()>> {
        join_all(batch.iter().map(|(endpoint, measurement)| async move {
            let result = self.add_measurement(endpoint, measurement).await;
            match &result {
                Ok(()) => info!("Measurement added through the endpoint {} correctly", endpoint),
                Err(e) => error!("Failed to add measurement through {}: {}", endpoint, e),
            }
            record_submission("http", result.is_ok());
            result
        }))
        .await
    }

    async fn post(&self, endpoint: &str, measurement: &Measurement) -> Result<()> {
        let token = self.tokens.get_token().await?;

        let response = self
            .http
            .post(endpoint)
            .bearer_auth(&token)
            .json(measurement)
            .send()
            .await
            .map_err(|e| Error::MeasurementSubmission {
                status: 0,
                body: e.to_string(),
            })?;

        let status = response.status();
        if status.is_success() {
            debug!("{} accepted measurement with {}", endpoint, status);
            return Ok(());
        }

        if status == StatusCode::UNAUTHORIZED {
            debug!("Token expired, renewing token");
            self.tokens.invalidate(&token).await;
        }

        let body = response.text().await.unwrap_or_default();
        Err(Error::MeasurementSubmission {
            status: status.as_u16(),
            body,
        })
    }
}
