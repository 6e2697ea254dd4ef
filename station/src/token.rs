use crate::errors::{Error, Result};
use crate::metrics::LOGINS_TOTAL;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    login: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    access_token: Option<String>,
}

/// Caches the bearer token shared by every transport. A missing token is
/// fetched on demand; an invalidated one forces the next caller to log in again.
#[derive(Debug)]
pub struct TokenManager {
    http: reqwest::Client,
    auth_url: String,
    user: String,
    password: String,
    token: Mutex<Option<String>>,
}

impl TokenManager {
    pub fn new(http: reqwest::Client, auth_url: String, user: String, password: String) -> Self {
        debug!("Token manager for user {} at {}", user, auth_url);
        Self {
            http,
            auth_url,
            user,
            password,
            token: Mutex::new(None),
        }
    }

    /// Cached token, or a fresh one from the login endpoint. Concurrent callers
    /// wait for a single login.
    pub async fn get_token(&self) -> Result<String> {
        let mut token = self.token.lock().await;
        if let Some(current) = token.as_ref() {
            return Ok(current.clone());
        }

        debug!("Token not set, logging in");
        let fresh = self.login().await?;
        *token = Some(fresh.clone());
        Ok(fresh)
    }

    /// Drops `stale` if it is still the cached token. A token some other
    /// caller already replaced is left alone.
    pub async fn invalidate(&self, stale: &str) {
        let mut token = self.token.lock().await;
        if token.as_deref() == Some(stale) {
            info!("Token rejected by the backend, it will be renewed");
            *token = None;
        }
    }

    async fn login(&self) -> Result<String> {
        let response = self
            .http
            .post(&self.auth_url)
            .json(&LoginRequest {
                login: &self.user,
                password: &self.password,
            })
            .send()
            .await
            .map_err(|e| Error::Authentication(format!("login request failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            warn!("Login rejected for user {}", self.user);
            return Err(Error::InvalidCredentials);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Authentication(format!("login returned {}: {}", status, body)));
        }

        let body: LoginResponse = response
            .json()
            .await
            .map_err(|e| Error::Authentication(format!("unreadable login response: {}", e)))?;

        match body.access_token {
            Some(token) if !token.is_empty() => {
                LOGINS_TOTAL.inc();
                info!("Logged in as {}", self.user);
                Ok(token)
            }
            _ => Err(Error::Authentication(
                "login response has no access_token".to_string(),
            )),
        }
    }
}
