//! Shared fixtures for unit tests: a mock backend on an ephemeral port.

use crate::model::SensorKind;
use crate::retry::RetryPolicy;
use crate::token::TokenManager;
use mock_api::{MockState, SharedState, LOGIN_PATH, MEASUREMENTS_PATH};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub const USER: &str = "sensors";
pub const PASSWORD: &str = "123456";

pub struct MockBackend {
    pub state: SharedState,
    pub root: String,
    server: JoinHandle<()>,
}

impl MockBackend {
    pub async fn start() -> Self {
        let state = MockState::new(USER, PASSWORD);
        let (addr, server) = mock_api::spawn(state.clone(), "127.0.0.1:0")
            .await
            .expect("mock backend did not bind");

        Self {
            state,
            root: format!("http://{}", addr),
            server,
        }
    }

    pub fn auth_url(&self) -> String {
        format!("{}{}", self.root, LOGIN_PATH)
    }

    pub fn endpoint(&self, kind: SensorKind) -> String {
        format!("{}{}/{}", self.root, MEASUREMENTS_PATH, kind.as_str())
    }

    pub fn token_manager(&self) -> Arc<TokenManager> {
        Arc::new(TokenManager::new(
            reqwest::Client::new(),
            self.auth_url(),
            USER.to_string(),
            PASSWORD.to_string(),
        ))
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.server.abort();
    }
}

pub fn quick_retry() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_millis(5), Duration::from_millis(10))
}

/// Polls `condition` for up to two seconds.
pub async fn wait_until(condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 2s");
}
