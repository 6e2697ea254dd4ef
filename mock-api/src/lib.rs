//! Local stand-in for the weather backend: login, per-sensor measurement
//! endpoints and a Socket.IO-style websocket, with knobs to inject failures.

mod rest;
mod socket;

use axum::Router;
use serde_json::Value;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{error, info};

pub const LOGIN_PATH: &str = "/api/v1/auth/login";
pub const MEASUREMENTS_PATH: &str = "/api/v1/measurements";
pub const SOCKET_PATH: &str = "/socket.io/";

/// A measurement accepted by one of the HTTP endpoints.
#[derive(Debug, Clone, PartialEq)]
pub struct Received {
    pub kind: String,
    pub body: Value,
}

/// An event received over the websocket.
#[derive(Debug, Clone, PartialEq)]
pub struct Emitted {
    pub event: String,
    pub data: Value,
}

#[derive(Debug)]
pub struct MockState {
    user: String,
    password: String,
    tokens: Mutex<HashSet<String>>,
    logins: AtomicU32,
    reject_logins: AtomicBool,
    failures_left: AtomicU32,
    pongs: AtomicU32,
    received: Mutex<Vec<Received>>,
    emitted: Mutex<Vec<Emitted>>,
}

pub type SharedState = Arc<MockState>;

fn guard<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

impl MockState {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> SharedState {
        Arc::new(Self {
            user: user.into(),
            password: password.into(),
            tokens: Mutex::new(HashSet::new()),
            logins: AtomicU32::new(0),
            reject_logins: AtomicBool::new(false),
            failures_left: AtomicU32::new(0),
            pongs: AtomicU32::new(0),
            received: Mutex::new(Vec::new()),
            emitted: Mutex::new(Vec::new()),
        })
    }

    /// Number of successful logins so far.
    pub fn logins(&self) -> u32 {
        self.logins.load(Ordering::SeqCst)
    }

    /// Makes every issued token invalid.
    pub fn revoke_tokens(&self) {
        guard(&self.tokens).clear();
    }

    /// While set, every login answers 401.
    pub fn reject_logins(&self, reject: bool) {
        self.reject_logins.store(reject, Ordering::SeqCst);
    }

    /// The next `n` authorised measurement posts answer 503.
    pub fn fail_next_submissions(&self, n: u32) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Pongs answered by websocket clients.
    pub fn pongs(&self) -> u32 {
        self.pongs.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> Vec<Received> {
        guard(&self.received).clone()
    }

    pub fn emitted(&self) -> Vec<Emitted> {
        guard(&self.emitted).clone()
    }

    fn login(&self, user: &str, password: &str) -> Option<String> {
        if self.reject_logins.load(Ordering::SeqCst) || user != self.user || password != self.password {
            return None;
        }
        let token = uuid::Uuid::new_v4().to_string();
        guard(&self.tokens).insert(token.clone());
        self.logins.fetch_add(1, Ordering::SeqCst);
        Some(token)
    }

    fn is_valid(&self, token: &str) -> bool {
        guard(&self.tokens).contains(token)
    }

    fn take_failure(&self) -> bool {
        self.failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn record(&self, kind: String, body: Value) {
        guard(&self.received).push(Received { kind, body });
    }

    fn record_pong(&self) {
        self.pongs.fetch_add(1, Ordering::SeqCst);
    }

    fn record_event(&self, event: String, data: Value) {
        guard(&self.emitted).push(Emitted { event, data });
    }
}

pub fn create_router(state: SharedState) -> Router {
    rest::create_router(state.clone()).merge(socket::create_router(state))
}

/// Binds `addr` and serves the mock in a background task.
pub async fn spawn(state: SharedState, addr: &str) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;
    let app = create_router(state);

    info!("Mock API listening on {}", local);
    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Mock API server error: {}", e);
        }
    });

    Ok((local, handle))
}

/// `Authorization: Bearer <token>` value, if present.
fn bearer(headers: &axum::http::HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{header, HeaderMap, HeaderValue};

    #[test]
    fn test_login_issues_distinct_tokens() {
        let state = MockState::new("sensors", "123456");
        let a = state.login("sensors", "123456").unwrap();
        let b = state.login("sensors", "123456").unwrap();

        assert_ne!(a, b);
        assert!(state.is_valid(&a) && state.is_valid(&b));
        assert_eq!(state.logins(), 2);
    }

    #[test]
    fn test_bad_or_rejected_credentials() {
        let state = MockState::new("sensors", "123456");
        assert!(state.login("sensors", "nope").is_none());

        state.reject_logins(true);
        assert!(state.login("sensors", "123456").is_none());
        assert_eq!(state.logins(), 0);
    }

    #[test]
    fn test_revoke_invalidates_tokens() {
        let state = MockState::new("u", "p");
        let token = state.login("u", "p").unwrap();
        state.revoke_tokens();
        assert!(!state.is_valid(&token));
    }

    #[test]
    fn test_failure_budget_counts_down() {
        let state = MockState::new("u", "p");
        state.fail_next_submissions(2);
        assert!(state.take_failure());
        assert!(state.take_failure());
        assert!(!state.take_failure());
    }

    #[test]
    fn test_bearer_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(bearer(&headers), Some("abc"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer(&headers), None);
    }
}
