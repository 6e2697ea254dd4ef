use crate::{bearer, SharedState, LOGIN_PATH, MEASUREMENTS_PATH};
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct LoginRequest {
    login: String,
    password: String,
}

#[derive(Debug, Serialize)]
struct LoginResponse {
    access_token: String,
}

pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route(LOGIN_PATH, post(login))
        .route(&format!("{}/:kind", MEASUREMENTS_PATH), post(add_measurement))
        .with_state(state)
}

async fn login(State(state): State<SharedState>, Json(request): Json<LoginRequest>) -> Response {
    match state.login(&request.login, &request.password) {
        Some(access_token) => {
            info!("Issued token for {}", request.login);
            Json(LoginResponse { access_token }).into_response()
        }
        None => {
            warn!("Rejected login for {}", request.login);
            (StatusCode::UNAUTHORIZED, "Invalid credentials").into_response()
        }
    }
}

async fn add_measurement(
    State(state): State<SharedState>,
    Path(kind): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !bearer(&headers).is_some_and(|token| state.is_valid(token)) {
        warn!("Unauthorized {} measurement", kind);
        return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    }

    if state.take_failure() {
        warn!("Injected failure for {} measurement", kind);
        return (StatusCode::SERVICE_UNAVAILABLE, "Try again later").into_response();
    }

    info!("Received {} measurement: {}", kind, body);
    state.record(kind, body);
    StatusCode::CREATED.into_response()
}
