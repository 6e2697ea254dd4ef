use crate::{bearer, SharedState, SOCKET_PATH};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

const PING_INTERVAL_MS: u64 = 25000;
const PING_TIMEOUT_MS: u64 = 20000;

pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route(SOCKET_PATH, get(upgrade))
        .with_state(state)
}

async fn upgrade(
    State(state): State<SharedState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let token = match bearer(&headers) {
        Some(token) if state.is_valid(token) => token.to_string(),
        _ => {
            warn!("Rejected websocket without a valid token");
            return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, token))
}

async fn handle_socket(mut socket: WebSocket, state: SharedState, token: String) {
    let sid = uuid::Uuid::new_v4().to_string();
    let open = json!({
        "sid": sid,
        "upgrades": [],
        "pingInterval": PING_INTERVAL_MS,
        "pingTimeout": PING_TIMEOUT_MS,
        "maxPayload": 1_000_000
    });

    if socket.send(Message::Text(format!("0{}", open))).await.is_err() {
        return;
    }
    info!("Websocket {} connected", sid);

    while let Some(msg) = socket.recv().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            _ => continue,
        };

        for reply in handle_packet(&state, &token, &sid, &text) {
            if socket.send(Message::Text(reply)).await.is_err() {
                return;
            }
        }
    }

    info!("Websocket {} closed", sid);
}

/// Answers one Engine.IO/Socket.IO text frame.
fn handle_packet(state: &SharedState, token: &str, sid: &str, text: &str) -> Vec<String> {
    if text == "3" {
        state.record_pong();
        return Vec::new();
    }

    if text.starts_with("40") {
        // acknowledge the namespace, then probe the client's ping handling
        return vec![format!("40{}", json!({ "sid": sid })), "2".to_string()];
    }

    let Some(body) = text.strip_prefix("42") else {
        debug!("Ignoring frame {:?}", text);
        return Vec::new();
    };
    let payload = body.trim_start_matches(|c: char| c.is_ascii_digit());
    let ack_id = &body[..body.len() - payload.len()];

    if !state.is_valid(token) {
        warn!("Event on websocket {} with a revoked token", sid);
        let exception = json!(["exception", { "status": "error", "message": "Invalid token" }]);
        return vec![format!("42{}", exception)];
    }

    match serde_json::from_str::<Value>(payload) {
        Ok(Value::Array(items)) => match items.first().and_then(Value::as_str) {
            Some(event) => {
                let data = items.get(1).cloned().unwrap_or(Value::Null);
                info!("Received {} event: {}", event, data);
                state.record_event(event.to_string(), data);
                if !ack_id.is_empty() {
                    return vec![format!("43{}[]", ack_id)];
                }
            }
            None => warn!("Event without a name: {}", payload),
        },
        _ => warn!("Malformed event payload: {}", payload),
    }

    Vec::new()
}
