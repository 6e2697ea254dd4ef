use crate::errors::{Error, Result};
use crate::metrics::record_submission;
use crate::model::Measurement;
use crate::retry::{retry, RetryPolicy};
use crate::socketio::{self, Packet};
use crate::token::TokenManager;
use futures::future::join_all;
use futures::stream::{SplitStream, StreamExt};
use futures::SinkExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const ACK_TIMEOUT: Duration = Duration::from_secs(10);
const INVALID_TOKEN: &str = "Invalid token";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Emits waiting for the server's acknowledgement, by ack id.
#[derive(Default)]
struct PendingAcks(std::sync::Mutex<HashMap<u64, oneshot::Sender<Result<()>>>>);

impl PendingAcks {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<Result<()>>>> {
        self.0.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn register(&self, id: u64) -> oneshot::Receiver<Result<()>> {
        let (tx, rx) = oneshot::channel();
        self.lock().insert(id, tx);
        rx
    }

    fn forget(&self, id: u64) {
        self.lock().remove(&id);
    }

    fn resolve(&self, id: u64) {
        match self.lock().remove(&id) {
            Some(tx) => {
                let _ = tx.send(Ok(()));
            }
            None => debug!("Ack {} matches no pending emit", id),
        }
    }

    /// Fails every outstanding emit with `reason`.
    fn fail_all(&self, reason: &str) {
        for (_, tx) in self.lock().drain() {
            let _ = tx.send(Err(Error::Emit(reason.to_string())));
        }
    }
}

/// A live socket: frames go out through `outbound`; the reader task answers
/// pings, resolves acks and watches for server-side exceptions.
struct Connection {
    outbound: mpsc::UnboundedSender<Message>,
    alive: Arc<AtomicBool>,
    pending: Arc<PendingAcks>,
    next_ack: AtomicU64,
    tasks: Vec<JoinHandle<()>>,
}

impl Connection {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && !self.outbound.is_closed()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
        self.pending.fail_all("connection dropped");
    }
}

/// Emits measurements as Socket.IO events over one persistent websocket.
/// An emit only succeeds once the server acknowledges the event.
pub struct SocketClient {
    url: String,
    tokens: Arc<TokenManager>,
    retry: RetryPolicy,
    connection: Mutex<Option<Connection>>,
}

impl SocketClient {
    pub fn new(socket_url: &str, tokens: Arc<TokenManager>, retry: RetryPolicy) -> Self {
        let url = socketio::socket_endpoint(socket_url);
        debug!("Socket client for {}", url);
        Self {
            url,
            tokens,
            retry,
            connection: Mutex::new(None),
        }
    }

    #[cfg(test)]
    pub async fn is_connected(&self) -> bool {
        self.connection
            .lock()
            .await
            .as_ref()
            .is_some_and(Connection::is_alive)
    }

    /// Emits one measurement, connecting first if needed and retrying until
    /// the server acknowledges it or the attempts run out.
    pub async fn emit_measurement(&self, event: &str, measurement: &Measurement) -> Result<()> {
        let label = format!("emit {}", event);
        retry(self.retry, &label, move || self.emit(event, measurement)).await
    }

    /// Emits every pair. One failure never stops the others; results come
    /// back in input order.
    pub async fn emit_measurements(&self, batch: &[(String, Measurement)]) -> Vec<Result<()>> {
        join_all(batch.iter().map(|(event, measurement)| async move {
            let result = self.emit_measurement(event, measurement).await;
            match &result {
                Ok(()) => info!("Measurement emitted on event {} correctly", event),
                Err(e) => error!("Failed to emit measurement on event {}: {}", event, e),
            }
            record_submission("socket", result.is_ok());
            result
        }))
        .await
    }

    /// Flushes queued frames, leaves the namespace and closes the socket.
    pub async fn close(&self) {
        let Some(mut connection) = self.connection.lock().await.take() else {
            return;
        };

        let _ = connection
            .outbound
            .send(Message::Text(socketio::encode(&Packet::Disconnect)));
        let _ = connection.outbound.send(Message::Close(None));

        let writer = connection.tasks.remove(0);
        drop(connection);
        if tokio::time::timeout(HANDSHAKE_TIMEOUT, writer).await.is_err() {
            warn!("Timed out flushing the websocket");
        }
        info!("Disconnected from {}", self.url);
    }

    async fn emit(&self, event: &str, measurement: &Measurement) -> Result<()> {
        let data = serde_json::to_value(measurement)?;

        let (id, acked, pending) = {
            let mut connection = self.connection.lock().await;
            if !connection.as_ref().is_some_and(Connection::is_alive) {
                // drop the dead one before dialing again
                *connection = None;
                *connection = Some(self.connect().await?);
            }

            let Some(live) = connection.as_ref() else {
                return Err(Error::Emit("no connection".to_string()));
            };

            let id = live.next_ack.fetch_add(1, Ordering::SeqCst);
            let acked = live.pending.register(id);
            let frame = socketio::encode(&Packet::Event {
                name: event.to_string(),
                data,
                ack: Some(id),
            });
            if live.outbound.send(Message::Text(frame)).is_err() {
                *connection = None;
                return Err(Error::Emit("connection closed before sending".to_string()));
            }
            (id, acked, Arc::clone(&live.pending))
        };

        debug!("Emitted {} event with ack {}", event, id);
        match tokio::time::timeout(ACK_TIMEOUT, acked).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::Emit("connection dropped before the ack".to_string())),
            Err(_) => {
                pending.forget(id);
                Err(Error::Emit(format!("no ack for {} event", event)))
            }
        }
    }

    async fn connect(&self) -> Result<Connection> {
        let token = self.tokens.get_token().await?;

        let mut request = self.url.as_str().into_client_request()?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| Error::Emit(format!("token is not a valid header: {}", e)))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        info!("Connecting to {}", self.url);
        let ws = match tokio::time::timeout(HANDSHAKE_TIMEOUT, connect_async(request)).await {
            Err(_) => return Err(Error::Emit("websocket connect timed out".to_string())),
            Ok(Ok((ws, _))) => ws,
            Ok(Err(tungstenite::Error::Http(response)))
                if response.status() == StatusCode::UNAUTHORIZED =>
            {
                self.tokens.invalidate(&token).await;
                return Err(Error::Emit("websocket handshake rejected the token".to_string()));
            }
            Ok(Err(e)) => return Err(e.into()),
        };

        let (mut sink, mut stream) = ws.split();
        match tokio::time::timeout(HANDSHAKE_TIMEOUT, open_namespace(&mut sink, &mut stream)).await {
            Err(_) => return Err(Error::Emit("Socket.IO handshake timed out".to_string())),
            Ok(Err(Error::Emit(reason))) if reason.contains(INVALID_TOKEN) => {
                self.tokens.invalidate(&token).await;
                return Err(Error::Emit(reason));
            }
            Ok(result) => result?,
        }
        info!("Connected to {}", self.url);

        let alive = Arc::new(AtomicBool::new(true));
        let pending = Arc::new(PendingAcks::default());
        let (outbound, mut rx) = mpsc::unbounded_channel::<Message>();

        let writer_alive = alive.clone();
        let writer = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if let Err(e) = sink.send(message).await {
                    warn!("Websocket write failed: {}", e);
                    break;
                }
                if closing {
                    break;
                }
            }
            writer_alive.store(false, Ordering::SeqCst);
            let _ = sink.close().await;
        });

        let reader = tokio::spawn(read_frames(
            stream,
            outbound.clone(),
            alive.clone(),
            pending.clone(),
            self.tokens.clone(),
            token,
        ));

        Ok(Connection {
            outbound,
            alive,
            pending,
            next_ack: AtomicU64::new(0),
            tasks: vec![writer, reader],
        })
    }
}

/// Waits for the Engine.IO open frame, joins the default namespace and waits
/// for the acknowledgement.
async fn open_namespace<S>(sink: &mut S, stream: &mut SplitStream<WsStream>) -> Result<()>
where
    S: futures::Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let mut joined = false;

    while let Some(frame) = stream.next().await {
        let text = match frame? {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        match socketio::decode(&text)? {
            Packet::Open(_) if !joined => {
                sink.send(Message::Text(socketio::encode(&Packet::Connect(None))))
                    .await?;
                joined = true;
            }
            Packet::Ping => {
                sink.send(Message::Text(socketio::encode(&Packet::Pong)))
                    .await?;
            }
            Packet::Connect(_) if joined => return Ok(()),
            Packet::ConnectError(data) => {
                return Err(Error::Emit(socketio::error_message(&data)));
            }
            other => debug!("Ignoring {:?} during handshake", other),
        }
    }

    Err(Error::Emit("socket closed during handshake".to_string()))
}

async fn read_frames(
    mut stream: SplitStream<WsStream>,
    outbound: mpsc::UnboundedSender<Message>,
    alive: Arc<AtomicBool>,
    pending: Arc<PendingAcks>,
    tokens: Arc<TokenManager>,
    token: String,
) {
    let mut reason = "connection closed".to_string();

    while let Some(frame) = stream.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                warn!("Websocket read failed: {}", e);
                reason = e.to_string();
                break;
            }
        };

        match socketio::decode(&text) {
            Ok(Packet::Ping) => {
                if outbound
                    .send(Message::Text(socketio::encode(&Packet::Pong)))
                    .is_err()
                {
                    break;
                }
            }
            Ok(Packet::Ack { id, .. }) => pending.resolve(id),
            Ok(Packet::Event { name, data, .. }) if name == "exception" => {
                let message = socketio::error_message(&data);
                warn!("Socket exception: {}", message);
                if message.contains(INVALID_TOKEN) {
                    tokens.invalidate(&token).await;
                    reason = message;
                    break;
                }
            }
            Ok(Packet::Close) | Ok(Packet::Disconnect) => break,
            Ok(other) => debug!("Ignoring {:?}", other),
            Err(e) => warn!("Undecodable frame {:?}: {}", text, e),
        }
    }

    alive.store(false, Ordering::SeqCst);
    pending.fail_all(&reason);
    debug!("Websocket reader stopped");
}
