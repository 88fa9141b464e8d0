//! WebSocket change channel.
//!
//! Each subscription owns one socket and one reader task. The reader decodes
//! JSON [`ChangeEvent`]s and forwards them; a close frame or socket error is
//! forwarded as [`ChannelMessage::Disconnected`].

use crate::config::{AuthConfig, SyncConfig};
use crate::remote::{ChangeChannel, ChannelMessage, Subscription, SubscriptionHandle};
use async_trait::async_trait;
use civic_core::{ChangeEvent, SyncError, SyncResult};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Sent once per socket: inserts and updates of the report collection.
const SUBSCRIBE_FRAME: &str =
    r#"{"type":"subscribe","collection":"reports","events":["insert","update"]}"#;

struct Reader {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

pub struct WsChannel {
    endpoint: String,
    auth: AuthConfig,
    capacity: usize,
    next_handle: AtomicU64,
    readers: Mutex<HashMap<SubscriptionHandle, Reader>>,
}

impl WsChannel {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            endpoint: config.ws_endpoint.clone(),
            auth: config.auth.clone(),
            capacity: config.channel_capacity,
            next_handle: AtomicU64::new(1),
            readers: Mutex::new(HashMap::new()),
        }
    }

    async fn connect(&self) -> SyncResult<Socket> {
        let fail = |e: &dyn std::fmt::Display| SyncError::transport("subscribe", e);
        let mut request = self
            .endpoint
            .as_str()
            .into_client_request()
            .map_err(|e| fail(&e))?;
        let headers = request.headers_mut();
        if let Some(api_key) = &self.auth.api_key {
            let value = HeaderValue::from_str(api_key).map_err(|e| fail(&e))?;
            headers.insert(HeaderName::from_static("x-api-key"), value);
        }
        if let Some(jwt) = &self.auth.jwt {
            let value = HeaderValue::from_str(&format!("Bearer {}", jwt)).map_err(|e| fail(&e))?;
            headers.insert(HeaderName::from_static("authorization"), value);
        }
        let (mut socket, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| fail(&e))?;
        socket
            .send(Message::Text(SUBSCRIBE_FRAME.to_string()))
            .await
            .map_err(|e| fail(&e))?;
        Ok(socket)
    }

    fn readers(&self) -> std::sync::MutexGuard<'_, HashMap<SubscriptionHandle, Reader>> {
        self.readers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for WsChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsChannel")
            .field("endpoint", &self.endpoint)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ChangeChannel for WsChannel {
    async fn subscribe(&self) -> SyncResult<Subscription> {
        let socket = self.connect().await?;
        let handle = SubscriptionHandle::new(self.next_handle.fetch_add(1, Ordering::SeqCst));
        let (sender, messages) = mpsc::channel(self.capacity);
        let (stop, stop_rx) = oneshot::channel();
        let task = tokio::spawn(read_loop(socket, sender, stop_rx));
        self.readers().insert(handle, Reader { stop, task });
        debug!(handle = %handle, endpoint = %self.endpoint, "WebSocket subscription opened");
        Ok(Subscription { handle, messages })
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> SyncResult<()> {
        let Some(reader) = self.readers().remove(&handle) else {
            return Ok(());
        };
        let _ = reader.stop.send(());
        if let Err(err) = reader.task.await {
            warn!(handle = %handle, error = %err, "WebSocket reader ended abnormally");
        }
        debug!(handle = %handle, "WebSocket subscription closed");
        Ok(())
    }
}

async fn read_loop(
    mut socket: Socket,
    sender: mpsc::Sender<ChannelMessage>,
    mut stop: oneshot::Receiver<()>,
) {
    let reason = loop {
        let message = tokio::select! {
            biased;
            _ = &mut stop => {
                let _ = socket.close(None).await;
                return;
            }
            message = socket.next() => message,
        };
        match message {
            Some(Ok(Message::Text(text))) => match serde_json::from_str::<ChangeEvent>(&text) {
                Ok(event) => {
                    if sender.send(event.into()).await.is_err() {
                        let _ = socket.close(None).await;
                        return;
                    }
                }
                Err(err) => warn!(error = %err, "Dropping undecodable change event"),
            },
            Some(Ok(Message::Close(_))) | None => break "connection closed".to_string(),
            Some(Ok(_)) => {}
            Some(Err(err)) => break err.to_string(),
        }
    };
    let _ = sender.send(ChannelMessage::Disconnected { reason }).await;
}
