//! WebSocket front-end exposing a `Hub` to remote clients.
//!
//! Architecture:
//! ```text
//! Client A ──┐                       ┌── requests ──► HubRemote(A) ──┐
//!            ├── connection task ────┤                               ├── Hub
//! Client B ──┘   (one per socket)    └── Items ◄──── forwarders ◄────┘
//!                        │
//!                        ▼
//!                 writer task (mpsc → socket)
//! ```
//!
//! Requests on one socket are handled in arrival order. Each subscription
//! gets a forwarder task that turns its item stream into `Items` frames;
//! forwarders stop when the socket closes.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::hub::{Hub, HubRemote};
use super::protocol::{self, ClientFrame, Request, Response, ServerFrame};
use super::{RemoteError, RemoteStore};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Outgoing frames buffered per connection
    pub channel_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9191".to_string(),
            channel_capacity: 256,
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_requests: u64,
}

#[derive(Default)]
struct Counters {
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    total_requests: AtomicU64,
}

/// The remote store server.
pub struct RemoteServer {
    config: ServerConfig,
    hub: Arc<Hub>,
    counters: Arc<Counters>,
}

impl RemoteServer {
    pub fn new(config: ServerConfig, hub: Arc<Hub>) -> Self {
        Self {
            config,
            hub,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Create with default configuration and an empty hub.
    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default(), Hub::new())
    }

    /// Bind the configured address and serve forever.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Remote store listening on {}", self.config.bind_addr);
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener.
    pub async fn serve(
        &self,
        listener: TcpListener,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let hub = self.hub.clone();
            let counters = self.counters.clone();
            let capacity = self.config.channel_capacity;

            tokio::spawn(async move {
                counters.total_connections.fetch_add(1, Ordering::Relaxed);
                counters.active_connections.fetch_add(1, Ordering::Relaxed);
                if let Err(e) =
                    Self::handle_connection(stream, addr, hub, &counters, capacity).await
                {
                    log::error!("Connection error from {addr}: {e}");
                }
                counters.active_connections.fetch_sub(1, Ordering::Relaxed);
            });
        }
    }

    /// Handle a single WebSocket connection.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        hub: Arc<Hub>,
        counters: &Counters,
        capacity: usize,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        log::info!("WebSocket connection established from {addr}");

        let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(capacity);
        let writer = tokio::spawn(async move {
            while let Some(data) = out_rx.recv().await {
                if ws_sender.send(Message::Binary(data.into())).await.is_err() {
                    break;
                }
            }
        });

        let cancel = CancellationToken::new();
        // Signed out until the client says hello.
        let mut remote = hub.connect(None);

        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Binary(data)) => {
                    let bytes: Vec<u8> = data.into();
                    let frame = match protocol::decode::<ClientFrame>(&bytes) {
                        Ok(frame) => frame,
                        Err(e) => {
                            log::warn!("Failed to decode frame from {addr}: {e}");
                            continue;
                        }
                    };
                    match frame {
                        ClientFrame::Hello { user } => {
                            log::debug!("{addr} identified, signed in: {}", user.is_some());
                            remote = hub.connect(user.as_deref());
                        }
                        ClientFrame::Request { id, request } => {
                            counters.total_requests.fetch_add(1, Ordering::Relaxed);
                            let result =
                                Self::handle_request(&remote, id, request, &out_tx, &cancel).await;
                            let reply = protocol::encode(&ServerFrame::Response { id, result })?;
                            if out_tx.send(reply).await.is_err() {
                                break;
                            }
                        }
                    }
                }
                Ok(Message::Close(_)) => {
                    log::info!("Connection closed from {addr}");
                    break;
                }
                Err(e) => {
                    log::error!("WebSocket error from {addr}: {e}");
                    break;
                }
                _ => {}
            }
        }

        cancel.cancel();
        drop(out_tx);
        let _ = writer.await;
        Ok(())
    }

    async fn handle_request(
        remote: &HubRemote,
        id: u64,
        request: Request,
        out_tx: &mpsc::Sender<Vec<u8>>,
        cancel: &CancellationToken,
    ) -> Result<Response, RemoteError> {
        match request {
            Request::Subscribe { scope } => {
                let mut items = remote.subscribe(&scope).await?;
                let out_tx = out_tx.clone();
                let cancel = cancel.clone();
                // Items frames may overtake the `Subscribed` response; the
                // client registers the subscription before sending the request.
                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            biased;
                            () = cancel.cancelled() => break,
                            batch = items.recv() => {
                                let Some(batch) = batch else { break };
                                let frame = ServerFrame::Items { subscription: id, items: batch };
                                let Ok(bytes) = protocol::encode(&frame) else { continue };
                                if out_tx.send(bytes).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                });
                Ok(Response::Subscribed)
            }
            Request::WriteBatch { scope, ops } => {
                remote.write_batch(&scope, ops).await?;
                Ok(Response::Done)
            }
            Request::WriteItem { scope, op } => {
                remote.write_item(&scope, op).await?;
                Ok(Response::Done)
            }
            Request::UploadBlob { scope, item_id, bytes } => {
                remote.upload_blob(&scope, &item_id, bytes).await?;
                Ok(Response::Done)
            }
            Request::FetchBlob { scope, item_id } => {
                Ok(Response::Blob(remote.fetch_blob(&scope, &item_id).await?))
            }
            Request::CreateShare { scope, read_only } => Ok(Response::Token(
                remote.create_share_credential(&scope, read_only).await?,
            )),
        }
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            total_connections: self.counters.total_connections.load(Ordering::Relaxed),
            active_connections: self.counters.active_connections.load(Ordering::Relaxed),
            total_requests: self.counters.total_requests.load(Ordering::Relaxed),
        }
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }
}
