//! WebSocket `RemoteStore` client.
//!
//! Provides:
//! - Connection setup with a `Hello` identifying the user
//! - Request/response correlation by request id
//! - Routing of pushed `Items` frames to per-subscription streams
//!
//! The reader task never waits on a subscriber: pushed batches land in an
//! unbounded inbox per subscription and a forwarder feeds the bounded
//! stream, so replies keep flowing while a subscriber is busy.
//!
//! Losing the connection fails every pending request and any later one with
//! `ConnectionClosed`, which the push pipeline treats as transient.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use super::protocol::{self, ClientFrame, Request, Response, ServerFrame};
use super::{
    ItemStream, RemoteError, RemoteErrorKind, RemoteItem, RemoteStore, Scope, WriteOp,
};

const OUTGOING_CAPACITY: usize = 256;
const SUBSCRIPTION_CAPACITY: usize = 64;

type Reply = Result<Response, RemoteError>;

#[derive(Default)]
struct Routes {
    pending: Mutex<HashMap<u64, oneshot::Sender<Reply>>>,
    subscriptions: Mutex<HashMap<u64, mpsc::UnboundedSender<Vec<RemoteItem>>>>,
    closed: AtomicBool,
}

impl Routes {
    fn pending(&self) -> MutexGuard<'_, HashMap<u64, oneshot::Sender<Reply>>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn subscriptions(
        &self,
    ) -> MutexGuard<'_, HashMap<u64, mpsc::UnboundedSender<Vec<RemoteItem>>>> {
        self.subscriptions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fail everything in flight: dropped reply senders read as closed.
    fn shut(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.pending().clear();
        self.subscriptions().clear();
    }
}

/// Feed `stream` from a fresh inbox until either side goes away.
fn open_inbox(stream: mpsc::Sender<Vec<RemoteItem>>) -> mpsc::UnboundedSender<Vec<RemoteItem>> {
    let (inbox_tx, mut inbox_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = stream.closed() => break,
                batch = inbox_rx.recv() => match batch {
                    Some(batch) => {
                        if stream.send(batch).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
    });
    inbox_tx
}

fn closed() -> RemoteError {
    RemoteError::new(RemoteErrorKind::ConnectionClosed, "connection to remote store closed")
}

/// A connection to a `RemoteServer`.
pub struct RemoteClient {
    outgoing: mpsc::Sender<Vec<u8>>,
    routes: Arc<Routes>,
    next_id: AtomicU64,
    signed_in: bool,
    reader: JoinHandle<()>,
}

impl RemoteClient {
    /// Connect to `url` (e.g. `ws://127.0.0.1:9191`) as `user`.
    pub async fn connect(url: &str, user: Option<&str>) -> Result<Self, RemoteError> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| RemoteError::new(RemoteErrorKind::ConnectionClosed, e.to_string()))?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        // Writer task: forward outgoing channel to WebSocket
        let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(OUTGOING_CAPACITY);
        tokio::spawn(async move {
            while let Some(data) = out_rx.recv().await {
                if ws_writer.send(Message::Binary(data.into())).await.is_err() {
                    break;
                }
            }
            let _ = ws_writer.close().await;
        });

        let routes = Arc::new(Routes::default());
        let reader_routes = routes.clone();
        let reader = tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Binary(data)) => {
                        let bytes: Vec<u8> = data.into();
                        match protocol::decode::<ServerFrame>(&bytes) {
                            Ok(frame) => Self::route(&reader_routes, frame),
                            Err(e) => log::warn!("Failed to decode server frame: {e}"),
                        }
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }
            log::info!("Remote store connection lost");
            reader_routes.shut();
        });

        let hello = protocol::encode(&ClientFrame::Hello {
            user: user.map(str::to_string),
        })?;
        out_tx.send(hello).await.map_err(|_| closed())?;

        log::info!("Connected to remote store at {url}");
        Ok(Self {
            outgoing: out_tx,
            routes,
            next_id: AtomicU64::new(1),
            signed_in: user.is_some(),
            reader,
        })
    }

    fn route(routes: &Routes, frame: ServerFrame) {
        match frame {
            ServerFrame::Response { id, result } => {
                if let Some(reply) = routes.pending().remove(&id) {
                    let _ = reply.send(result);
                }
            }
            ServerFrame::Items {
                subscription,
                items,
            } => {
                let mut subscriptions = routes.subscriptions();
                let dropped = subscriptions
                    .get(&subscription)
                    .is_some_and(|inbox| inbox.send(items).is_err());
                if dropped {
                    subscriptions.remove(&subscription);
                }
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        !self.routes.closed.load(Ordering::SeqCst)
    }

    async fn request_with_id(&self, id: u64, request: Request) -> Reply {
        if !self.is_connected() {
            return Err(closed());
        }
        let frame = protocol::encode(&ClientFrame::Request { id, request })?;
        let (tx, rx) = oneshot::channel();
        self.routes.pending().insert(id, tx);
        if self.outgoing.send(frame).await.is_err() {
            self.routes.pending().remove(&id);
            return Err(closed());
        }
        rx.await.map_err(|_| closed())?
    }

    async fn request(&self, request: Request) -> Reply {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.request_with_id(id, request).await
    }
}

impl Drop for RemoteClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

fn unexpected(response: Response) -> RemoteError {
    RemoteError::new(
        RemoteErrorKind::Protocol,
        format!("unexpected response {response:?}"),
    )
}

#[async_trait]
impl RemoteStore for RemoteClient {
    fn is_signed_in(&self) -> bool {
        self.signed_in
    }

    async fn subscribe(&self, scope: &Scope) -> Result<ItemStream, RemoteError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CAPACITY);
        // Registered first: the snapshot may arrive before the response.
        self.routes.subscriptions().insert(id, open_inbox(tx));
        let request = Request::Subscribe {
            scope: scope.clone(),
        };
        match self.request_with_id(id, request).await {
            Ok(Response::Subscribed) => Ok(rx),
            Ok(other) => {
                self.routes.subscriptions().remove(&id);
                Err(unexpected(other))
            }
            Err(e) => {
                self.routes.subscriptions().remove(&id);
                Err(e)
            }
        }
    }

    async fn write_batch(&self, scope: &Scope, ops: Vec<WriteOp>) -> Result<(), RemoteError> {
        let request = Request::WriteBatch {
            scope: scope.clone(),
            ops,
        };
        match self.request(request).await? {
            Response::Done => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn write_item(&self, scope: &Scope, op: WriteOp) -> Result<(), RemoteError> {
        let request = Request::WriteItem {
            scope: scope.clone(),
            op,
        };
        match self.request(request).await? {
            Response::Done => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn upload_blob(
        &self,
        scope: &Scope,
        item_id: &str,
        bytes: Vec<u8>,
    ) -> Result<(), RemoteError> {
        let request = Request::UploadBlob {
            scope: scope.clone(),
            item_id: item_id.to_string(),
            bytes,
        };
        match self.request(request).await? {
            Response::Done => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn fetch_blob(&self, scope: &Scope, item_id: &str) -> Result<Vec<u8>, RemoteError> {
        let request = Request::FetchBlob {
            scope: scope.clone(),
            item_id: item_id.to_string(),
        };
        match self.request(request).await? {
            Response::Blob(bytes) => Ok(bytes),
            other => Err(unexpected(other)),
        }
    }

    async fn create_share_credential(
        &self,
        scope: &Scope,
        read_only: bool,
    ) -> Result<String, RemoteError> {
        let request = Request::CreateShare {
            scope: scope.clone(),
            read_only,
        };
        match self.request(request).await? {
            Response::Token(token) => Ok(token),
            other => Err(unexpected(other)),
        }
    }
}
