//! Binary request/response protocol between `RemoteClient` and `RemoteServer`.
//!
//! Every WebSocket binary message carries one bincode-encoded frame:
//! ```text
//! client ─► server   Hello { user }                      (first frame)
//!                    Request { id, request }
//! server ─► client   Response { id, result }              (one per request)
//!                    Items { subscription, items }        (pushed)
//! ```
//!
//! Request ids are chosen by the client and echoed back. A `Subscribe`
//! request's id doubles as its subscription id, so the client can route
//! pushed `Items` frames without another round-trip.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{RemoteError, RemoteItem, Scope, WriteOp};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    Subscribe { scope: Scope },
    WriteBatch { scope: Scope, ops: Vec<WriteOp> },
    WriteItem { scope: Scope, op: WriteOp },
    UploadBlob { scope: Scope, item_id: String, bytes: Vec<u8> },
    FetchBlob { scope: Scope, item_id: String },
    CreateShare { scope: Scope, read_only: bool },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    Subscribed,
    Done,
    Blob(Vec<u8>),
    Token(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientFrame {
    /// Identifies the connection; `None` stays signed out.
    Hello { user: Option<String> },
    Request { id: u64, request: Request },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerFrame {
    Response {
        id: u64,
        result: Result<Response, RemoteError>,
    },
    Items {
        subscription: u64,
        items: Vec<RemoteItem>,
    },
}

/// Wire codec errors.
#[derive(Debug, Clone, Error)]
pub enum ProtocolError {
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("deserialization error: {0}")]
    Deserialization(String),
}

impl From<ProtocolError> for RemoteError {
    fn from(e: ProtocolError) -> Self {
        RemoteError::new(super::RemoteErrorKind::Protocol, e.to_string())
    }
}

pub fn encode<T: Serialize>(frame: &T) -> Result<Vec<u8>, ProtocolError> {
    bincode::serde::encode_to_vec(frame, bincode::config::standard())
        .map_err(|e| ProtocolError::Serialization(e.to_string()))
}

pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    let (frame, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
    Ok(frame)
}
