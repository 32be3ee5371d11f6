//! # veil-core — Rich-text replica and editor delta conversion
//!
//! Holds one document's text as a CRDT and translates between the CRDT and
//! the editor's delta format.
//!
//! ## Architecture
//!
//! ```text
//!   Editor delta ──► apply_delta ──► ┌──────────────┐ ──► change bytes
//!   [{retain},{insert}]              │ TextReplica  │     (to the sync
//!                                    │ (yrs Text)   │      engine)
//!   Editor delta ◄── materialize ◄── └──────┬───────┘
//!                                           ▲
//!                                  apply_changes (remote / replayed)
//! ```
//!
//! ## Modules
//!
//! - [`delta`] — Delta ops, attribute sets, equivalence
//! - [`convert`] — Span → delta materialization and delta application
//! - [`replica`] — `TextCrdt` capability and the yrs-backed `TextReplica`
//! - [`change`] — Identified change records

pub mod change;
pub mod convert;
pub mod delta;
pub mod replica;

pub use change::{Change, INITIAL_CHANGE_ID, NAME_ITEM_ID};
pub use convert::{apply_delta, materialize_delta, RichText, Slot};
pub use delta::{attributes_equivalent, Attributes, DeltaOp, Insert, Span};
pub use replica::{TextCrdt, TextReplica};

use thiserror::Error;

/// Errors raised by the replica and the converter.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("malformed change: {0}")]
    Decode(String),

    #[error("change could not be applied: {0}")]
    Apply(String),

    #[error("delta reaches offset {offset} beyond text length {len}")]
    OutOfBounds { offset: u32, len: u32 },
}

impl From<yrs::encoding::read::Error> for CoreError {
    fn from(err: yrs::encoding::read::Error) -> Self {
        CoreError::Decode(err.to_string())
    }
}
