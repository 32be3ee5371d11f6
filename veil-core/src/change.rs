//! Identified change records.
//!
//! Every change the replica produces is stored locally and remotely under a
//! unique id. The change that creates a document's initial text uses the
//! fixed id [`INITIAL_CHANGE_ID`] so that every device agrees on it.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Id of the change that creates a document's initial newline.
pub const INITIAL_CHANGE_ID: &str = "TextDoc";

/// Id of the item holding a document's name.
pub const NAME_ITEM_ID: &str = "DocName";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub id: String,
    pub payload: Vec<u8>,
}

impl Change {
    /// A change with a fresh random id.
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            payload,
        }
    }

    pub fn with_id(id: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            payload,
        }
    }

    pub fn initial(payload: Vec<u8>) -> Self {
        Self::with_id(INITIAL_CHANGE_ID, payload)
    }

    pub fn is_initial(&self) -> bool {
        self.id == INITIAL_CHANGE_ID
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_changes_get_distinct_ids() {
        let a = Change::new(vec![1]);
        let b = Change::new(vec![1]);
        assert_ne!(a.id, b.id);
        assert!(!a.is_initial());
    }

    #[test]
    fn test_initial_change_id() {
        let change = Change::initial(vec![0]);
        assert_eq!(change.id, "TextDoc");
        assert!(change.is_initial());
    }
}
