//! Metadata stream: the document name.
//!
//! The first snapshot decides who owns the name: an empty snapshot means the
//! remote has never seen this document, so the local name is queued as an
//! `Insert` by the owner's session. Any later `DocName` item overwrites the
//! local name.

use veil_core::NAME_ITEM_ID;

use crate::document::Document;
use crate::outbound::OutboundChange;
use crate::remote::{ItemBody, RemoteItem, WriteCommand};

/// Apply a batch from the metadata stream. Returns the current name.
pub async fn handle_metadata_items(doc: &Document, items: Vec<RemoteItem>) -> Option<String> {
    if !doc.is_mounted() {
        return None;
    }

    let name = {
        let mut state = doc.state.lock().await;
        if items.is_empty() {
            // Shared sessions never claim the name; its owner does.
            if !doc.metadata_ready() && doc.id.is_some() {
                let name = state.name.clone();
                state.pending.push(OutboundChange::name(
                    doc.scopes.metadata.clone(),
                    name,
                    WriteCommand::Insert,
                ));
            }
        } else {
            let remote_name = items.into_iter().rev().find_map(|item| match item.body {
                ItemBody::Name(name) if item.item_id == NAME_ITEM_ID => Some(name),
                _ => None,
            });
            if let Some(name) = remote_name {
                if name != state.name {
                    doc.mirror_name(&name);
                    state.name = name;
                }
            }
        }
        state.name.clone()
    };

    doc.mark_metadata_ready();
    Some(name)
}
