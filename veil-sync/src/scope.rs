//! Scope naming shared by the local and remote stores.
//!
//! A document `d` owns three scopes: `d_changes` (content changes),
//! `d_metadata` (the name) and `d_share-tokens` (share credentials).
//! `all-share-tokens` maps document ids to their top-level share token.

use uuid::Uuid;

pub const CHANGES_SUFFIX: &str = "_changes";
pub const METADATA_SUFFIX: &str = "_metadata";
pub const SHARE_TOKENS_SUFFIX: &str = "_share-tokens";

/// Per-user scope listing every shared document's token.
pub const ALL_SHARE_TOKENS: &str = "all-share-tokens";

pub fn changes_scope(doc_id: &Uuid) -> String {
    format!("{doc_id}{CHANGES_SUFFIX}")
}

pub fn metadata_scope(doc_id: &Uuid) -> String {
    format!("{doc_id}{METADATA_SUFFIX}")
}

pub fn share_tokens_scope(doc_id: &Uuid) -> String {
    format!("{doc_id}{SHARE_TOKENS_SUFFIX}")
}

/// Document id of a metadata scope name, if it is one.
pub fn doc_id_of_metadata_scope(scope: &str) -> Option<Uuid> {
    scope
        .strip_suffix(METADATA_SUFFIX)
        .and_then(|id| Uuid::parse_str(id).ok())
}
