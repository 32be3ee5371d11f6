//! Sharing a document with other users.
//!
//! ```text
//! all-share-tokens    {docId}          → ShareToken(t)
//! {docId}_share-tokens  {docId}_changes  → ChangesShareToken(c)
//!                       {docId}_metadata → MetadataShareToken(m)
//! ```
//!
//! `t` grants access to `{docId}_share-tokens`, whose items hand out the
//! credentials of the two document streams. A recipient opens the document
//! with `t` alone.

use thiserror::Error;
use uuid::Uuid;

use crate::remote::{snapshot, ItemBody, RemoteError, RemoteStore, Scope, WriteOp};
use crate::scope::{changes_scope, metadata_scope, share_tokens_scope, ALL_SHARE_TOKENS};

/// Sharing failures, shown to the user.
#[derive(Debug, Clone, Error)]
pub enum ShareError {
    #[error("sign in to share documents")]
    SignInRequired,
    #[error("sharing failed: {0}")]
    Remote(#[from] RemoteError),
}

/// Return the share token of `doc_id`, creating credentials on first use.
pub async fn share_document(remote: &dyn RemoteStore, doc_id: &Uuid) -> Result<String, ShareError> {
    if !remote.is_signed_in() {
        return Err(ShareError::SignInRequired);
    }

    let all_tokens = Scope::database(ALL_SHARE_TOKENS);
    let doc_key = doc_id.to_string();
    let existing = snapshot(remote, &all_tokens)
        .await?
        .into_iter()
        .find_map(|item| match item.body {
            ItemBody::ShareToken(token) if item.item_id == doc_key => Some(token),
            _ => None,
        });
    if let Some(token) = existing {
        return Ok(token);
    }

    let tokens_scope = Scope::database(share_tokens_scope(doc_id));
    let changes = Scope::database(changes_scope(doc_id));
    let metadata = Scope::database(metadata_scope(doc_id));
    for scope in [&tokens_scope, &changes, &metadata] {
        snapshot(remote, scope).await?;
    }

    let changes_token = remote.create_share_credential(&changes, false).await?;
    let metadata_token = remote.create_share_credential(&metadata, false).await?;
    let share_token = remote.create_share_credential(&tokens_scope, false).await?;

    let entry = WriteOp::insert(doc_key, ItemBody::ShareToken(share_token.clone()));
    if let Err(e) = remote.write_item(&all_tokens, entry.clone()).await {
        log::debug!("Share token insert failed ({e}), updating");
        remote.write_item(&all_tokens, as_update(entry)).await?;
    }

    let ops = vec![
        WriteOp::insert(changes_scope(doc_id), ItemBody::ChangesShareToken(changes_token)),
        WriteOp::insert(metadata_scope(doc_id), ItemBody::MetadataShareToken(metadata_token)),
    ];
    if let Err(e) = remote.write_batch(&tokens_scope, ops.clone()).await {
        log::debug!("Stream credential insert failed ({e}), updating");
        remote
            .write_batch(&tokens_scope, ops.into_iter().map(as_update).collect())
            .await?;
    }

    log::info!("Shared document {doc_id}");
    Ok(share_token)
}

fn as_update(op: WriteOp) -> WriteOp {
    WriteOp::update(op.item_id, op.body)
}

/// Link handed to a recipient.
pub fn share_link(origin: &str, token: &str) -> String {
    format!("{origin}#share={}", token.replace('\\', "\\\\"))
}

/// Credentials of a shared document's two streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamCredentials {
    pub changes: String,
    pub metadata: String,
}

/// Read the stream credentials behind a share token. `None` when the token's
/// scope does not hold both.
pub async fn resolve_share_token(
    remote: &dyn RemoteStore,
    token: &str,
) -> Result<Option<StreamCredentials>, RemoteError> {
    let mut changes = None;
    let mut metadata = None;
    for item in snapshot(remote, &Scope::share(token)).await? {
        match item.body {
            ItemBody::ChangesShareToken(t) => changes = Some(t),
            ItemBody::MetadataShareToken(t) => metadata = Some(t),
            _ => {}
        }
    }
    Ok(changes
        .zip(metadata)
        .map(|(changes, metadata)| StreamCredentials { changes, metadata }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::hub::Hub;

    #[test]
    fn test_share_link_escapes_backslashes() {
        assert_eq!(share_link("https://veil.app", "abc"), "https://veil.app#share=abc");
        assert_eq!(share_link("https://veil.app", r"a\b"), r"https://veil.app#share=a\\b");
    }

    #[tokio::test]
    async fn test_share_requires_sign_in() {
        let hub = Hub::new();
        let err = share_document(&hub.connect(None), &Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ShareError::SignInRequired));
    }

    #[tokio::test]
    async fn test_share_is_stable_and_resolvable() {
        let hub = Hub::new();
        let alice = hub.connect(Some("alice"));
        let doc_id = Uuid::new_v4();

        let token = share_document(&alice, &doc_id).await.unwrap();
        assert_eq!(share_document(&alice, &doc_id).await.unwrap(), token);
        assert_eq!(hub.items("alice", ALL_SHARE_TOKENS).len(), 1);

        let bob = hub.connect(Some("bob"));
        let credentials = resolve_share_token(&bob, &token).await.unwrap().unwrap();
        assert_ne!(credentials.changes, credentials.metadata);

        // The credentials open Alice's streams.
        let _ = snapshot(&bob, &Scope::share(credentials.changes)).await.unwrap();
    }

    #[tokio::test]
    async fn test_resolve_unrelated_token() {
        let hub = Hub::new();
        let alice = hub.connect(Some("alice"));
        let scope = Scope::database("notes");
        snapshot(&alice, &scope).await.unwrap();
        let token = alice.create_share_credential(&scope, true).await.unwrap();

        assert!(resolve_share_token(&alice, &token).await.unwrap().is_none());
    }
}
