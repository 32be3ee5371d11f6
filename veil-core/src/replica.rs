//! Text replica backed by a yrs `Doc`.
//!
//! The replica holds one `Text` named `content` whose characters carry
//! per-character style attributes. Changes are yrs v1 updates: applying
//! them is commutative and idempotent, which gives order-independent
//! materialization for any set of applied changes.
//!
//! Concurrent inserts at the same offset are ordered by yrs' integration
//! rule (origin left/right, then client id), so every replica resolves the
//! tie identically.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Number, Value};
use yrs::types::text::{Diff, YChange};
use yrs::types::Attrs;
use yrs::updates::decoder::Decode;
use yrs::{
    Any, Doc, OffsetKind, Options, Out, ReadTxn, StateVector, Text, TextRef, Transact,
    TransactionMut, Update,
};

use crate::change::Change;
use crate::convert::{self, RichText, Slot};
use crate::delta::{Attributes, DeltaOp, Insert, Span};
use crate::CoreError;

/// Name of the shared text inside the yrs document.
const TEXT_NAME: &str = "content";

/// The CRDT capability the sync engine depends on.
///
/// Any causal-merge text CRDT with commutative change application and span
/// materialization can implement it.
pub trait TextCrdt: Sized {
    /// Opaque causal position used to diff two states.
    type Version;

    /// Empty replica.
    fn init() -> Self;

    /// Apply remote or replayed changes.
    fn apply_changes(&mut self, changes: &[&[u8]]) -> Result<(), CoreError>;

    /// Run `mutator` against the replica and return the change it produced.
    fn change<F>(&mut self, mutator: F) -> Result<Vec<u8>, CoreError>
    where
        F: FnOnce(&mut dyn RichText) -> Result<(), CoreError>;

    fn version(&self) -> Self::Version;

    /// Everything applied since `since`, encoded as one change.
    fn diff_changes(&self, since: &Self::Version) -> Vec<u8>;

    fn materialize_spans(&self) -> Vec<Span>;
}

/// yrs-backed rich text replica.
pub struct TextReplica {
    doc: Doc,
    text: TextRef,
}

impl TextReplica {
    pub fn new() -> Self {
        let doc = Doc::with_options(Options {
            offset_kind: OffsetKind::Utf16,
            ..Options::default()
        });
        let text = doc.get_or_insert_text(TEXT_NAME);
        Self { doc, text }
    }

    /// Fresh document text: a single newline, as every editor document ends
    /// with one. Returns the replica and the change that created it.
    pub fn new_document() -> Result<(Self, Change), CoreError> {
        let mut replica = Self::new();
        let payload = replica.change(|text| text.insert_text(0, "\n", None))?;
        Ok((replica, Change::initial(payload)))
    }

    /// Rebuild a replica from stored changes in any order.
    pub fn from_changes<'a, I>(changes: I) -> Result<Self, CoreError>
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let mut replica = Self::new();
        let changes: Vec<&[u8]> = changes.into_iter().collect();
        replica.apply_changes(&changes)?;
        Ok(replica)
    }

    /// Apply an editor delta; returns the produced change, or `None` when
    /// the delta did not touch the replica.
    pub fn apply_delta(&mut self, delta: &[DeltaOp]) -> Result<Option<Vec<u8>>, CoreError> {
        let payload = self.change(|text| convert::apply_delta(text, delta))?;
        // Deletes only grow the delete set, so the state vector alone can't
        // tell a pure delete from a no-op.
        if Update::decode_v1(&payload)?.is_empty() {
            return Ok(None);
        }
        Ok(Some(payload))
    }

    /// Materialize the replica as an editor delta.
    pub fn to_delta(&self) -> Vec<DeltaOp> {
        convert::materialize_delta(&self.materialize_spans())
    }

    /// Plain text, embeds skipped.
    pub fn text(&self) -> String {
        self.materialize_spans()
            .iter()
            .filter_map(|span| span.insert.as_text())
            .collect()
    }

    pub fn len(&self) -> u32 {
        let txn = self.doc.transact();
        self.text.len(&txn)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Full state as a single change.
    pub fn encode_state(&self) -> Vec<u8> {
        self.diff_changes(&StateVector::default())
    }
}

impl Default for TextReplica {
    fn default() -> Self {
        Self::new()
    }
}

impl TextCrdt for TextReplica {
    type Version = StateVector;

    fn init() -> Self {
        Self::new()
    }

    fn apply_changes(&mut self, changes: &[&[u8]]) -> Result<(), CoreError> {
        let mut txn = self.doc.transact_mut();
        for bytes in changes {
            let update = Update::decode_v1(bytes)?;
            txn.apply_update(update)
                .map_err(|e| CoreError::Apply(e.to_string()))?;
        }
        Ok(())
    }

    fn change<F>(&mut self, mutator: F) -> Result<Vec<u8>, CoreError>
    where
        F: FnOnce(&mut dyn RichText) -> Result<(), CoreError>,
    {
        let mut txn = self.doc.transact_mut();
        let mut surface = YrsText {
            text: &self.text,
            txn: &mut txn,
        };
        mutator(&mut surface)?;
        Ok(txn.encode_update_v1())
    }

    fn version(&self) -> StateVector {
        self.doc.transact().state_vector()
    }

    fn diff_changes(&self, since: &StateVector) -> Vec<u8> {
        self.doc.transact().encode_state_as_update_v1(since)
    }

    fn materialize_spans(&self) -> Vec<Span> {
        let txn = self.doc.transact();
        spans_of(&self.text, &txn)
    }
}

/// `RichText` over an open write transaction.
struct YrsText<'a, 'doc> {
    text: &'a TextRef,
    txn: &'a mut TransactionMut<'doc>,
}

impl YrsText<'_, '_> {
    fn ensure_within(&self, index: u32, len: u32) -> Result<(), CoreError> {
        let current = self.text.len(&*self.txn);
        if index.saturating_add(len) > current {
            return Err(CoreError::OutOfBounds {
                offset: index.saturating_add(len),
                len: current,
            });
        }
        Ok(())
    }
}

impl RichText for YrsText<'_, '_> {
    fn len(&self) -> u32 {
        self.text.len(&*self.txn)
    }

    fn slots(&self, index: u32, len: u32) -> Vec<Slot> {
        let end = index.saturating_add(len);
        let mut slots = Vec::new();
        let mut at = 0u32;

        for span in spans_of(self.text, &*self.txn) {
            if at >= end {
                break;
            }
            match &span.insert {
                Insert::Text(s) => {
                    for ch in s.chars() {
                        let width = ch.len_utf16() as u32;
                        if at >= index && at < end {
                            slots.push(Slot {
                                width,
                                embed: false,
                                attributes: span.attributes.clone(),
                            });
                        }
                        at += width;
                    }
                }
                Insert::Embed(_) => {
                    if at >= index && at < end {
                        slots.push(Slot {
                            width: 1,
                            embed: true,
                            attributes: span.attributes.clone(),
                        });
                    }
                    at += 1;
                }
            }
        }
        slots
    }

    fn insert_text(
        &mut self,
        index: u32,
        text: &str,
        attributes: Option<&Attributes>,
    ) -> Result<(), CoreError> {
        self.ensure_within(index, 0)?;
        // Explicit (possibly empty) attributes: the inserted text must not
        // inherit the formatting around `index`.
        self.text
            .insert_with_attributes(self.txn, index, text, to_attrs(attributes));
        Ok(())
    }

    fn insert_embed(
        &mut self,
        index: u32,
        embed: &Value,
        attributes: Option<&Attributes>,
    ) -> Result<(), CoreError> {
        self.ensure_within(index, 0)?;
        self.text
            .insert_embed_with_attributes(self.txn, index, to_any(embed), to_attrs(attributes));
        Ok(())
    }

    fn delete(&mut self, index: u32, len: u32) -> Result<(), CoreError> {
        self.ensure_within(index, len)?;
        self.text.remove_range(self.txn, index, len);
        Ok(())
    }

    fn set_attributes(
        &mut self,
        index: u32,
        len: u32,
        attributes: &Attributes,
    ) -> Result<(), CoreError> {
        self.ensure_within(index, len)?;
        self.text
            .format(self.txn, index, len, to_attrs(Some(attributes)));
        Ok(())
    }
}

/// Walk the yrs diff of `text` into spans.
///
/// yrs has no notion of an empty-but-present attribute set, so runs without
/// formatting always come back as `None`.
fn spans_of<T: ReadTxn>(text: &TextRef, txn: &T) -> Vec<Span> {
    let diffs: Vec<Diff<YChange>> = text.diff(txn, YChange::identity);
    let mut spans = Vec::with_capacity(diffs.len());

    for diff in diffs {
        let attributes = diff
            .attributes
            .as_deref()
            .filter(|attrs| !attrs.is_empty())
            .map(from_attrs);
        match diff.insert {
            Out::Any(Any::String(s)) => spans.push(Span::text(s.to_string(), attributes)),
            Out::Any(any) => spans.push(Span::embed(from_any(&any), attributes)),
            _ => log::warn!("skipping embedded shared type in text content"),
        }
    }
    spans
}

fn to_attrs(attributes: Option<&Attributes>) -> Attrs {
    attributes
        .map(|attrs| {
            attrs
                .iter()
                .map(|(k, v)| (Arc::<str>::from(k.as_str()), to_any(v)))
                .collect()
        })
        .unwrap_or_default()
}

fn from_attrs(attrs: &Attrs) -> Attributes {
    attrs
        .iter()
        .map(|(k, v)| (k.to_string(), from_any(v)))
        .collect()
}

fn to_any(value: &Value) -> Any {
    match value {
        Value::Null => Any::Null,
        Value::Bool(b) => Any::Bool(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Any::BigInt(i),
            None => Any::Number(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => Any::String(Arc::from(s.as_str())),
        Value::Array(items) => Any::Array(items.iter().map(to_any).collect::<Vec<_>>().into()),
        Value::Object(map) => Any::Map(Arc::new(
            map.iter()
                .map(|(k, v)| (k.clone(), to_any(v)))
                .collect::<HashMap<_, _>>(),
        )),
    }
}

fn from_any(any: &Any) -> Value {
    match any {
        Any::Null | Any::Undefined => Value::Null,
        Any::Bool(b) => Value::Bool(*b),
        Any::Number(n) => Number::from_f64(*n).map(Value::Number).unwrap_or(Value::Null),
        Any::BigInt(i) => Value::Number((*i).into()),
        Any::String(s) => Value::String(s.to_string()),
        Any::Buffer(bytes) => Value::Array(bytes.iter().map(|b| Value::from(*b)).collect()),
        Any::Array(items) => Value::Array(items.iter().map(from_any).collect()),
        Any::Map(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), from_any(v)))
                .collect::<Map<_, _>>(),
        ),
    }
}
