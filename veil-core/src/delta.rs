//! Editor delta operations.
//!
//! The rich-text editor speaks in deltas: a list of `insert`, `retain` and
//! `delete` instructions walked left to right against the current text.
//! The JSON shape matches the editor's own:
//!
//! ```text
//! [{"retain": 1}, {"insert": "X", "attributes": {"bold": true}}, {"delete": 2}]
//! ```
//!
//! Lengths are counted in UTF-16 code units, the unit the editor uses for
//! offsets. An embed (image, formula, video, ...) always has length 1.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Style attributes attached to a character or an op (`bold`, `color`, ...).
pub type Attributes = BTreeMap<String, Value>;

/// Content carried by an `insert` op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Insert {
    /// Plain text.
    Text(String),
    /// Embedded object, e.g. `{"image": "https://..."}`.
    Embed(Value),
}

impl Insert {
    /// Length in UTF-16 code units.
    pub fn len(&self) -> u32 {
        match self {
            Insert::Text(s) => utf16_len(s),
            Insert::Embed(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Insert::Text(s) => Some(s),
            Insert::Embed(_) => None,
        }
    }
}

impl From<&str> for Insert {
    fn from(s: &str) -> Self {
        Insert::Text(s.to_string())
    }
}

impl From<String> for Insert {
    fn from(s: String) -> Self {
        Insert::Text(s)
    }
}

/// One delta instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeltaOp {
    Insert {
        insert: Insert,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attributes: Option<Attributes>,
    },
    Retain {
        retain: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attributes: Option<Attributes>,
    },
    Delete {
        delete: u32,
    },
}

impl DeltaOp {
    pub fn insert(content: impl Into<Insert>) -> Self {
        DeltaOp::Insert {
            insert: content.into(),
            attributes: None,
        }
    }

    pub fn insert_with(content: impl Into<Insert>, attributes: Attributes) -> Self {
        DeltaOp::Insert {
            insert: content.into(),
            attributes: Some(attributes),
        }
    }

    pub fn embed(value: Value) -> Self {
        DeltaOp::Insert {
            insert: Insert::Embed(value),
            attributes: None,
        }
    }

    pub fn retain(len: u32) -> Self {
        DeltaOp::Retain {
            retain: len,
            attributes: None,
        }
    }

    pub fn retain_with(len: u32, attributes: Attributes) -> Self {
        DeltaOp::Retain {
            retain: len,
            attributes: Some(attributes),
        }
    }

    pub fn delete(len: u32) -> Self {
        DeltaOp::Delete { delete: len }
    }

    pub fn attributes(&self) -> Option<&Attributes> {
        match self {
            DeltaOp::Insert { attributes, .. } | DeltaOp::Retain { attributes, .. } => {
                attributes.as_ref()
            }
            DeltaOp::Delete { .. } => None,
        }
    }
}

/// A maximal run of replica content sharing one attribute set.
///
/// Produced by materializing a replica; the input of
/// [`materialize_delta`](crate::convert::materialize_delta).
#[derive(Debug, Clone, PartialEq)]
pub struct Span {
    pub insert: Insert,
    pub attributes: Option<Attributes>,
}

impl Span {
    pub fn text(s: impl Into<String>, attributes: Option<Attributes>) -> Self {
        Self {
            insert: Insert::Text(s.into()),
            attributes,
        }
    }

    pub fn embed(value: Value, attributes: Option<Attributes>) -> Self {
        Self {
            insert: Insert::Embed(value),
            attributes,
        }
    }
}

/// Strict attribute-set equality.
///
/// Two absent sets are equal; an absent set never equals a present one,
/// even an empty one. Present sets are equal when they hold the same keys
/// with equal values, regardless of insertion order.
pub fn attributes_equivalent(a: Option<&Attributes>, b: Option<&Attributes>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a.len() == b.len() && a.iter().all(|(k, v)| b.get(k) == Some(v)),
        _ => false,
    }
}

/// `base` overlaid with `update`; keys in `update` win.
pub fn merge_attributes(base: Option<&Attributes>, update: &Attributes) -> Attributes {
    let mut merged = base.cloned().unwrap_or_default();
    for (key, value) in update {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// Length of `s` in UTF-16 code units.
pub fn utf16_len(s: &str) -> u32 {
    s.encode_utf16().count() as u32
}

/// Concatenated text of a delta made only of inserts; embeds are skipped.
pub fn plain_text(ops: &[DeltaOp]) -> String {
    ops.iter()
        .filter_map(|op| match op {
            DeltaOp::Insert {
                insert: Insert::Text(s),
                ..
            } => Some(s.as_str()),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(value: Value) -> Attributes {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_parse_editor_json() {
        let ops: Vec<DeltaOp> = serde_json::from_value(json!([
            {"retain": 1},
            {"insert": "X", "attributes": {"bold": true}},
            {"delete": 2},
            {"insert": {"image": "cat.png"}},
            {"retain": 3, "attributes": {"italic": true}},
        ]))
        .unwrap();

        assert_eq!(ops[0], DeltaOp::retain(1));
        assert_eq!(ops[1], DeltaOp::insert_with("X", attrs(json!({"bold": true}))));
        assert_eq!(ops[2], DeltaOp::delete(2));
        assert_eq!(ops[3], DeltaOp::embed(json!({"image": "cat.png"})));
        assert_eq!(ops[4], DeltaOp::retain_with(3, attrs(json!({"italic": true}))));
    }

    #[test]
    fn test_serialize_omits_missing_attributes() {
        let encoded = serde_json::to_value(vec![DeltaOp::insert("Hi")]).unwrap();
        assert_eq!(encoded, json!([{"insert": "Hi"}]));
    }

    #[test]
    fn test_attributes_equivalent_absent_vs_empty() {
        let empty = Attributes::new();
        assert!(attributes_equivalent(None, None));
        assert!(attributes_equivalent(Some(&empty), Some(&empty)));
        assert!(!attributes_equivalent(None, Some(&empty)));
        assert!(!attributes_equivalent(Some(&empty), None));
    }

    #[test]
    fn test_attributes_equivalent_order_independent() {
        let a = attrs(json!({"bold": true, "color": "#f00"}));
        let mut b = Attributes::new();
        b.insert("color".into(), json!("#f00"));
        b.insert("bold".into(), json!(true));
        assert!(attributes_equivalent(Some(&a), Some(&b)));

        b.insert("italic".into(), json!(true));
        assert!(!attributes_equivalent(Some(&a), Some(&b)));
    }

    #[test]
    fn test_merge_attributes_update_wins() {
        let base = attrs(json!({"bold": true, "color": "red"}));
        let merged = merge_attributes(Some(&base), &attrs(json!({"color": "blue"})));
        assert_eq!(merged, attrs(json!({"bold": true, "color": "blue"})));
    }

    #[test]
    fn test_utf16_lengths() {
        assert_eq!(Insert::from("abc").len(), 3);
        assert_eq!(Insert::from("é").len(), 1);
        assert_eq!(Insert::from("😀").len(), 2);
        assert_eq!(Insert::Embed(json!({"image": "x"})).len(), 1);
    }

    #[test]
    fn test_plain_text_skips_embeds() {
        let ops = vec![
            DeltaOp::insert("a"),
            DeltaOp::embed(json!({"image": "x"})),
            DeltaOp::insert("b\n"),
        ];
        assert_eq!(plain_text(&ops), "ab\n");
    }
}
