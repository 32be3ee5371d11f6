//! Delta ↔ CRDT conversion.
//!
//! ```text
//!   replica spans ──► materialize_delta ──► [insert, insert, ...] ──► editor
//!   editor delta  ──► apply_delta ──► RichText (insert / delete / format) ──► replica
//! ```
//!
//! Both directions are pure functions of their inputs: `materialize_delta`
//! only reads spans, `apply_delta` only talks to the [`RichText`] surface,
//! so any text CRDT exposing that surface can sit underneath.

use serde_json::Value;

use crate::delta::{attributes_equivalent, merge_attributes, Attributes, DeltaOp, Insert, Span};
use crate::CoreError;

/// One addressable unit of replica content as seen by the converter.
#[derive(Debug, Clone, PartialEq)]
pub struct Slot {
    /// Width in UTF-16 code units (2 for astral characters, 1 otherwise).
    pub width: u32,
    /// Non-text content; never receives attribute rewrites.
    pub embed: bool,
    pub attributes: Option<Attributes>,
}

/// Mutation surface of a rich-text replica, addressed in UTF-16 offsets.
pub trait RichText {
    /// Current length in UTF-16 code units.
    fn len(&self) -> u32;

    /// Slots covering `[index, index + len)`.
    fn slots(&self, index: u32, len: u32) -> Vec<Slot>;

    fn insert_text(
        &mut self,
        index: u32,
        text: &str,
        attributes: Option<&Attributes>,
    ) -> Result<(), CoreError>;

    fn insert_embed(
        &mut self,
        index: u32,
        embed: &Value,
        attributes: Option<&Attributes>,
    ) -> Result<(), CoreError>;

    fn delete(&mut self, index: u32, len: u32) -> Result<(), CoreError>;

    /// Replace the attributes of `[index, index + len)` with `attributes`.
    fn set_attributes(
        &mut self,
        index: u32,
        len: u32,
        attributes: &Attributes,
    ) -> Result<(), CoreError>;
}

/// Convert materialized spans into the minimal insert-only delta.
///
/// Consecutive text spans with equivalent attributes are concatenated into
/// one insert. Embeds are emitted on their own and never merged.
pub fn materialize_delta(spans: &[Span]) -> Vec<DeltaOp> {
    let mut ops = Vec::with_capacity(spans.len());
    let mut buffer = String::new();

    for (i, span) in spans.iter().enumerate() {
        match &span.insert {
            Insert::Text(s) => {
                buffer.push_str(s);

                let continues = spans.get(i + 1).is_some_and(|next| {
                    matches!(next.insert, Insert::Text(_))
                        && attributes_equivalent(span.attributes.as_ref(), next.attributes.as_ref())
                });
                if !continues {
                    ops.push(DeltaOp::Insert {
                        insert: Insert::Text(std::mem::take(&mut buffer)),
                        attributes: span.attributes.clone(),
                    });
                }
            }
            Insert::Embed(value) => ops.push(DeltaOp::Insert {
                insert: Insert::Embed(value.clone()),
                attributes: span.attributes.clone(),
            }),
        }
    }

    ops
}

/// Apply an editor delta to `text`, walking a running offset.
///
/// The delta is bounds-checked against the current length before anything
/// is mutated, so a rejected delta leaves `text` untouched.
pub fn apply_delta(text: &mut dyn RichText, delta: &[DeltaOp]) -> Result<(), CoreError> {
    check_bounds(delta, text.len())?;

    let mut offset = 0u32;
    for op in delta {
        offset = match op {
            DeltaOp::Retain { retain, attributes } => {
                apply_retain(text, offset, *retain, attributes.as_ref())?
            }
            DeltaOp::Delete { delete } => apply_delete(text, offset, *delete)?,
            DeltaOp::Insert { insert, attributes } => {
                apply_insert(text, offset, insert, attributes.as_ref())?
            }
        };
    }
    Ok(())
}

fn apply_retain(
    text: &mut dyn RichText,
    offset: u32,
    len: u32,
    attributes: Option<&Attributes>,
) -> Result<u32, CoreError> {
    if let Some(update) = attributes {
        let mut index = offset;
        for slot in text.slots(offset, len) {
            if !slot.embed && !attributes_equivalent(slot.attributes.as_ref(), Some(update)) {
                let merged = merge_attributes(slot.attributes.as_ref(), update);
                text.set_attributes(index, slot.width, &merged)?;
            }
            index += slot.width;
        }
    }
    Ok(offset + len)
}

fn apply_delete(text: &mut dyn RichText, offset: u32, len: u32) -> Result<u32, CoreError> {
    // The sequence shrinks under a fixed offset.
    if len > 0 {
        text.delete(offset, len)?;
    }
    Ok(offset)
}

fn apply_insert(
    text: &mut dyn RichText,
    offset: u32,
    insert: &Insert,
    attributes: Option<&Attributes>,
) -> Result<u32, CoreError> {
    match insert {
        Insert::Text(s) => {
            let mut index = offset;
            let mut buf = [0u8; 4];
            for ch in s.chars() {
                text.insert_text(index, ch.encode_utf8(&mut buf), attributes)?;
                index += ch.len_utf16() as u32;
            }
            Ok(index)
        }
        Insert::Embed(value) => {
            text.insert_embed(offset, value, attributes)?;
            Ok(offset + 1)
        }
    }
}

fn check_bounds(delta: &[DeltaOp], len: u32) -> Result<(), CoreError> {
    let mut offset = 0u32;
    let mut current = len;
    for op in delta {
        match op {
            DeltaOp::Retain { retain, .. } => offset = offset.saturating_add(*retain),
            DeltaOp::Delete { delete } => {
                if offset.saturating_add(*delete) > current {
                    return Err(CoreError::OutOfBounds {
                        offset: offset.saturating_add(*delete),
                        len: current,
                    });
                }
                current -= delete;
            }
            DeltaOp::Insert { insert, .. } => {
                if offset > current {
                    return Err(CoreError::OutOfBounds { offset, len: current });
                }
                offset += insert.len();
                current += insert.len();
            }
        }
        if offset > current {
            return Err(CoreError::OutOfBounds { offset, len: current });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Flat list of (content, attributes); one entry per char or embed.
    #[derive(Default)]
    struct ListText {
        items: Vec<(Insert, Option<Attributes>)>,
        rewrites: usize,
    }

    impl ListText {
        fn from_str(s: &str) -> Self {
            Self {
                items: s.chars().map(|c| (Insert::Text(c.to_string()), None)).collect(),
                rewrites: 0,
            }
        }

        fn spans(&self) -> Vec<Span> {
            self.items
                .iter()
                .map(|(insert, attributes)| Span {
                    insert: insert.clone(),
                    attributes: attributes.clone(),
                })
                .collect()
        }

        /// Item position for a UTF-16 offset.
        fn position(&self, index: u32) -> usize {
            let mut at = 0u32;
            for (i, (insert, _)) in self.items.iter().enumerate() {
                if at >= index {
                    return i;
                }
                at += insert.len();
            }
            self.items.len()
        }
    }

    impl RichText for ListText {
        fn len(&self) -> u32 {
            self.items.iter().map(|(i, _)| i.len()).sum()
        }

        fn slots(&self, index: u32, len: u32) -> Vec<Slot> {
            let start = self.position(index);
            let end = self.position(index + len);
            self.items[start..end]
                .iter()
                .map(|(insert, attributes)| Slot {
                    width: insert.len(),
                    embed: matches!(insert, Insert::Embed(_)),
                    attributes: attributes.clone(),
                })
                .collect()
        }

        fn insert_text(
            &mut self,
            index: u32,
            text: &str,
            attributes: Option<&Attributes>,
        ) -> Result<(), CoreError> {
            let at = self.position(index);
            self.items.insert(at, (Insert::from(text), attributes.cloned()));
            Ok(())
        }

        fn insert_embed(
            &mut self,
            index: u32,
            embed: &Value,
            attributes: Option<&Attributes>,
        ) -> Result<(), CoreError> {
            let at = self.position(index);
            self.items.insert(at, (Insert::Embed(embed.clone()), attributes.cloned()));
            Ok(())
        }

        fn delete(&mut self, index: u32, len: u32) -> Result<(), CoreError> {
            let start = self.position(index);
            let end = self.position(index + len);
            self.items.drain(start..end);
            Ok(())
        }

        fn set_attributes(
            &mut self,
            index: u32,
            len: u32,
            attributes: &Attributes,
        ) -> Result<(), CoreError> {
            let start = self.position(index);
            let end = self.position(index + len);
            for item in &mut self.items[start..end] {
                item.1 = Some(attributes.clone());
                self.rewrites += 1;
            }
            Ok(())
        }
    }

    fn attrs(value: Value) -> Attributes {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_materialize_merges_equal_text_spans() {
        let bold = attrs(json!({"bold": true}));
        let spans = vec![
            Span::text("a", None),
            Span::text("b", None),
            Span::text("c", Some(bold.clone())),
            Span::text("d", Some(bold.clone())),
            Span::text("\n", None),
        ];
        assert_eq!(
            materialize_delta(&spans),
            vec![
                DeltaOp::insert("ab"),
                DeltaOp::insert_with("cd", bold),
                DeltaOp::insert("\n"),
            ]
        );
    }

    #[test]
    fn test_materialize_keeps_embeds_separate() {
        let width = attrs(json!({"width": "40"}));
        let spans = vec![
            Span::text("a", None),
            Span::embed(json!({"image": "x.png"}), Some(width.clone())),
            Span::embed(json!({"image": "y.png"}), None),
            Span::text("b", None),
        ];
        assert_eq!(
            materialize_delta(&spans),
            vec![
                DeltaOp::insert("a"),
                DeltaOp::insert_with(Insert::Embed(json!({"image": "x.png"})), width),
                DeltaOp::embed(json!({"image": "y.png"})),
                DeltaOp::insert("b"),
            ]
        );
    }

    #[test]
    fn test_materialize_empty_vs_absent_attributes_not_merged() {
        let spans = vec![Span::text("a", None), Span::text("b", Some(Attributes::new()))];
        assert_eq!(
            materialize_delta(&spans),
            vec![
                DeltaOp::insert("a"),
                DeltaOp::insert_with("b", Attributes::new()),
            ]
        );
    }

    #[test]
    fn test_materialize_empty_replica() {
        assert!(materialize_delta(&[]).is_empty());
    }

    #[test]
    fn test_insert_into_empty_document() {
        let mut text = ListText::from_str("\n");
        apply_delta(&mut text, &[DeltaOp::insert("Hi")]).unwrap();
        assert_eq!(materialize_delta(&text.spans()), vec![DeltaOp::insert("Hi\n")]);
    }

    #[test]
    fn test_insert_after_retained_newline() {
        let bold = attrs(json!({"bold": true}));
        let mut text = ListText::from_str("\n");
        apply_delta(
            &mut text,
            &[DeltaOp::retain(1), DeltaOp::insert_with("X", bold.clone())],
        )
        .unwrap();
        assert_eq!(
            materialize_delta(&text.spans()),
            vec![DeltaOp::insert("\n"), DeltaOp::insert_with("X", bold)]
        );
    }

    #[test]
    fn test_delete_holds_offset() {
        let mut text = ListText::from_str("abcdef\n");
        apply_delta(
            &mut text,
            &[DeltaOp::retain(1), DeltaOp::delete(3), DeltaOp::insert("Z")],
        )
        .unwrap();
        assert_eq!(materialize_delta(&text.spans()), vec![DeltaOp::insert("aZef\n")]);
    }

    #[test]
    fn test_retain_merges_attributes() {
        let mut text = ListText::from_str("ab\n");
        text.items[0].1 = Some(attrs(json!({"italic": true})));

        apply_delta(&mut text, &[DeltaOp::retain_with(2, attrs(json!({"bold": true})))]).unwrap();

        assert_eq!(
            materialize_delta(&text.spans()),
            vec![
                DeltaOp::insert_with("a", attrs(json!({"bold": true, "italic": true}))),
                DeltaOp::insert_with("b", attrs(json!({"bold": true}))),
                DeltaOp::insert("\n"),
            ]
        );
    }

    #[test]
    fn test_retain_skips_equivalent_and_embeds() {
        let bold = attrs(json!({"bold": true}));
        let mut text = ListText::from_str("a");
        text.items[0].1 = Some(bold.clone());
        text.items.push((Insert::Embed(json!({"image": "x"})), None));

        apply_delta(&mut text, &[DeltaOp::retain_with(2, bold)]).unwrap();

        assert_eq!(text.rewrites, 0);
        assert_eq!(text.items[1].1, None);
    }

    #[test]
    fn test_retain_without_attributes_only_moves() {
        let mut text = ListText::from_str("ab");
        apply_delta(&mut text, &[DeltaOp::retain(2), DeltaOp::insert("c")]).unwrap();
        assert_eq!(text.rewrites, 0);
        assert_eq!(materialize_delta(&text.spans()), vec![DeltaOp::insert("abc")]);
    }

    #[test]
    fn test_insert_embed_advances_by_one() {
        let mut text = ListText::from_str("\n");
        apply_delta(
            &mut text,
            &[
                DeltaOp::embed(json!({"image": "x.png"})),
                DeltaOp::insert("a"),
            ],
        )
        .unwrap();
        assert_eq!(
            materialize_delta(&text.spans()),
            vec![
                DeltaOp::embed(json!({"image": "x.png"})),
                DeltaOp::insert("a\n"),
            ]
        );
    }

    #[test]
    fn test_astral_characters_use_utf16_offsets() {
        let mut text = ListText::from_str("\n");
        apply_delta(&mut text, &[DeltaOp::insert("😀b")]).unwrap();
        apply_delta(&mut text, &[DeltaOp::retain(2), DeltaOp::delete(1)]).unwrap();
        assert_eq!(materialize_delta(&text.spans()), vec![DeltaOp::insert("😀\n")]);
    }

    #[test]
    fn test_out_of_bounds_delta_rejected_untouched() {
        let mut text = ListText::from_str("ab");
        let err = apply_delta(&mut text, &[DeltaOp::insert("x"), DeltaOp::delete(5)]);
        assert!(matches!(err, Err(CoreError::OutOfBounds { .. })));
        assert_eq!(text.len(), 2);

        assert!(apply_delta(&mut text, &[DeltaOp::retain(3), DeltaOp::insert("x")]).is_err());
    }
}
