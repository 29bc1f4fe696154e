//! The delta document: an ordered, append-only stream of typed edit
//! operations keyed by stable member index.
//!
//! Applying a document to the "before" value yields the "after". Member
//! indices are relative to the enclosing nesting scope; `begin_nested` /
//! `end_nested` pairs bracket operations against a nested record member.

use serde::{Deserialize, Serialize};

use dd_core::{MapKey, Value};

// ---------------------------------------------------------------------------
// DeltaOp
// ---------------------------------------------------------------------------

/// One typed edit operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DeltaOp {
    /// Replace the whole value (used when one side is null or the two
    /// sides are structurally incompatible).
    ReplaceObject { value: Value },
    /// Assign member `index` to `value`.
    SetMember { index: u32, value: Value },
    /// Open a scope of operations against the nested record at `index`.
    BeginNested { index: u32 },
    /// Close the innermost nested scope.
    EndNested,
    /// Ordered sequence member `index`: replace the element at `at`.
    SeqReplaceAt { index: u32, at: usize, value: Value },
    /// Ordered sequence member `index`: remove the element at `at`.
    SeqRemoveAt { index: u32, at: usize },
    /// Ordered sequence member `index`: insert `value` at `at`.
    SeqAddAt { index: u32, at: usize, value: Value },
    /// Dictionary member `index`: set `key` to `value`.
    MapSet { index: u32, key: MapKey, value: Value },
    /// Dictionary member `index`: remove `key`.
    MapRemove { index: u32, key: MapKey },
}

impl DeltaOp {
    /// Wire/diagnostic name of this operation.
    pub fn name(&self) -> &'static str {
        match self {
            DeltaOp::ReplaceObject { .. } => "replace_object",
            DeltaOp::SetMember { .. } => "set_member",
            DeltaOp::BeginNested { .. } => "begin_nested",
            DeltaOp::EndNested => "end_nested",
            DeltaOp::SeqReplaceAt { .. } => "seq_replace_at",
            DeltaOp::SeqRemoveAt { .. } => "seq_remove_at",
            DeltaOp::SeqAddAt { .. } => "seq_add_at",
            DeltaOp::MapSet { .. } => "map_set",
            DeltaOp::MapRemove { .. } => "map_remove",
        }
    }
}

// ---------------------------------------------------------------------------
// DeltaDocument
// ---------------------------------------------------------------------------

/// Append-only operation stream. Construction pushes; consumers only read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeltaDocument {
    ops: Vec<DeltaOp>,
}

impl DeltaDocument {
    pub fn new() -> DeltaDocument {
        DeltaDocument { ops: Vec::new() }
    }

    /// `true` when the document carries no operations — the two inputs were
    /// equal.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn ops(&self) -> &[DeltaOp] {
        &self.ops
    }

    /// Append one operation.
    pub fn push(&mut self, op: DeltaOp) {
        self.ops.push(op);
    }

    /// Append every operation of `other`, in order.
    pub fn extend(&mut self, other: DeltaDocument) {
        self.ops.extend(other.ops);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_document_is_empty() {
        let doc = DeltaDocument::new();
        assert!(doc.is_empty());
        assert_eq!(doc.len(), 0);
    }

    #[test]
    fn push_appends_in_order() {
        let mut doc = DeltaDocument::new();
        doc.push(DeltaOp::SetMember {
            index: 1,
            value: Value::str("b"),
        });
        doc.push(DeltaOp::SeqRemoveAt { index: 3, at: 1 });
        assert_eq!(doc.len(), 2);
        assert_eq!(doc.ops()[0].name(), "set_member");
        assert_eq!(doc.ops()[1].name(), "seq_remove_at");
    }

    #[test]
    fn op_serializes_with_tag() {
        let op = DeltaOp::MapSet {
            index: 2,
            key: MapKey::from("src"),
            value: Value::str("ci"),
        };
        let json = serde_json::to_string(&op).unwrap();
        assert!(json.contains("\"op\":\"map_set\""));
        let back: DeltaOp = serde_json::from_str(&json).unwrap();
        assert_eq!(op, back);
    }

    #[test]
    fn document_round_trips_json() {
        let mut doc = DeltaDocument::new();
        doc.push(DeltaOp::BeginNested { index: 2 });
        doc.push(DeltaOp::SetMember {
            index: 0,
            value: Value::I64(5),
        });
        doc.push(DeltaOp::EndNested);
        let json = serde_json::to_string(&doc).unwrap();
        let back: DeltaDocument = serde_json::from_str(&json).unwrap();
        assert_eq!(doc, back);
    }
}
