//! Difference result types — the structured output of the `diff` walker.

use serde::{Deserialize, Serialize};

use dd_core::Value;

// ---------------------------------------------------------------------------
// DifferenceKind
// ---------------------------------------------------------------------------

/// Disposition of a single path in the diff output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DifferenceKind {
    /// Present on both sides with different values.
    Changed,
    /// Present only on the right side (new element or key).
    Added,
    /// Present only on the left side (removed element or key).
    Removed,
    /// The runtime or declared type differs between the two sides.
    TypeChanged,
    /// Container shape (rank or per-dimension length) differs.
    LengthChanged,
}

// ---------------------------------------------------------------------------
// Difference
// ---------------------------------------------------------------------------

/// One path-qualified difference between two values of the same type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Difference {
    /// Dot/bracket path (`Customer.Address.Street`, `People[3].Name`);
    /// `"<root>"` for a top-level difference.
    pub path: String,
    pub kind: DifferenceKind,
    /// Left-side value at `path`; `None` for additions.
    pub left: Option<Value>,
    /// Right-side value at `path`; `None` for removals.
    pub right: Option<Value>,
}

impl Difference {
    pub fn changed(path: String, left: Value, right: Value) -> Difference {
        Difference {
            path,
            kind: DifferenceKind::Changed,
            left: Some(left),
            right: Some(right),
        }
    }

    pub fn added(path: String, right: Value) -> Difference {
        Difference {
            path,
            kind: DifferenceKind::Added,
            left: None,
            right: Some(right),
        }
    }

    pub fn removed(path: String, left: Value) -> Difference {
        Difference {
            path,
            kind: DifferenceKind::Removed,
            left: Some(left),
            right: None,
        }
    }

    pub fn type_changed(path: String, left: Value, right: Value) -> Difference {
        Difference {
            path,
            kind: DifferenceKind::TypeChanged,
            left: Some(left),
            right: Some(right),
        }
    }

    pub fn length_changed(path: String, left: Value, right: Value) -> Difference {
        Difference {
            path,
            kind: DifferenceKind::LengthChanged,
            left: Some(left),
            right: Some(right),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
