//! Dot/bracket member paths for diff and validation output.
//!
//! Paths look like `Customer.Address.Street`, `People[3].Name`, or
//! `Tags["env"]`. The builder keeps one reusable buffer pre-sized to 256
//! bytes, so appends below that length never reallocate; longer paths grow
//! to the heap transparently.

use std::fmt::Write as _;

use crate::value::MapKey;

const INLINE_CAPACITY: usize = 256;

/// Incrementally built member path with push/pop scoping.
pub struct PathBuilder {
    buf: String,
    marks: Vec<usize>,
}

impl PathBuilder {
    pub fn new() -> PathBuilder {
        PathBuilder {
            buf: String::with_capacity(INLINE_CAPACITY),
            marks: Vec::new(),
        }
    }

    /// Append a member segment (`.Name`, or `Name` at the root).
    pub fn push_member(&mut self, name: &str) {
        self.marks.push(self.buf.len());
        if !self.buf.is_empty() {
            self.buf.push('.');
        }
        self.buf.push_str(name);
    }

    /// Append a sequence/array index segment (`[3]`).
    pub fn push_index(&mut self, index: usize) {
        self.marks.push(self.buf.len());
        let _ = write!(self.buf, "[{index}]");
    }

    /// Append a dictionary key segment (`["env"]` or `[42]`).
    pub fn push_key(&mut self, key: &MapKey) {
        self.marks.push(self.buf.len());
        let _ = write!(self.buf, "[{key}]");
    }

    /// Remove the most recently pushed segment.
    pub fn pop(&mut self) {
        if let Some(mark) = self.marks.pop() {
            self.buf.truncate(mark);
        }
    }

    pub fn as_str(&self) -> &str {
        &self.buf
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Current path, or `"<root>"` when no segment has been pushed (a
    /// top-level difference).
    pub fn render(&self) -> String {
        if self.buf.is_empty() {
            "<root>".to_string()
        } else {
            self.buf.clone()
        }
    }
}

impl Default for PathBuilder {
    fn default() -> PathBuilder {
        PathBuilder::new()
    }
}
