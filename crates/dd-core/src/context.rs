//! Per-invocation comparison context.
//!
//! A [`CompareContext`] is created per comparison, diff, or delta
//! invocation. It is not safe for concurrent use; callers use one per
//! thread or per invocation.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

// ---------------------------------------------------------------------------
// Culture / Clock
// ---------------------------------------------------------------------------

/// Culture used for culture-aware formatting. Comparison itself is always
/// ordinal unless a member names a custom comparer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Culture {
    #[default]
    Invariant,
    Named(String),
}

/// Time source for validation-style checks layered outside this core.
#[derive(Debug, Clone)]
pub enum Clock {
    System,
    Fixed(DateTime<Utc>),
}

impl Clock {
    pub fn now(&self) -> DateTime<Utc> {
        match self {
            Clock::System => Utc::now(),
            Clock::Fixed(at) => *at,
        }
    }
}

// ---------------------------------------------------------------------------
// CompareContext
// ---------------------------------------------------------------------------

/// State carried through one comparison invocation.
pub struct CompareContext {
    /// Identity pairs already being (or fully) compared; drives cycle
    /// termination for types with cycle tracking enabled.
    visited: HashSet<(usize, usize)>,
    /// Dirty-tracked delta emission re-checks each flagged member against
    /// the baseline before emitting when set.
    pub validate_dirty_on_emit: bool,
    pub culture: Culture,
    pub clock: Clock,
}

impl CompareContext {
    pub fn new() -> CompareContext {
        CompareContext {
            visited: HashSet::new(),
            validate_dirty_on_emit: false,
            culture: Culture::Invariant,
            clock: Clock::System,
        }
    }

    /// A context with dirty-validation enabled.
    pub fn validating() -> CompareContext {
        let mut ctx = CompareContext::new();
        ctx.validate_dirty_on_emit = true;
        ctx
    }

    /// Record the identity pair `(left, right)` before recursing into it.
    ///
    /// Returns `false` when the pair is already present — the caller treats
    /// that re-encounter as equal-so-far. Pairs stay recorded for the whole
    /// invocation, which also deduplicates shared-subgraph work.
    pub fn enter(&mut self, left: usize, right: usize) -> bool {
        self.visited.insert((left, right))
    }

    /// Number of identity pairs recorded so far.
    pub fn visited_pairs(&self) -> usize {
        self.visited.len()
    }
}

impl Default for CompareContext {
    fn default() -> CompareContext {
        CompareContext::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn enter_reports_re_encounters() {
        let mut ctx = CompareContext::new();
        assert!(ctx.enter(1, 2));
        assert!(!ctx.enter(1, 2));
        // The mirrored pair is distinct.
        assert!(ctx.enter(2, 1));
        assert_eq!(ctx.visited_pairs(), 2);
    }

    #[test]
    fn fixed_clock_returns_its_instant() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        let clock = Clock::Fixed(at);
        assert_eq!(clock.now(), at);
    }

    #[test]
    fn default_culture_is_invariant() {
        let ctx = CompareContext::default();
        assert_eq!(ctx.culture, Culture::Invariant);
        assert!(!ctx.validate_dirty_on_emit);
        assert!(CompareContext::validating().validate_dirty_on_emit);
    }
}
