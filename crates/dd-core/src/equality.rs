//! String comparers and scalar equality helpers shared by the comparison
//! and delta engines. The two engines must never disagree on "are these
//! equal?", so both route every scalar decision through this module.

use std::fmt;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// StringComparer
// ---------------------------------------------------------------------------

/// Equality predicate for string-like values.
///
/// The default is ordinal (exact code-unit) comparison; `null` is never
/// equal to empty because absence is modelled as `Value::Null`, a different
/// variant. Custom comparers are infallible functions — a panic inside one
/// propagates to the caller unswallowed.
#[derive(Clone)]
pub enum StringComparer {
    /// Exact comparison (the default).
    Ordinal,
    /// Unicode case-insensitive comparison under the invariant culture.
    OrdinalIgnoreCase,
    /// User-registered predicate.
    Custom(Arc<dyn Fn(&str, &str) -> bool + Send + Sync>),
}

impl StringComparer {
    pub fn string_eq(&self, a: &str, b: &str) -> bool {
        match self {
            StringComparer::Ordinal => a == b,
            StringComparer::OrdinalIgnoreCase => {
                a == b || a.to_lowercase() == b.to_lowercase()
            }
            StringComparer::Custom(f) => f(a, b),
        }
    }
}

impl fmt::Debug for StringComparer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StringComparer::Ordinal => write!(f, "Ordinal"),
            StringComparer::OrdinalIgnoreCase => write!(f, "OrdinalIgnoreCase"),
            StringComparer::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// Name under which the ordinal comparer is pre-registered.
pub const COMPARER_ORDINAL: &str = "ordinal";
/// Name under which the case-insensitive comparer is pre-registered.
pub const COMPARER_ORDINAL_IGNORE_CASE: &str = "ordinal_ignore_case";

// ---------------------------------------------------------------------------
// Scalar helpers
// ---------------------------------------------------------------------------

/// Platform-default float equality: NaN is never equal to itself and
/// `-0.0 == 0.0`. No tolerance is applied.
pub fn f64_eq(a: f64, b: f64) -> bool {
    a == b
}

/// See [`f64_eq`].
pub fn f32_eq(a: f32, b: f32) -> bool {
    a == b
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordinal_is_exact() {
        let c = StringComparer::Ordinal;
        assert!(c.string_eq("Straße", "Straße"));
        assert!(!c.string_eq("a", "A"));
        assert!(!c.string_eq("", "a"));
    }

    #[test]
    fn ignore_case_folds_unicode() {
        let c = StringComparer::OrdinalIgnoreCase;
        assert!(c.string_eq("Borrower", "borrower"));
        assert!(c.string_eq("ÄRGER", "ärger"));
        assert!(!c.string_eq("abc", "abd"));
    }

    #[test]
    fn custom_comparer_is_invoked() {
        let c = StringComparer::Custom(Arc::new(|a: &str, b: &str| {
            a.trim() == b.trim()
        }));
        assert!(c.string_eq("  x", "x  "));
        assert!(!c.string_eq("x", "y"));
    }

    #[test]
    fn float_equality_is_platform_default() {
        assert!(!f64_eq(f64::NAN, f64::NAN));
        assert!(f64_eq(0.0, -0.0));
        assert!(f32_eq(1.5, 1.5));
        assert!(!f32_eq(f32::NAN, f32::NAN));
    }
}
