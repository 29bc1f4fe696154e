//! Shared utilities: the regex cache, flags-enum helpers, and
//! culture-aware formatting. The declarative validation DSL layered on top
//! of this workspace consumes these as well.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use log::debug;
use regex::Regex;

use crate::context::Culture;
use crate::error::{DdError, Result};
use crate::value::{TimeValue, Value};

// ---------------------------------------------------------------------------
// Regex cache
// ---------------------------------------------------------------------------

fn cache() -> &'static Mutex<HashMap<String, Arc<Regex>>> {
    static CACHE: OnceLock<Mutex<HashMap<String, Arc<Regex>>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Fetch a compiled regex, compiling at most once per pattern.
///
/// The cache is process-global and guarded by a mutex held across
/// compilation, so concurrent callers of the same new pattern still compile
/// it exactly once.
pub fn cached_regex(pattern: &str) -> Result<Arc<Regex>> {
    let mut map = cache().lock().unwrap_or_else(|p| p.into_inner());
    if let Some(re) = map.get(pattern) {
        return Ok(re.clone());
    }
    let re = Regex::new(pattern)
        .map_err(|e| DdError::InvalidInput(format!("bad pattern '{pattern}': {e}")))?;
    let re = Arc::new(re);
    map.insert(pattern.to_string(), re.clone());
    Ok(re)
}

// ---------------------------------------------------------------------------
// Flags helpers
// ---------------------------------------------------------------------------

/// Every bit of `mask` is set in `value`.
pub fn has_all_flags(value: u64, mask: u64) -> bool {
    value & mask == mask
}

/// No bit of `mask` is set in `value`.
pub fn has_no_flags(value: u64, mask: u64) -> bool {
    value & mask == 0
}

/// A flags value satisfies its member policy: all `required` bits present,
/// no `forbidden` bit present.
pub fn flags_satisfy_masks(value: u64, required: u64, forbidden: u64) -> bool {
    has_all_flags(value, required) && has_no_flags(value, forbidden)
}

// ---------------------------------------------------------------------------
// Culture-aware formatting
// ---------------------------------------------------------------------------

/// Format a scalar value for validation messages.
///
/// Invariant semantics throughout; a named culture formats identically
/// today and is noted in the debug log.
pub fn format_scalar(value: &Value, culture: &Culture) -> String {
    if let Culture::Named(name) = culture {
        debug!("named culture '{name}' formats as invariant");
    }
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::I64(v) => v.to_string(),
        Value::U64(v) => v.to_string(),
        Value::F32(v) => format!("{v}"),
        Value::F64(v) => format!("{v}"),
        Value::Decimal(d) => format_decimal(d.mantissa, d.scale),
        Value::Str(s) => s.clone(),
        Value::Enum(v) => v.to_string(),
        Value::Flags(v) => format!("{v:#x}"),
        Value::Time(t) => format_time(t),
        other => format!("<{}>", other.kind_name()),
    }
}

fn format_decimal(mantissa: i128, scale: u32) -> String {
    if scale == 0 {
        return mantissa.to_string();
    }
    let negative = mantissa < 0;
    let digits = mantissa.unsigned_abs().to_string();
    let scale = scale as usize;
    let (int_part, frac_part) = if digits.len() > scale {
        let split = digits.len() - scale;
        (digits[..split].to_string(), digits[split..].to_string())
    } else {
        ("0".to_string(), format!("{:0>width$}", digits, width = scale))
    };
    let sign = if negative { "-" } else { "" };
    format!("{sign}{int_part}.{frac_part}")
}

fn format_time(t: &TimeValue) -> String {
    match t {
        TimeValue::Offset(dt) => dt.to_rfc3339(),
        TimeValue::Naive(dt) => dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string(),
        TimeValue::Date(d) => d.format("%Y-%m-%d").to_string(),
        TimeValue::TimeOfDay(t) => t.format("%H:%M:%S%.f").to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Decimal;

    #[test]
    fn regex_cache_returns_same_instance() {
        let a = cached_regex(r"^\d+$").unwrap();
        let b = cached_regex(r"^\d+$").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(a.is_match("123"));
    }

    #[test]
    fn regex_cache_rejects_bad_patterns() {
        assert!(cached_regex("(unclosed").is_err());
    }

    #[test]
    fn flags_mask_checks() {
        assert!(has_all_flags(0b1011, 0b0011));
        assert!(!has_all_flags(0b1001, 0b0011));
        assert!(has_no_flags(0b1000, 0b0011));
        assert!(flags_satisfy_masks(0b0101, 0b0101, 0b1010));
        assert!(!flags_satisfy_masks(0b0111, 0b0101, 0b0010));
    }

    #[test]
    fn decimal_formatting_is_invariant() {
        let v = Value::Decimal(Decimal { mantissa: 12345, scale: 2 });
        assert_eq!(format_scalar(&v, &Culture::Invariant), "123.45");
        let small = Value::Decimal(Decimal { mantissa: 5, scale: 3 });
        assert_eq!(format_scalar(&small, &Culture::Invariant), "0.005");
        let neg = Value::Decimal(Decimal { mantissa: -105, scale: 1 });
        assert_eq!(format_scalar(&neg, &Culture::Invariant), "-10.5");
    }

    #[test]
    fn named_culture_falls_back_to_invariant() {
        let v = Value::F64(2.5);
        assert_eq!(
            format_scalar(&v, &Culture::Named("de-DE".to_string())),
            format_scalar(&v, &Culture::Invariant)
        );
    }
}
