//! The runtime value model the engines walk.
//!
//! A [`Value`] is a dynamic tree covering every declared kind a schema can
//! describe. Records are held behind [`RecordHandle`] (a shared, interiorly
//! mutable cell) so they carry reference identity — the basis for the
//! identity short-circuit, `Reference` compare mode, and cycle tracking.
//!
//! Handles are intentionally single-threaded (`Rc`): one invocation owns its
//! graphs, and callers parallelise across independent invocations.

use std::cell::{Ref, RefCell};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::dirty::DirtyWord;
use crate::error::{DdError, Result};

// ---------------------------------------------------------------------------
// TimeValue
// ---------------------------------------------------------------------------

/// A point-in-time or calendar value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeValue {
    /// Instant with an explicit UTC offset.
    Offset(DateTime<FixedOffset>),
    /// Wall-clock date-time with no offset information.
    Naive(NaiveDateTime),
    /// Date-only value.
    Date(NaiveDate),
    /// Time-of-day value.
    TimeOfDay(NaiveTime),
}

impl TimeValue {
    /// Structural time equality.
    ///
    /// Two `Offset` stamps are equal iff both the instant *and* the offset
    /// match — `12:00+02:00` is not equal to `10:00Z` even though they name
    /// the same instant. Date-only and time-of-day values compare by value.
    /// Different variants never compare equal.
    pub fn time_eq(&self, other: &TimeValue) -> bool {
        match (self, other) {
            (TimeValue::Offset(a), TimeValue::Offset(b)) => {
                a == b && a.offset().local_minus_utc() == b.offset().local_minus_utc()
            }
            (TimeValue::Naive(a), TimeValue::Naive(b)) => a == b,
            (TimeValue::Date(a), TimeValue::Date(b)) => a == b,
            (TimeValue::TimeOfDay(a), TimeValue::TimeOfDay(b)) => a == b,
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Decimal / OpaqueValue
// ---------------------------------------------------------------------------

/// Fixed-point decimal: `mantissa × 10^-scale`.
///
/// Compared exactly on representation, so `1.0` (mantissa 10, scale 1) and
/// `1.00` (mantissa 100, scale 2) are *not* equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decimal {
    pub mantissa: i128,
    pub scale: u32,
}

/// A value the schema does not model structurally.
///
/// Falls back to its intrinsic equality: same type name, same bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpaqueValue {
    pub type_name: String,
    pub bytes: Vec<u8>,
}

// ---------------------------------------------------------------------------
// MapKey
// ---------------------------------------------------------------------------

/// Dictionary key. Restricted to hashable, totally ordered kinds so map
/// iteration — and therefore delta emission — is deterministic.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapKey {
    Bool(bool),
    I64(i64),
    U64(u64),
    Str(String),
}

impl fmt::Display for MapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapKey::Bool(b) => write!(f, "{b}"),
            MapKey::I64(v) => write!(f, "{v}"),
            MapKey::U64(v) => write!(f, "{v}"),
            MapKey::Str(s) => write!(f, "\"{s}\""),
        }
    }
}

impl From<&str> for MapKey {
    fn from(s: &str) -> MapKey {
        MapKey::Str(s.to_string())
    }
}

impl From<i64> for MapKey {
    fn from(v: i64) -> MapKey {
        MapKey::I64(v)
    }
}

// ---------------------------------------------------------------------------
// ArrayValue
// ---------------------------------------------------------------------------

/// Multi-dimensional array: explicit per-dimension lengths over a row-major
/// element buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArrayValue {
    pub dims: Vec<usize>,
    pub elems: Vec<Value>,
}

impl ArrayValue {
    /// Build an array, checking that `elems` matches the product of `dims`.
    pub fn new(dims: Vec<usize>, elems: Vec<Value>) -> Result<ArrayValue> {
        let expect: usize = dims.iter().product();
        if dims.is_empty() {
            return Err(DdError::InvalidInput("array must have rank >= 1".to_string()));
        }
        if expect != elems.len() {
            return Err(DdError::InvalidInput(format!(
                "array dims {:?} require {} elements, got {}",
                dims,
                expect,
                elems.len()
            )));
        }
        Ok(ArrayValue { dims, elems })
    }

    /// Decompose a row-major linear index into per-dimension indices.
    pub fn coords(&self, mut linear: usize) -> Vec<usize> {
        let mut out = vec![0; self.dims.len()];
        for d in (0..self.dims.len()).rev() {
            let len = self.dims[d].max(1);
            out[d] = linear % len;
            linear /= len;
        }
        out
    }
}

// ---------------------------------------------------------------------------
// RecordHandle / RecordBody
// ---------------------------------------------------------------------------

/// Backing storage of one record instance.
#[derive(Debug, Serialize, Deserialize)]
pub struct RecordBody {
    type_tag: String,
    members: Vec<Value>,
    /// Present iff the instance is dirty-tracked. Never serialized; a
    /// deserialized instance starts untracked.
    #[serde(skip)]
    dirty: Option<DirtyWord>,
}

/// Shared handle to a record instance.
///
/// Cloning the handle clones the *reference*, not the record; use
/// [`Value::deep_clone`] for a structural copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordHandle(Rc<RefCell<RecordBody>>);

impl RecordHandle {
    /// A fresh, untracked record.
    pub fn new(type_tag: impl Into<String>, members: Vec<Value>) -> RecordHandle {
        RecordHandle(Rc::new(RefCell::new(RecordBody {
            type_tag: type_tag.into(),
            members,
            dirty: None,
        })))
    }

    /// A fresh, dirty-tracked record. The dirty word starts zeroed and is
    /// sized to the member count.
    pub fn tracked(type_tag: impl Into<String>, members: Vec<Value>) -> RecordHandle {
        let word = DirtyWord::new(members.len());
        RecordHandle(Rc::new(RefCell::new(RecordBody {
            type_tag: type_tag.into(),
            members,
            dirty: Some(word),
        })))
    }

    pub fn type_tag(&self) -> String {
        self.0.borrow().type_tag.clone()
    }

    pub fn member_count(&self) -> usize {
        self.0.borrow().members.len()
    }

    /// Read a member by stable index (cloned; records clone their handle).
    pub fn member(&self, index: u32) -> Option<Value> {
        self.0.borrow().members.get(index as usize).cloned()
    }

    /// Borrow the member slice for the duration of the returned guard.
    pub fn members(&self) -> Ref<'_, [Value]> {
        Ref::map(self.0.borrow(), |b| b.members.as_slice())
    }

    /// Assign member `index`, marking its dirty bit when tracked.
    ///
    /// Returns `false` when the index is out of range.
    pub fn set_member(&self, index: u32, value: Value) -> bool {
        let mut body = self.0.borrow_mut();
        match body.members.get_mut(index as usize) {
            Some(slot) => {
                *slot = value;
                if let Some(word) = body.dirty.as_mut() {
                    word.mark(index);
                }
                true
            }
            None => false,
        }
    }

    /// Mutate member `index` in place, marking its dirty bit when tracked.
    pub fn with_member_mut<R>(&self, index: u32, f: impl FnOnce(&mut Value) -> R) -> Option<R> {
        let mut body = self.0.borrow_mut();
        let out = body.members.get_mut(index as usize).map(f);
        if out.is_some() {
            if let Some(word) = body.dirty.as_mut() {
                word.mark(index);
            }
        }
        out
    }

    pub fn is_tracked(&self) -> bool {
        self.0.borrow().dirty.is_some()
    }

    /// Snapshot of the dirty word, if this instance is tracked.
    pub fn dirty(&self) -> Option<DirtyWord> {
        self.0.borrow().dirty.clone()
    }

    /// Reset the dirty word. Called by the delta engine after a successful
    /// emit; a no-op for untracked instances.
    pub fn clear_dirty(&self) {
        if let Some(word) = self.0.borrow_mut().dirty.as_mut() {
            word.clear();
        }
    }

    /// Stable identity of this instance for cycle tracking.
    pub fn ptr_id(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }

    pub fn ptr_eq(&self, other: &RecordHandle) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    fn push_member_raw(&self, value: Value) {
        self.0.borrow_mut().members.push(value);
    }

    fn make_empty_like(&self) -> RecordHandle {
        let body = self.0.borrow();
        let handle = RecordHandle(Rc::new(RefCell::new(RecordBody {
            type_tag: body.type_tag.clone(),
            members: Vec::with_capacity(body.members.len()),
            dirty: body.dirty.as_ref().map(|w| {
                let mut fresh = w.clone();
                fresh.clear();
                fresh
            }),
        })));
        handle
    }
}

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// A dynamic value of any declared kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Null,
    Bool(bool),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Decimal(Decimal),
    Str(String),
    /// Enum constant, by underlying value.
    Enum(i64),
    /// Flags enum, compared bitwise.
    Flags(u64),
    Time(TimeValue),
    Opaque(OpaqueValue),
    Record(RecordHandle),
    Seq(Vec<Value>),
    Set(Vec<Value>),
    /// Serialized as a list of `[key, value]` pairs so non-string keys
    /// survive JSON.
    Map(#[serde(with = "map_as_pairs")] BTreeMap<MapKey, Value>),
    Array(ArrayValue),
    /// Polymorphic slot: a runtime type tag plus its payload.
    Any { type_tag: String, value: Box<Value> },
}

impl Value {
    pub fn record(type_tag: impl Into<String>, members: Vec<Value>) -> Value {
        Value::Record(RecordHandle::new(type_tag, members))
    }

    pub fn any(type_tag: impl Into<String>, value: Value) -> Value {
        Value::Any {
            type_tag: type_tag.into(),
            value: Box::new(value),
        }
    }

    pub fn str(s: impl Into<String>) -> Value {
        Value::Str(s.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short kind name used in diagnostics and apply errors.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::I64(_) => "i64",
            Value::U64(_) => "u64",
            Value::F32(_) => "f32",
            Value::F64(_) => "f64",
            Value::Decimal(_) => "decimal",
            Value::Str(_) => "str",
            Value::Enum(_) => "enum",
            Value::Flags(_) => "flags",
            Value::Time(_) => "time",
            Value::Opaque(_) => "opaque",
            Value::Record(_) => "record",
            Value::Seq(_) => "seq",
            Value::Set(_) => "set",
            Value::Map(_) => "map",
            Value::Array(_) => "array",
            Value::Any { .. } => "any",
        }
    }

    /// Registry-independent structural equality.
    ///
    /// This is the fallback used for opaque values and for polymorphic
    /// payloads whose runtime tag has no registered schema. Floats use the
    /// platform `==` (NaN is never equal to itself, `-0.0 == 0.0`); records
    /// compare by tag and pairwise members with cycle protection; sets
    /// compare as unordered collections.
    pub fn intrinsic_eq(&self, other: &Value) -> bool {
        let mut seen = HashSet::new();
        intrinsic_eq_inner(self, other, &mut seen)
    }

    /// Structural deep copy preserving aliasing and cycles.
    ///
    /// Shared record instances stay shared in the copy (one new instance per
    /// original identity); tracked records come back tracked with a zeroed
    /// dirty word.
    pub fn deep_clone(&self) -> Value {
        let mut memo: HashMap<usize, RecordHandle> = HashMap::new();
        deep_clone_inner(self, &mut memo)
    }
}

/// `PartialEq` delegates to [`Value::intrinsic_eq`]. The schema-aware
/// engines never use it; it exists for tests and op comparison.
impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        self.intrinsic_eq(other)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Value {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Value {
        Value::I64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Value {
        Value::F64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Value {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Value {
        Value::Str(v)
    }
}

mod map_as_pairs {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::{MapKey, Value};

    pub fn serialize<S: Serializer>(
        map: &BTreeMap<MapKey, Value>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let pairs: Vec<(&MapKey, &Value)> = map.iter().collect();
        pairs.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<MapKey, Value>, D::Error> {
        let pairs: Vec<(MapKey, Value)> = Vec::deserialize(deserializer)?;
        Ok(pairs.into_iter().collect())
    }
}

fn intrinsic_eq_inner(a: &Value, b: &Value, seen: &mut HashSet<(usize, usize)>) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::I64(x), Value::I64(y)) => x == y,
        (Value::U64(x), Value::U64(y)) => x == y,
        (Value::F32(x), Value::F32(y)) => x == y,
        (Value::F64(x), Value::F64(y)) => x == y,
        (Value::Decimal(x), Value::Decimal(y)) => x == y,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Enum(x), Value::Enum(y)) => x == y,
        (Value::Flags(x), Value::Flags(y)) => x == y,
        (Value::Time(x), Value::Time(y)) => x.time_eq(y),
        (Value::Opaque(x), Value::Opaque(y)) => x == y,
        (Value::Record(x), Value::Record(y)) => {
            if x.ptr_eq(y) {
                return true;
            }
            if !seen.insert((x.ptr_id(), y.ptr_id())) {
                // Pair already in flight: consistent so far.
                return true;
            }
            if x.type_tag() != y.type_tag() {
                return false;
            }
            let xm = x.members();
            let ym = y.members();
            xm.len() == ym.len()
                && xm
                    .iter()
                    .zip(ym.iter())
                    .all(|(xv, yv)| intrinsic_eq_inner(xv, yv, seen))
        }
        (Value::Seq(x), Value::Seq(y)) => {
            x.len() == y.len()
                && x.iter()
                    .zip(y.iter())
                    .all(|(xv, yv)| intrinsic_eq_inner(xv, yv, seen))
        }
        (Value::Set(x), Value::Set(y)) => {
            if x.len() != y.len() {
                return false;
            }
            let mut used = vec![false; y.len()];
            x.iter().all(|xv| {
                y.iter().enumerate().any(|(i, yv)| {
                    if !used[i] && intrinsic_eq_inner(xv, yv, seen) {
                        used[i] = true;
                        true
                    } else {
                        false
                    }
                })
            })
        }
        (Value::Map(x), Value::Map(y)) => {
            x.len() == y.len()
                && x.iter().zip(y.iter()).all(|((xk, xv), (yk, yv))| {
                    xk == yk && intrinsic_eq_inner(xv, yv, seen)
                })
        }
        (Value::Array(x), Value::Array(y)) => {
            x.dims == y.dims
                && x.elems
                    .iter()
                    .zip(y.elems.iter())
                    .all(|(xv, yv)| intrinsic_eq_inner(xv, yv, seen))
        }
        (
            Value::Any {
                type_tag: xt,
                value: xv,
            },
            Value::Any {
                type_tag: yt,
                value: yv,
            },
        ) => xt == yt && intrinsic_eq_inner(xv, yv, seen),
        _ => false,
    }
}

fn deep_clone_inner(value: &Value, memo: &mut HashMap<usize, RecordHandle>) -> Value {
    match value {
        Value::Record(handle) => {
            if let Some(existing) = memo.get(&handle.ptr_id()) {
                return Value::Record(existing.clone());
            }
            // Register the fresh handle before cloning members so cycles
            // resolve to it instead of recursing forever.
            let fresh = handle.make_empty_like();
            memo.insert(handle.ptr_id(), fresh.clone());
            let members: Vec<Value> = handle.members().to_vec();
            for m in &members {
                fresh.push_member_raw(deep_clone_inner(m, memo));
            }
            Value::Record(fresh)
        }
        Value::Seq(items) => Value::Seq(items.iter().map(|v| deep_clone_inner(v, memo)).collect()),
        Value::Set(items) => Value::Set(items.iter().map(|v| deep_clone_inner(v, memo)).collect()),
        Value::Map(map) => Value::Map(
            map.iter()
                .map(|(k, v)| (k.clone(), deep_clone_inner(v, memo)))
                .collect(),
        ),
        Value::Array(arr) => Value::Array(ArrayValue {
            dims: arr.dims.clone(),
            elems: arr.elems.iter().map(|v| deep_clone_inner(v, memo)).collect(),
        }),
        Value::Any { type_tag, value } => Value::Any {
            type_tag: type_tag.clone(),
            value: Box::new(deep_clone_inner(value, memo)),
        },
        other => other.clone(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
