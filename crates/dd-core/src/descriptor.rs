//! The abstract metadata contract consumed from the external attribute
//! scanner.
//!
//! Descriptors are the *input* language: declaration-ordered members with
//! per-member policy, plus per-type flags. [`crate::schema::TypeSchema`]
//! compiles them into the dense, index-stable tables the engines run on.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ValueKind / KeyKind
// ---------------------------------------------------------------------------

/// Declared kind of a dictionary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyKind {
    Bool,
    I64,
    U64,
    Str,
}

/// Declared kind of a member or element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Bool,
    I64,
    U64,
    F32,
    F64,
    Decimal,
    Str,
    Time,
    Enum,
    Flags,
    /// A value the schema does not model; intrinsic equality applies.
    Opaque,
    Record { type_tag: String },
    Seq { element: Box<ValueKind> },
    Set { element: Box<ValueKind> },
    Map { key: KeyKind, value: Box<ValueKind> },
    /// Multi-dimensional array over `element`.
    Array { element: Box<ValueKind> },
    /// Polymorphic slot resolved by runtime type tag.
    Any,
}

impl ValueKind {
    pub fn record(type_tag: impl Into<String>) -> ValueKind {
        ValueKind::Record {
            type_tag: type_tag.into(),
        }
    }

    pub fn seq(element: ValueKind) -> ValueKind {
        ValueKind::Seq {
            element: Box::new(element),
        }
    }

    pub fn set(element: ValueKind) -> ValueKind {
        ValueKind::Set {
            element: Box::new(element),
        }
    }

    pub fn map(key: KeyKind, value: ValueKind) -> ValueKind {
        ValueKind::Map {
            key,
            value: Box::new(value),
        }
    }

    pub fn array(element: ValueKind) -> ValueKind {
        ValueKind::Array {
            element: Box::new(element),
        }
    }
}

// ---------------------------------------------------------------------------
// CompareKind
// ---------------------------------------------------------------------------

/// Per-member comparison mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareKind {
    /// Full structural recursion (the default).
    #[default]
    Deep,
    /// One level only: record members compare by identity, scalars by value.
    Shallow,
    /// Record identity only.
    Reference,
    /// Excluded from comparison, diff, and delta.
    Skip,
}

// ---------------------------------------------------------------------------
// MemberDescriptor
// ---------------------------------------------------------------------------

/// One comparable member as reported by the attribute scanner, in
/// declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberDescriptor {
    pub name: String,
    pub kind: ValueKind,
    pub compare_kind: CompareKind,
    /// Member-level override of the type's `order_insensitive_default`.
    pub order_insensitive: Option<bool>,
    /// Element fields forming multiset identity for unordered comparison.
    pub key_members: Vec<String>,
    /// Name of a registered string comparer (e.g. `"ordinal_ignore_case"`).
    pub custom_equality: Option<String>,
    /// Containers only: delta operations replace the whole container.
    pub delta_shallow: bool,
    /// Flags members: bits that must be set / must not be set.
    pub required_flags: u64,
    pub forbidden_flags: u64,
    /// Declared on a base type (filtered by `include_base`).
    pub from_base: bool,
    /// Non-public member (filtered by `include_internals`).
    pub internal: bool,
}

impl MemberDescriptor {
    pub fn new(name: impl Into<String>, kind: ValueKind) -> MemberDescriptor {
        MemberDescriptor {
            name: name.into(),
            kind,
            compare_kind: CompareKind::Deep,
            order_insensitive: None,
            key_members: Vec::new(),
            custom_equality: None,
            delta_shallow: false,
            required_flags: 0,
            forbidden_flags: 0,
            from_base: false,
            internal: false,
        }
    }

    pub fn compare_kind(mut self, kind: CompareKind) -> MemberDescriptor {
        self.compare_kind = kind;
        self
    }

    pub fn order_insensitive(mut self, value: bool) -> MemberDescriptor {
        self.order_insensitive = Some(value);
        self
    }

    pub fn key_members(mut self, keys: &[&str]) -> MemberDescriptor {
        self.key_members = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn custom_equality(mut self, comparer: impl Into<String>) -> MemberDescriptor {
        self.custom_equality = Some(comparer.into());
        self
    }

    pub fn delta_shallow(mut self) -> MemberDescriptor {
        self.delta_shallow = true;
        self
    }

    pub fn flag_masks(mut self, required: u64, forbidden: u64) -> MemberDescriptor {
        self.required_flags = required;
        self.forbidden_flags = forbidden;
        self
    }

    pub fn from_base(mut self) -> MemberDescriptor {
        self.from_base = true;
        self
    }

    pub fn internal(mut self) -> MemberDescriptor {
        self.internal = true;
        self
    }
}

// ---------------------------------------------------------------------------
// TypeDescriptor
// ---------------------------------------------------------------------------

/// One user record type as reported by the attribute scanner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDescriptor {
    pub type_tag: String,
    /// Declaration-ordered members, before projection filters.
    pub members: Vec<MemberDescriptor>,
    pub include_base: bool,
    pub include_internals: bool,
    pub order_insensitive_default: bool,
    pub cycle_tracking: bool,
    pub dirty_tracking: bool,
    /// Explicit include projection. Mutually exclusive with `ignore_members`.
    pub include_members: Vec<String>,
    /// Explicit ignore projection. Mutually exclusive with `include_members`.
    pub ignore_members: Vec<String>,
}

impl TypeDescriptor {
    pub fn new(type_tag: impl Into<String>) -> TypeDescriptor {
        TypeDescriptor {
            type_tag: type_tag.into(),
            members: Vec::new(),
            include_base: true,
            include_internals: false,
            order_insensitive_default: false,
            cycle_tracking: false,
            dirty_tracking: false,
            include_members: Vec::new(),
            ignore_members: Vec::new(),
        }
    }

    pub fn member(mut self, member: MemberDescriptor) -> TypeDescriptor {
        self.members.push(member);
        self
    }

    pub fn include_base(mut self, value: bool) -> TypeDescriptor {
        self.include_base = value;
        self
    }

    pub fn include_internals(mut self, value: bool) -> TypeDescriptor {
        self.include_internals = value;
        self
    }

    pub fn order_insensitive_default(mut self, value: bool) -> TypeDescriptor {
        self.order_insensitive_default = value;
        self
    }

    pub fn cycle_tracking(mut self) -> TypeDescriptor {
        self.cycle_tracking = true;
        self
    }

    pub fn dirty_tracking(mut self) -> TypeDescriptor {
        self.dirty_tracking = true;
        self
    }

    pub fn include_only(mut self, names: &[&str]) -> TypeDescriptor {
        self.include_members = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn ignore(mut self, names: &[&str]) -> TypeDescriptor {
        self.ignore_members = names.iter().map(|n| n.to_string()).collect();
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_builder_defaults() {
        let m = MemberDescriptor::new("Id", ValueKind::I64);
        assert_eq!(m.compare_kind, CompareKind::Deep);
        assert!(m.order_insensitive.is_none());
        assert!(!m.delta_shallow);
        assert!(m.key_members.is_empty());
    }

    #[test]
    fn descriptor_round_trips_json() {
        let t = TypeDescriptor::new("Order")
            .member(MemberDescriptor::new("Id", ValueKind::I64))
            .member(
                MemberDescriptor::new(
                    "Items",
                    ValueKind::seq(ValueKind::record("OrderItem")),
                )
                .order_insensitive(true)
                .key_members(&["SKU"]),
            )
            .cycle_tracking();
        let json = serde_json::to_string(&t).expect("serialize");
        let back: TypeDescriptor = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(t, back);
    }

    #[test]
    fn compare_kind_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&CompareKind::Deep).unwrap(),
            "\"deep\""
        );
        assert_eq!(
            serde_json::to_string(&CompareKind::Reference).unwrap(),
            "\"reference\""
        );
    }
}
