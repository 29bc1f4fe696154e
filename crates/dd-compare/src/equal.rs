//! Structural deep equality.
//!
//! The single source of truth for "are these equal?" — the diff walker and
//! the delta engine both route their decisions through this module so the
//! engines can never disagree.
//!
//! The walker never raises for data-shape reasons: mismatched variants,
//! missing members, and unregistered tags all come back as *not equal* (or
//! fall back to intrinsic equality where the contract says so).

use dd_core::{
    CompareContext, CompareKind, Member, Registry, StringComparer, Value,
};

// ---------------------------------------------------------------------------
// EqOpts
// ---------------------------------------------------------------------------

/// Equality options in effect at one nesting level, projected from the
/// enclosing member's policy. Container options do not propagate into
/// elements; a named comparer follows string elements down.
#[derive(Clone, Copy)]
pub(crate) struct EqOpts<'a> {
    pub order_insensitive: bool,
    pub key_members: &'a [String],
    pub custom_equality: Option<&'a str>,
}

pub(crate) const ROOT_OPTS: EqOpts<'static> = EqOpts {
    order_insensitive: false,
    key_members: &[],
    custom_equality: None,
};

impl<'a> EqOpts<'a> {
    pub fn from_member(member: &'a Member) -> EqOpts<'a> {
        EqOpts {
            order_insensitive: member.order_insensitive,
            key_members: &member.key_members,
            custom_equality: member.custom_equality.as_deref(),
        }
    }

    /// Options for the elements of the container these options describe.
    pub fn element(&self) -> EqOpts<'a> {
        EqOpts {
            order_insensitive: false,
            key_members: &[],
            custom_equality: self.custom_equality,
        }
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Structural equality of two values of the same declared type.
///
/// Short-circuits on identity (the same record instance is equal to
/// itself); exactly one `Null` side is not equal.
pub fn deep_equal(reg: &Registry, a: &Value, b: &Value, ctx: &mut CompareContext) -> bool {
    value_equal(reg, a, b, &ROOT_OPTS, ctx)
}

/// Equality of one member slot under its compiled policy.
///
/// `Skip` members are always equal; `Reference` and `Shallow` compare one
/// level; `Deep` recurses with the member's options.
pub fn member_equal(
    reg: &Registry,
    member: &Member,
    a: &Value,
    b: &Value,
    ctx: &mut CompareContext,
) -> bool {
    match member.compare_kind {
        CompareKind::Skip => true,
        CompareKind::Reference => reference_equal(a, b),
        CompareKind::Shallow => shallow_equal(a, b),
        CompareKind::Deep => value_equal(reg, a, b, &EqOpts::from_member(member), ctx),
    }
}

/// Equality of two *elements* of a container member (sequence slots, map
/// values): the member's element rules apply, not its container rules.
pub fn element_equal(
    reg: &Registry,
    member: &Member,
    a: &Value,
    b: &Value,
    ctx: &mut CompareContext,
) -> bool {
    value_equal(reg, a, b, &EqOpts::from_member(member).element(), ctx)
}

/// Identity comparison: record instances by pointer, everything else by
/// intrinsic equality (values without identity have nothing weaker).
pub fn reference_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Record(x), Value::Record(y)) => x.ptr_eq(y),
        _ => a.intrinsic_eq(b),
    }
}

/// One-level comparison: record members by identity or scalar value, no
/// recursion into nested structures.
pub fn shallow_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Record(x), Value::Record(y)) => {
            if x.ptr_eq(y) {
                return true;
            }
            if x.type_tag() != y.type_tag() {
                return false;
            }
            let xm = x.members();
            let ym = y.members();
            xm.len() == ym.len()
                && xm.iter().zip(ym.iter()).all(|(xv, yv)| shallow_atom(xv, yv))
        }
        (Value::Seq(x), Value::Seq(y)) | (Value::Set(x), Value::Set(y)) => {
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(xv, yv)| shallow_atom(xv, yv))
        }
        (Value::Map(x), Value::Map(y)) => {
            x.len() == y.len()
                && x.iter()
                    .zip(y.iter())
                    .all(|((xk, xv), (yk, yv))| xk == yk && shallow_atom(xv, yv))
        }
        (Value::Array(x), Value::Array(y)) => {
            x.dims == y.dims
                && x.elems
                    .iter()
                    .zip(y.elems.iter())
                    .all(|(xv, yv)| shallow_atom(xv, yv))
        }
        _ => a.intrinsic_eq(b),
    }
}

fn shallow_atom(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Record(x), Value::Record(y)) => x.ptr_eq(y),
        _ => a.intrinsic_eq(b),
    }
}

// ---------------------------------------------------------------------------
// Walker
// ---------------------------------------------------------------------------

pub(crate) fn value_equal(
    reg: &Registry,
    a: &Value,
    b: &Value,
    opts: &EqOpts<'_>,
    ctx: &mut CompareContext,
) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Record(x), Value::Record(y)) => record_equal(reg, x, y, ctx),
        (Value::Str(x), Value::Str(y)) => string_equal(reg, x, y, opts),
        (Value::Seq(x), Value::Seq(y)) => {
            if opts.order_insensitive {
                multiset_equal(reg, x, y, opts, ctx)
            } else {
                x.len() == y.len()
                    && x.iter()
                        .zip(y.iter())
                        .all(|(xv, yv)| value_equal(reg, xv, yv, &opts.element(), ctx))
            }
        }
        // Sets are unordered by nature; multiset matching covers them.
        (Value::Set(x), Value::Set(y)) => multiset_equal(reg, x, y, &opts.element(), ctx),
        (Value::Map(x), Value::Map(y)) => {
            x.len() == y.len()
                && x.iter().all(|(k, xv)| {
                    y.get(k)
                        .is_some_and(|yv| value_equal(reg, xv, yv, &opts.element(), ctx))
                })
        }
        (Value::Array(x), Value::Array(y)) => {
            x.dims == y.dims
                && x.elems
                    .iter()
                    .zip(y.elems.iter())
                    .all(|(xv, yv)| value_equal(reg, xv, yv, &opts.element(), ctx))
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
        ) => {
            // Declared/runtime type divergence between sides is not equal;
            // matching tags dispatch through the registry (records resolve
            // their own schema, unregistered payloads fall back intrinsic).
            xt == yt && value_equal(reg, xv, yv, &opts.element(), ctx)
        }
        // Scalars, time, enums, flags, decimals, opaque values — and every
        // mismatched variant pairing — resolve intrinsically.
        _ => a.intrinsic_eq(b),
    }
}

fn string_equal(reg: &Registry, a: &str, b: &str, opts: &EqOpts<'_>) -> bool {
    match opts.custom_equality.and_then(|name| reg.comparer(name)) {
        Some(cmp) => cmp.string_eq(a, b),
        None => StringComparer::Ordinal.string_eq(a, b),
    }
}

fn record_equal(
    reg: &Registry,
    a: &dd_core::RecordHandle,
    b: &dd_core::RecordHandle,
    ctx: &mut CompareContext,
) -> bool {
    if a.ptr_eq(b) {
        return true;
    }
    if a.type_tag() != b.type_tag() {
        return false;
    }
    let Some(schema) = reg.schema(&a.type_tag()) else {
        // Unregistered runtime type: the intrinsic fallback applies.
        return Value::Record(a.clone()).intrinsic_eq(&Value::Record(b.clone()));
    };
    if schema.cycle_tracking && !ctx.enter(a.ptr_id(), b.ptr_id()) {
        // Pair already in flight: the cycle is consistent if every
        // non-cyclic part is equal.
        return true;
    }
    let null = Value::Null;
    let am = a.members();
    let bm = b.members();
    schema.members().iter().all(|member| {
        let av = am.get(member.index as usize).unwrap_or(&null);
        let bv = bm.get(member.index as usize).unwrap_or(&null);
        member_equal(reg, member, av, bv, ctx)
    })
}

/// Multiset equality for order-insensitive members and sets.
///
/// Left elements are matched in iteration order; the first unconsumed
/// right-side candidate with an equal key (or full element equality when no
/// key members are configured) wins and is consumed. A keyed match whose
/// remaining members differ makes the whole collection unequal.
pub(crate) fn multiset_equal(
    reg: &Registry,
    left: &[Value],
    right: &[Value],
    opts: &EqOpts<'_>,
    ctx: &mut CompareContext,
) -> bool {
    if left.len() != right.len() {
        return false;
    }
    let elem_opts = opts.element();
    let mut used = vec![false; right.len()];
    for l in left {
        let mut matched = false;
        for (i, r) in right.iter().enumerate() {
            if used[i] {
                continue;
            }
            if opts.key_members.is_empty() {
                if value_equal(reg, l, r, &elem_opts, ctx) {
                    used[i] = true;
                    matched = true;
                    break;
                }
            } else if keys_equal(reg, l, r, opts.key_members, ctx) {
                if !value_equal(reg, l, r, &elem_opts, ctx) {
                    return false;
                }
                used[i] = true;
                matched = true;
                break;
            }
        }
        if !matched {
            return false;
        }
    }
    true
}

/// Key-tuple equality of two collection elements.
pub(crate) fn keys_equal(
    reg: &Registry,
    l: &Value,
    r: &Value,
    keys: &[String],
    ctx: &mut CompareContext,
) -> bool {
    let (Value::Record(lr), Value::Record(rr)) = (l, r) else {
        return l.intrinsic_eq(r);
    };
    if lr.type_tag() != rr.type_tag() {
        return false;
    }
    let Some(schema) = reg.schema(&lr.type_tag()) else {
        return l.intrinsic_eq(r);
    };
    keys.iter().all(|key| match schema.member_named(key) {
        Some(member) => {
            let lv = lr.member(member.index).unwrap_or(Value::Null);
            let rv = rr.member(member.index).unwrap_or(Value::Null);
            member_equal(reg, member, &lv, &rv, ctx)
        }
        None => false,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use dd_core::{
        KeyKind, MemberDescriptor, RecordHandle, TypeDescriptor, ValueKind,
    };
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn registry() -> Registry {
        let customer = TypeDescriptor::new("Customer")
            .member(MemberDescriptor::new("Id", ValueKind::I64))
            .member(MemberDescriptor::new("Name", ValueKind::Str));
        let item = TypeDescriptor::new("OrderItem")
            .member(MemberDescriptor::new("SKU", ValueKind::Str))
            .member(MemberDescriptor::new("Qty", ValueKind::I64));
        let order = TypeDescriptor::new("Order")
            .member(MemberDescriptor::new("Id", ValueKind::I64))
            .member(MemberDescriptor::new("Notes", ValueKind::Str))
            .member(MemberDescriptor::new(
                "Customer",
                ValueKind::record("Customer"),
            ))
            .member(
                MemberDescriptor::new("Items", ValueKind::seq(ValueKind::record("OrderItem")))
                    .order_insensitive(true)
                    .key_members(&["SKU"]),
            )
            .member(
                MemberDescriptor::new("Tags", ValueKind::seq(ValueKind::Str))
                    .order_insensitive(true),
            )
            .member(MemberDescriptor::new(
                "Attrs",
                ValueKind::map(KeyKind::Str, ValueKind::Str),
            ));
        let node = TypeDescriptor::new("Node")
            .member(MemberDescriptor::new("Name", ValueKind::Str))
            .member(MemberDescriptor::new("Peer", ValueKind::record("Node")))
            .cycle_tracking();
        Registry::build(&[customer, item, order, node]).unwrap()
    }

    fn customer(id: i64, name: &str) -> Value {
        Value::record("Customer", vec![Value::I64(id), Value::str(name)])
    }

    fn item(sku: &str, qty: i64) -> Value {
        Value::record("OrderItem", vec![Value::str(sku), Value::I64(qty)])
    }

    fn order(id: i64, notes: &str, items: Vec<Value>, tags: &[&str]) -> Value {
        Value::record(
            "Order",
            vec![
                Value::I64(id),
                Value::str(notes),
                customer(1, "C"),
                Value::Seq(items),
                Value::Seq(tags.iter().map(|t| Value::str(*t)).collect()),
                Value::Map(BTreeMap::new()),
            ],
        )
    }

    #[test]
    fn identical_structure_is_equal() {
        let reg = registry();
        let a = order(1, "a", vec![item("A", 1)], &["red"]);
        let b = order(1, "a", vec![item("A", 1)], &["red"]);
        assert!(deep_equal(&reg, &a, &b, &mut CompareContext::new()));
    }

    #[test]
    fn same_instance_short_circuits() {
        let reg = registry();
        let a = order(1, "a", vec![], &[]);
        assert!(deep_equal(&reg, &a, &a.clone(), &mut CompareContext::new()));
    }

    #[test]
    fn one_null_side_is_not_equal() {
        let reg = registry();
        let a = order(1, "a", vec![], &[]);
        assert!(!deep_equal(&reg, &a, &Value::Null, &mut CompareContext::new()));
        assert!(!deep_equal(&reg, &Value::Null, &a, &mut CompareContext::new()));
        assert!(deep_equal(&reg, &Value::Null, &Value::Null, &mut CompareContext::new()));
    }

    #[test]
    fn nested_member_difference_detected() {
        let reg = registry();
        let a = order(1, "a", vec![], &[]);
        let mut b = order(1, "a", vec![], &[]);
        if let Value::Record(rec) = &mut b {
            rec.set_member(2, customer(1, "Different"));
        }
        assert!(!deep_equal(&reg, &a, &b, &mut CompareContext::new()));
    }

    #[test]
    fn order_insensitive_tags_are_multiset() {
        let reg = registry();
        let a = order(1, "a", vec![], &["red", "blue", "red"]);
        let b = order(1, "a", vec![], &["red", "red", "blue"]);
        let c = order(1, "a", vec![], &["red", "blue"]);
        assert!(deep_equal(&reg, &a, &b, &mut CompareContext::new()));
        assert!(!deep_equal(&reg, &a, &c, &mut CompareContext::new()));
    }

    #[test]
    fn keyed_items_match_by_sku() {
        let reg = registry();
        let a = order(1, "a", vec![item("A", 1), item("B", 2)], &[]);
        let b = order(1, "a", vec![item("B", 2), item("A", 1)], &[]);
        assert!(deep_equal(&reg, &a, &b, &mut CompareContext::new()));

        // Same keys, different payload: not equal.
        let c = order(1, "a", vec![item("B", 9), item("A", 1)], &[]);
        assert!(!deep_equal(&reg, &a, &c, &mut CompareContext::new()));
    }

    #[test]
    fn map_members_compare_by_key_set_and_value() {
        let reg = registry();
        let mk = |pairs: &[(&str, &str)]| {
            let mut m = BTreeMap::new();
            for (k, v) in pairs {
                m.insert(dd_core::MapKey::from(*k), Value::str(*v));
            }
            Value::Map(m)
        };
        let set_attrs = |v: &Value, attrs: Value| {
            if let Value::Record(rec) = v {
                rec.set_member(5, attrs);
            }
        };
        let a = order(1, "a", vec![], &[]);
        let b = order(1, "a", vec![], &[]);
        set_attrs(&a, mk(&[("env", "prod"), ("src", "bench")]));
        set_attrs(&b, mk(&[("src", "bench"), ("env", "prod")]));
        assert!(deep_equal(&reg, &a, &b, &mut CompareContext::new()));
        set_attrs(&b, mk(&[("env", "prod"), ("src", "ci")]));
        assert!(!deep_equal(&reg, &a, &b, &mut CompareContext::new()));
    }

    #[test]
    fn cyclic_graphs_terminate_and_compare() {
        let reg = registry();
        let make_pair = |a_name: &str, b_name: &str| {
            let a = RecordHandle::new("Node", vec![Value::str(a_name), Value::Null]);
            let b = RecordHandle::new(
                "Node",
                vec![Value::str(b_name), Value::Record(a.clone())],
            );
            a.set_member(1, Value::Record(b.clone()));
            (a, b)
        };
        let (a1, _) = make_pair("a", "b");
        let (a2, b2) = make_pair("a", "b");
        assert!(deep_equal(
            &reg,
            &Value::Record(a1.clone()),
            &Value::Record(a2.clone()),
            &mut CompareContext::new()
        ));

        b2.set_member(0, Value::str("perturbed"));
        assert!(!deep_equal(
            &reg,
            &Value::Record(a1.clone()),
            &Value::Record(a2),
            &mut CompareContext::new()
        ));

        // A graph compared with itself is equal.
        assert!(deep_equal(
            &reg,
            &Value::Record(a1.clone()),
            &Value::Record(a1),
            &mut CompareContext::new()
        ));
    }

    #[test]
    fn symmetry_holds_for_mixed_values() {
        let reg = registry();
        let cases = [
            (order(1, "a", vec![item("A", 1)], &["x"]), order(1, "b", vec![item("A", 1)], &["x"])),
            (order(1, "a", vec![], &[]), order(1, "a", vec![], &[])),
            (Value::F64(f64::NAN), Value::F64(f64::NAN)),
        ];
        for (a, b) in &cases {
            let ab = deep_equal(&reg, a, b, &mut CompareContext::new());
            let ba = deep_equal(&reg, b, a, &mut CompareContext::new());
            assert_eq!(ab, ba);
        }
    }

    #[test]
    fn custom_comparer_applies_to_member() {
        let desc = TypeDescriptor::new("Doc").member(
            MemberDescriptor::new("Title", ValueKind::Str).custom_equality("trimmed"),
        );
        let mut reg = Registry::new();
        reg.register_comparer(
            "trimmed",
            StringComparer::Custom(Arc::new(|a: &str, b: &str| a.trim() == b.trim())),
        );
        reg.register_type(&desc).unwrap();
        reg.validate().unwrap();

        let a = Value::record("Doc", vec![Value::str("  hello ")]);
        let b = Value::record("Doc", vec![Value::str("hello")]);
        assert!(deep_equal(&reg, &a, &b, &mut CompareContext::new()));
    }

    #[test]
    fn polymorphic_tag_mismatch_is_not_equal() {
        let reg = registry();
        let dog = Value::any("Dog", Value::record("Dog", vec![Value::str("rex")]));
        let cat = Value::any("Cat", Value::record("Cat", vec![Value::str("tom")]));
        assert!(!deep_equal(&reg, &dog, &cat, &mut CompareContext::new()));

        // Unregistered tags fall back to intrinsic payload equality.
        let dog2 = Value::any("Dog", Value::record("Dog", vec![Value::str("rex")]));
        assert!(deep_equal(&reg, &dog, &dog2, &mut CompareContext::new()));
    }

    #[test]
    fn reference_mode_compares_identity() {
        let shared = RecordHandle::new("Customer", vec![Value::I64(1), Value::str("C")]);
        let a = Value::Record(shared.clone());
        let b = Value::Record(shared);
        assert!(reference_equal(&a, &b));
        let c = customer(1, "C");
        assert!(!reference_equal(&a, &c), "equal content, different instance");
    }

    #[test]
    fn shallow_mode_stops_at_one_level() {
        let shared = RecordHandle::new("Customer", vec![Value::I64(1), Value::str("C")]);
        let a = Value::record("Holder", vec![Value::Record(shared.clone())]);
        let b = Value::record("Holder", vec![Value::Record(shared)]);
        assert!(shallow_equal(&a, &b));

        // Same content, distinct nested instances: shallow says not equal.
        let c = Value::record("Holder", vec![customer(1, "C")]);
        assert!(!shallow_equal(&a, &c));
    }
}
