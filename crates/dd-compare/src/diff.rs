//! Path-qualified structural diff.
//!
//! Walks two values under the same schema rules as [`crate::equal`] and
//! collects a [`Difference`] per divergent path. `diff` is empty exactly
//! when [`crate::equal::deep_equal`] is true.

use dd_core::{CompareContext, CompareKind, PathBuilder, Registry, Value};

use crate::difference::Difference;
use crate::equal::{
    keys_equal, reference_equal, shallow_equal, value_equal, EqOpts, ROOT_OPTS,
};

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Enumerate the path-qualified differences between `a` and `b`.
pub fn diff(reg: &Registry, a: &Value, b: &Value, ctx: &mut CompareContext) -> Vec<Difference> {
    let mut out = Vec::new();
    let mut path = PathBuilder::new();
    diff_value(reg, a, b, &ROOT_OPTS, &mut path, &mut out, ctx);
    out
}

// ---------------------------------------------------------------------------
// Walker
// ---------------------------------------------------------------------------

fn diff_value(
    reg: &Registry,
    a: &Value,
    b: &Value,
    opts: &EqOpts<'_>,
    path: &mut PathBuilder,
    out: &mut Vec<Difference>,
    ctx: &mut CompareContext,
) {
    match (a, b) {
        (Value::Null, Value::Null) => {}
        (Value::Record(x), Value::Record(y)) => diff_record(reg, x, y, path, out, ctx),
        (Value::Seq(x), Value::Seq(y)) => {
            if opts.order_insensitive {
                diff_unordered(reg, x, y, opts, path, out, ctx);
            } else {
                diff_ordered(reg, x, y, opts, path, out, ctx);
            }
        }
        (Value::Set(x), Value::Set(y)) => {
            let elem = opts.element();
            diff_unordered(reg, x, y, &elem, path, out, ctx);
        }
        (Value::Map(x), Value::Map(y)) => {
            let elem = opts.element();
            for (k, xv) in x {
                match y.get(k) {
                    Some(yv) => {
                        path.push_key(k);
                        diff_value(reg, xv, yv, &elem, path, out, ctx);
                        path.pop();
                    }
                    None => {
                        path.push_key(k);
                        out.push(Difference::removed(path.render(), xv.clone()));
                        path.pop();
                    }
                }
            }
            for (k, yv) in y {
                if !x.contains_key(k) {
                    path.push_key(k);
                    out.push(Difference::added(path.render(), yv.clone()));
                    path.pop();
                }
            }
        }
        (Value::Array(x), Value::Array(y)) => {
            if x.dims != y.dims {
                out.push(Difference::length_changed(
                    path.render(),
                    a.clone(),
                    b.clone(),
                ));
                return;
            }
            let elem = opts.element();
            for (i, (xv, yv)) in x.elems.iter().zip(y.elems.iter()).enumerate() {
                let coords = x.coords(i);
                for c in &coords {
                    path.push_index(*c);
                }
                diff_value(reg, xv, yv, &elem, path, out, ctx);
                for _ in &coords {
                    path.pop();
                }
            }
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
            if xt != yt {
                // Runtime type switched: a single replacement difference,
                // never a nested walk across concrete types.
                out.push(Difference::type_changed(path.render(), a.clone(), b.clone()));
            } else {
                let elem = opts.element();
                diff_value(reg, xv, yv, &elem, path, out, ctx);
            }
        }
        (Value::Null, _) | (_, Value::Null) => {
            out.push(Difference::changed(path.render(), a.clone(), b.clone()));
        }
        _ if std::mem::discriminant(a) != std::mem::discriminant(b) => {
            out.push(Difference::type_changed(path.render(), a.clone(), b.clone()));
        }
        // Strings and remaining scalars.
        _ => {
            if !value_equal(reg, a, b, opts, ctx) {
                out.push(Difference::changed(path.render(), a.clone(), b.clone()));
            }
        }
    }
}

fn diff_record(
    reg: &Registry,
    a: &dd_core::RecordHandle,
    b: &dd_core::RecordHandle,
    path: &mut PathBuilder,
    out: &mut Vec<Difference>,
    ctx: &mut CompareContext,
) {
    if a.ptr_eq(b) {
        return;
    }
    if a.type_tag() != b.type_tag() {
        out.push(Difference::type_changed(
            path.render(),
            Value::Record(a.clone()),
            Value::Record(b.clone()),
        ));
        return;
    }
    let Some(schema) = reg.schema(&a.type_tag()) else {
        if !Value::Record(a.clone()).intrinsic_eq(&Value::Record(b.clone())) {
            out.push(Difference::changed(
                path.render(),
                Value::Record(a.clone()),
                Value::Record(b.clone()),
            ));
        }
        return;
    };
    if schema.cycle_tracking && !ctx.enter(a.ptr_id(), b.ptr_id()) {
        return;
    }
    let null = Value::Null;
    let am = a.members();
    let bm = b.members();
    for member in schema.members() {
        let av = am.get(member.index as usize).unwrap_or(&null);
        let bv = bm.get(member.index as usize).unwrap_or(&null);
        match member.compare_kind {
            CompareKind::Skip => {}
            CompareKind::Reference => {
                if !reference_equal(av, bv) {
                    path.push_member(&member.name);
                    out.push(Difference::changed(path.render(), av.clone(), bv.clone()));
                    path.pop();
                }
            }
            CompareKind::Shallow => {
                if !shallow_equal(av, bv) {
                    path.push_member(&member.name);
                    out.push(Difference::changed(path.render(), av.clone(), bv.clone()));
                    path.pop();
                }
            }
            CompareKind::Deep => {
                path.push_member(&member.name);
                diff_value(
                    reg,
                    av,
                    bv,
                    &EqOpts::from_member(member),
                    path,
                    out,
                    ctx,
                );
                path.pop();
            }
        }
    }
}

fn diff_ordered(
    reg: &Registry,
    left: &[Value],
    right: &[Value],
    opts: &EqOpts<'_>,
    path: &mut PathBuilder,
    out: &mut Vec<Difference>,
    ctx: &mut CompareContext,
) {
    let elem = opts.element();
    let common = left.len().min(right.len());
    for i in 0..common {
        path.push_index(i);
        diff_value(reg, &left[i], &right[i], &elem, path, out, ctx);
        path.pop();
    }
    for (i, lv) in left.iter().enumerate().skip(common) {
        path.push_index(i);
        out.push(Difference::removed(path.render(), lv.clone()));
        path.pop();
    }
    for (i, rv) in right.iter().enumerate().skip(common) {
        path.push_index(i);
        out.push(Difference::added(path.render(), rv.clone()));
        path.pop();
    }
}

/// Unordered diff: match elements the same way multiset equality does, then
/// report unmatched left elements as removed, unmatched right elements as
/// added, and keyed matches with divergent payloads as nested differences
/// under the left element's index.
fn diff_unordered(
    reg: &Registry,
    left: &[Value],
    right: &[Value],
    opts: &EqOpts<'_>,
    path: &mut PathBuilder,
    out: &mut Vec<Difference>,
    ctx: &mut CompareContext,
) {
    let elem = opts.element();
    let mut used = vec![false; right.len()];
    for (li, lv) in left.iter().enumerate() {
        let mut matched = false;
        for (ri, rv) in right.iter().enumerate() {
            if used[ri] {
                continue;
            }
            if opts.key_members.is_empty() {
                if value_equal(reg, lv, rv, &elem, ctx) {
                    used[ri] = true;
                    matched = true;
                    break;
                }
            } else if keys_equal(reg, lv, rv, opts.key_members, ctx) {
                used[ri] = true;
                matched = true;
                if !value_equal(reg, lv, rv, &elem, ctx) {
                    path.push_index(li);
                    diff_value(reg, lv, rv, &elem, path, out, ctx);
                    path.pop();
                }
                break;
            }
        }
        if !matched {
            path.push_index(li);
            out.push(Difference::removed(path.render(), lv.clone()));
            path.pop();
        }
    }
    for (ri, rv) in right.iter().enumerate() {
        if !used[ri] {
            path.push_index(ri);
            out.push(Difference::added(path.render(), rv.clone()));
            path.pop();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::difference::DifferenceKind;
    use crate::equal::deep_equal;
    use dd_core::{KeyKind, MapKey, MemberDescriptor, TypeDescriptor, ValueKind};
    use std::collections::BTreeMap;

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
            .member(MemberDescriptor::new(
                "Attrs",
                ValueKind::map(KeyKind::Str, ValueKind::Str),
            ));
        Registry::build(&[customer, item, order]).unwrap()
    }

    fn item(sku: &str, qty: i64) -> Value {
        Value::record("OrderItem", vec![Value::str(sku), Value::I64(qty)])
    }

    fn order(id: i64, notes: &str, customer_name: &str, items: Vec<Value>) -> Value {
        Value::record(
            "Order",
            vec![
                Value::I64(id),
                Value::str(notes),
                Value::record(
                    "Customer",
                    vec![Value::I64(1), Value::str(customer_name)],
                ),
                Value::Seq(items),
                Value::Map(BTreeMap::new()),
            ],
        )
    }

    #[test]
    fn equal_values_produce_no_differences() {
        let reg = registry();
        let a = order(1, "a", "C", vec![item("A", 1)]);
        let b = order(1, "a", "C", vec![item("A", 1)]);
        assert!(diff(&reg, &a, &b, &mut CompareContext::new()).is_empty());
    }

    #[test]
    fn scalar_member_difference_has_member_path() {
        let reg = registry();
        let a = order(1, "a", "C", vec![]);
        let b = order(1, "b", "C", vec![]);
        let diffs = diff(&reg, &a, &b, &mut CompareContext::new());
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].path, "Notes");
        assert_eq!(diffs[0].kind, DifferenceKind::Changed);
        assert_eq!(diffs[0].left, Some(Value::str("a")));
        assert_eq!(diffs[0].right, Some(Value::str("b")));
    }

    #[test]
    fn nested_member_path_uses_dots() {
        let reg = registry();
        let a = order(1, "a", "C", vec![]);
        let b = order(1, "a", "D", vec![]);
        let diffs = diff(&reg, &a, &b, &mut CompareContext::new());
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].path, "Customer.Name");
    }

    #[test]
    fn keyed_item_payload_diff_is_reported_under_index() {
        let reg = registry();
        let a = order(1, "a", "C", vec![item("A", 1), item("B", 2)]);
        let b = order(1, "a", "C", vec![item("B", 3), item("A", 1)]);
        let diffs = diff(&reg, &a, &b, &mut CompareContext::new());
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].path, "Items[1].Qty");
    }

    #[test]
    fn unmatched_elements_are_added_and_removed() {
        let reg = registry();
        let a = order(1, "a", "C", vec![item("A", 1), item("B", 2)]);
        let b = order(1, "a", "C", vec![item("A", 1), item("Z", 9)]);
        let diffs = diff(&reg, &a, &b, &mut CompareContext::new());
        let kinds: Vec<DifferenceKind> = diffs.iter().map(|d| d.kind).collect();
        assert!(kinds.contains(&DifferenceKind::Removed));
        assert!(kinds.contains(&DifferenceKind::Added));
    }

    #[test]
    fn map_key_differences() {
        let reg = registry();
        let mk = |pairs: &[(&str, &str)]| {
            let mut m = BTreeMap::new();
            for (k, v) in pairs {
                m.insert(MapKey::from(*k), Value::str(*v));
            }
            Value::Map(m)
        };
        let a = order(1, "a", "C", vec![]);
        let b = order(1, "a", "C", vec![]);
        if let (Value::Record(ra), Value::Record(rb)) = (&a, &b) {
            ra.set_member(4, mk(&[("env", "prod"), ("src", "bench")]));
            rb.set_member(4, mk(&[("env", "prod"), ("src", "ci"), ("role", "x")]));
        }
        let diffs = diff(&reg, &a, &b, &mut CompareContext::new());
        let paths: Vec<&str> = diffs.iter().map(|d| d.path.as_str()).collect();
        assert!(paths.contains(&"Attrs[\"src\"]"));
        assert!(paths.contains(&"Attrs[\"role\"]"));
        assert_eq!(diffs.len(), 2);
    }

    #[test]
    fn null_mismatch_is_single_top_level_difference() {
        let reg = registry();
        let a = order(1, "a", "C", vec![]);
        let diffs = diff(&reg, &a, &Value::Null, &mut CompareContext::new());
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].path, "<root>");
    }

    #[test]
    fn polymorphic_switch_is_one_type_changed() {
        let reg = registry();
        let a = Value::any("Dog", Value::record("Dog", vec![Value::str("rex")]));
        let b = Value::any("Cat", Value::record("Cat", vec![Value::str("tom")]));
        let diffs = diff(&reg, &a, &b, &mut CompareContext::new());
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].kind, DifferenceKind::TypeChanged);
    }

    #[test]
    fn array_shape_change_is_length_changed() {
        let reg = registry();
        let a = Value::Array(
            dd_core::ArrayValue::new(vec![2, 2], vec![Value::I64(0); 4]).unwrap(),
        );
        let b = Value::Array(
            dd_core::ArrayValue::new(vec![2, 3], vec![Value::I64(0); 6]).unwrap(),
        );
        let diffs = diff(&reg, &a, &b, &mut CompareContext::new());
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].kind, DifferenceKind::LengthChanged);
    }

    #[test]
    fn array_element_diff_has_multi_dim_path() {
        let reg = registry();
        let a = Value::Array(
            dd_core::ArrayValue::new(
                vec![2, 2],
                vec![Value::I64(1), Value::I64(2), Value::I64(3), Value::I64(4)],
            )
            .unwrap(),
        );
        let b = Value::Array(
            dd_core::ArrayValue::new(
                vec![2, 2],
                vec![Value::I64(1), Value::I64(2), Value::I64(3), Value::I64(9)],
            )
            .unwrap(),
        );
        let diffs = diff(&reg, &a, &b, &mut CompareContext::new());
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].path, "[1][1]");
    }

    #[test]
    fn diff_is_empty_iff_equal() {
        let reg = registry();
        let cases = [
            (order(1, "a", "C", vec![item("A", 1)]), order(1, "a", "C", vec![item("A", 1)])),
            (order(1, "a", "C", vec![item("A", 1)]), order(2, "b", "D", vec![])),
            (order(1, "a", "C", vec![]), Value::Null),
        ];
        for (a, b) in &cases {
            let eq = deep_equal(&reg, a, b, &mut CompareContext::new());
            let d = diff(&reg, a, b, &mut CompareContext::new());
            assert_eq!(eq, d.is_empty(), "diff and equal disagree: {d:?}");
        }
    }
}
