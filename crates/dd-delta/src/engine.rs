//! Delta computation.
//!
//! [`compute_delta`] walks two values of the same type in member-index
//! order and appends operations describing how to turn the left ("before")
//! value into the right ("after") value. Equality decisions are delegated
//! to `dd-compare`, so the two engines can never disagree.
//!
//! When the after side is a dirty-tracked record, only flagged members are
//! visited: fast mode trusts the bits and emits without the scalar equality
//! pre-check; validate mode re-compares each flagged member and produces
//! exactly the baseline document. Dirty words are cleared only once the
//! whole document is finalized, so an abort leaves the bits set and the
//! next emit may re-send members but never loses one.

use std::collections::BTreeMap;

use log::debug;

use dd_compare::{deep_equal, element_equal, member_equal, reference_equal, shallow_equal};
use dd_core::{
    CompareContext, CompareKind, MapKey, Member, RecordHandle, Registry, TypeSchema, Value,
};

use crate::document::{DeltaDocument, DeltaOp};
use crate::seqdiff::window;

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Compute the delta document that transforms `a` into `b`.
///
/// Never raises: incompatible shapes produce a whole-value
/// `replace_object`, and equal inputs produce an empty document. Two
/// invocations on the same inputs produce identical documents.
pub fn compute_delta(
    reg: &Registry,
    a: &Value,
    b: &Value,
    ctx: &mut CompareContext,
) -> DeltaDocument {
    let mut doc = DeltaDocument::new();
    let mut emitted_from: Vec<RecordHandle> = Vec::new();

    if let (Value::Record(x), Value::Record(y)) = (a, b) {
        if x.ptr_eq(y) {
            return doc;
        }
        if x.type_tag() == y.type_tag() {
            if let Some(schema) = reg.schema(&x.type_tag()) {
                record_delta(reg, schema, x, y, ctx, &mut doc, &mut emitted_from);
                // Finalized: consume the dirty words that drove emission.
                for handle in &emitted_from {
                    handle.clear_dirty();
                }
                debug!("delta for '{}': {} ops", schema.type_tag, doc.len());
                return doc;
            }
        }
    }

    if a.is_null() && b.is_null() {
        return doc;
    }
    if !deep_equal(reg, a, b, &mut probe(ctx)) {
        doc.push(DeltaOp::ReplaceObject {
            value: b.deep_clone(),
        });
    }
    doc
}

// ---------------------------------------------------------------------------
// Record walk
// ---------------------------------------------------------------------------

/// Fresh context for an equality probe. Probes must not share the delta
/// walk's visited-pair set: a pair recorded by a probe would silence the
/// delta recursion for that pair (and vice versa).
fn probe(ctx: &CompareContext) -> CompareContext {
    let mut p = CompareContext::new();
    p.culture = ctx.culture.clone();
    p.clock = ctx.clock.clone();
    p
}

fn record_delta(
    reg: &Registry,
    schema: &TypeSchema,
    a: &RecordHandle,
    b: &RecordHandle,
    ctx: &mut CompareContext,
    doc: &mut DeltaDocument,
    emitted_from: &mut Vec<RecordHandle>,
) {
    if a.ptr_eq(b) {
        return;
    }
    if schema.cycle_tracking && !ctx.enter(a.ptr_id(), b.ptr_id()) {
        return;
    }

    let dirty = if schema.dirty_tracking { b.dirty() } else { None };
    match dirty {
        Some(bits) => {
            let trust = !ctx.validate_dirty_on_emit;
            for index in bits.iter_set() {
                if let Some(member) = schema.member(index) {
                    emit_member(reg, member, a, b, ctx, doc, trust, emitted_from);
                }
            }
            emitted_from.push(b.clone());
        }
        None => {
            for member in schema.members() {
                emit_member(reg, member, a, b, ctx, doc, false, emitted_from);
            }
        }
    }
}

fn emit_member(
    reg: &Registry,
    member: &Member,
    a: &RecordHandle,
    b: &RecordHandle,
    ctx: &mut CompareContext,
    doc: &mut DeltaDocument,
    trust: bool,
    emitted_from: &mut Vec<RecordHandle>,
) {
    let av = a.member(member.index).unwrap_or(Value::Null);
    let bv = b.member(member.index).unwrap_or(Value::Null);
    match member.compare_kind {
        CompareKind::Skip => {}
        CompareKind::Reference => {
            if trust || !reference_equal(&av, &bv) {
                push_set(doc, member.index, &bv);
            }
        }
        CompareKind::Shallow => {
            if trust || !shallow_equal(&av, &bv) {
                push_set(doc, member.index, &bv);
            }
        }
        CompareKind::Deep => emit_deep(reg, member, &av, &bv, ctx, doc, trust, emitted_from),
    }
}

#[allow(clippy::too_many_arguments)]
fn emit_deep(
    reg: &Registry,
    member: &Member,
    av: &Value,
    bv: &Value,
    ctx: &mut CompareContext,
    doc: &mut DeltaDocument,
    trust: bool,
    emitted_from: &mut Vec<RecordHandle>,
) {
    match (av, bv) {
        (Value::Record(x), Value::Record(y)) if x.type_tag() == y.type_tag() => {
            if let Some(nested) = reg.schema(&x.type_tag()) {
                if x.ptr_eq(y) {
                    return;
                }
                let mut inner = DeltaDocument::new();
                record_delta(reg, nested, x, y, ctx, &mut inner, emitted_from);
                // An empty nested scope is dropped entirely.
                if !inner.is_empty() {
                    doc.push(DeltaOp::BeginNested {
                        index: member.index,
                    });
                    doc.extend(inner);
                    doc.push(DeltaOp::EndNested);
                }
            } else if trust || !av.intrinsic_eq(bv) {
                push_set(doc, member.index, bv);
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
        ) if xt == yt => {
            // Same runtime type: granular when the payload is a registered
            // record, whole-member otherwise.
            if let (Value::Record(x), Value::Record(y)) = (xv.as_ref(), yv.as_ref()) {
                if x.type_tag() == y.type_tag() {
                    if let Some(nested) = reg.schema(&x.type_tag()) {
                        if x.ptr_eq(y) {
                            return;
                        }
                        let mut inner = DeltaDocument::new();
                        record_delta(reg, nested, x, y, ctx, &mut inner, emitted_from);
                        if !inner.is_empty() {
                            doc.push(DeltaOp::BeginNested {
                                index: member.index,
                            });
                            doc.extend(inner);
                            doc.push(DeltaOp::EndNested);
                        }
                        return;
                    }
                }
            }
            if trust || !member_equal(reg, member, av, bv, &mut probe(ctx)) {
                push_set(doc, member.index, bv);
            }
        }
        (Value::Seq(ls), Value::Seq(rs)) => {
            if member.delta_shallow {
                if trust || !member_equal(reg, member, av, bv, &mut probe(ctx)) {
                    push_set(doc, member.index, bv);
                }
            } else if member.order_insensitive {
                // Multiset-equal collections emit nothing; anything else
                // gets the positional rewrite.
                if !member_equal(reg, member, av, bv, &mut probe(ctx)) {
                    emit_sequence_ops(reg, member, ls, rs, ctx, doc);
                }
            } else {
                emit_sequence_ops(reg, member, ls, rs, ctx, doc);
            }
        }
        // Sets are replace-only containers in the op model.
        (Value::Set(_), Value::Set(_)) => {
            if trust || !member_equal(reg, member, av, bv, &mut probe(ctx)) {
                push_set(doc, member.index, bv);
            }
        }
        (Value::Map(lm), Value::Map(rm)) => {
            if member.delta_shallow {
                if trust || !member_equal(reg, member, av, bv, &mut probe(ctx)) {
                    push_set(doc, member.index, bv);
                }
            } else {
                emit_map_ops(reg, member, lm, rm, ctx, doc);
            }
        }
        (Value::Array(la), Value::Array(ra))
            if !member.delta_shallow && la.dims == ra.dims =>
        {
            for (at, (lv, rv)) in la.elems.iter().zip(ra.elems.iter()).enumerate() {
                if !element_equal(reg, member, lv, rv, &mut probe(ctx)) {
                    doc.push(DeltaOp::SeqReplaceAt {
                        index: member.index,
                        at,
                        value: rv.deep_clone(),
                    });
                }
            }
        }
        _ => {
            // Scalars, strings, time, enums, one-sided nulls, runtime-type
            // switches, and shape-changed arrays: whole-member replacement.
            if av.is_null() && bv.is_null() {
                return;
            }
            if trust || !member_equal(reg, member, av, bv, &mut probe(ctx)) {
                push_set(doc, member.index, bv);
            }
        }
    }
}

fn push_set(doc: &mut DeltaDocument, index: u32, value: &Value) {
    doc.push(DeltaOp::SetMember {
        index,
        value: value.deep_clone(),
    });
}

// ---------------------------------------------------------------------------
// Container emitters
// ---------------------------------------------------------------------------

/// Windowed sequence rewrite: interior replaces, then removes in
/// descending position order (so indices stay valid), then adds ascending.
fn emit_sequence_ops(
    reg: &Registry,
    member: &Member,
    left: &[Value],
    right: &[Value],
    ctx: &CompareContext,
    doc: &mut DeltaDocument,
) {
    let win = window(left.len(), right.len(), |li, ri| {
        element_equal(reg, member, &left[li], &right[ri], &mut probe(ctx))
    });
    let p = win.prefix;
    let (ra, rb) = (win.left_interior, win.right_interior);

    for k in 0..ra.min(rb) {
        let at = p + k;
        if !element_equal(reg, member, &left[at], &right[at], &mut probe(ctx)) {
            doc.push(DeltaOp::SeqReplaceAt {
                index: member.index,
                at,
                value: right[at].deep_clone(),
            });
        }
    }
    if ra > rb {
        for at in (p + rb..p + ra).rev() {
            doc.push(DeltaOp::SeqRemoveAt {
                index: member.index,
                at,
            });
        }
    } else if rb > ra {
        for at in p + ra..p + rb {
            doc.push(DeltaOp::SeqAddAt {
                index: member.index,
                at,
                value: right[at].deep_clone(),
            });
        }
    }
}

/// Granular dictionary rewrite: removals for keys only on the left, then
/// sets for new or changed keys, each in ascending key order.
fn emit_map_ops(
    reg: &Registry,
    member: &Member,
    left: &BTreeMap<MapKey, Value>,
    right: &BTreeMap<MapKey, Value>,
    ctx: &CompareContext,
    doc: &mut DeltaDocument,
) {
    for key in left.keys() {
        if !right.contains_key(key) {
            doc.push(DeltaOp::MapRemove {
                index: member.index,
                key: key.clone(),
            });
        }
    }
    for (key, rv) in right {
        let changed = match left.get(key) {
            None => true,
            Some(lv) => !element_equal(reg, member, lv, rv, &mut probe(ctx)),
        };
        if changed {
            doc.push(DeltaOp::MapSet {
                index: member.index,
                key: key.clone(),
                value: rv.deep_clone(),
            });
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
