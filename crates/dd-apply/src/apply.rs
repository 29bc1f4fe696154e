//! The apply protocol: consume a delta document against a target value.
//!
//! Operations are applied strictly in document order against a stack of
//! nested record scopes. A document the delta engine produced from
//! `(a, b)` applied to a clone of `a` yields a value deep-equal to `b`.
//!
//! Apply is total on engine-produced documents. Against a target that has
//! diverged (index out of range, missing key, member kind mismatch) it
//! raises the structured [`DdError::Apply`] naming the failing operation
//! and member path, and performs no rollback of the operations already
//! applied.

use log::debug;

use dd_core::{
    DdError, MapKey, PathBuilder, RecordHandle, Registry, Result, TypeSchema, Value, ValueKind,
};
use dd_delta::{DeltaDocument, DeltaOp};

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Apply `doc` to `target`, mutating (or rebinding) it in place.
///
/// Values written into the target are detached copies of the document's
/// payloads, so a document can be applied to any number of targets.
pub fn apply_delta(reg: &Registry, target: &mut Value, doc: &DeltaDocument) -> Result<()> {
    let mut frames: Vec<Frame<'_>> = Vec::new();
    let mut path = PathBuilder::new();

    for op in doc.ops() {
        match op {
            DeltaOp::ReplaceObject { value } => {
                if !frames.is_empty() {
                    return Err(DdError::apply(
                        op.name(),
                        path.as_str(),
                        "replace_object is only valid at the root scope",
                    ));
                }
                *target = value.deep_clone();
            }
            DeltaOp::BeginNested { index } => {
                let (record, schema) = resolve_scope(reg, &frames, target, &path, op)?;
                let member = member_of(schema, *index, &path, op)?;
                let (nested, nested_schema) = enter_nested(reg, &record, member, &path, op)?;
                path.push_member(&member.name);
                frames.push(Frame {
                    record: nested,
                    schema: nested_schema,
                });
            }
            DeltaOp::EndNested => {
                if frames.pop().is_none() {
                    return Err(DdError::apply(
                        op.name(),
                        path.as_str(),
                        "end_nested without begin_nested",
                    ));
                }
                path.pop();
            }
            flat => {
                let (record, schema) = resolve_scope(reg, &frames, target, &path, flat)?;
                apply_flat(&record, schema, flat, &path)?;
            }
        }
    }

    if !frames.is_empty() {
        return Err(DdError::apply(
            "begin_nested",
            path.as_str(),
            "unclosed nested scope at end of document",
        ));
    }
    debug!("applied {} ops", doc.len());
    Ok(())
}

// ---------------------------------------------------------------------------
// Scope resolution
// ---------------------------------------------------------------------------

struct Frame<'r> {
    record: RecordHandle,
    schema: &'r TypeSchema,
}

fn resolve_scope<'r>(
    reg: &'r Registry,
    frames: &[Frame<'r>],
    target: &Value,
    path: &PathBuilder,
    op: &DeltaOp,
) -> Result<(RecordHandle, &'r TypeSchema)> {
    if let Some(frame) = frames.last() {
        return Ok((frame.record.clone(), frame.schema));
    }
    match target {
        Value::Record(rec) => {
            let tag = rec.type_tag();
            let schema = reg.schema(&tag).ok_or_else(|| {
                DdError::apply(op.name(), path.as_str(), format!("unregistered type '{tag}'"))
            })?;
            Ok((rec.clone(), schema))
        }
        other => Err(DdError::apply(
            op.name(),
            path.as_str(),
            format!("target is {}, expected a record", other.kind_name()),
        )),
    }
}

fn member_of<'s>(
    schema: &'s TypeSchema,
    index: u32,
    path: &PathBuilder,
    op: &DeltaOp,
) -> Result<&'s dd_core::Member> {
    schema.member(index).ok_or_else(|| {
        DdError::apply(
            op.name(),
            path.as_str(),
            format!(
                "member index {index} out of range for '{}'",
                schema.type_tag
            ),
        )
    })
}

/// Resolve (and if necessary materialize) the record behind a nested scope.
///
/// A `Null` member whose declared kind names a record type is replaced by a
/// fresh instance with every member `Null` — the equivalent of assigning
/// the type's default constructor before applying the nested operations.
fn enter_nested<'r>(
    reg: &'r Registry,
    record: &RecordHandle,
    member: &dd_core::Member,
    path: &PathBuilder,
    op: &DeltaOp,
) -> Result<(RecordHandle, &'r TypeSchema)> {
    let mpath = member_path(path, &member.name);
    let current = record.member(member.index).unwrap_or(Value::Null);
    let handle = match current {
        Value::Record(h) => h,
        Value::Any { value, .. } => match *value {
            Value::Record(h) => h,
            other => {
                return Err(DdError::apply(
                    op.name(),
                    &mpath,
                    format!("polymorphic payload is {}, expected a record", other.kind_name()),
                ))
            }
        },
        Value::Null => {
            let ValueKind::Record { type_tag } = &member.kind else {
                return Err(DdError::apply(
                    op.name(),
                    &mpath,
                    "cannot materialize a null member without a declared record type",
                ));
            };
            let nested_schema = reg.schema(type_tag).ok_or_else(|| {
                DdError::apply(op.name(), &mpath, format!("unregistered type '{type_tag}'"))
            })?;
            let fresh = RecordHandle::new(
                type_tag.clone(),
                vec![Value::Null; nested_schema.member_count()],
            );
            record.set_member(member.index, Value::Record(fresh.clone()));
            return Ok((fresh, nested_schema));
        }
        other => {
            return Err(DdError::apply(
                op.name(),
                &mpath,
                format!("member is {}, expected a record", other.kind_name()),
            ))
        }
    };
    let tag = handle.type_tag();
    let schema = reg.schema(&tag).ok_or_else(|| {
        DdError::apply(op.name(), &mpath, format!("unregistered type '{tag}'"))
    })?;
    Ok((handle, schema))
}

// ---------------------------------------------------------------------------
// Flat operations
// ---------------------------------------------------------------------------

fn apply_flat(
    record: &RecordHandle,
    schema: &TypeSchema,
    op: &DeltaOp,
    path: &PathBuilder,
) -> Result<()> {
    // Validate the member index against the schema before touching the
    // instance: an index the schema does not know is an apply error even
    // when the instance happens to have that slot.
    let result: std::result::Result<(), String> = match op {
        DeltaOp::SetMember { index, value } => {
            member_of(schema, *index, path, op)?;
            if record.set_member(*index, value.deep_clone()) {
                Ok(())
            } else {
                Err("member slot missing on this instance".to_string())
            }
        }
        DeltaOp::SeqReplaceAt { index, at, value } => {
            member_of(schema, *index, path, op)?;
            record
                .with_member_mut(*index, |slot| seq_replace(slot, *at, value))
                .unwrap_or_else(|| Err("member slot missing on this instance".to_string()))
        }
        DeltaOp::SeqRemoveAt { index, at } => {
            member_of(schema, *index, path, op)?;
            record
                .with_member_mut(*index, |slot| seq_remove(slot, *at))
                .unwrap_or_else(|| Err("member slot missing on this instance".to_string()))
        }
        DeltaOp::SeqAddAt { index, at, value } => {
            member_of(schema, *index, path, op)?;
            record
                .with_member_mut(*index, |slot| seq_insert(slot, *at, value))
                .unwrap_or_else(|| Err("member slot missing on this instance".to_string()))
        }
        DeltaOp::MapSet { index, key, value } => {
            member_of(schema, *index, path, op)?;
            record
                .with_member_mut(*index, |slot| map_set(slot, key, value))
                .unwrap_or_else(|| Err("member slot missing on this instance".to_string()))
        }
        DeltaOp::MapRemove { index, key } => {
            member_of(schema, *index, path, op)?;
            record
                .with_member_mut(*index, |slot| map_remove(slot, key))
                .unwrap_or_else(|| Err("member slot missing on this instance".to_string()))
        }
        DeltaOp::ReplaceObject { .. } | DeltaOp::BeginNested { .. } | DeltaOp::EndNested => {
            unreachable!("handled by the main loop")
        }
    };

    match result {
        Ok(()) => Ok(()),
        Err(reason) => {
            let index = match op {
                DeltaOp::SetMember { index, .. }
                | DeltaOp::SeqReplaceAt { index, .. }
                | DeltaOp::SeqRemoveAt { index, .. }
                | DeltaOp::SeqAddAt { index, .. }
                | DeltaOp::MapSet { index, .. }
                | DeltaOp::MapRemove { index, .. } => *index,
                _ => unreachable!(),
            };
            let member = member_of(schema, index, path, op)?;
            Err(DdError::apply(
                op.name(),
                &member_path(path, &member.name),
                reason,
            ))
        }
    }
}

fn member_path(path: &PathBuilder, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", path.as_str(), name)
    }
}

fn seq_replace(slot: &mut Value, at: usize, value: &Value) -> std::result::Result<(), String> {
    match slot {
        Value::Seq(items) => {
            if at >= items.len() {
                return Err(format!("index {at} out of range (len {})", items.len()));
            }
            items[at] = value.deep_clone();
            Ok(())
        }
        // Deep multi-dimensional arrays take replaces at row-major linear
        // indices.
        Value::Array(arr) => {
            if at >= arr.elems.len() {
                return Err(format!("index {at} out of range (len {})", arr.elems.len()));
            }
            arr.elems[at] = value.deep_clone();
            Ok(())
        }
        other => Err(format!(
            "member is {}, expected a sequence",
            other.kind_name()
        )),
    }
}

fn seq_remove(slot: &mut Value, at: usize) -> std::result::Result<(), String> {
    match slot {
        Value::Seq(items) => {
            if at >= items.len() {
                return Err(format!("index {at} out of range (len {})", items.len()));
            }
            items.remove(at);
            Ok(())
        }
        other => Err(format!(
            "member is {}, expected a sequence",
            other.kind_name()
        )),
    }
}

fn seq_insert(slot: &mut Value, at: usize, value: &Value) -> std::result::Result<(), String> {
    match slot {
        Value::Seq(items) => {
            if at > items.len() {
                return Err(format!("index {at} out of range (len {})", items.len()));
            }
            items.insert(at, value.deep_clone());
            Ok(())
        }
        other => Err(format!(
            "member is {}, expected a sequence",
            other.kind_name()
        )),
    }
}

fn map_set(slot: &mut Value, key: &MapKey, value: &Value) -> std::result::Result<(), String> {
    match slot {
        Value::Map(map) => {
            map.insert(key.clone(), value.deep_clone());
            Ok(())
        }
        other => Err(format!(
            "member is {}, expected a map",
            other.kind_name()
        )),
    }
}

fn map_remove(slot: &mut Value, key: &MapKey) -> std::result::Result<(), String> {
    match slot {
        Value::Map(map) => match map.remove(key) {
            Some(_) => Ok(()),
            None => Err(format!("missing key {key}")),
        },
        other => Err(format!(
            "member is {}, expected a map",
            other.kind_name()
        )),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
