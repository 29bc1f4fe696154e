//! Binary wire format for delta documents.
//!
//! A document is a length-prefixed operation stream:
//!
//! ```text
//! doc   := op_count:uvarint op*
//! op    := opcode:u8 member_index:uvarint payload
//! ```
//!
//! `begin_nested` carries a uvarint byte count of its body (everything up
//! to and including the matching `end_nested`), so skippers can jump over
//! scopes without parsing them. Primitive payloads are little-endian fixed
//! width; strings are `len:uvarint utf8`; documents are self-delimited and
//! identical inputs encode byte-identically.

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveTime, Timelike};

use dd_core::{ArrayValue, DdError, MapKey, OpaqueValue, RecordHandle, Result, TimeValue, Value};
use dd_core::Decimal;

use crate::document::{DeltaDocument, DeltaOp};

/// Maximum value-nesting depth accepted by the codec. Values embedded in a
/// document must be acyclic; the limit turns a malformed cyclic payload
/// into a wire error instead of unbounded recursion.
pub const RECURSION_LIMIT: u32 = 256;

// Opcodes.
const OP_REPLACE_OBJECT: u8 = 0x01;
const OP_SET_MEMBER: u8 = 0x02;
const OP_BEGIN_NESTED: u8 = 0x03;
const OP_END_NESTED: u8 = 0x04;
const OP_SEQ_REPLACE_AT: u8 = 0x05;
const OP_SEQ_REMOVE_AT: u8 = 0x06;
const OP_SEQ_ADD_AT: u8 = 0x07;
const OP_MAP_SET: u8 = 0x08;
const OP_MAP_REMOVE: u8 = 0x09;

// Value tags.
const VAL_NULL: u8 = 0x00;
const VAL_BOOL: u8 = 0x01;
const VAL_I64: u8 = 0x02;
const VAL_U64: u8 = 0x03;
const VAL_F32: u8 = 0x04;
const VAL_F64: u8 = 0x05;
const VAL_DECIMAL: u8 = 0x06;
const VAL_STR: u8 = 0x07;
const VAL_ENUM: u8 = 0x08;
const VAL_FLAGS: u8 = 0x09;
const VAL_TIME: u8 = 0x0A;
const VAL_OPAQUE: u8 = 0x0B;
const VAL_RECORD: u8 = 0x0C;
const VAL_SEQ: u8 = 0x0D;
const VAL_SET: u8 = 0x0E;
const VAL_MAP: u8 = 0x0F;
const VAL_ARRAY: u8 = 0x10;
const VAL_ANY: u8 = 0x11;

// Time subtags.
const TIME_OFFSET: u8 = 0x00;
const TIME_NAIVE: u8 = 0x01;
const TIME_DATE: u8 = 0x02;
const TIME_OF_DAY: u8 = 0x03;

// Key tags.
const KEY_BOOL: u8 = 0x00;
const KEY_I64: u8 = 0x01;
const KEY_U64: u8 = 0x02;
const KEY_STR: u8 = 0x03;

// ---------------------------------------------------------------------------
// Encode
// ---------------------------------------------------------------------------

/// Encode a document to its wire bytes.
///
/// Fails only on malformed documents (unbalanced nesting, cyclic payloads)
/// — anything the delta engine itself produced encodes cleanly.
pub fn encode(doc: &DeltaDocument) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    write_uvarint(&mut buf, doc.len() as u64);
    encode_ops(doc.ops(), &mut buf)?;
    Ok(buf)
}

fn encode_ops(ops: &[DeltaOp], buf: &mut Vec<u8>) -> Result<()> {
    let mut i = 0;
    while i < ops.len() {
        match &ops[i] {
            DeltaOp::BeginNested { index } => {
                let end = matching_end(ops, i)?;
                let mut body = Vec::new();
                encode_ops(&ops[i + 1..end], &mut body)?;
                // The end marker is part of the counted body.
                body.push(OP_END_NESTED);
                write_uvarint(&mut body, 0);

                buf.push(OP_BEGIN_NESTED);
                write_uvarint(buf, *index as u64);
                write_uvarint(buf, body.len() as u64);
                buf.extend_from_slice(&body);
                i = end + 1;
            }
            DeltaOp::EndNested => {
                return Err(DdError::Wire("end_nested without begin_nested".to_string()));
            }
            op => {
                encode_flat_op(op, buf)?;
                i += 1;
            }
        }
    }
    Ok(())
}

fn matching_end(ops: &[DeltaOp], begin: usize) -> Result<usize> {
    let mut depth = 0usize;
    for (i, op) in ops.iter().enumerate().skip(begin + 1) {
        match op {
            DeltaOp::BeginNested { .. } => depth += 1,
            DeltaOp::EndNested => {
                if depth == 0 {
                    return Ok(i);
                }
                depth -= 1;
            }
            _ => {}
        }
    }
    Err(DdError::Wire("begin_nested without end_nested".to_string()))
}

fn encode_flat_op(op: &DeltaOp, buf: &mut Vec<u8>) -> Result<()> {
    match op {
        DeltaOp::ReplaceObject { value } => {
            buf.push(OP_REPLACE_OBJECT);
            write_uvarint(buf, 0);
            encode_value(value, buf, 0)?;
        }
        DeltaOp::SetMember { index, value } => {
            buf.push(OP_SET_MEMBER);
            write_uvarint(buf, *index as u64);
            encode_value(value, buf, 0)?;
        }
        DeltaOp::SeqReplaceAt { index, at, value } => {
            buf.push(OP_SEQ_REPLACE_AT);
            write_uvarint(buf, *index as u64);
            write_uvarint(buf, *at as u64);
            encode_value(value, buf, 0)?;
        }
        DeltaOp::SeqRemoveAt { index, at } => {
            buf.push(OP_SEQ_REMOVE_AT);
            write_uvarint(buf, *index as u64);
            write_uvarint(buf, *at as u64);
        }
        DeltaOp::SeqAddAt { index, at, value } => {
            buf.push(OP_SEQ_ADD_AT);
            write_uvarint(buf, *index as u64);
            write_uvarint(buf, *at as u64);
            encode_value(value, buf, 0)?;
        }
        DeltaOp::MapSet { index, key, value } => {
            buf.push(OP_MAP_SET);
            write_uvarint(buf, *index as u64);
            encode_key(key, buf);
            encode_value(value, buf, 0)?;
        }
        DeltaOp::MapRemove { index, key } => {
            buf.push(OP_MAP_REMOVE);
            write_uvarint(buf, *index as u64);
            encode_key(key, buf);
        }
        DeltaOp::BeginNested { .. } | DeltaOp::EndNested => {
            unreachable!("nested framing handled by encode_ops")
        }
    }
    Ok(())
}

fn encode_key(key: &MapKey, buf: &mut Vec<u8>) {
    match key {
        MapKey::Bool(b) => {
            buf.push(KEY_BOOL);
            buf.push(*b as u8);
        }
        MapKey::I64(v) => {
            buf.push(KEY_I64);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        MapKey::U64(v) => {
            buf.push(KEY_U64);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        MapKey::Str(s) => {
            buf.push(KEY_STR);
            write_str(buf, s);
        }
    }
}

fn encode_value(value: &Value, buf: &mut Vec<u8>, depth: u32) -> Result<()> {
    if depth > RECURSION_LIMIT {
        return Err(DdError::Wire(format!(
            "value nesting exceeds {RECURSION_LIMIT}"
        )));
    }
    match value {
        Value::Null => buf.push(VAL_NULL),
        Value::Bool(b) => {
            buf.push(VAL_BOOL);
            buf.push(*b as u8);
        }
        Value::I64(v) => {
            buf.push(VAL_I64);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        Value::U64(v) => {
            buf.push(VAL_U64);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        Value::F32(v) => {
            buf.push(VAL_F32);
            buf.extend_from_slice(&v.to_bits().to_le_bytes());
        }
        Value::F64(v) => {
            buf.push(VAL_F64);
            buf.extend_from_slice(&v.to_bits().to_le_bytes());
        }
        Value::Decimal(d) => {
            buf.push(VAL_DECIMAL);
            buf.extend_from_slice(&d.mantissa.to_le_bytes());
            buf.extend_from_slice(&d.scale.to_le_bytes());
        }
        Value::Str(s) => {
            buf.push(VAL_STR);
            write_str(buf, s);
        }
        Value::Enum(v) => {
            buf.push(VAL_ENUM);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        Value::Flags(v) => {
            buf.push(VAL_FLAGS);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        Value::Time(t) => {
            buf.push(VAL_TIME);
            encode_time(t, buf);
        }
        Value::Opaque(o) => {
            buf.push(VAL_OPAQUE);
            write_str(buf, &o.type_name);
            write_uvarint(buf, o.bytes.len() as u64);
            buf.extend_from_slice(&o.bytes);
        }
        Value::Record(rec) => {
            buf.push(VAL_RECORD);
            write_str(buf, &rec.type_tag());
            let members = rec.members();
            write_uvarint(buf, members.len() as u64);
            for m in members.iter() {
                encode_value(m, buf, depth + 1)?;
            }
        }
        Value::Seq(items) => {
            buf.push(VAL_SEQ);
            write_uvarint(buf, items.len() as u64);
            for v in items {
                encode_value(v, buf, depth + 1)?;
            }
        }
        Value::Set(items) => {
            buf.push(VAL_SET);
            write_uvarint(buf, items.len() as u64);
            for v in items {
                encode_value(v, buf, depth + 1)?;
            }
        }
        Value::Map(map) => {
            buf.push(VAL_MAP);
            write_uvarint(buf, map.len() as u64);
            for (k, v) in map {
                encode_key(k, buf);
                encode_value(v, buf, depth + 1)?;
            }
        }
        Value::Array(arr) => {
            buf.push(VAL_ARRAY);
            write_uvarint(buf, arr.dims.len() as u64);
            for d in &arr.dims {
                write_uvarint(buf, *d as u64);
            }
            for v in &arr.elems {
                encode_value(v, buf, depth + 1)?;
            }
        }
        Value::Any { type_tag, value } => {
            buf.push(VAL_ANY);
            write_str(buf, type_tag);
            encode_value(value, buf, depth + 1)?;
        }
    }
    Ok(())
}

fn encode_time(t: &TimeValue, buf: &mut Vec<u8>) {
    match t {
        TimeValue::Offset(dt) => {
            buf.push(TIME_OFFSET);
            buf.extend_from_slice(&dt.timestamp().to_le_bytes());
            buf.extend_from_slice(&dt.timestamp_subsec_nanos().to_le_bytes());
            buf.extend_from_slice(&dt.offset().local_minus_utc().to_le_bytes());
        }
        TimeValue::Naive(dt) => {
            buf.push(TIME_NAIVE);
            let utc = dt.and_utc();
            buf.extend_from_slice(&utc.timestamp().to_le_bytes());
            buf.extend_from_slice(&utc.timestamp_subsec_nanos().to_le_bytes());
        }
        TimeValue::Date(d) => {
            buf.push(TIME_DATE);
            buf.extend_from_slice(&d.num_days_from_ce().to_le_bytes());
        }
        TimeValue::TimeOfDay(t) => {
            buf.push(TIME_OF_DAY);
            buf.extend_from_slice(&t.num_seconds_from_midnight().to_le_bytes());
            buf.extend_from_slice(&t.nanosecond().to_le_bytes());
        }
    }
}

fn write_str(buf: &mut Vec<u8>, s: &str) {
    write_uvarint(buf, s.len() as u64);
    buf.extend_from_slice(s.as_bytes());
}

fn write_uvarint(buf: &mut Vec<u8>, mut v: u64) {
    loop {
        let byte = (v & 0x7f) as u8;
        v >>= 7;
        if v == 0 {
            buf.push(byte);
            break;
        }
        buf.push(byte | 0x80);
    }
}

// ---------------------------------------------------------------------------
// Decode
// ---------------------------------------------------------------------------

/// Decode a document from its wire bytes, verifying nested byte counts and
/// rejecting trailing garbage.
pub fn decode(buf: &[u8]) -> Result<DeltaDocument> {
    let mut r = Reader { buf, pos: 0 };
    let count = r.uvarint()? as usize;
    let mut doc = DeltaDocument::new();
    // Stack of positions where open nested scopes must end.
    let mut scope_ends: Vec<usize> = Vec::new();

    for _ in 0..count {
        let opcode = r.u8()?;
        let index = r.uvarint()? as u32;
        let op = match opcode {
            OP_REPLACE_OBJECT => DeltaOp::ReplaceObject {
                value: decode_value(&mut r, 0)?,
            },
            OP_SET_MEMBER => DeltaOp::SetMember {
                index,
                value: decode_value(&mut r, 0)?,
            },
            OP_BEGIN_NESTED => {
                let body_len = r.uvarint()? as usize;
                scope_ends.push(r.pos + body_len);
                DeltaOp::BeginNested { index }
            }
            OP_END_NESTED => {
                let expected = scope_ends.pop().ok_or_else(|| {
                    DdError::Wire("end_nested without begin_nested".to_string())
                })?;
                if r.pos != expected {
                    return Err(DdError::Wire(format!(
                        "nested byte count mismatch: expected end at {expected}, got {}",
                        r.pos
                    )));
                }
                DeltaOp::EndNested
            }
            OP_SEQ_REPLACE_AT => DeltaOp::SeqReplaceAt {
                index,
                at: r.uvarint()? as usize,
                value: decode_value(&mut r, 0)?,
            },
            OP_SEQ_REMOVE_AT => DeltaOp::SeqRemoveAt {
                index,
                at: r.uvarint()? as usize,
            },
            OP_SEQ_ADD_AT => DeltaOp::SeqAddAt {
                index,
                at: r.uvarint()? as usize,
                value: decode_value(&mut r, 0)?,
            },
            OP_MAP_SET => DeltaOp::MapSet {
                index,
                key: decode_key(&mut r)?,
                value: decode_value(&mut r, 0)?,
            },
            OP_MAP_REMOVE => DeltaOp::MapRemove {
                index,
                key: decode_key(&mut r)?,
            },
            other => {
                return Err(DdError::Wire(format!("unknown opcode {other:#x}")));
            }
        };
        doc.push(op);
    }

    if !scope_ends.is_empty() {
        return Err(DdError::Wire("unclosed nested scope".to_string()));
    }
    if r.pos != buf.len() {
        return Err(DdError::Wire(format!(
            "{} trailing bytes after document",
            buf.len() - r.pos
        )));
    }
    Ok(doc)
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn u8(&mut self) -> Result<u8> {
        let b = *self
            .buf
            .get(self.pos)
            .ok_or_else(|| DdError::Wire("unexpected end of input".to_string()))?;
        self.pos += 1;
        Ok(b)
    }

    fn exact(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return Err(DdError::Wire("unexpected end of input".to_string()));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn uvarint(&mut self) -> Result<u64> {
        let mut out = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = self.u8()?;
            if shift >= 64 {
                return Err(DdError::Wire("uvarint overflow".to_string()));
            }
            out |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(out);
            }
            shift += 7;
        }
    }

    fn i32_le(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.exact(4)?.try_into().map_err(
            |_| DdError::Wire("bad i32".to_string()),
        )?))
    }

    fn u32_le(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.exact(4)?.try_into().map_err(
            |_| DdError::Wire("bad u32".to_string()),
        )?))
    }

    fn i64_le(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.exact(8)?.try_into().map_err(
            |_| DdError::Wire("bad i64".to_string()),
        )?))
    }

    fn u64_le(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.exact(8)?.try_into().map_err(
            |_| DdError::Wire("bad u64".to_string()),
        )?))
    }

    fn str(&mut self) -> Result<String> {
        let len = self.uvarint()? as usize;
        let bytes = self.exact(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| DdError::Wire("invalid utf8 string".to_string()))
    }
}

fn decode_key(r: &mut Reader<'_>) -> Result<MapKey> {
    match r.u8()? {
        KEY_BOOL => Ok(MapKey::Bool(r.u8()? != 0)),
        KEY_I64 => Ok(MapKey::I64(r.i64_le()?)),
        KEY_U64 => Ok(MapKey::U64(r.u64_le()?)),
        KEY_STR => Ok(MapKey::Str(r.str()?)),
        other => Err(DdError::Wire(format!("unknown key tag {other:#x}"))),
    }
}

fn decode_value(r: &mut Reader<'_>, depth: u32) -> Result<Value> {
    if depth > RECURSION_LIMIT {
        return Err(DdError::Wire(format!(
            "value nesting exceeds {RECURSION_LIMIT}"
        )));
    }
    match r.u8()? {
        VAL_NULL => Ok(Value::Null),
        VAL_BOOL => Ok(Value::Bool(r.u8()? != 0)),
        VAL_I64 => Ok(Value::I64(r.i64_le()?)),
        VAL_U64 => Ok(Value::U64(r.u64_le()?)),
        VAL_F32 => Ok(Value::F32(f32::from_bits(r.u32_le()?))),
        VAL_F64 => Ok(Value::F64(f64::from_bits(r.u64_le()?))),
        VAL_DECIMAL => {
            let mantissa = i128::from_le_bytes(
                r.exact(16)?
                    .try_into()
                    .map_err(|_| DdError::Wire("bad i128".to_string()))?,
            );
            let scale = r.u32_le()?;
            Ok(Value::Decimal(Decimal { mantissa, scale }))
        }
        VAL_STR => Ok(Value::Str(r.str()?)),
        VAL_ENUM => Ok(Value::Enum(r.i64_le()?)),
        VAL_FLAGS => Ok(Value::Flags(r.u64_le()?)),
        VAL_TIME => decode_time(r),
        VAL_OPAQUE => {
            let type_name = r.str()?;
            let len = r.uvarint()? as usize;
            let bytes = r.exact(len)?.to_vec();
            Ok(Value::Opaque(OpaqueValue { type_name, bytes }))
        }
        VAL_RECORD => {
            let type_tag = r.str()?;
            let count = r.uvarint()? as usize;
            let mut members = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                members.push(decode_value(r, depth + 1)?);
            }
            Ok(Value::Record(RecordHandle::new(type_tag, members)))
        }
        VAL_SEQ => {
            let count = r.uvarint()? as usize;
            let mut items = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                items.push(decode_value(r, depth + 1)?);
            }
            Ok(Value::Seq(items))
        }
        VAL_SET => {
            let count = r.uvarint()? as usize;
            let mut items = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                items.push(decode_value(r, depth + 1)?);
            }
            Ok(Value::Set(items))
        }
        VAL_MAP => {
            let count = r.uvarint()? as usize;
            let mut map = std::collections::BTreeMap::new();
            for _ in 0..count {
                let k = decode_key(r)?;
                let v = decode_value(r, depth + 1)?;
                map.insert(k, v);
            }
            Ok(Value::Map(map))
        }
        VAL_ARRAY => {
            let rank = r.uvarint()? as usize;
            let mut dims = Vec::with_capacity(rank.min(16));
            for _ in 0..rank {
                dims.push(r.uvarint()? as usize);
            }
            let total: usize = dims.iter().product();
            let mut elems = Vec::with_capacity(total.min(1024));
            for _ in 0..total {
                elems.push(decode_value(r, depth + 1)?);
            }
            ArrayValue::new(dims, elems)
                .map(Value::Array)
                .map_err(|e| DdError::Wire(e.to_string()))
        }
        VAL_ANY => {
            let type_tag = r.str()?;
            let value = decode_value(r, depth + 1)?;
            Ok(Value::Any {
                type_tag,
                value: Box::new(value),
            })
        }
        other => Err(DdError::Wire(format!("unknown value tag {other:#x}"))),
    }
}

fn decode_time(r: &mut Reader<'_>) -> Result<Value> {
    match r.u8()? {
        TIME_OFFSET => {
            let secs = r.i64_le()?;
            let nanos = r.u32_le()?;
            let offset_secs = r.i32_le()?;
            let offset = FixedOffset::east_opt(offset_secs)
                .ok_or_else(|| DdError::Wire("bad utc offset".to_string()))?;
            let utc = DateTime::from_timestamp(secs, nanos)
                .ok_or_else(|| DdError::Wire("bad timestamp".to_string()))?;
            Ok(Value::Time(TimeValue::Offset(utc.with_timezone(&offset))))
        }
        TIME_NAIVE => {
            let secs = r.i64_le()?;
            let nanos = r.u32_le()?;
            let utc = DateTime::from_timestamp(secs, nanos)
                .ok_or_else(|| DdError::Wire("bad timestamp".to_string()))?;
            Ok(Value::Time(TimeValue::Naive(utc.naive_utc())))
        }
        TIME_DATE => {
            let days = r.i32_le()?;
            let date = NaiveDate::from_num_days_from_ce_opt(days)
                .ok_or_else(|| DdError::Wire("bad date".to_string()))?;
            Ok(Value::Time(TimeValue::Date(date)))
        }
        TIME_OF_DAY => {
            let secs = r.u32_le()?;
            let frac = r.u32_le()?;
            let time = NaiveTime::from_num_seconds_from_midnight_opt(secs, frac)
                .ok_or_else(|| DdError::Wire("bad time of day".to_string()))?;
            Ok(Value::Time(TimeValue::TimeOfDay(time)))
        }
        other => Err(DdError::Wire(format!("unknown time subtag {other:#x}"))),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    fn sample_doc() -> DeltaDocument {
        let mut map = BTreeMap::new();
        map.insert(MapKey::from("env"), Value::str("prod"));
        let mut doc = DeltaDocument::new();
        doc.push(DeltaOp::SetMember {
            index: 1,
            value: Value::str("notes"),
        });
        doc.push(DeltaOp::BeginNested { index: 2 });
        doc.push(DeltaOp::SetMember {
            index: 0,
            value: Value::I64(-42),
        });
        doc.push(DeltaOp::BeginNested { index: 1 });
        doc.push(DeltaOp::SetMember {
            index: 0,
            value: Value::Bool(true),
        });
        doc.push(DeltaOp::EndNested);
        doc.push(DeltaOp::EndNested);
        doc.push(DeltaOp::SeqReplaceAt {
            index: 3,
            at: 7,
            value: Value::record("OrderItem", vec![Value::str("A"), Value::I64(1)]),
        });
        doc.push(DeltaOp::SeqRemoveAt { index: 3, at: 2 });
        doc.push(DeltaOp::SeqAddAt {
            index: 3,
            at: 0,
            value: Value::Map(map),
        });
        doc.push(DeltaOp::MapSet {
            index: 4,
            key: MapKey::I64(-5),
            value: Value::F64(2.5),
        });
        doc.push(DeltaOp::MapRemove {
            index: 4,
            key: MapKey::from("old"),
        });
        doc
    }

    #[test]
    fn uvarint_round_trips() {
        for v in [0u64, 1, 127, 128, 300, 16384, u64::MAX] {
            let mut buf = Vec::new();
            write_uvarint(&mut buf, v);
            let mut r = Reader { buf: &buf, pos: 0 };
            assert_eq!(r.uvarint().unwrap(), v);
            assert_eq!(r.pos, buf.len());
        }
    }

    #[test]
    fn document_round_trips() {
        let doc = sample_doc();
        let bytes = encode(&doc).unwrap();
        let back = decode(&bytes).unwrap();
        assert_eq!(doc, back);
    }

    #[test]
    fn encoding_is_byte_deterministic() {
        let doc = sample_doc();
        assert_eq!(encode(&doc).unwrap(), encode(&doc).unwrap());
    }

    #[test]
    fn empty_document_is_one_byte() {
        let doc = DeltaDocument::new();
        let bytes = encode(&doc).unwrap();
        assert_eq!(bytes, vec![0u8]);
        assert!(decode(&bytes).unwrap().is_empty());
    }

    #[test]
    fn all_value_kinds_round_trip() {
        let offset = FixedOffset::east_opt(3600).unwrap();
        let stamp = offset.with_ymd_and_hms(2024, 5, 1, 12, 30, 45).unwrap();
        let values = vec![
            Value::Null,
            Value::Bool(true),
            Value::I64(i64::MIN),
            Value::U64(u64::MAX),
            Value::F32(1.5),
            Value::F64(-0.0),
            Value::Decimal(Decimal { mantissa: -12345, scale: 3 }),
            Value::str("héllo"),
            Value::Enum(3),
            Value::Flags(0b1010),
            Value::Time(TimeValue::Offset(stamp)),
            Value::Time(TimeValue::Date(
                NaiveDate::from_ymd_opt(2024, 2, 29).unwrap(),
            )),
            Value::Time(TimeValue::TimeOfDay(
                NaiveTime::from_hms_opt(23, 59, 59).unwrap(),
            )),
            Value::Opaque(OpaqueValue {
                type_name: "Blob".to_string(),
                bytes: vec![1, 2, 3],
            }),
            Value::Set(vec![Value::I64(1), Value::I64(2)]),
            Value::Array(
                ArrayValue::new(vec![2, 2], vec![Value::I64(0); 4]).unwrap(),
            ),
            Value::any("Dog", Value::record("Dog", vec![Value::str("rex")])),
        ];
        for v in values {
            let mut doc = DeltaDocument::new();
            doc.push(DeltaOp::ReplaceObject { value: v.clone() });
            let bytes = encode(&doc).unwrap();
            let back = decode(&bytes).unwrap();
            assert_eq!(doc, back, "value {v:?} must round-trip");
        }
    }

    #[test]
    fn offset_timestamp_keeps_its_offset() {
        let offset = FixedOffset::east_opt(2 * 3600).unwrap();
        let stamp = offset.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let mut doc = DeltaDocument::new();
        doc.push(DeltaOp::ReplaceObject {
            value: Value::Time(TimeValue::Offset(stamp)),
        });
        let back = decode(&encode(&doc).unwrap()).unwrap();
        let DeltaOp::ReplaceObject {
            value: Value::Time(TimeValue::Offset(decoded)),
        } = &back.ops()[0]
        else {
            panic!("time expected");
        };
        assert_eq!(decoded.offset().local_minus_utc(), 2 * 3600);
        assert!(TimeValue::Offset(stamp).time_eq(&TimeValue::Offset(*decoded)));
    }

    #[test]
    fn unbalanced_nesting_fails_to_encode() {
        let mut doc = DeltaDocument::new();
        doc.push(DeltaOp::BeginNested { index: 0 });
        assert!(encode(&doc).is_err());
        let mut doc2 = DeltaDocument::new();
        doc2.push(DeltaOp::EndNested);
        assert!(encode(&doc2).is_err());
    }

    #[test]
    fn corrupt_input_is_rejected() {
        let doc = sample_doc();
        let bytes = encode(&doc).unwrap();

        // Unknown opcode.
        let mut bad = bytes.clone();
        bad[1] = 0x7f;
        assert!(decode(&bad).is_err());

        // Trailing garbage.
        let mut trailing = bytes.clone();
        trailing.push(0xff);
        assert!(decode(&trailing).is_err());

        // Truncation.
        assert!(decode(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn nested_byte_count_is_verified() {
        let mut doc = DeltaDocument::new();
        doc.push(DeltaOp::BeginNested { index: 1 });
        doc.push(DeltaOp::SetMember {
            index: 0,
            value: Value::I64(7),
        });
        doc.push(DeltaOp::EndNested);
        let mut bytes = encode(&doc).unwrap();
        // bytes[0] = op count, bytes[1] = begin opcode, bytes[2] = index,
        // bytes[3] = body byte count. Corrupt the count.
        bytes[3] = bytes[3].wrapping_add(1);
        assert!(decode(&bytes).is_err());
    }

    #[test]
    fn cyclic_payload_fails_to_encode() {
        let rec = RecordHandle::new("Node", vec![Value::Null]);
        rec.set_member(0, Value::Record(rec.clone()));
        let mut doc = DeltaDocument::new();
        doc.push(DeltaOp::ReplaceObject {
            value: Value::Record(rec),
        });
        assert!(encode(&doc).is_err());
    }
}
