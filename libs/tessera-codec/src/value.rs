//! Value codec: `Value` ↔ `[value]` (`[int length][payload]`, length -1 = null).

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_bigint::BigInt;
use uuid::Uuid;

use tessera_api::{Decimal, LogicalType, Value};

use crate::error::CodecError;

/// Length field reserved for null / absent values.
pub const NULL_LENGTH: i32 = -1;

/// Encode `value` as a length-prefixed `[value]` for a column of type `ty`.
pub fn encode(value: &Value, ty: &LogicalType) -> Result<Bytes, CodecError> {
    let mut buf = BytesMut::new();
    write_value(&mut buf, value, ty)?;
    Ok(buf.freeze())
}

/// Append `value` as `[value]` to `buf`. On error `buf` is left as it was.
pub fn write_value(buf: &mut BytesMut, value: &Value, ty: &LogicalType) -> Result<(), CodecError> {
    if value.is_null() {
        buf.put_i32(NULL_LENGTH);
        return Ok(());
    }

    let start = buf.len();
    buf.put_i32(0);
    if let Err(e) = serialize(buf, value, ty) {
        buf.truncate(start);
        return Err(e);
    }

    let len = buf.len() - start - 4;
    match i32::try_from(len) {
        Ok(n) => {
            buf[start..start + 4].copy_from_slice(&n.to_be_bytes());
            Ok(())
        }
        Err(_) => {
            buf.truncate(start);
            Err(CodecError::TooLarge { ty: ty.clone(), len })
        }
    }
}

fn serialize(buf: &mut BytesMut, value: &Value, ty: &LogicalType) -> Result<(), CodecError> {
    match (value, ty) {
        (Value::Boolean(b), LogicalType::Boolean) => buf.put_u8(u8::from(*b)),
        (Value::Int(v), LogicalType::Int) => buf.put_i32(*v),
        (Value::BigInt(v), LogicalType::BigInt) => buf.put_i64(*v),
        (Value::Float(v), LogicalType::Float) => buf.put_f32(*v),
        (Value::Double(v), LogicalType::Double) => buf.put_f64(*v),
        (Value::Decimal(d), LogicalType::Decimal) => {
            buf.put_i32(d.scale());
            buf.put_slice(&d.unscaled().to_signed_bytes_be());
        }
        (Value::VarInt(v), LogicalType::VarInt) => buf.put_slice(&v.to_signed_bytes_be()),
        (Value::Text(s), LogicalType::Text) => buf.put_slice(s.as_bytes()),
        (Value::Blob(b), LogicalType::Blob) => buf.put_slice(b),
        (Value::Timestamp(ms), LogicalType::Timestamp) => buf.put_i64(*ms),
        (Value::Uuid(u), LogicalType::Uuid) => buf.put_slice(u.as_bytes()),
        (Value::Inet(IpAddr::V4(a)), LogicalType::Inet) => buf.put_slice(&a.octets()),
        (Value::Inet(IpAddr::V6(a)), LogicalType::Inet) => buf.put_slice(&a.octets()),
        (Value::List(items), LogicalType::List(elem))
        | (Value::Set(items), LogicalType::Set(elem)) => {
            put_count(buf, items.len(), ty)?;
            for item in items {
                write_element(buf, item, elem)?;
            }
        }
        (Value::Map(entries), LogicalType::Map(kt, vt)) => {
            put_count(buf, entries.len(), ty)?;
            for (k, v) in entries {
                write_element(buf, k, kt)?;
                write_element(buf, v, vt)?;
            }
        }
        _ => return Err(CodecError::mismatch(ty, value.type_name())),
    }
    Ok(())
}

fn put_count(buf: &mut BytesMut, n: usize, ty: &LogicalType) -> Result<(), CodecError> {
    let n = i32::try_from(n).map_err(|_| CodecError::TooLarge { ty: ty.clone(), len: n })?;
    buf.put_i32(n);
    Ok(())
}

/// Collection elements may not be null.
fn write_element(buf: &mut BytesMut, value: &Value, ty: &LogicalType) -> Result<(), CodecError> {
    if value.is_null() {
        return Err(CodecError::mismatch(ty, "null collection element"));
    }
    write_value(buf, value, ty)
}

/// Decode one `[value]` occupying all of `bytes`.
pub fn decode(ty: &LogicalType, bytes: &[u8]) -> Result<Value, CodecError> {
    let mut buf = Bytes::copy_from_slice(bytes);
    let value = read_value(&mut buf, ty)?;
    if buf.has_remaining() {
        return Err(CodecError::malformed(
            ty,
            format!("{} trailing bytes after value", buf.remaining()),
        ));
    }
    Ok(value)
}

/// Read one `[value]` from the front of `buf`. Length -1 yields `Null` for
/// every type.
pub fn read_value(buf: &mut Bytes, ty: &LogicalType) -> Result<Value, CodecError> {
    if buf.remaining() < 4 {
        return Err(CodecError::malformed(ty, "missing length prefix"));
    }
    let len = buf.get_i32();
    if len == NULL_LENGTH {
        return Ok(Value::Null);
    }
    let len = usize::try_from(len)
        .map_err(|_| CodecError::malformed(ty, format!("invalid length {len}")))?;
    if len > buf.remaining() {
        return Err(CodecError::malformed(
            ty,
            format!("length {len} overruns {} available bytes", buf.remaining()),
        ));
    }
    deserialize(ty, buf.split_to(len))
}

/// Decode a bare payload (no length prefix) of type `ty`.
pub fn deserialize(ty: &LogicalType, payload: Bytes) -> Result<Value, CodecError> {
    if let Some(width) = ty.fixed_width() {
        if payload.len() != width {
            return Err(CodecError::malformed(
                ty,
                format!("expected {width} bytes, got {}", payload.len()),
            ));
        }
    }

    let value = match ty {
        LogicalType::Boolean => Value::Boolean(payload[0] != 0),
        LogicalType::Int => Value::Int(i32::from_be_bytes(fixed(ty, &payload)?)),
        LogicalType::BigInt => Value::BigInt(i64::from_be_bytes(fixed(ty, &payload)?)),
        LogicalType::Float => Value::Float(f32::from_be_bytes(fixed(ty, &payload)?)),
        LogicalType::Double => Value::Double(f64::from_be_bytes(fixed(ty, &payload)?)),
        LogicalType::Timestamp => Value::Timestamp(i64::from_be_bytes(fixed(ty, &payload)?)),
        LogicalType::Uuid => Value::Uuid(Uuid::from_bytes(fixed(ty, &payload)?)),
        LogicalType::Decimal => {
            if payload.len() < 5 {
                return Err(CodecError::malformed(
                    ty,
                    format!("expected scale and unscaled bytes, got {} bytes", payload.len()),
                ));
            }
            let scale = i32::from_be_bytes(fixed(ty, &payload[..4])?);
            Value::Decimal(Decimal::new(BigInt::from_signed_bytes_be(&payload[4..]), scale))
        }
        LogicalType::VarInt => {
            if payload.is_empty() {
                return Err(CodecError::malformed(ty, "empty varint"));
            }
            Value::VarInt(BigInt::from_signed_bytes_be(&payload))
        }
        LogicalType::Text => Value::Text(
            String::from_utf8(payload.to_vec())
                .map_err(|e| CodecError::malformed(ty, e.to_string()))?,
        ),
        LogicalType::Blob => Value::Blob(payload),
        LogicalType::Inet => match payload.len() {
            4 => Value::Inet(IpAddr::V4(Ipv4Addr::from(fixed::<4>(ty, &payload)?))),
            16 => Value::Inet(IpAddr::V6(Ipv6Addr::from(fixed::<16>(ty, &payload)?))),
            n => return Err(CodecError::malformed(ty, format!("address of {n} bytes"))),
        },
        LogicalType::List(elem) => Value::List(read_elements(ty, elem, payload)?),
        LogicalType::Set(elem) => Value::Set(read_elements(ty, elem, payload)?),
        LogicalType::Map(kt, vt) => {
            let mut buf = payload;
            let count = read_count(ty, &mut buf, 8)?;
            let mut entries = Vec::with_capacity(count);
            for _ in 0..count {
                let k = read_value(&mut buf, kt)?;
                let v = read_value(&mut buf, vt)?;
                entries.push((k, v));
            }
            ensure_consumed(ty, &buf)?;
            Value::Map(entries)
        }
    };
    Ok(value)
}

fn fixed<const N: usize>(ty: &LogicalType, bytes: &[u8]) -> Result<[u8; N], CodecError> {
    bytes
        .try_into()
        .map_err(|_| CodecError::malformed(ty, format!("expected {N} bytes, got {}", bytes.len())))
}

fn read_elements(ty: &LogicalType, elem: &LogicalType, payload: Bytes) -> Result<Vec<Value>, CodecError> {
    let mut buf = payload;
    let count = read_count(ty, &mut buf, 4)?;
    let mut items = Vec::with_capacity(count);
    for _ in 0..count {
        items.push(read_value(&mut buf, elem)?);
    }
    ensure_consumed(ty, &buf)?;
    Ok(items)
}

/// Read a collection count and reject counts the remaining bytes cannot
/// hold, before anything is allocated. `min_entry` is the smallest encoded
/// size of one entry (one length prefix per element).
fn read_count(ty: &LogicalType, buf: &mut Bytes, min_entry: usize) -> Result<usize, CodecError> {
    if buf.remaining() < 4 {
        return Err(CodecError::malformed(ty, "missing element count"));
    }
    let count = buf.get_i32();
    let count = usize::try_from(count)
        .map_err(|_| CodecError::malformed(ty, format!("negative element count {count}")))?;
    if count.saturating_mul(min_entry) > buf.remaining() {
        return Err(CodecError::malformed(
            ty,
            format!("{count} elements overrun {} available bytes", buf.remaining()),
        ));
    }
    Ok(count)
}

fn ensure_consumed(ty: &LogicalType, buf: &Bytes) -> Result<(), CodecError> {
    if buf.has_remaining() {
        return Err(CodecError::malformed(
            ty,
            format!("{} trailing bytes after elements", buf.remaining()),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn round_trip(value: Value, ty: LogicalType) {
        let bytes = encode(&value, &ty).unwrap();
        assert_eq!(decode(&ty, &bytes).unwrap(), value, "round trip of {ty}");
    }

    #[test]
    fn scalars_are_big_endian() {
        assert_eq!(&encode(&Value::Int(1), &LogicalType::Int).unwrap()[..], &[0, 0, 0, 4, 0, 0, 0, 1]);
        assert_eq!(
            &encode(&Value::BigInt(-2), &LogicalType::BigInt).unwrap()[4..],
            &[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFE]
        );
        assert_eq!(
            &encode(&Value::Float(1.0), &LogicalType::Float).unwrap()[4..],
            &1.0f32.to_be_bytes()
        );
    }

    #[test]
    fn boolean_is_canonical_on_encode_lenient_on_decode() {
        assert_eq!(&encode(&Value::Boolean(true), &LogicalType::Boolean).unwrap()[..], &[0, 0, 0, 1, 1]);
        assert_eq!(&encode(&Value::Boolean(false), &LogicalType::Boolean).unwrap()[..], &[0, 0, 0, 1, 0]);
        assert_eq!(decode(&LogicalType::Boolean, &[0, 0, 0, 1, 0x7F]).unwrap(), Value::Boolean(true));
    }

    #[test]
    fn null_round_trips_for_every_type() {
        let types = [
            LogicalType::Boolean,
            LogicalType::Int,
            LogicalType::BigInt,
            LogicalType::Float,
            LogicalType::Double,
            LogicalType::Decimal,
            LogicalType::VarInt,
            LogicalType::Text,
            LogicalType::Blob,
            LogicalType::Timestamp,
            LogicalType::Uuid,
            LogicalType::Inet,
            LogicalType::list(LogicalType::Int),
            LogicalType::set(LogicalType::Text),
            LogicalType::map(LogicalType::Text, LogicalType::Double),
        ];
        for ty in types {
            let bytes = encode(&Value::Null, &ty).unwrap();
            assert_eq!(&bytes[..], &[0xFF, 0xFF, 0xFF, 0xFF]);
            assert_eq!(decode(&ty, &bytes).unwrap(), Value::Null);
        }
    }

    #[test]
    fn decimal_keeps_scale_and_unscaled() {
        let d: Decimal = "-8.10101".parse().unwrap();
        let bytes = encode(&Value::Decimal(d.clone()), &LogicalType::Decimal).unwrap();
        // scale 5, then -810101 as minimal two's complement (0xF3A38B).
        assert_eq!(&bytes[..], &[0, 0, 0, 7, 0, 0, 0, 5, 0xF3, 0xA3, 0x8B]);
        match decode(&LogicalType::Decimal, &bytes).unwrap() {
            Value::Decimal(back) => {
                assert_eq!(back.unscaled(), &BigInt::from(-810101));
                assert_eq!(back.scale(), 5);
                assert_eq!(back, d);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn varint_uses_minimal_twos_complement() {
        let cases: [(i64, &[u8]); 5] = [
            (0, &[0x00]),
            (127, &[0x7F]),
            (128, &[0x00, 0x80]),
            (-1, &[0xFF]),
            (-129, &[0xFF, 0x7F]),
        ];
        for (n, expected) in cases {
            let bytes = encode(&Value::VarInt(BigInt::from(n)), &LogicalType::VarInt).unwrap();
            assert_eq!(&bytes[4..], expected, "varint {n}");
        }
    }

    #[test]
    fn inet_dispatches_on_length() {
        round_trip(Value::Inet("10.0.0.1".parse().unwrap()), LogicalType::Inet);
        round_trip(Value::Inet("::1".parse().unwrap()), LogicalType::Inet);
        assert!(matches!(
            decode(&LogicalType::Inet, &[0, 0, 0, 3, 1, 2, 3]),
            Err(CodecError::MalformedValue { .. })
        ));
    }

    #[test]
    fn collections_nest() {
        round_trip(
            Value::Map(vec![
                (Value::Text("a".into()), Value::List(vec![Value::Int(1), Value::Int(2)])),
                (Value::Text("b".into()), Value::List(vec![])),
            ]),
            LogicalType::map(LogicalType::Text, LogicalType::list(LogicalType::Int)),
        );
        round_trip(
            Value::Set(vec![Value::Uuid(Uuid::from_u128(7))]),
            LogicalType::set(LogicalType::Uuid),
        );
    }

    #[test]
    fn collection_layout() {
        let bytes = encode(
            &Value::List(vec![Value::Int(5), Value::Int(6)]),
            &LogicalType::list(LogicalType::Int),
        )
        .unwrap();
        assert_eq!(
            &bytes[..],
            &[0, 0, 0, 20, 0, 0, 0, 2, 0, 0, 0, 4, 0, 0, 0, 5, 0, 0, 0, 4, 0, 0, 0, 6]
        );
    }

    #[test]
    fn wrong_width_is_malformed() {
        assert!(matches!(
            decode(&LogicalType::Int, &[0, 0, 0, 3, 1, 2, 3]),
            Err(CodecError::MalformedValue { .. })
        ));
        assert!(matches!(
            decode(&LogicalType::BigInt, &[0, 0, 0, 4, 0, 0, 0, 1]),
            Err(CodecError::MalformedValue { .. })
        ));
        assert!(matches!(
            decode(&LogicalType::Uuid, &[0, 0, 0, 0]),
            Err(CodecError::MalformedValue { .. })
        ));
    }

    #[test]
    fn collection_count_overrun_is_malformed() {
        // Declares 1000 elements in an 8-byte payload.
        let bytes = [0, 0, 0, 8, 0, 0, 0x03, 0xE8, 0, 0, 0, 0];
        match decode(&LogicalType::list(LogicalType::Int), &bytes) {
            Err(CodecError::MalformedValue { reason, .. }) => assert!(reason.contains("overrun")),
            other => panic!("unexpected {other:?}"),
        }
        let negative = [0, 0, 0, 4, 0xFF, 0xFF, 0xFF, 0xFE];
        assert!(decode(&LogicalType::set(LogicalType::Int), &negative).is_err());
    }

    #[test]
    fn invalid_utf8_is_malformed() {
        assert!(matches!(
            decode(&LogicalType::Text, &[0, 0, 0, 2, 0xC3, 0x28]),
            Err(CodecError::MalformedValue { .. })
        ));
    }

    #[test]
    fn tag_mismatch_is_rejected() {
        let err = encode(&Value::Text("x".into()), &LogicalType::Int).unwrap_err();
        assert_eq!(
            err,
            CodecError::TypeMismatch {
                expected: LogicalType::Int,
                actual: "text".into()
            }
        );
        assert!(encode(&Value::Int(1), &LogicalType::BigInt).is_err());
        assert!(encode(
            &Value::List(vec![Value::Int(1), Value::Null]),
            &LogicalType::list(LogicalType::Int)
        )
        .is_err());
    }

    #[test]
    fn failed_write_leaves_buffer_untouched() {
        let mut buf = BytesMut::from(&b"xy"[..]);
        let bad = Value::List(vec![Value::Int(1), Value::Text("no".into())]);
        assert!(write_value(&mut buf, &bad, &LogicalType::list(LogicalType::Int)).is_err());
        assert_eq!(&buf[..], b"xy");
    }

    fn arb_scalar() -> impl Strategy<Value = (Value, LogicalType)> {
        prop_oneof![
            any::<bool>().prop_map(|v| (Value::Boolean(v), LogicalType::Boolean)),
            any::<i32>().prop_map(|v| (Value::Int(v), LogicalType::Int)),
            any::<i64>().prop_map(|v| (Value::BigInt(v), LogicalType::BigInt)),
            (-1.0e30f32..1.0e30).prop_map(|v| (Value::Float(v), LogicalType::Float)),
            (-1.0e300f64..1.0e300).prop_map(|v| (Value::Double(v), LogicalType::Double)),
            (any::<i64>(), -20i32..20).prop_map(|(u, s)| (
                Value::Decimal(Decimal::new(u, s)),
                LogicalType::Decimal
            )),
            any::<i128>().prop_map(|v| (Value::VarInt(BigInt::from(v)), LogicalType::VarInt)),
            ".{0,16}".prop_map(|v| (Value::Text(v), LogicalType::Text)),
            prop::collection::vec(any::<u8>(), 0..16)
                .prop_map(|v| (Value::Blob(Bytes::from(v)), LogicalType::Blob)),
            any::<i64>().prop_map(|v| (Value::Timestamp(v), LogicalType::Timestamp)),
            any::<u128>().prop_map(|v| (Value::Uuid(Uuid::from_u128(v)), LogicalType::Uuid)),
            any::<[u8; 4]>().prop_map(|v| (Value::Inet(IpAddr::from(v)), LogicalType::Inet)),
            any::<[u8; 16]>().prop_map(|v| (Value::Inet(IpAddr::from(v)), LogicalType::Inet)),
        ]
    }

    proptest! {
        #[test]
        fn scalar_round_trip((value, ty) in arb_scalar()) {
            let bytes = encode(&value, &ty).unwrap();
            prop_assert_eq!(decode(&ty, &bytes).unwrap(), value);
        }

        #[test]
        fn int_list_round_trip(items in prop::collection::vec(any::<i32>(), 0..32)) {
            let ty = LogicalType::list(LogicalType::Int);
            let value = Value::List(items.into_iter().map(Value::Int).collect());
            let bytes = encode(&value, &ty).unwrap();
            prop_assert_eq!(decode(&ty, &bytes).unwrap(), value);
        }

        #[test]
        fn decode_never_panics(ty_idx in 0usize..4, bytes in prop::collection::vec(any::<u8>(), 0..64)) {
            let ty = [
                LogicalType::Int,
                LogicalType::Decimal,
                LogicalType::list(LogicalType::Text),
                LogicalType::map(LogicalType::Int, LogicalType::Blob),
            ][ty_idx].clone();
            let _ = decode(&ty, &bytes);
        }
    }
}
