//! Protocol notations: `[short]`, `[int]`, `[string]`, `[long string]`,
//! `[bytes]`, `[short bytes]`, `[string list]`. All integers are big-endian.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

fn ensure(buf: &Bytes, needed: usize, what: &'static str) -> Result<(), ProtocolError> {
    if buf.remaining() < needed {
        return Err(ProtocolError::Truncated {
            what,
            needed,
            available: buf.remaining(),
        });
    }
    Ok(())
}

pub fn read_byte(buf: &mut Bytes) -> Result<u8, ProtocolError> {
    ensure(buf, 1, "byte")?;
    Ok(buf.get_u8())
}

pub fn read_short(buf: &mut Bytes) -> Result<u16, ProtocolError> {
    ensure(buf, 2, "short")?;
    Ok(buf.get_u16())
}

pub fn read_int(buf: &mut Bytes) -> Result<i32, ProtocolError> {
    ensure(buf, 4, "int")?;
    Ok(buf.get_i32())
}

pub fn read_long(buf: &mut Bytes) -> Result<i64, ProtocolError> {
    ensure(buf, 8, "long")?;
    Ok(buf.get_i64())
}

pub fn read_string(buf: &mut Bytes) -> Result<String, ProtocolError> {
    let len = read_short(buf)? as usize;
    ensure(buf, len, "string")?;
    utf8(buf.split_to(len), "string")
}

pub fn read_long_string(buf: &mut Bytes) -> Result<String, ProtocolError> {
    let len = read_int(buf)?;
    let len = usize::try_from(len)
        .map_err(|_| ProtocolError::invalid("long string", format!("negative length {len}")))?;
    ensure(buf, len, "long string")?;
    utf8(buf.split_to(len), "long string")
}

/// `[bytes]`: a negative length means null.
pub fn read_bytes(buf: &mut Bytes) -> Result<Option<Bytes>, ProtocolError> {
    let len = read_int(buf)?;
    if len < 0 {
        return Ok(None);
    }
    let len = len as usize;
    ensure(buf, len, "bytes")?;
    Ok(Some(buf.split_to(len)))
}

/// `[value]` kept in its framed form: the returned slice includes the
/// 4-byte length, so it can be retransmitted or handed to the value codec
/// unchanged.
pub fn read_framed_value(buf: &mut Bytes) -> Result<Bytes, ProtocolError> {
    ensure(buf, 4, "value length")?;
    let len = i32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let total = if len < 0 { 4 } else { 4 + len as usize };
    ensure(buf, total, "value")?;
    Ok(buf.split_to(total))
}

pub fn read_short_bytes(buf: &mut Bytes) -> Result<Bytes, ProtocolError> {
    let len = read_short(buf)? as usize;
    ensure(buf, len, "short bytes")?;
    Ok(buf.split_to(len))
}

pub fn read_string_list(buf: &mut Bytes) -> Result<Vec<String>, ProtocolError> {
    let n = read_short(buf)?;
    (0..n).map(|_| read_string(buf)).collect()
}

fn utf8(bytes: Bytes, what: &'static str) -> Result<String, ProtocolError> {
    String::from_utf8(bytes.to_vec()).map_err(|e| ProtocolError::invalid(what, e.to_string()))
}

pub fn write_string(buf: &mut BytesMut, s: &str) -> Result<(), ProtocolError> {
    let len = u16::try_from(s.len())
        .map_err(|_| ProtocolError::invalid("string", format!("{} bytes exceeds [short]", s.len())))?;
    buf.put_u16(len);
    buf.put_slice(s.as_bytes());
    Ok(())
}

pub fn write_long_string(buf: &mut BytesMut, s: &str) -> Result<(), ProtocolError> {
    let len = i32::try_from(s.len())
        .map_err(|_| ProtocolError::invalid("long string", format!("{} bytes exceeds [int]", s.len())))?;
    buf.put_i32(len);
    buf.put_slice(s.as_bytes());
    Ok(())
}

pub fn write_bytes(buf: &mut BytesMut, bytes: Option<&[u8]>) -> Result<(), ProtocolError> {
    match bytes {
        None => buf.put_i32(-1),
        Some(b) => {
            let len = i32::try_from(b.len())
                .map_err(|_| ProtocolError::invalid("bytes", format!("{} bytes exceeds [int]", b.len())))?;
            buf.put_i32(len);
            buf.put_slice(b);
        }
    }
    Ok(())
}

pub fn write_short_bytes(buf: &mut BytesMut, bytes: &[u8]) -> Result<(), ProtocolError> {
    let len = u16::try_from(bytes.len()).map_err(|_| {
        ProtocolError::invalid("short bytes", format!("{} bytes exceeds [short]", bytes.len()))
    })?;
    buf.put_u16(len);
    buf.put_slice(bytes);
    Ok(())
}

pub fn write_string_list(buf: &mut BytesMut, list: &[String]) -> Result<(), ProtocolError> {
    let n = u16::try_from(list.len())
        .map_err(|_| ProtocolError::invalid("string list", format!("{} entries", list.len())))?;
    buf.put_u16(n);
    for s in list {
        write_string(buf, s)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_layout() {
        let mut buf = BytesMut::new();
        write_string(&mut buf, "ks").unwrap();
        assert_eq!(&buf[..], &[0, 2, b'k', b's']);

        let mut bytes = buf.freeze();
        assert_eq!(read_string(&mut bytes).unwrap(), "ks");
        assert!(bytes.is_empty());
    }

    #[test]
    fn null_bytes_use_negative_length() {
        let mut buf = BytesMut::new();
        write_bytes(&mut buf, None).unwrap();
        assert_eq!(&buf[..], &[0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(read_bytes(&mut buf.freeze()).unwrap(), None);
    }

    #[test]
    fn framed_value_keeps_length_prefix() {
        let mut bytes = Bytes::from_static(&[0, 0, 0, 2, 7, 8, 0xFF, 0xFF, 0xFF, 0xFF, 1]);
        assert_eq!(&read_framed_value(&mut bytes).unwrap()[..], &[0, 0, 0, 2, 7, 8]);
        assert_eq!(&read_framed_value(&mut bytes).unwrap()[..], &[0xFF, 0xFF, 0xFF, 0xFF]);
        assert!(matches!(
            read_framed_value(&mut bytes),
            Err(ProtocolError::Truncated { .. })
        ));
    }

    #[test]
    fn truncated_string_reports_need() {
        let mut bytes = Bytes::from_static(&[0, 5, b'a']);
        match read_string(&mut bytes) {
            Err(ProtocolError::Truncated { needed, available, .. }) => {
                assert_eq!((needed, available), (5, 1));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
