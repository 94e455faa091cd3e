// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! Raw bytes <-> typed [`Value`] conversion (§4.H).

use byteorder::{BigEndian, ByteOrder};

use crate::constant::DataType;
use crate::error::{Error, Result};
use crate::tag::Tag;

/// A dynamically typed PLC value. The source protocol returns heterogeneous
/// values in a single list, so callers get a tagged sum rather than N
/// separate typed accessors.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Real(f64),
    Text(String),
    Bytes(Vec<u8>),
    Array(Vec<Value>),
}

/// Encode `value` into the on-wire byte representation for `tag`.
pub fn encode_value(tag: &Tag, value: &Value) -> Result<Vec<u8>> {
    if tag.length() > 1 && tag.data_type() != DataType::String && tag.data_type() != DataType::WString {
        let items = match value {
            Value::Array(items) => items,
            _ => {
                return Err(Error::Value(format!(
                    "tag with length {} expects an Array value",
                    tag.length()
                )))
            }
        };
        if items.len() != tag.length() as usize {
            return Err(Error::Value(format!(
                "array length mismatch: tag expects {} got {}",
                tag.length(),
                items.len()
            )));
        }
        if tag.data_type() == DataType::Bit {
            let mut buf = vec![0u8; tag.byte_size()];
            for (i, item) in items.iter().enumerate() {
                if let Value::Bool(b) = item {
                    if *b {
                        buf[0] |= 1 << i;
                    }
                } else {
                    return Err(Error::Value("expected Bool in bit array".to_string()));
                }
            }
            return Ok(buf);
        }
        let mut buf = Vec::with_capacity(tag.byte_size());
        for item in items {
            buf.extend(encode_scalar(tag.data_type(), item)?);
        }
        return Ok(buf);
    }

    match tag.data_type() {
        DataType::String => encode_string(tag.length(), value),
        DataType::WString => encode_wstring(tag.length(), value),
        _ => encode_scalar(tag.data_type(), value),
    }
}

fn encode_scalar(data_type: DataType, value: &Value) -> Result<Vec<u8>> {
    match data_type {
        DataType::Bit => {
            let b = as_bool(value)?;
            Ok(vec![if b { 0x01 } else { 0x00 }])
        }
        DataType::Byte => Ok(vec![as_int(value)? as u8]),
        DataType::Char => Ok(vec![as_int(value)? as u8]),
        DataType::Int => {
            let mut buf = [0u8; 2];
            BigEndian::write_i16(&mut buf, as_int(value)? as i16);
            Ok(buf.to_vec())
        }
        DataType::Word => {
            let mut buf = [0u8; 2];
            BigEndian::write_u16(&mut buf, as_int(value)? as u16);
            Ok(buf.to_vec())
        }
        DataType::DInt => {
            let mut buf = [0u8; 4];
            BigEndian::write_i32(&mut buf, as_int(value)? as i32);
            Ok(buf.to_vec())
        }
        DataType::DWord => {
            let mut buf = [0u8; 4];
            BigEndian::write_u32(&mut buf, as_int(value)? as u32);
            Ok(buf.to_vec())
        }
        DataType::Real => {
            let mut buf = [0u8; 4];
            BigEndian::write_f32(&mut buf, as_real(value)? as f32);
            Ok(buf.to_vec())
        }
        DataType::LReal => {
            let mut buf = [0u8; 8];
            BigEndian::write_f64(&mut buf, as_real(value)?);
            Ok(buf.to_vec())
        }
        DataType::String | DataType::WString => unreachable!("handled by caller"),
    }
}

fn encode_string(max_len: u32, value: &Value) -> Result<Vec<u8>> {
    let text = as_text(value)?;
    if text.len() > max_len as usize {
        return Err(Error::Value(format!(
            "string of length {} exceeds declared max {}",
            text.len(),
            max_len
        )));
    }
    let mut buf = vec![0u8; max_len as usize + 2];
    buf[0] = max_len as u8;
    buf[1] = text.len() as u8;
    buf[2..2 + text.len()].copy_from_slice(text.as_bytes());
    Ok(buf)
}

fn encode_wstring(max_len: u32, value: &Value) -> Result<Vec<u8>> {
    let text = as_text(value)?;
    let units: Vec<u16> = text.encode_utf16().collect();
    if units.len() > max_len as usize {
        return Err(Error::Value(format!(
            "wstring of length {} exceeds declared max {}",
            units.len(),
            max_len
        )));
    }
    let mut buf = vec![0u8; max_len as usize * 2 + 4];
    BigEndian::write_u16(&mut buf[0..2], max_len as u16);
    BigEndian::write_u16(&mut buf[2..4], units.len() as u16);
    for (i, unit) in units.iter().enumerate() {
        BigEndian::write_u16(&mut buf[4 + i * 2..6 + i * 2], *unit);
    }
    Ok(buf)
}

/// Decode raw payload bytes for `tag` into a [`Value`].
pub fn decode_value(tag: &Tag, bytes: &[u8]) -> Result<Value> {
    if tag.length() > 1 && tag.data_type() != DataType::String && tag.data_type() != DataType::WString
    {
        if tag.data_type() == DataType::Bit {
            let byte = *bytes
                .first()
                .ok_or_else(|| Error::Value("empty bit-array payload".to_string()))?;
            let items = (0..tag.length())
                .map(|i| Value::Bool(byte & (1 << i) != 0))
                .collect();
            return Ok(Value::Array(items));
        }
        let element_size = tag.data_type().byte_size(1);
        let mut items = Vec::with_capacity(tag.length() as usize);
        for chunk in bytes.chunks(element_size) {
            items.push(decode_scalar(tag.data_type(), chunk)?);
        }
        return Ok(Value::Array(items));
    }

    match tag.data_type() {
        DataType::String => decode_string(bytes),
        DataType::WString => decode_wstring(bytes),
        _ => decode_scalar(tag.data_type(), bytes),
    }
}

fn decode_scalar(data_type: DataType, bytes: &[u8]) -> Result<Value> {
    match data_type {
        DataType::Bit => Ok(Value::Bool(bytes.first().copied().unwrap_or(0) & 0x01 != 0)),
        DataType::Byte => Ok(Value::Int(bytes.first().copied().unwrap_or(0) as i64)),
        DataType::Char => Ok(Value::Text((bytes.first().copied().unwrap_or(0) as char).to_string())),
        DataType::Int => Ok(Value::Int(BigEndian::read_i16(bytes) as i64)),
        DataType::Word => Ok(Value::Int(BigEndian::read_u16(bytes) as i64)),
        DataType::DInt => Ok(Value::Int(BigEndian::read_i32(bytes) as i64)),
        DataType::DWord => Ok(Value::Int(BigEndian::read_u32(bytes) as i64)),
        DataType::Real => Ok(Value::Real(BigEndian::read_f32(bytes) as f64)),
        DataType::LReal => Ok(Value::Real(BigEndian::read_f64(bytes))),
        DataType::String | DataType::WString => unreachable!("handled by caller"),
    }
}

fn decode_string(bytes: &[u8]) -> Result<Value> {
    if bytes.len() < 2 {
        return Err(Error::Value("STRING payload shorter than header".to_string()));
    }
    let cur_len = bytes[1] as usize;
    let chars = bytes
        .get(2..2 + cur_len)
        .ok_or_else(|| Error::Value("STRING payload truncated".to_string()))?;
    Ok(Value::Text(
        chars.iter().map(|&b| b as char).collect::<String>(),
    ))
}

fn decode_wstring(bytes: &[u8]) -> Result<Value> {
    if bytes.len() < 4 {
        return Err(Error::Value("WSTRING payload shorter than header".to_string()));
    }
    let cur_len = BigEndian::read_u16(&bytes[2..4]) as usize;
    let mut units = Vec::with_capacity(cur_len);
    for i in 0..cur_len {
        let start = 4 + i * 2;
        let chunk = bytes
            .get(start..start + 2)
            .ok_or_else(|| Error::Value("WSTRING payload truncated".to_string()))?;
        units.push(BigEndian::read_u16(chunk));
    }
    String::from_utf16(&units)
        .map(Value::Text)
        .map_err(|e| Error::Value(format!("invalid UTF-16 in WSTRING: {}", e)))
}

fn as_bool(value: &Value) -> Result<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        _ => Err(Error::Value("expected a Bool value".to_string())),
    }
}

fn as_int(value: &Value) -> Result<i64> {
    match value {
        Value::Int(i) => Ok(*i),
        _ => Err(Error::Value("expected an Int value".to_string())),
    }
}

fn as_real(value: &Value) -> Result<f64> {
    match value {
        Value::Real(r) => Ok(*r),
        Value::Int(i) => Ok(*i as f64),
        _ => Err(Error::Value("expected a Real value".to_string())),
    }
}

fn as_text(value: &Value) -> Result<&str> {
    match value {
        Value::Text(s) => Ok(s),
        _ => Err(Error::Value("expected a Text value".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constant::MemoryArea;

    #[test]
    fn round_trip_int() {
        let tag = Tag::new(MemoryArea::DataBlock, 1, DataType::Int, 30, 0, 1).unwrap();
        let bytes = encode_value(&tag, &Value::Int(25000)).unwrap();
        assert_eq!(bytes, vec![0x61, 0xA8]);
        assert_eq!(decode_value(&tag, &bytes).unwrap(), Value::Int(25000));
    }

    #[test]
    fn round_trip_bool_preserves_only_target_bit() {
        let tag = Tag::new(MemoryArea::DataBlock, 1, DataType::Bit, 0, 6, 1).unwrap();
        let bytes = encode_value(&tag, &Value::Bool(true)).unwrap();
        assert_eq!(bytes, vec![0x01]);
    }

    #[test]
    fn round_trip_string() {
        let tag = Tag::new(MemoryArea::DataBlock, 1, DataType::String, 10, 0, 10).unwrap();
        let bytes = encode_value(&tag, &Value::Text("hi".to_string())).unwrap();
        assert_eq!(bytes.len(), 12);
        assert_eq!(bytes[0], 10);
        assert_eq!(bytes[1], 2);
        assert_eq!(decode_value(&tag, &bytes).unwrap(), Value::Text("hi".to_string()));
    }

    #[test]
    fn string_too_long_is_a_value_error() {
        let tag = Tag::new(MemoryArea::DataBlock, 1, DataType::String, 10, 0, 2).unwrap();
        let err = encode_value(&tag, &Value::Text("too long".to_string())).unwrap_err();
        assert!(matches!(err, Error::Value(_)));
    }

    #[test]
    fn round_trip_wstring() {
        let tag = Tag::new(MemoryArea::DataBlock, 1, DataType::WString, 0, 0, 4).unwrap();
        let bytes = encode_value(&tag, &Value::Text("hé".to_string())).unwrap();
        assert_eq!(decode_value(&tag, &bytes).unwrap(), Value::Text("hé".to_string()));
    }

    #[test]
    fn round_trip_bit_array() {
        let tag = Tag::new(MemoryArea::Merker, 0, DataType::Bit, 0, 0, 4).unwrap();
        // length > 1 BIT arrays are addressed via the planner; byte_size is
        // still defined as 1 per the size table, so we just exercise the
        // array encode/decode directly here.
        let value = Value::Array(vec![
            Value::Bool(true),
            Value::Bool(false),
            Value::Bool(true),
            Value::Bool(true),
        ]);
        let bytes = encode_value(&tag, &value).unwrap();
        assert_eq!(bytes, vec![0b0000_1101]);
        assert_eq!(decode_value(&tag, &bytes).unwrap(), value);
    }
}
