//! Primitive varint/fixed/length-delimited reading and writing over a byte
//! cursor.
//!
//! This is the one layer of the engine that never looks at descriptors: it
//! only knows about the protobuf wire format itself (tags, varints, ZigZag,
//! fixed-width scalars, length-delimited runs).

use thiserror::Error;

/// Errors raised while reading primitives off the wire.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("unexpected end of buffer")]
    Truncated,
    #[error("varint longer than 10 bytes")]
    VarintOverflow,
    #[error("group wire types are not supported (wire_type={0})")]
    UnsupportedGroup(u8),
    #[error("invalid wire type {0}")]
    InvalidWireType(u8),
}

pub type WireResult<T> = Result<T, WireError>;

/// Wire types as they appear in a tag's low 3 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireType {
    Varint = 0,
    Fixed64 = 1,
    LengthDelimited = 2,
    StartGroup = 3,
    EndGroup = 4,
    Fixed32 = 5,
}

impl WireType {
    pub fn from_u8(v: u8) -> WireResult<Self> {
        match v {
            0 => Ok(WireType::Varint),
            1 => Ok(WireType::Fixed64),
            2 => Ok(WireType::LengthDelimited),
            3 => Ok(WireType::StartGroup),
            4 => Ok(WireType::EndGroup),
            5 => Ok(WireType::Fixed32),
            other => Err(WireError::InvalidWireType(other)),
        }
    }
}

/// An immutable view over a contiguous byte range with a movable cursor.
///
/// Every primitive read advances the cursor by exactly the consumed byte
/// count; reads past the end fail with [`WireError::Truncated`] and leave the
/// cursor unchanged.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    pub fn remaining(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    fn read_u8(&mut self) -> WireResult<u8> {
        let byte = *self.buf.get(self.pos).ok_or(WireError::Truncated)?;
        self.pos += 1;
        Ok(byte)
    }

    /// Reads a base-128 varint, MSB of each byte signalling continuation.
    pub fn read_varint(&mut self) -> WireResult<u64> {
        let mut result: u64 = 0;
        for i in 0..10 {
            let byte = self.read_u8()?;
            if i == 9 && byte & 0x7f > 1 {
                // A 10th byte can only carry the single remaining high bit.
                return Err(WireError::VarintOverflow);
            }
            result |= ((byte & 0x7f) as u64) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(result);
            }
        }
        Err(WireError::VarintOverflow)
    }

    pub fn read_sint32(&mut self) -> WireResult<i32> {
        let n = self.read_varint()? as u32;
        Ok(((n >> 1) as i32) ^ -((n & 1) as i32))
    }

    pub fn read_sint64(&mut self) -> WireResult<i64> {
        let n = self.read_varint()?;
        Ok(((n >> 1) as i64) ^ -((n & 1) as i64))
    }

    pub fn read_fixed32(&mut self) -> WireResult<u32> {
        let bytes = self.read_n(4)?;
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
    }

    pub fn read_fixed64(&mut self) -> WireResult<u64> {
        let bytes = self.read_n(8)?;
        Ok(u64::from_le_bytes(bytes.try_into().unwrap()))
    }

    pub fn read_float(&mut self) -> WireResult<f32> {
        Ok(f32::from_bits(self.read_fixed32()?))
    }

    pub fn read_double(&mut self) -> WireResult<f64> {
        Ok(f64::from_bits(self.read_fixed64()?))
    }

    pub fn read_n(&mut self, n: usize) -> WireResult<&'a [u8]> {
        let end = self.pos.checked_add(n).ok_or(WireError::Truncated)?;
        let slice = self.buf.get(self.pos..end).ok_or(WireError::Truncated)?;
        self.pos = end;
        Ok(slice)
    }

    pub fn read_length_delimited(&mut self) -> WireResult<&'a [u8]> {
        let len = self.read_varint()?;
        let len = usize::try_from(len).map_err(|_| WireError::Truncated)?;
        self.read_n(len)
    }

    /// Reads a tag, returning `(field_number, wire_type)`.
    pub fn read_tag(&mut self) -> WireResult<(u32, WireType)> {
        let tag = self.read_varint()?;
        let field_number = (tag >> 3) as u32;
        let wire_type = WireType::from_u8((tag & 0x7) as u8)?;
        Ok((field_number, wire_type))
    }

    /// Skips a field's value given its wire type, per the tag that precedes
    /// it. Rejects group wire types outright (spec'd as unsupported).
    pub fn skip_field(&mut self, wire_type: WireType) -> WireResult<()> {
        match wire_type {
            WireType::Varint => {
                self.read_varint()?;
            }
            WireType::Fixed64 => {
                self.read_n(8)?;
            }
            WireType::LengthDelimited => {
                self.read_length_delimited()?;
            }
            WireType::Fixed32 => {
                self.read_n(4)?;
            }
            WireType::StartGroup | WireType::EndGroup => {
                return Err(WireError::UnsupportedGroup(wire_type as u8));
            }
        }
        Ok(())
    }
}

/// A growable little-endian protobuf byte writer.
#[derive(Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_varint(&mut self, mut value: u64) {
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            if value == 0 {
                self.buf.push(byte);
                break;
            }
            self.buf.push(byte | 0x80);
        }
    }

    pub fn write_tag(&mut self, field_number: u32, wire_type: WireType) {
        let tag = ((field_number as u64) << 3) | (wire_type as u64);
        self.write_varint(tag);
    }

    pub fn write_sint32(&mut self, value: i32) {
        let zigzag = ((value << 1) ^ (value >> 31)) as u32;
        self.write_varint(zigzag as u64);
    }

    pub fn write_sint64(&mut self, value: i64) {
        let zigzag = ((value << 1) ^ (value >> 63)) as u64;
        self.write_varint(zigzag);
    }

    pub fn write_fixed32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_fixed64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_float(&mut self, value: f32) {
        self.write_fixed32(value.to_bits());
    }

    pub fn write_double(&mut self, value: f64) {
        self.write_fixed64(value.to_bits());
    }

    pub fn write_length_delimited(&mut self, bytes: &[u8]) {
        self.write_varint(bytes.len() as u64);
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_bytes_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_round_trip() {
        for value in [0u64, 1, 127, 128, 300, u32::MAX as u64, u64::MAX] {
            let mut w = Writer::new();
            w.write_varint(value);
            let bytes = w.into_vec();
            let mut r = Reader::new(&bytes);
            assert_eq!(r.read_varint().unwrap(), value);
            assert!(r.is_empty());
        }
    }

    #[test]
    fn varint_overflow() {
        let bytes = [0xffu8; 11];
        let mut r = Reader::new(&bytes);
        assert_eq!(r.read_varint(), Err(WireError::VarintOverflow));
    }

    #[test]
    fn truncated_varint() {
        let bytes = [0x80u8];
        let mut r = Reader::new(&bytes);
        assert_eq!(r.read_varint(), Err(WireError::Truncated));
    }

    #[test]
    fn sint32_zigzag() {
        for value in [0i32, -1, 1, -2, 2, i32::MIN, i32::MAX] {
            let mut w = Writer::new();
            w.write_sint32(value);
            let bytes = w.into_vec();
            let mut r = Reader::new(&bytes);
            assert_eq!(r.read_sint32().unwrap(), value);
        }
    }

    #[test]
    fn sint64_zigzag() {
        for value in [0i64, -1, 1, i64::MIN, i64::MAX] {
            let mut w = Writer::new();
            w.write_sint64(value);
            let bytes = w.into_vec();
            let mut r = Reader::new(&bytes);
            assert_eq!(r.read_sint64().unwrap(), value);
        }
    }

    #[test]
    fn fixed_and_floats() {
        let mut w = Writer::new();
        w.write_fixed32(0xdeadbeef);
        w.write_fixed64(0x0123456789abcdef);
        w.write_float(1.5);
        w.write_double(2.25);
        let bytes = w.into_vec();
        let mut r = Reader::new(&bytes);
        assert_eq!(r.read_fixed32().unwrap(), 0xdeadbeef);
        assert_eq!(r.read_fixed64().unwrap(), 0x0123456789abcdef);
        assert_eq!(r.read_float().unwrap(), 1.5);
        assert_eq!(r.read_double().unwrap(), 2.25);
    }

    #[test]
    fn tag_round_trip() {
        let mut w = Writer::new();
        w.write_tag(5, WireType::LengthDelimited);
        let bytes = w.into_vec();
        let mut r = Reader::new(&bytes);
        assert_eq!(r.read_tag().unwrap(), (5, WireType::LengthDelimited));
    }

    #[test]
    fn group_wire_type_rejected() {
        let mut r = Reader::new(&[]);
        assert_eq!(
            r.skip_field(WireType::StartGroup),
            Err(WireError::UnsupportedGroup(3))
        );
    }

    #[test]
    fn length_delimited_round_trip() {
        let mut w = Writer::new();
        w.write_length_delimited(b"hello");
        let bytes = w.into_vec();
        let mut r = Reader::new(&bytes);
        assert_eq!(r.read_length_delimited().unwrap(), b"hello");
    }
}
