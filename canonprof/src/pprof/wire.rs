//! Protocol buffer wire format primitives.
//!
//! Only what the profile schema needs: varints (with zigzag for signed
//! values), fixed 32/64-bit scalars, length-delimited bytes and packed
//! repeated varints. Group wire types are rejected.

use thiserror::Error;

/// Errors raised while decoding the wire format.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unexpected end of input at offset {0}")]
    UnexpectedEof(usize),

    #[error("varint at offset {0} is longer than 10 bytes")]
    VarintTooLong(usize),

    #[error("unsupported wire type {wire_type} at offset {offset}")]
    InvalidWireType { wire_type: u8, offset: usize },

    #[error("invalid field number 0 at offset {0}")]
    InvalidFieldNumber(usize),

    #[error("length {len} at offset {offset} runs past the end of the input")]
    LengthOverrun { len: u64, offset: usize },

    #[error("invalid UTF-8 in string field at offset {0}")]
    InvalidUtf8(usize),

    #[error("field {field} has unexpected wire type {wire_type:?}")]
    UnexpectedWireType { field: u32, wire_type: WireType },
}

pub type Result<T> = std::result::Result<T, DecodeError>;

/// The low three bits of a field tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireType {
    Varint = 0,
    Fixed64 = 1,
    LengthDelimited = 2,
    Fixed32 = 5,
}

impl WireType {
    fn from_bits(bits: u8, offset: usize) -> Result<Self> {
        match bits {
            0 => Ok(WireType::Varint),
            1 => Ok(WireType::Fixed64),
            2 => Ok(WireType::LengthDelimited),
            5 => Ok(WireType::Fixed32),
            wire_type => Err(DecodeError::InvalidWireType { wire_type, offset }),
        }
    }
}

pub fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

pub fn zigzag_decode(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

// ============================================================================
// Reader
// ============================================================================

/// Single-pass cursor over an encoded message.
#[derive(Debug, Clone)]
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

    pub fn is_at_end(&self) -> bool {
        self.pos >= self.buf.len()
    }

    pub fn read_varint(&mut self) -> Result<u64> {
        let start = self.pos;
        let mut value: u64 = 0;
        for i in 0..10 {
            let byte = *self
                .buf
                .get(self.pos)
                .ok_or(DecodeError::UnexpectedEof(self.pos))?;
            self.pos += 1;
            value |= u64::from(byte & 0x7f) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(DecodeError::VarintTooLong(start))
    }

    /// Varint truncated to 32 bits.
    pub fn read_varint32(&mut self) -> Result<u32> {
        Ok(self.read_varint()? as u32)
    }

    pub fn read_int64(&mut self) -> Result<i64> {
        Ok(self.read_varint()? as i64)
    }

    pub fn read_sint64(&mut self) -> Result<i64> {
        Ok(zigzag_decode(self.read_varint()?))
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_varint()? != 0)
    }

    pub fn read_fixed64(&mut self) -> Result<u64> {
        let bytes = self.take(8)?;
        let mut array = [0u8; 8];
        array.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(array))
    }

    pub fn read_fixed32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        let mut array = [0u8; 4];
        array.copy_from_slice(bytes);
        Ok(u32::from_le_bytes(array))
    }

    /// Read a field tag: field number and wire type.
    pub fn read_tag(&mut self) -> Result<(u32, WireType)> {
        let offset = self.pos;
        let tag = self.read_varint()?;
        let wire_type = WireType::from_bits((tag & 0x7) as u8, offset)?;
        let field = (tag >> 3) as u32;
        if field == 0 {
            return Err(DecodeError::InvalidFieldNumber(offset));
        }
        Ok((field, wire_type))
    }

    /// Read a length-delimited payload.
    pub fn read_bytes(&mut self) -> Result<&'a [u8]> {
        let offset = self.pos;
        let len = self.read_varint()?;
        let remaining = self.buf.len() - self.pos;
        if len > remaining as u64 {
            return Err(DecodeError::LengthOverrun { len, offset });
        }
        self.take(len as usize)
    }

    pub fn read_string(&mut self) -> Result<&'a str> {
        let offset = self.pos;
        let bytes = self.read_bytes()?;
        std::str::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8(offset))
    }

    /// Read a packed run of varints into `out`.
    pub fn read_packed_varints(&mut self, out: &mut Vec<u64>) -> Result<()> {
        let mut packed = Reader::new(self.read_bytes()?);
        while !packed.is_at_end() {
            out.push(packed.read_varint()?);
        }
        Ok(())
    }

    /// Read a repeated varint field in either packed or unpacked encoding.
    pub fn read_repeated_varint(
        &mut self,
        field: u32,
        wire_type: WireType,
        out: &mut Vec<u64>,
    ) -> Result<()> {
        match wire_type {
            WireType::LengthDelimited => self.read_packed_varints(out),
            WireType::Varint => {
                out.push(self.read_varint()?);
                Ok(())
            }
            wire_type => Err(DecodeError::UnexpectedWireType { field, wire_type }),
        }
    }

    /// Skip over a field's value.
    pub fn skip(&mut self, wire_type: WireType) -> Result<()> {
        match wire_type {
            WireType::Varint => self.read_varint().map(|_| ()),
            WireType::Fixed64 => self.take(8).map(|_| ()),
            WireType::LengthDelimited => self.read_bytes().map(|_| ()),
            WireType::Fixed32 => self.take(4).map(|_| ()),
        }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.buf.len())
            .ok_or(DecodeError::UnexpectedEof(self.buf.len()))?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }
}

/// Fail with [`DecodeError::UnexpectedWireType`] unless `actual` is `expected`.
pub fn expect_wire_type(field: u32, actual: WireType, expected: WireType) -> Result<()> {
    if actual == expected {
        Ok(())
    } else {
        Err(DecodeError::UnexpectedWireType {
            field,
            wire_type: actual,
        })
    }
}

// ============================================================================
// Writer
// ============================================================================

/// Append-only encoder. Scalar helpers omit default (zero) values.
#[derive(Debug, Clone, Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_varint(&mut self, mut value: u64) {
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            if value == 0 {
                self.buf.push(byte);
                return;
            }
            self.buf.push(byte | 0x80);
        }
    }

    pub fn write_tag(&mut self, field: u32, wire_type: WireType) {
        self.write_varint(u64::from(field) << 3 | wire_type as u64);
    }

    pub fn write_uint64(&mut self, field: u32, value: u64) {
        if value != 0 {
            self.write_tag(field, WireType::Varint);
            self.write_varint(value);
        }
    }

    pub fn write_int64(&mut self, field: u32, value: i64) {
        self.write_uint64(field, value as u64);
    }

    pub fn write_sint64(&mut self, field: u32, value: i64) {
        self.write_uint64(field, zigzag_encode(value));
    }

    pub fn write_bool(&mut self, field: u32, value: bool) {
        self.write_uint64(field, u64::from(value));
    }

    /// Length-delimited field. Always written, even when empty.
    pub fn write_bytes(&mut self, field: u32, bytes: &[u8]) {
        self.write_tag(field, WireType::LengthDelimited);
        self.write_varint(bytes.len() as u64);
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_string(&mut self, field: u32, value: &str) {
        self.write_bytes(field, value.as_bytes());
    }

    /// Packed repeated varints. Nothing is written for an empty slice.
    pub fn write_packed_varints(&mut self, field: u32, values: impl IntoIterator<Item = u64>) {
        let mut inner = Writer::new();
        for value in values {
            inner.write_varint(value);
        }
        if !inner.buf.is_empty() {
            self.write_bytes(field, &inner.buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_varint(value: u64) -> Vec<u8> {
        let mut writer = Writer::new();
        writer.write_varint(value);
        writer.into_bytes()
    }

    #[test]
    fn varint_encoding() {
        assert_eq!(encode_varint(0), vec![0x00]);
        assert_eq!(encode_varint(1), vec![0x01]);
        assert_eq!(encode_varint(300), vec![0xac, 0x02]);
        assert_eq!(encode_varint(u64::MAX).len(), 10);
    }

    #[test]
    fn varints_beyond_double_precision_survive() {
        for value in [(1u64 << 53) + 1, u64::MAX - 1, 0x1234_5678_9abc_def0, u64::MAX] {
            let bytes = encode_varint(value);
            let mut reader = Reader::new(&bytes);
            assert_eq!(reader.read_varint().unwrap(), value);
            assert!(reader.is_at_end());
        }
    }

    #[test]
    fn negative_int64_uses_ten_bytes() {
        let mut writer = Writer::new();
        writer.write_int64(1, -1);
        let bytes = writer.into_bytes();
        assert_eq!(bytes.len(), 11);
        let mut reader = Reader::new(&bytes);
        assert_eq!(reader.read_tag().unwrap(), (1, WireType::Varint));
        assert_eq!(reader.read_int64().unwrap(), -1);
    }

    #[test]
    fn zigzag() {
        assert_eq!(zigzag_encode(0), 0);
        assert_eq!(zigzag_encode(-1), 1);
        assert_eq!(zigzag_encode(1), 2);
        assert_eq!(zigzag_encode(-2), 3);
        for value in [0, 1, -1, i64::MAX, i64::MIN, -(1 << 60)] {
            assert_eq!(zigzag_decode(zigzag_encode(value)), value);
        }
    }

    #[test]
    fn truncated_varint_is_an_error() {
        let mut reader = Reader::new(&[0x80, 0x80]);
        assert_eq!(reader.read_varint(), Err(DecodeError::UnexpectedEof(2)));
    }

    #[test]
    fn overlong_varint_is_an_error() {
        let bytes = [0xffu8; 11];
        let mut reader = Reader::new(&bytes);
        assert_eq!(reader.read_varint(), Err(DecodeError::VarintTooLong(0)));
    }

    #[test]
    fn group_wire_types_are_rejected() {
        // field 1, wire type 3 (start group)
        let mut reader = Reader::new(&[0x0b]);
        assert!(matches!(
            reader.read_tag(),
            Err(DecodeError::InvalidWireType { wire_type: 3, .. })
        ));
    }

    #[test]
    fn length_past_end_is_an_error() {
        let mut reader = Reader::new(&[0x05, b'a', b'b']);
        assert!(matches!(
            reader.read_bytes(),
            Err(DecodeError::LengthOverrun { len: 5, .. })
        ));
    }

    #[test]
    fn invalid_utf8_string_is_an_error() {
        let mut reader = Reader::new(&[0x02, 0xff, 0xfe]);
        assert_eq!(reader.read_string(), Err(DecodeError::InvalidUtf8(0)));
    }

    #[test]
    fn packed_and_unpacked_repeated_fields() {
        for values in [vec![], vec![7u64], vec![1, 300, u64::MAX, 0, 42]] {
            let mut writer = Writer::new();
            writer.write_packed_varints(1, values.iter().copied());
            let bytes = writer.into_bytes();

            let mut out = Vec::new();
            let mut reader = Reader::new(&bytes);
            while !reader.is_at_end() {
                let (field, wire_type) = reader.read_tag().unwrap();
                reader.read_repeated_varint(field, wire_type, &mut out).unwrap();
            }
            assert_eq!(out, values);
        }

        // Unpacked: one tag per element.
        let mut writer = Writer::new();
        for value in [3u64, 4] {
            writer.write_tag(1, WireType::Varint);
            writer.write_varint(value);
        }
        let bytes = writer.into_bytes();
        let mut reader = Reader::new(&bytes);
        let mut out = Vec::new();
        while !reader.is_at_end() {
            let (field, wire_type) = reader.read_tag().unwrap();
            reader.read_repeated_varint(field, wire_type, &mut out).unwrap();
        }
        assert_eq!(out, vec![3, 4]);
    }

    #[test]
    fn skip_every_wire_type() {
        let mut writer = Writer::new();
        writer.write_uint64(1, 99);
        writer.write_tag(2, WireType::Fixed64);
        writer.buf.extend_from_slice(&[0; 8]);
        writer.write_tag(3, WireType::Fixed32);
        writer.buf.extend_from_slice(&[0; 4]);
        writer.write_string(4, "skip me");
        writer.write_uint64(5, 7);
        let bytes = writer.into_bytes();

        let mut reader = Reader::new(&bytes);
        for _ in 0..4 {
            let (_, wire_type) = reader.read_tag().unwrap();
            reader.skip(wire_type).unwrap();
        }
        assert_eq!(reader.read_tag().unwrap(), (5, WireType::Varint));
        assert_eq!(reader.read_varint().unwrap(), 7);
    }

    #[test]
    fn fixed_width_scalars() {
        let mut bytes = 0x0102_0304_0506_0708u64.to_le_bytes().to_vec();
        bytes.extend_from_slice(&0xdead_beefu32.to_le_bytes());
        let mut reader = Reader::new(&bytes);
        assert_eq!(reader.read_fixed64().unwrap(), 0x0102_0304_0506_0708);
        assert_eq!(reader.read_fixed32().unwrap(), 0xdead_beef);
        assert!(reader.read_fixed32().is_err());
    }
}
