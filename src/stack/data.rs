//! Bounds-checked reading of big-endian values over shared byte buffers.

use std::fmt;
use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder};
use encoding_rs::MACINTOSH;

use super::error::{Result, StackError};
use super::models::Rectangle;

/// The whole content of a fork, shared without copying between every range
/// that points into it.
pub type SharedData = Arc<[u8]>;

/// A four-character type code, like `STAK` or `snd `.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCharCode(pub u32);

impl FourCharCode {
    pub const fn from_tag(tag: &[u8; 4]) -> Self {
        FourCharCode(u32::from_be_bytes(*tag))
    }
}

impl fmt::Display for FourCharCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0.to_be_bytes() {
            let c = if byte.is_ascii_graphic() || byte == b' ' {
                byte as char
            } else {
                '?'
            };
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for FourCharCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{self}'")
    }
}

/// A view over a slice of a shared buffer. Every read is bounds-checked
/// against the view, never against the underlying buffer, so a range handed
/// to a block reader cannot leak bytes of its neighbors.
#[derive(Debug, Clone)]
pub struct DataRange {
    shared: SharedData,
    offset: usize,
    length: usize,
}

impl DataRange {
    /// A range covering a whole buffer.
    pub fn whole(shared: SharedData) -> Self {
        let length = shared.len();
        DataRange {
            shared,
            offset: 0,
            length,
        }
    }

    /// A range covering `length` bytes of `shared` starting at `offset`.
    ///
    /// # Errors
    /// Fails with `OutOfRange` when the window does not fit in the buffer.
    pub fn new(shared: SharedData, offset: usize, length: usize) -> Result<Self> {
        if offset.checked_add(length).map_or(true, |end| end > shared.len()) {
            return Err(StackError::OutOfRange {
                offset,
                length,
                available: shared.len(),
            });
        }
        Ok(DataRange {
            shared,
            offset,
            length,
        })
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Offset of this range in the underlying buffer.
    pub fn offset_in_file(&self) -> usize {
        self.offset
    }

    /// A sub-view of this range, sharing the same buffer.
    pub fn subrange(&self, offset: usize, length: usize) -> Result<DataRange> {
        self.check(offset, length)?;
        Ok(DataRange {
            shared: Arc::clone(&self.shared),
            offset: self.offset + offset,
            length,
        })
    }

    /// The raw bytes of the whole range.
    pub fn bytes(&self) -> &[u8] {
        &self.shared[self.offset..self.offset + self.length]
    }

    fn check(&self, offset: usize, length: usize) -> Result<()> {
        if offset.checked_add(length).map_or(true, |end| end > self.length) {
            return Err(StackError::OutOfRange {
                offset,
                length,
                available: self.length,
            });
        }
        Ok(())
    }

    fn slice(&self, offset: usize, length: usize) -> Result<&[u8]> {
        self.check(offset, length)?;
        let start = self.offset + offset;
        Ok(&self.shared[start..start + length])
    }

    pub fn read_u8(&self, offset: usize) -> Result<u8> {
        Ok(self.slice(offset, 1)?[0])
    }

    pub fn read_i8(&self, offset: usize) -> Result<i8> {
        Ok(self.read_u8(offset)? as i8)
    }

    pub fn read_u16(&self, offset: usize) -> Result<u16> {
        Ok(BigEndian::read_u16(self.slice(offset, 2)?))
    }

    pub fn read_i16(&self, offset: usize) -> Result<i16> {
        Ok(self.read_u16(offset)? as i16)
    }

    pub fn read_u32(&self, offset: usize) -> Result<u32> {
        Ok(BigEndian::read_u32(self.slice(offset, 4)?))
    }

    pub fn read_i32(&self, offset: usize) -> Result<i32> {
        Ok(self.read_u32(offset)? as i32)
    }

    /// Reads one bit of a 16-bit flag word. Bit 0 is the lowest bit.
    pub fn read_flag(&self, offset: usize, bit: u32) -> Result<bool> {
        Ok((self.read_u16(offset)? >> bit) & 1 != 0)
    }

    /// Reads a 16-bit coordinate, masking the stray high bits some stacks
    /// carry: a `10` top-bit pattern clears bit 15, a `11` pattern is a
    /// genuine negative value.
    pub fn read_coordinate(&self, offset: usize) -> Result<i32> {
        let value = self.read_u16(offset)?;
        Ok(match value >> 14 {
            0b10 => (value & 0x7FFF) as i32,
            0b11 => value as i16 as i32,
            _ => value as i32,
        })
    }

    /// Reads a rectangle stored as top, left, bottom, right coordinates.
    pub fn read_rectangle(&self, offset: usize) -> Result<Rectangle> {
        Ok(Rectangle {
            top: self.read_coordinate(offset)?,
            left: self.read_coordinate(offset + 2)?,
            bottom: self.read_coordinate(offset + 4)?,
            right: self.read_coordinate(offset + 6)?,
        })
    }

    /// Decodes `length` bytes of Mac OS Roman text.
    pub fn read_string(&self, offset: usize, length: usize) -> Result<String> {
        let bytes = self.slice(offset, length)?;
        let (text, _, _) = MACINTOSH.decode(bytes);
        Ok(text.into_owned())
    }

    /// Decodes a null-terminated Mac OS Roman string starting at `offset`.
    ///
    /// # Errors
    /// Fails with `OutOfRange` when no terminator exists before the end of
    /// the range.
    pub fn read_cstring(&self, offset: usize) -> Result<String> {
        let bytes = self.slice(offset, self.length - offset.min(self.length))?;
        match bytes.iter().position(|&b| b == 0) {
            Some(end) => self.read_string(offset, end),
            None => Err(StackError::OutOfRange {
                offset,
                length: bytes.len() + 1,
                available: self.length,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(bytes: &[u8]) -> DataRange {
        DataRange::whole(Arc::from(bytes.to_vec()))
    }

    #[test]
    fn reads_are_big_endian() {
        let data = range(&[0x12, 0x34, 0x56, 0x78]);
        assert_eq!(data.read_u16(0).unwrap(), 0x1234);
        assert_eq!(data.read_u32(0).unwrap(), 0x1234_5678);
        assert_eq!(data.read_i16(2).unwrap(), 0x5678);
    }

    #[test]
    fn out_of_range_reads_fail() {
        let data = range(&[0, 0]);
        assert!(matches!(
            data.read_u32(0),
            Err(StackError::OutOfRange { .. })
        ));
        assert!(matches!(
            data.read_u8(2),
            Err(StackError::OutOfRange { .. })
        ));
    }

    #[test]
    fn subranges_rebase_offsets() {
        let data = range(&[1, 2, 3, 4, 5, 6]);
        let sub = data.subrange(2, 3).unwrap();
        assert_eq!(sub.read_u8(0).unwrap(), 3);
        assert!(sub.read_u8(3).is_err());
        assert!(data.subrange(4, 3).is_err());
    }

    #[test]
    fn coordinates_mask_stray_high_bits() {
        let data = range(&[0x81, 0x56, 0xFF, 0xFE, 0x02, 0x00]);
        assert_eq!(data.read_coordinate(0).unwrap(), 0x156);
        assert_eq!(data.read_coordinate(2).unwrap(), -2);
        assert_eq!(data.read_coordinate(4).unwrap(), 0x200);
    }

    #[test]
    fn cstring_requires_a_terminator() {
        let data = range(b"card\0x");
        assert_eq!(data.read_cstring(0).unwrap(), "card");
        assert!(data.read_cstring(5).is_err());
    }
}
