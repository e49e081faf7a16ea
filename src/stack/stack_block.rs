//! Field reads of the stack block, the global header of the data fork.

use byteorder::{BigEndian, ByteOrder};
use log::debug;

use super::data::DataRange;
use super::error::Result;
use super::models::{FileVersion, HyperCardVersion, Point, Rectangle, Size, UserLevel};

/// Start of the region that is encrypted in private access stacks.
pub const ENCODED_HEADER_OFFSET: usize = 0x18;
/// Length of that region.
pub const ENCODED_HEADER_LENGTH: usize = 0x32;

const DEFAULT_WIDTH: i32 = 512;
const DEFAULT_HEIGHT: i32 = 342;

/// Reads the fields of a stack block.
///
/// When the stack is private access, the bytes at `0x18..0x4A` are encrypted
/// on disk; a decoded copy of that region overlays the raw bytes for every
/// read falling inside it.
pub struct StackBlockReader {
    data: DataRange,
    decoded_header: Option<Vec<u8>>,
}

impl StackBlockReader {
    pub fn new(data: DataRange, decoded_header: Option<Vec<u8>>) -> Self {
        StackBlockReader {
            data,
            decoded_header,
        }
    }

    fn read_u32(&self, offset: usize) -> Result<u32> {
        if let Some(header) = &self.decoded_header {
            if offset >= ENCODED_HEADER_OFFSET
                && offset + 4 <= ENCODED_HEADER_OFFSET + ENCODED_HEADER_LENGTH
            {
                return Ok(BigEndian::read_u32(&header[offset - ENCODED_HEADER_OFFSET..]));
            }
        }
        self.data.read_u32(offset)
    }

    fn read_u16(&self, offset: usize) -> Result<u16> {
        if let Some(header) = &self.decoded_header {
            if offset >= ENCODED_HEADER_OFFSET
                && offset + 2 <= ENCODED_HEADER_OFFSET + ENCODED_HEADER_LENGTH
            {
                return Ok(BigEndian::read_u16(&header[offset - ENCODED_HEADER_OFFSET..]));
            }
        }
        self.data.read_u16(offset)
    }

    fn read_flag(&self, offset: usize, bit: u32) -> Result<bool> {
        Ok((self.read_u16(offset)? >> bit) & 1 != 0)
    }

    pub fn read_version(&self) -> Result<FileVersion> {
        FileVersion::from_format(self.data.read_u32(0x10)?)
    }

    pub fn read_total_size(&self) -> Result<u32> {
        self.data.read_u32(0x14)
    }

    pub fn read_stack_size(&self) -> Result<u32> {
        self.read_u32(0x18)
    }

    pub fn read_background_count(&self) -> Result<u32> {
        self.read_u32(0x24)
    }

    pub fn read_first_background_identifier(&self) -> Result<u32> {
        self.read_u32(0x28)
    }

    pub fn read_card_count(&self) -> Result<u32> {
        self.read_u32(0x2C)
    }

    pub fn read_first_card_identifier(&self) -> Result<u32> {
        self.read_u32(0x30)
    }

    pub fn read_list_identifier(&self) -> Result<u32> {
        self.read_u32(0x34)
    }

    pub fn read_free_count(&self) -> Result<u32> {
        self.read_u32(0x38)
    }

    pub fn read_free_size(&self) -> Result<u32> {
        self.read_u32(0x3C)
    }

    pub fn read_password_hash(&self) -> Result<Option<u32>> {
        let hash = self.read_u32(0x44)?;
        Ok(if hash == 0 { None } else { Some(hash) })
    }

    pub fn read_user_level(&self) -> Result<UserLevel> {
        Ok(UserLevel::from_index(self.read_u16(0x48)?))
    }

    pub fn read_cant_peek(&self) -> Result<bool> {
        self.read_flag(0x4C, 10)
    }

    pub fn read_cant_abort(&self) -> Result<bool> {
        self.read_flag(0x4C, 11)
    }

    /// Private access is outside the encrypted region, so it can be read
    /// before any password check.
    pub fn read_private_access(&self) -> Result<bool> {
        self.read_flag(0x4C, 13)
    }

    pub fn read_cant_delete(&self) -> Result<bool> {
        self.read_flag(0x4C, 14)
    }

    pub fn read_cant_modify(&self) -> Result<bool> {
        self.read_flag(0x4C, 15)
    }

    pub fn read_version_at_creation(&self) -> Result<Option<HyperCardVersion>> {
        Ok(HyperCardVersion::from_code(self.data.read_u32(0x60)?))
    }

    pub fn read_version_at_last_compacting(&self) -> Result<Option<HyperCardVersion>> {
        Ok(HyperCardVersion::from_code(self.data.read_u32(0x64)?))
    }

    pub fn read_version_at_last_modification_since_last_compacting(
        &self,
    ) -> Result<Option<HyperCardVersion>> {
        Ok(HyperCardVersion::from_code(self.data.read_u32(0x68)?))
    }

    pub fn read_version_at_last_modification(&self) -> Result<Option<HyperCardVersion>> {
        Ok(HyperCardVersion::from_code(self.data.read_u32(0x6C)?))
    }

    pub fn read_marked_card_count(&self) -> Result<u32> {
        self.data.read_u32(0x74)
    }

    pub fn read_window_rectangle(&self) -> Result<Rectangle> {
        self.data.read_rectangle(0x78)
    }

    pub fn read_screen_rectangle(&self) -> Result<Rectangle> {
        self.data.read_rectangle(0x80)
    }

    pub fn read_scroll(&self) -> Result<Point> {
        Ok(Point {
            y: self.data.read_coordinate(0x88)?,
            x: self.data.read_coordinate(0x8A)?,
        })
    }

    pub fn read_size(&self) -> Result<Size> {
        let height = self.data.read_u16(0x1B8)? as i32;
        let width = self.data.read_u16(0x1BA)? as i32;
        Ok(Size {
            width: if width == 0 { DEFAULT_WIDTH } else { width },
            height: if height == 0 { DEFAULT_HEIGHT } else { height },
        })
    }

    pub fn read_script(&self) -> Result<String> {
        if self.data.len() <= 0x600 {
            debug!(
                "Stack block of {} bytes ends before the script field, treating the script as empty",
                self.data.len()
            );
            return Ok(String::new());
        }
        self.data.read_cstring(0x600)
    }

    /// Sums the first 0x180 words of the block, which a well-formed stack
    /// balances to zero. When the header is encrypted the decoded bytes
    /// replace the raw ones in the sum.
    ///
    /// Short stack blocks have no checksum and pass trivially.
    pub fn verify_checksum(&self) -> Result<bool> {
        if self.data.len() < 0x600 {
            return Ok(true);
        }
        let mut sum: u32 = 0;
        for index in 0..0x180 {
            sum = sum.wrapping_add(self.data.read_u32(index * 4)?);
        }
        if let Some(header) = &self.decoded_header {
            for index in 0..0xC {
                sum = sum
                    .wrapping_add(BigEndian::read_u32(&header[index * 4..]))
                    .wrapping_sub(self.data.read_u32(ENCODED_HEADER_OFFSET + index * 4)?);
            }
            // The region ends in the middle of a word: the last decoded half
            // pairs with the raw half that follows it.
            let tail =
                ((BigEndian::read_u16(&header[0x30..]) as u32) << 16) | self.data.read_u16(0x4A)? as u32;
            sum = sum.wrapping_add(tail).wrapping_sub(self.data.read_u32(0x48)?);
        }
        Ok(sum == 0)
    }
}
