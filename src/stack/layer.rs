//! Card and background block readers, with the part and content blocks
//! nested inside them.
//!
//! Both layer block types share most of their fields. The shared fields sit
//! either at the start of the block or right before the part list, so the
//! common reader is parameterized by the part list offset.

use super::data::DataRange;
use super::error::{Result, StackError};
use super::models::{FileVersion, Part, PartStyle, PartType};

/// Which layer of a card a content block belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerType {
    Card,
    Background,
}

/// The text of one part, stored apart from the part itself.
#[derive(Debug, Clone, PartialEq)]
pub struct Content {
    pub part_identifier: u16,
    pub layer_type: LayerType,
    pub text: String,
}

/// Reads the fields shared by card and background blocks.
pub struct LayerBlockReader {
    data: DataRange,
    version: FileVersion,
    part_offset: usize,
}

impl LayerBlockReader {
    pub fn for_card(data: DataRange, version: FileVersion) -> Self {
        let part_offset = version.offset(0x36);
        LayerBlockReader {
            data,
            version,
            part_offset,
        }
    }

    pub fn for_background(data: DataRange, version: FileVersion) -> Self {
        let part_offset = version.offset(0x32);
        LayerBlockReader {
            data,
            version,
            part_offset,
        }
    }

    pub fn read_identifier(&self) -> Result<u32> {
        self.data.read_u32(0x8)
    }

    pub fn read_bitmap_identifier(&self) -> Result<Option<u32>> {
        let value = self.data.read_i32(self.version.offset(0x10))?;
        Ok(if value == 0 { None } else { Some(value as u32) })
    }

    pub fn read_cant_delete(&self) -> Result<bool> {
        self.data.read_flag(self.version.offset(0x14), 14)
    }

    pub fn read_show_picture(&self) -> Result<bool> {
        Ok(!self.data.read_flag(self.version.offset(0x14), 13)?)
    }

    pub fn read_dont_search(&self) -> Result<bool> {
        self.data.read_flag(self.version.offset(0x14), 11)
    }

    /// Identifier of the page block referencing this card.
    pub fn read_page_identifier(&self) -> Result<u32> {
        self.data.read_u32(self.version.offset(0x20))
    }

    /// Identifier of the background of this card.
    pub fn read_background_identifier(&self) -> Result<u32> {
        self.data.read_u32(self.version.offset(0x24))
    }

    /// Number of cards sharing this background.
    pub fn read_card_count(&self) -> Result<u32> {
        self.data.read_u32(self.version.offset(0x18))
    }

    pub fn read_next_background_identifier(&self) -> Result<u32> {
        Ok(self.data.read_i32(self.version.offset(0x1C))? as u32)
    }

    pub fn read_previous_background_identifier(&self) -> Result<u32> {
        Ok(self.data.read_i32(self.version.offset(0x20))? as u32)
    }

    pub fn read_part_count(&self) -> Result<usize> {
        Ok(self.data.read_u16(self.part_offset - 0xE)? as usize)
    }

    pub fn read_part_size(&self) -> Result<usize> {
        Ok(self.data.read_u32(self.part_offset - 0xA)? as usize)
    }

    pub fn read_content_count(&self) -> Result<usize> {
        Ok(self.data.read_u16(self.part_offset - 0x6)? as usize)
    }

    pub fn read_content_size(&self) -> Result<usize> {
        Ok(self.data.read_u32(self.part_offset - 0x4)? as usize)
    }

    /// The part blocks, in their stored order. Each block starts with its
    /// own 16-bit size.
    pub fn extract_part_blocks(&self) -> Result<Vec<DataRange>> {
        let count = self.read_part_count()?;
        let mut parts = Vec::with_capacity(count);
        let mut offset = self.part_offset;
        for _ in 0..count {
            let size = self.data.read_u16(offset)? as usize;
            if size == 0 {
                return Err(StackError::CorruptedStack(
                    "zero-sized part block".to_owned(),
                ));
            }
            parts.push(self.data.subrange(offset, size)?);
            offset += size;
        }
        Ok(parts)
    }

    /// The content blocks, following the part blocks.
    pub fn extract_content_blocks(&self) -> Result<Vec<DataRange>> {
        if self.version == FileVersion::V1 {
            return self.extract_content_blocks_v1();
        }
        let count = self.read_content_count()?;
        let mut contents = Vec::with_capacity(count);
        let mut offset = self.part_offset + self.read_part_size()?;
        for _ in 0..count {
            let size = self.data.read_u16(offset + 2)? as usize;
            contents.push(self.data.subrange(offset, size + 4)?);
            offset += size + 4;
            // Contents are 16-bit aligned.
            offset += offset % 2;
        }
        Ok(contents)
    }

    /// In version 1 the contents are bare null-terminated strings without a
    /// size, so they have to be scanned.
    fn extract_content_blocks_v1(&self) -> Result<Vec<DataRange>> {
        let count = self.read_content_count()?;
        let mut contents = Vec::with_capacity(count);
        let mut offset = self.part_offset + self.read_part_size()?;
        for _ in 0..count {
            let start = offset;
            offset += 2;
            while self.data.read_u8(offset)? != 0 {
                offset += 1;
            }
            offset += 1;
            contents.push(self.data.subrange(start, offset - start)?);
        }
        Ok(contents)
    }

    fn name_offset(&self) -> Result<usize> {
        Ok(self.part_offset + self.read_part_size()? + self.read_content_size()?)
    }

    pub fn read_name(&self) -> Result<String> {
        self.data.read_cstring(self.name_offset()?)
    }

    pub fn read_script(&self) -> Result<String> {
        let name_offset = self.name_offset()?;
        let Some(name_end) = null_position(&self.data, name_offset) else {
            return Ok(String::new());
        };
        let script_offset = name_end + 1;
        if script_offset >= self.data.len() {
            return Ok(String::new());
        }
        self.data.read_cstring(script_offset)
    }
}

/// Position of the next null byte at or after `offset`, if any.
fn null_position(data: &DataRange, offset: usize) -> Option<usize> {
    data.bytes()
        .get(offset..)?
        .iter()
        .position(|&b| b == 0)
        .map(|found| offset + found)
}

/// Decodes one part block into a part, with no content attached yet.
pub fn read_part(data: &DataRange) -> Result<Part> {
    let identifier = data.read_u16(0x2)?;
    let part_type = if data.read_flag(0x4, 8)? {
        PartType::Button
    } else {
        PartType::Field
    };
    let visible = !data.read_flag(0x4, 7)?;
    let rectangle = data.read_rectangle(0x6)?;
    let style = PartStyle::from_index(data.read_u8(0xF)?);
    let name = data.read_cstring(0x1E)?;
    let script = match null_position(data, 0x1E) {
        Some(name_end) => read_part_script(data, name_end)?,
        None => String::new(),
    };
    Ok(Part {
        identifier,
        part_type,
        style,
        rectangle,
        visible,
        name,
        script,
        content: None,
    })
}

/// The script starts one padding byte after the name terminator. Parts
/// without a script just end there.
fn read_part_script(data: &DataRange, name_end: usize) -> Result<String> {
    let offset = name_end + 2;
    if offset >= data.len() {
        return Ok(String::new());
    }
    data.read_cstring(offset)
}

/// Decodes one content block.
pub fn read_content(data: &DataRange, version: FileVersion) -> Result<Content> {
    let stored_identifier = data.read_i16(0)?;
    let part_identifier = stored_identifier.unsigned_abs();
    let layer_type = if stored_identifier < 0 {
        LayerType::Card
    } else {
        LayerType::Background
    };
    let text = read_content_string(data, version)?;
    Ok(Content {
        part_identifier,
        layer_type,
        text,
    })
}

fn read_content_string(data: &DataRange, version: FileVersion) -> Result<String> {
    let too_short = || StackError::CorruptedStack("content block too short".to_owned());

    if version == FileVersion::V1 {
        let length = data.len().checked_sub(3).ok_or_else(too_short)?;
        return data.read_string(2, length);
    }

    // A zero marker byte introduces a plain string. Anything else is the
    // high byte of the formatting table length, which is skipped since
    // styled text is out of scope here.
    if data.read_u8(4)? == 0 {
        let length = data.len().checked_sub(5).ok_or_else(too_short)?;
        return data.read_string(5, length);
    }
    let formatting_length = (data.read_u16(4)? ^ 0x8000) as usize;
    let offset = 4 + formatting_length;
    let length = data.len().checked_sub(offset).ok_or_else(too_short)?;
    data.read_string(offset, length)
}
