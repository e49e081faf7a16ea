//! The card index: a list block pointing to page blocks, each page holding
//! a run of card references in file order.

use super::data::DataRange;
use super::error::Result;
use super::models::FileVersion;

/// Reference to a page block in the list block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageReference {
    pub identifier: u32,
    pub card_count: usize,
}

/// Reference to a card block in a page block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CardReference {
    pub identifier: u32,
    pub marked: bool,
}

/// Reads the fields of a list block.
pub struct ListBlockReader {
    data: DataRange,
    version: FileVersion,
}

impl ListBlockReader {
    pub fn new(data: DataRange, version: FileVersion) -> Self {
        ListBlockReader { data, version }
    }

    pub fn read_page_count(&self) -> Result<u32> {
        self.data.read_u32(self.version.offset(0x10))
    }

    pub fn read_card_count(&self) -> Result<u32> {
        self.data.read_u32(self.version.offset(0x18))
    }

    /// Size in bytes of a card reference in the page blocks.
    pub fn read_card_reference_size(&self) -> Result<usize> {
        Ok(self.data.read_u16(self.version.offset(0x1C))? as usize)
    }

    pub fn read_checksum(&self) -> Result<u32> {
        self.data.read_u32(self.version.offset(0x24))
    }

    pub fn read_page_references(&self) -> Result<Vec<PageReference>> {
        let count = self.read_page_count()? as usize;
        let mut references = Vec::with_capacity(count);
        let mut offset = 0x30;
        for _ in 0..count {
            references.push(PageReference {
                identifier: self.data.read_i32(offset)? as u32,
                card_count: self.data.read_u16(offset + 4)? as usize,
            });
            offset += 6;
        }
        Ok(references)
    }

    /// Recomputes the checksum over the page references and compares it to
    /// the stored one.
    pub fn is_checksum_valid(&self) -> Result<bool> {
        let mut checksum: u32 = 0;
        for reference in self.read_page_references()? {
            checksum = checksum
                .wrapping_add(reference.identifier)
                .rotate_right(3)
                .wrapping_add(reference.card_count as u32);
        }
        Ok(checksum == self.read_checksum()?)
    }
}

/// Reads the fields of a page block.
pub struct PageBlockReader {
    data: DataRange,
    version: FileVersion,
    card_count: usize,
    card_reference_size: usize,
}

impl PageBlockReader {
    /// The card count and reference size come from the page reference and
    /// the list block, as page blocks do not store them.
    pub fn new(
        data: DataRange,
        version: FileVersion,
        card_count: usize,
        card_reference_size: usize,
    ) -> Self {
        PageBlockReader {
            data,
            version,
            card_count,
            card_reference_size,
        }
    }

    pub fn read_list_identifier(&self) -> Result<u32> {
        self.data.read_u32(self.version.offset(0x10))
    }

    pub fn read_checksum(&self) -> Result<u32> {
        self.data.read_u32(self.version.offset(0x14))
    }

    pub fn read_card_references(&self) -> Result<Vec<CardReference>> {
        let mut references = Vec::with_capacity(self.card_count);
        let mut offset = 0x18;
        for _ in 0..self.card_count {
            references.push(CardReference {
                identifier: self.data.read_i32(offset)? as u32,
                marked: self.data.read_flag(offset + 4, 12)?,
            });
            offset += self.card_reference_size;
        }
        Ok(references)
    }

    pub fn is_checksum_valid(&self) -> Result<bool> {
        let mut checksum: u32 = 0;
        for reference in self.read_card_references()? {
            checksum = checksum.wrapping_add(reference.identifier).rotate_right(3);
        }
        Ok(checksum == self.read_checksum()?)
    }
}
