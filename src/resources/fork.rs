//! The classic resource fork container: header, map, type list, reference
//! lists and name table.

use crate::stack::data::{DataRange, FourCharCode};
use crate::stack::error::{Result, StackError};

const MAP_HEADER_LENGTH: usize = 30;
const TYPE_LENGTH: usize = 8;
const REFERENCE_LENGTH: usize = 12;

/// Record of one resource in the map, with the position of its data in the
/// fork. Does not hold the data itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceReference {
    pub type_code: FourCharCode,
    pub identifier: i16,
    pub name: String,
    pub data_offset: usize,
}

/// Reads a resource fork.
pub struct ResourceForkReader {
    data: DataRange,
    data_offset: usize,
    map: DataRange,
}

impl ResourceForkReader {
    /// # Errors
    /// Fails with `CorruptResourceFork` when the fork header places the map
    /// outside the fork.
    pub fn new(data: DataRange) -> Result<ResourceForkReader> {
        let read = || -> Result<ResourceForkReader> {
            let data_offset = data.read_u32(0x0)? as usize;
            let map_offset = data.read_u32(0x4)? as usize;
            let map_length = data.read_u32(0xC)? as usize;
            let map = data.subrange(map_offset, map_length)?;
            Ok(ResourceForkReader {
                data,
                data_offset,
                map,
            })
        };
        read().map_err(corrupt_fork)
    }

    /// All the resource records of the map, in type list order.
    pub fn read_references(&self) -> Result<Vec<ResourceReference>> {
        self.read_references_inner().map_err(corrupt_fork)
    }

    fn read_references_inner(&self) -> Result<Vec<ResourceReference>> {
        let name_list_offset = self.map.read_u16(0x1A)? as usize;
        let type_count = (self.map.read_i16(0x1C)? + 1) as usize;

        let mut references = Vec::new();
        let mut type_offset = MAP_HEADER_LENGTH;
        for _ in 0..type_count {
            let type_code = FourCharCode(self.map.read_u32(type_offset)?);
            let reference_count = self.map.read_u16(type_offset + 0x4)? as usize + 1;
            let reference_list_offset = self.map.read_u16(type_offset + 0x6)? as usize;

            // The reference list offset counts from two bytes before the end
            // of the map header.
            let mut reference_offset = reference_list_offset + MAP_HEADER_LENGTH - 2;
            for _ in 0..reference_count {
                let identifier = self.map.read_i16(reference_offset)?;
                let name_offset = self.map.read_i16(reference_offset + 0x2)?;
                let data_offset = (self.map.read_u32(reference_offset + 0x4)? & 0xFF_FFFF) as usize;
                let name = if name_offset == -1 {
                    String::new()
                } else {
                    self.read_name(name_list_offset + name_offset as usize)?
                };
                references.push(ResourceReference {
                    type_code,
                    identifier,
                    name,
                    data_offset,
                });
                reference_offset += REFERENCE_LENGTH;
            }
            type_offset += TYPE_LENGTH;
        }
        Ok(references)
    }

    /// Names are Pascal strings in the name table at the end of the map.
    fn read_name(&self, offset: usize) -> Result<String> {
        let length = self.map.read_u8(offset)? as usize;
        self.map.read_string(offset + 1, length)
    }

    /// The body of a resource. The offset comes from a reference and counts
    /// from the start of the data area; the body is preceded by its length.
    pub fn extract_data(&self, data_offset: usize) -> Result<DataRange> {
        let extract = || -> Result<DataRange> {
            let offset = self.data_offset + data_offset;
            let length = self.data.read_u32(offset)? as usize;
            self.data.subrange(offset + 4, length)
        };
        extract().map_err(corrupt_fork)
    }
}

fn corrupt_fork(error: StackError) -> StackError {
    match error {
        StackError::OutOfRange { .. } => {
            StackError::CorruptResourceFork("an offset points outside the fork".to_owned())
        }
        other => other,
    }
}
