//! Length-prefixed block access and the master block directory.

use std::collections::HashMap;

use log::{debug, warn};

use super::data::{DataRange, FourCharCode};
use super::error::{Result, StackError};

pub const STACK_TAG: FourCharCode = FourCharCode::from_tag(b"STAK");
pub const MASTER_TAG: FourCharCode = FourCharCode::from_tag(b"MAST");
pub const LIST_TAG: FourCharCode = FourCharCode::from_tag(b"LIST");
pub const PAGE_TAG: FourCharCode = FourCharCode::from_tag(b"PAGE");
pub const CARD_TAG: FourCharCode = FourCharCode::from_tag(b"CARD");
pub const BACKGROUND_TAG: FourCharCode = FourCharCode::from_tag(b"BKGD");
pub const BITMAP_TAG: FourCharCode = FourCharCode::from_tag(b"BMAP");

/// Smallest possible block: length, tag and identifier words plus padding.
const MIN_BLOCK_LENGTH: usize = 0x10;

/// A block of the data fork. The body range covers the whole block including
/// its header, so field offsets of the format documentation apply directly.
#[derive(Debug, Clone)]
pub struct Block {
    pub tag: FourCharCode,
    pub identifier: u32,
    pub length: usize,
    pub body: DataRange,
}

/// Reads the block starting at `offset` in the data fork.
///
/// The declared length is masked with `0x0FFF_FFFF` because saved stacks are
/// known to carry garbage flag bits in the high nibble of the master block
/// length.
///
/// # Errors
/// Fails with `CorruptBlock` when the declared length does not fit between
/// `offset` and the end of the fork.
pub fn read_block_at(data: &DataRange, offset: usize) -> Result<Block> {
    let declared = (data.read_u32(offset)? & 0x0FFF_FFFF) as usize;
    let remaining = data.len() - offset;
    if declared < MIN_BLOCK_LENGTH || declared > remaining {
        return Err(StackError::CorruptBlock {
            offset,
            declared,
            remaining,
        });
    }
    let tag = FourCharCode(data.read_u32(offset + 4)?);
    let identifier = data.read_u32(offset + 8)?;
    Ok(Block {
        tag,
        identifier,
        length: declared,
        body: data.subrange(offset, declared)?,
    })
}

/// Scans the master block and builds the identifier-to-offset directory of
/// every block in the fork.
///
/// The master block sits right after the stack block, whose length is the
/// first word of the fork. Each record packs a block offset in units of 32
/// bytes with the low byte of the block identifier; the full identifier and
/// the tag are confirmed by reading the target block header. Records that
/// point nowhere valid are skipped, as saved stacks keep stale records for
/// freed blocks.
pub fn read_directory(data: &DataRange) -> Result<HashMap<(FourCharCode, u32), usize>> {
    let stack_length = (data.read_u32(0)? & 0x0FFF_FFFF) as usize;
    let master = read_block_at(data, stack_length)?;
    if master.tag != MASTER_TAG {
        return Err(StackError::CorruptedStack(format!(
            "expected a {MASTER_TAG} block after the stack block, found {}",
            master.tag
        )));
    }

    let mut directory = HashMap::new();
    let mut offset = 0x20;
    while offset + 4 <= master.length {
        let record = master.body.read_u32(offset)?;
        offset += 4;
        if record == 0 {
            continue;
        }
        let block_offset = ((record >> 8) as usize) * 32;
        let identifier_low = (record & 0xFF) as u8;
        let Ok(tag) = data.read_u32(block_offset + 4) else {
            warn!("Master record points past the end of the fork, skipping");
            continue;
        };
        let Ok(identifier) = data.read_u32(block_offset + 8) else {
            continue;
        };
        if (identifier & 0xFF) as u8 != identifier_low {
            warn!(
                "Master record for offset {block_offset:#x} does not match the block there, skipping"
            );
            continue;
        }
        directory.insert((FourCharCode(tag), identifier), block_offset);
    }
    debug!("Master directory holds {} blocks", directory.len());
    Ok(directory)
}
