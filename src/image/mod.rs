//! 1-bit rasters and the card picture model.
//!
//! Pixels are packed in big-endian 32-bit words, the highest bit of a word
//! being the leftmost pixel. Rows always start on a word boundary, so a row
//! may end with unused padding bits.

pub mod canvas;
pub mod woba;

use crate::stack::data::DataRange;
use crate::stack::error::{Result, StackError};

pub use canvas::{Canvas, Composition};

/// A packed 1-bit raster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    width: usize,
    height: usize,
    words_per_row: usize,
    words: Vec<u32>,
}

impl Image {
    /// A blank raster.
    pub fn new(width: usize, height: usize) -> Image {
        let words_per_row = width.div_ceil(32);
        Image {
            width,
            height,
            words_per_row,
            words: vec![0; words_per_row * height],
        }
    }

    /// Builds a raster from packed bytes, rows of `ceil(width / 8)` bytes
    /// each with no padding between rows.
    ///
    /// # Errors
    /// Fails with `CorruptImage` when the data holds less than a full
    /// raster.
    pub fn from_packed(data: &[u8], width: usize, height: usize) -> Result<Image> {
        let bytes_per_row = width.div_ceil(8);
        if data.len() < bytes_per_row * height {
            return Err(StackError::CorruptImage(format!(
                "{} bytes cannot hold a {width}x{height} raster",
                data.len()
            )));
        }
        let mut image = Image::new(width, height);
        for y in 0..height {
            let row = &data[y * bytes_per_row..(y + 1) * bytes_per_row];
            for (index, &byte) in row.iter().enumerate() {
                image.words[y * image.words_per_row + index / 4] |=
                    (byte as u32) << (24 - (index % 4) * 8);
            }
        }
        Ok(image)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Number of 32-bit words making up one row.
    pub fn words_per_row(&self) -> usize {
        self.words_per_row
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    pub(crate) fn words_mut(&mut self) -> &mut [u32] {
        &mut self.words
    }

    /// Whether the pixel at (x, y) is set. x counts from the left, y from
    /// the top.
    pub fn get(&self, x: usize, y: usize) -> bool {
        let word = self.words[y * self.words_per_row + x / 32];
        (word >> (31 - x % 32)) & 1 != 0
    }

    pub fn set(&mut self, x: usize, y: usize, value: bool) {
        let mask = 1u32 << (31 - x % 32);
        let word = &mut self.words[y * self.words_per_row + x / 32];
        if value {
            *word |= mask;
        } else {
            *word &= !mask;
        }
    }
}

/// The picture of a card or background: a black raster and an opacity mask
/// of the same shape. A pixel is black when set in the image, white when set
/// only in the mask, and transparent when set in neither.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskedImage {
    pub width: usize,
    pub height: usize,
    pub image: Image,
    pub mask: Image,
}

impl MaskedImage {
    /// Decodes a packed raster optionally followed by a same-shaped mask
    /// raster. Without a mask, the image doubles as its own mask, so only
    /// black pixels are opaque.
    ///
    /// # Errors
    /// Fails with `CorruptImage` when the data holds less than one raster.
    pub fn decode(data: &DataRange, width: usize, height: usize) -> Result<MaskedImage> {
        let layer_length = width.div_ceil(8) * height;
        let bytes = data.bytes();
        let image = Image::from_packed(bytes, width, height)?;
        let mask = if bytes.len() >= 2 * layer_length {
            Image::from_packed(&bytes[layer_length..], width, height)?
        } else {
            image.clone()
        };
        Ok(MaskedImage {
            width,
            height,
            image,
            mask,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn packed_rows_do_not_bleed_into_each_other() {
        // Two rows of 9 pixels: row 0 all set, row 1 only the last pixel.
        let image = Image::from_packed(&[0xFF, 0x80, 0x00, 0x80], 9, 2).unwrap();
        assert!(image.get(8, 0));
        assert!(!image.get(0, 1));
        assert!(image.get(8, 1));
        assert_eq!(image.words_per_row(), 1);
    }

    #[test]
    fn decode_without_mask_reuses_the_image() {
        let data = DataRange::whole(Arc::from(vec![0xF0u8, 0x0F]));
        let decoded = MaskedImage::decode(&data, 8, 2).unwrap();
        assert_eq!(decoded.image, decoded.mask);
        assert!(decoded.image.get(0, 0));
        assert!(!decoded.image.get(0, 1));
    }

    #[test]
    fn decode_with_mask_reads_both_layers() {
        let data = DataRange::whole(Arc::from(vec![0xF0u8, 0x0F, 0xFF, 0xFF]));
        let decoded = MaskedImage::decode(&data, 8, 2).unwrap();
        assert_ne!(decoded.image, decoded.mask);
        assert!(decoded.mask.get(0, 1));
    }

    #[test]
    fn truncated_rasters_are_rejected() {
        let data = DataRange::whole(Arc::from(vec![0u8; 3]));
        assert!(matches!(
            MaskedImage::decode(&data, 8, 4),
            Err(StackError::CorruptImage(_))
        ));
    }
}
