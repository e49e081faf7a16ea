//! Decoder for bitmap (BMAP) blocks, the run-length format of card and
//! background pictures.
//!
//! A block holds two compressed layers, mask then image, each enclosed in a
//! rectangle in card coordinates. The compressed rows cover the layer
//! rectangle widened to 32-bit boundaries. A pixel is black when set in the
//! image layer and white when set only in the mask layer; a layer with a
//! rectangle but no data is filled solid.

use super::canvas::{Canvas, Composition};
use super::{Image, MaskedImage};
use crate::stack::data::DataRange;
use crate::stack::error::{Result, StackError};
use crate::stack::models::{FileVersion, Point, Rectangle};

/// Decodes a bitmap block into the full-card picture.
pub fn read_bitmap(data: &DataRange, version: FileVersion) -> Result<MaskedImage> {
    let card_rectangle = data.read_rectangle(version.offset(0x18))?;
    let mask_rectangle = data.read_rectangle(version.offset(0x20))?;
    let image_rectangle = data.read_rectangle(version.offset(0x28))?;
    let data_offset = version.offset(0x40);

    let width = card_rectangle.width().max(0) as usize;
    let height = card_rectangle.height().max(0) as usize;
    let mut image_canvas = Canvas::new(width, height);
    let mut mask_canvas = Canvas::new(width, height);

    let (mask_data, image_data) = if data.len() > data_offset {
        let mask_length = data.read_u32(version.offset(0x38))? as usize;
        let image_length = data.read_u32(version.offset(0x3C))? as usize;
        let mask = decode_layer(data, data_offset, mask_length, mask_rectangle)?;
        let image = decode_layer(data, data_offset + mask_length, image_length, image_rectangle)?;
        (mask, image)
    } else {
        // A block cut short after the rectangles describes solid layers.
        (None, None)
    };

    // The mask layer only marks opacity. The image layer marks black pixels,
    // which are opaque too.
    draw_layer(&mut mask_canvas, mask_rectangle, mask_data.as_ref());
    draw_layer(&mut mask_canvas, image_rectangle, image_data.as_ref());
    draw_layer(&mut image_canvas, image_rectangle, image_data.as_ref());

    Ok(MaskedImage {
        width,
        height,
        image: image_canvas.into_image(),
        mask: mask_canvas.into_image(),
    })
}

fn draw_layer(canvas: &mut Canvas, rectangle: Rectangle, decoded: Option<&Image>) {
    if rectangle == Rectangle::default() {
        return;
    }
    match decoded {
        Some(image) => {
            let aligned = aligned_32_bits(rectangle);
            // Only the part inside the real rectangle is meaningful, the
            // alignment padding may hold garbage bits.
            let portion = Rectangle::new(
                0,
                rectangle.left - aligned.left,
                rectangle.height(),
                rectangle.left - aligned.left + rectangle.width(),
            );
            canvas.composite(
                image,
                Point::new(rectangle.left, rectangle.top),
                Some(portion),
                None,
                Composition::Or,
            );
        }
        None => canvas.fill_rectangle(rectangle, None, Composition::Or),
    }
}

/// Widens a layer rectangle to 32-bit boundaries, as the compressed rows
/// are stored.
fn aligned_32_bits(rectangle: Rectangle) -> Rectangle {
    Rectangle::new(
        rectangle.top,
        rectangle.left & !31,
        rectangle.bottom,
        (rectangle.right + 31) & !31,
    )
}

/// Decompresses one layer into a raster covering its aligned rectangle.
/// A layer without data decodes to `None`.
fn decode_layer(
    data: &DataRange,
    offset: usize,
    length: usize,
    rectangle: Rectangle,
) -> Result<Option<Image>> {
    if length == 0 {
        return Ok(None);
    }
    let aligned = aligned_32_bits(rectangle);
    let width = aligned.width().max(0) as usize;
    let height = aligned.height().max(0) as usize;
    let mut image = Image::new(width, height);

    Decoder {
        data,
        offset,
        end: offset + length,
        words_per_row: width / 32,
    }
    .run(image.words_mut(), aligned)
    .map_err(|error| match error {
        StackError::OutOfRange { .. } => {
            StackError::CorruptImage("compressed bitmap data is truncated".to_owned())
        }
        other => other,
    })?;

    Ok(Some(image))
}

struct Decoder<'a> {
    data: &'a DataRange,
    offset: usize,
    end: usize,
    words_per_row: usize,
}

impl Decoder<'_> {
    fn next_byte(&mut self) -> Result<u8> {
        if self.offset >= self.end {
            return Err(StackError::CorruptImage(
                "compressed bitmap data is truncated".to_owned(),
            ));
        }
        let byte = self.data.read_u8(self.offset)?;
        self.offset += 1;
        Ok(byte)
    }

    /// A row run must not cross the bottom of the layer.
    fn check_rows(&self, pixels: &[u32], pixel_index: usize, count: usize) -> Result<()> {
        if pixel_index + count * self.words_per_row > pixels.len() {
            return Err(StackError::CorruptImage(
                "a row run crosses the bottom of the layer".to_owned(),
            ));
        }
        Ok(())
    }

    fn run(&mut self, pixels: &mut [u32], rectangle: Rectangle) -> Result<()> {
        let words_per_row = self.words_per_row;
        let row_width = words_per_row * 32;

        let mut pixel_index = 0;
        let mut dx: usize = 0;
        let mut dy: usize = 0;
        let mut repeated_bytes: [u8; 8] = [0xAA, 0x55, 0xAA, 0x55, 0xAA, 0x55, 0xAA, 0x55];

        let mut y = rectangle.top;
        'rows: while y < rectangle.bottom {
            let mut x = 0;
            let mut repeat_count = 1;

            while x < row_width {
                let opcode = self.next_byte()?;
                match opcode {
                    0x00..=0x7F => {
                        // A few zero bytes then a few data bytes.
                        let zero_length = (opcode & 0xF) as usize;
                        let data_length = (opcode >> 4) as usize;
                        let total_length = zero_length + data_length;
                        for i in 0..data_length {
                            let value = self.next_byte()?;
                            for r in 0..repeat_count {
                                write_byte_in_row(
                                    value,
                                    pixels,
                                    pixel_index,
                                    x + (zero_length + i + r * total_length) * 8,
                                );
                            }
                        }
                        x += total_length * repeat_count * 8;
                        repeat_count = 1;
                    }

                    0x80 => {
                        // One row of raw words.
                        self.check_rows(pixels, pixel_index, repeat_count)?;
                        for i in 0..words_per_row {
                            let value = self.read_word()?;
                            for r in 0..repeat_count {
                                pixels[i + pixel_index + r * words_per_row] = value;
                            }
                        }
                        pixel_index += repeat_count * words_per_row;
                        y += repeat_count as i32;
                        continue 'rows;
                    }

                    0x81 => {
                        // White rows.
                        pixel_index += repeat_count * words_per_row;
                        y += repeat_count as i32;
                        continue 'rows;
                    }

                    0x82 => {
                        // Black rows.
                        self.check_rows(pixels, pixel_index, repeat_count)?;
                        for _ in 0..repeat_count {
                            for word in &mut pixels[pixel_index..pixel_index + words_per_row] {
                                *word = u32::MAX;
                            }
                            pixel_index += words_per_row;
                            y += 1;
                        }
                        continue 'rows;
                    }

                    0x83 => {
                        // Rows of one repeated byte, remembered for 0x84.
                        let value = self.next_byte()?;
                        let word = u32::from_be_bytes([value; 4]);
                        repeated_bytes[(y & 7) as usize] = value;
                        self.check_rows(pixels, pixel_index, repeat_count)?;
                        for _ in 0..repeat_count {
                            for pixel in &mut pixels[pixel_index..pixel_index + words_per_row] {
                                *pixel = word;
                            }
                            pixel_index += words_per_row;
                            y += 1;
                        }
                        continue 'rows;
                    }

                    0x84 => {
                        // Rows of a previously repeated byte.
                        self.check_rows(pixels, pixel_index, repeat_count)?;
                        for _ in 0..repeat_count {
                            let value = repeated_bytes[(y & 7) as usize];
                            let word = u32::from_be_bytes([value; 4]);
                            for pixel in &mut pixels[pixel_index..pixel_index + words_per_row] {
                                *pixel = word;
                            }
                            pixel_index += words_per_row;
                            y += 1;
                        }
                        continue 'rows;
                    }

                    0x85 => {
                        // Copies of the previous row.
                        self.check_rows(pixels, pixel_index, repeat_count)?;
                        if pixel_index < words_per_row {
                            return Err(StackError::CorruptImage(
                                "a row copy has no row above it".to_owned(),
                            ));
                        }
                        for _ in 0..repeat_count {
                            pixels.copy_within(
                                pixel_index - words_per_row..pixel_index,
                                pixel_index,
                            );
                            pixel_index += words_per_row;
                            y += 1;
                        }
                        continue 'rows;
                    }

                    0x86 => {
                        // Copies of the row before the previous one.
                        self.check_rows(pixels, pixel_index, repeat_count)?;
                        if pixel_index < 2 * words_per_row {
                            return Err(StackError::CorruptImage(
                                "a row copy has no row above it".to_owned(),
                            ));
                        }
                        for _ in 0..repeat_count {
                            pixels.copy_within(
                                pixel_index - 2 * words_per_row..pixel_index - words_per_row,
                                pixel_index,
                            );
                            pixel_index += words_per_row;
                            y += 1;
                        }
                        continue 'rows;
                    }

                    0x88 => (dx, dy) = (16, 0),
                    0x89 => (dx, dy) = (0, 0),
                    0x8A => (dx, dy) = (0, 1),
                    0x8B => (dx, dy) = (0, 2),
                    0x8C => (dx, dy) = (1, 0),
                    0x8D => (dx, dy) = (1, 1),
                    0x8E => (dx, dy) = (2, 2),
                    0x8F => (dx, dy) = (8, 0),

                    0xA0..=0xBF => {
                        repeat_count = (opcode & 0x1F) as usize;
                    }

                    0xC0..=0xDF => {
                        // Runs of data bytes.
                        let data_length = (opcode & 0x1F) as usize * 8;
                        for i in 0..data_length {
                            let value = self.next_byte()?;
                            for r in 0..repeat_count {
                                write_byte_in_row(
                                    value,
                                    pixels,
                                    pixel_index,
                                    x + (i + r * data_length) * 8,
                                );
                            }
                        }
                        x += data_length * repeat_count * 8;
                        repeat_count = 1;
                    }

                    0xE0..=0xFF => {
                        // Runs of zero pixels.
                        let zero_count = (opcode & 0x1F) as usize * 128;
                        x += zero_count * repeat_count;
                        repeat_count = 1;
                    }

                    // An unknown opcode means the data is over.
                    _ => break 'rows,
                }
            }

            // The row is complete, apply the pending transforms.
            if dx != 0 {
                apply_dx(dx, pixels, pixel_index, words_per_row);
            }
            if dy != 0 && (dy as i32) <= y - rectangle.top {
                for i in 0..words_per_row {
                    pixels[i + pixel_index] ^= pixels[i + pixel_index - dy * words_per_row];
                }
            }
            pixel_index += words_per_row;
            y += 1;
        }
        Ok(())
    }

    fn read_word(&mut self) -> Result<u32> {
        let bytes = [
            self.next_byte()?,
            self.next_byte()?,
            self.next_byte()?,
            self.next_byte()?,
        ];
        Ok(u32::from_be_bytes(bytes))
    }
}

/// Smears each word to the left by XORing shifted copies, carrying into the
/// next word. dx can only be 1, 2, 4, 8, 16 or 32.
fn apply_dx(dx: usize, pixels: &mut [u32], pixel_index: usize, words_per_row: usize) {
    let mut previous_result: u32 = 0;
    let mut previous_xor_left: u32 = 0;

    for i in 0..words_per_row {
        let value = pixels[i + pixel_index];

        let mut xor_left = value;
        let mut xor_right = 0u32;
        for step in 0..(32 / dx) {
            xor_left ^= value.wrapping_shl((dx * step) as u32);
            xor_right ^= value.wrapping_shr((dx * step) as u32);
        }

        let result = previous_result ^ previous_xor_left ^ xor_right;
        pixels[i + pixel_index] = result;

        previous_result = result;
        previous_xor_left = xor_left;
    }
}

fn write_byte_in_row(byte: u8, pixels: &mut [u32], pixel_index: usize, x: usize) {
    // Overlong runs in malformed data fall off the end of the layer and are
    // dropped.
    if let Some(word) = pixels.get_mut(pixel_index + x / 32) {
        *word |= (byte as u32) << (24 - x % 32);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use byteorder::{BigEndian, WriteBytesExt};

    /// Builds a version 2 bitmap block with the given rectangles and
    /// compressed layer bytes.
    fn build_bitmap(
        card: Rectangle,
        mask: Rectangle,
        image: Rectangle,
        mask_bytes: &[u8],
        image_bytes: &[u8],
    ) -> DataRange {
        let mut block = Vec::new();
        block.write_u32::<BigEndian>(0).unwrap();
        block.write_u32::<BigEndian>(u32::from_be_bytes(*b"BMAP")).unwrap();
        block.write_u32::<BigEndian>(1).unwrap();
        block.resize(0x18, 0);
        for rectangle in [card, mask, image] {
            block.write_u16::<BigEndian>(rectangle.top as u16).unwrap();
            block.write_u16::<BigEndian>(rectangle.left as u16).unwrap();
            block.write_u16::<BigEndian>(rectangle.bottom as u16).unwrap();
            block.write_u16::<BigEndian>(rectangle.right as u16).unwrap();
        }
        block.resize(0x38, 0);
        block.write_u32::<BigEndian>(mask_bytes.len() as u32).unwrap();
        block.write_u32::<BigEndian>(image_bytes.len() as u32).unwrap();
        block.extend_from_slice(mask_bytes);
        block.extend_from_slice(image_bytes);
        let length = block.len() as u32;
        block[..4].copy_from_slice(&length.to_be_bytes());
        DataRange::whole(Arc::from(block))
    }

    #[test]
    fn black_row_opcode_fills_the_layer_rectangle() {
        let card = Rectangle::new(0, 0, 4, 64);
        let layer = Rectangle::new(1, 0, 3, 32);
        // Two black rows.
        let data = build_bitmap(card, Rectangle::default(), layer, &[], &[0xA0 | 2, 0x82]);
        let decoded = read_bitmap(&data, FileVersion::V2).unwrap();
        assert!(decoded.image.get(0, 1));
        assert!(decoded.image.get(31, 2));
        assert!(!decoded.image.get(0, 0));
        assert!(!decoded.image.get(32, 1));
        // Black pixels are opaque.
        assert!(decoded.mask.get(0, 1));
    }

    #[test]
    fn rectangle_without_data_is_filled_solid() {
        let card = Rectangle::new(0, 0, 2, 32);
        let mask = Rectangle::new(0, 4, 2, 12);
        let data = build_bitmap(card, mask, Rectangle::default(), &[], &[]);
        let decoded = read_bitmap(&data, FileVersion::V2).unwrap();
        assert!(decoded.mask.get(4, 0));
        assert!(decoded.mask.get(11, 1));
        assert!(!decoded.mask.get(3, 0));
        assert!(!decoded.mask.get(12, 0));
        // The image layer stays clear.
        assert_eq!(decoded.image, Image::new(32, 2));
    }

    #[test]
    fn raw_row_opcode_copies_words() {
        let card = Rectangle::new(0, 0, 1, 32);
        let layer = Rectangle::new(0, 0, 1, 32);
        let data = build_bitmap(
            card,
            Rectangle::default(),
            layer,
            &[],
            &[0x80, 0xDE, 0xAD, 0xBE, 0xEF],
        );
        let decoded = read_bitmap(&data, FileVersion::V2).unwrap();
        assert_eq!(decoded.image.words()[0], 0xDEAD_BEEF);
    }

    #[test]
    fn zero_and_data_nibble_opcode_places_bytes() {
        let card = Rectangle::new(0, 0, 1, 32);
        let layer = Rectangle::new(0, 0, 1, 32);
        // One zero byte, one data byte, then zeros to the end of the row.
        let data = build_bitmap(
            card,
            Rectangle::default(),
            layer,
            &[],
            &[0x11, 0xFF, 0xE0 | 1],
        );
        let decoded = read_bitmap(&data, FileVersion::V2).unwrap();
        assert_eq!(decoded.image.words()[0], 0x00FF_0000);
    }

    #[test]
    fn truncated_layer_data_is_a_corrupt_image() {
        let card = Rectangle::new(0, 0, 2, 32);
        let layer = Rectangle::new(0, 0, 2, 32);
        let data = build_bitmap(card, Rectangle::default(), layer, &[], &[0x80, 0xFF]);
        assert!(matches!(
            read_bitmap(&data, FileVersion::V2),
            Err(StackError::CorruptImage(_))
        ));
    }
}
