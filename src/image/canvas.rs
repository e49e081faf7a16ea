//! Word-aligned compositing of 1-bit rasters.
//!
//! Rows are blended 32 pixels at a time. A temporary row buffer holds the
//! source pixels, shifted to align them with the destination words; the
//! first and last destination words are blended under a mask so pixels
//! outside the drawn span are untouched.

use super::{Image, MaskedImage};
use crate::stack::models::{Point, Rectangle};

/// How source pixels combine with destination pixels, one word at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Composition {
    /// The source replaces the destination.
    Copy,
    /// Set source pixels are drawn black.
    Or,
    /// Set source pixels invert the destination.
    Xor,
    /// Set source pixels are drawn white.
    Mask,
}

impl Composition {
    fn combine(self, destination: u32, source: u32) -> u32 {
        match self {
            Composition::Copy => source,
            Composition::Or => destination | source,
            Composition::Xor => destination ^ source,
            Composition::Mask => destination & !source,
        }
    }
}

/// A mutable raster with drawing operations.
pub struct Canvas {
    image: Image,
    row: Vec<u32>,
}

impl Canvas {
    /// A blank canvas.
    pub fn new(width: usize, height: usize) -> Canvas {
        Canvas::from_image(Image::new(width, height))
    }

    pub fn from_image(image: Image) -> Canvas {
        let row = vec![0; image.words_per_row() + 1];
        Canvas { image, row }
    }

    pub fn width(&self) -> usize {
        self.image.width()
    }

    pub fn height(&self) -> usize {
        self.image.height()
    }

    pub fn image(&self) -> &Image {
        &self.image
    }

    pub fn into_image(self) -> Image {
        self.image
    }

    fn whole_rectangle(&self) -> Rectangle {
        Rectangle::new(0, 0, self.height() as i32, self.width() as i32)
    }

    fn valid_clip_rectangle(&self, clip: Option<Rectangle>) -> Rectangle {
        let whole = self.whole_rectangle();
        match clip {
            Some(rectangle) => rectangle.intersection(&whole),
            None => whole,
        }
    }

    /// Fills a rectangle, intersected with the optional clip rectangle.
    pub fn fill_rectangle(
        &mut self,
        rectangle: Rectangle,
        clip: Option<Rectangle>,
        composition: Composition,
    ) {
        let clip = self.valid_clip_rectangle(clip);
        let rectangle = rectangle.intersection(&clip);
        if rectangle.is_empty() {
            return;
        }

        self.fill_row_with_mask(
            (rectangle.left & 31) as usize,
            rectangle.width() as usize,
        );
        for y in rectangle.top..rectangle.bottom {
            self.apply_row(
                Point::new(rectangle.left, y),
                rectangle.width() as usize,
                composition,
            );
        }
    }

    /// Draws a portion of an image.
    ///
    /// `at` is where the top-left corner of the drawn portion lands, in
    /// canvas coordinates. `rectangle_to_draw` selects the portion in source
    /// coordinates and defaults to the whole source; moving its origin does
    /// not move the drawing. The optional clip rectangle is in canvas
    /// coordinates.
    pub fn composite(
        &mut self,
        source: &Image,
        at: Point,
        rectangle_to_draw: Option<Rectangle>,
        clip: Option<Rectangle>,
        composition: Composition,
    ) {
        let wanted = rectangle_to_draw
            .unwrap_or_else(|| Rectangle::new(0, 0, source.height() as i32, source.width() as i32));
        let clip = self.valid_clip_rectangle(clip);
        let (position, rectangle) = clip_image_drawing(at, wanted, clip);
        if rectangle.is_empty() {
            return;
        }

        let length = rectangle.width() as usize;
        let shift = (position.x & 31) - (rectangle.left & 31);

        let mut source_position = Point::new(rectangle.left, rectangle.top);
        let mut canvas_position = position;
        for _ in 0..rectangle.height() {
            self.fill_row_with_image(source, source_position, length);
            self.shift_row_right(shift);
            self.apply_row(canvas_position, length, composition);
            source_position.y += 1;
            canvas_position.y += 1;
        }
    }

    /// Draws a masked image: the mask pass whitens the opaque pixels, then
    /// the image pass blackens the set ones.
    pub fn draw_masked_image(
        &mut self,
        image: &MaskedImage,
        at: Point,
        rectangle_to_draw: Option<Rectangle>,
        clip: Option<Rectangle>,
    ) {
        self.composite(&image.mask, at, rectangle_to_draw, clip, Composition::Mask);
        self.composite(&image.image, at, rectangle_to_draw, clip, Composition::Or);
    }

    /// Fills the row buffer with a span of ones starting at bit `index`.
    fn fill_row_with_mask(&mut self, index: usize, length: usize) {
        let start_word = index / 32;
        let end_word = (index + length - 1) / 32;

        let start_mask = u32::MAX >> (index & 31);
        let end_mask = u32::MAX << (31 - ((index + length - 1) & 31));

        for word in &mut self.row[..start_word] {
            *word = 0;
        }
        for word in &mut self.row[start_word..=end_word] {
            *word = u32::MAX;
        }
        for word in &mut self.row[end_word + 1..] {
            *word = 0;
        }
        self.row[start_word] &= start_mask;
        self.row[end_word] &= end_mask;
    }

    /// Fills the row buffer with a span of one source row.
    fn fill_row_with_image(&mut self, source: &Image, position: Point, length: usize) {
        let x = position.x as usize;
        let word_index = position.y as usize * source.words_per_row() + x / 32;
        let word_length = (x + length).div_ceil(32) - x / 32;

        self.fill_row_with_mask(x & 31, length);

        let words = source.words();
        for i in 0..word_length {
            self.row[i] &= words[i + word_index];
        }
        for word in &mut self.row[word_length..] {
            *word = 0;
        }
    }

    /// Shifts the row buffer by up to 31 pixels either way.
    fn shift_row_right(&mut self, value: i32) {
        debug_assert!((-31..=31).contains(&value));
        if value == 0 {
            return;
        }
        if value > 0 {
            let shift = value as u32;
            for i in (1..self.row.len()).rev() {
                self.row[i] = (self.row[i] >> shift) | (self.row[i - 1] << (32 - shift));
            }
            self.row[0] >>= shift;
        } else {
            let shift = (-value) as u32;
            for i in 0..self.row.len() - 1 {
                self.row[i] = (self.row[i] << shift) | (self.row[i + 1] >> (32 - shift));
            }
            let last = self.row.len() - 1;
            self.row[last] <<= shift;
        }
    }

    /// Blends the row buffer into one destination row. The first and last
    /// destination words keep their pixels outside the span.
    fn apply_row(&mut self, position: Point, length: usize, composition: Composition) {
        let x = position.x as usize;
        let words_per_row = self.image.words_per_row();
        let word_index = position.y as usize * words_per_row + x / 32;
        let word_length = (x + length).div_ceil(32) - x / 32;

        let words = self.image.words_mut();

        let left = words[word_index];
        let mut new_left = composition.combine(left, self.row[0]);
        let outer_left = x % 32;
        if outer_left > 0 {
            let mask_left = u32::MAX << (32 - outer_left);
            new_left = (new_left & !mask_left) | (left & mask_left);
        }

        let outer_right = 31 - (x + length - 1) % 32;
        if word_length == 1 {
            if outer_right > 0 {
                let mask_right = u32::MAX >> (32 - outer_right);
                new_left = (new_left & !mask_right) | (left & mask_right);
            }
            words[word_index] = new_left;
            return;
        }
        words[word_index] = new_left;

        let right_index = word_index + word_length - 1;
        let right = words[right_index];
        let mut new_right = composition.combine(right, self.row[word_length - 1]);
        if outer_right > 0 {
            let mask_right = u32::MAX >> (32 - outer_right);
            new_right = (new_right & !mask_right) | (right & mask_right);
        }
        words[right_index] = new_right;

        for i in 1..word_length - 1 {
            words[word_index + i] = composition.combine(words[word_index + i], self.row[i]);
        }
    }
}

/// Rewrites the clip rectangle in source coordinates, intersects, and moves
/// the position accordingly so it never goes negative.
fn clip_image_drawing(
    position: Point,
    rectangle_to_draw: Rectangle,
    clip: Rectangle,
) -> (Point, Rectangle) {
    let source_clip = Rectangle::new(
        clip.top - position.y + rectangle_to_draw.top,
        clip.left - position.x + rectangle_to_draw.left,
        clip.top - position.y + rectangle_to_draw.top + clip.height(),
        clip.left - position.x + rectangle_to_draw.left + clip.width(),
    );
    let clipped = rectangle_to_draw.intersection(&source_clip);
    let clipped_position = Point::new(
        position.x + clipped.left - rectangle_to_draw.left,
        position.y + clipped.top - rectangle_to_draw.top,
    );
    (clipped_position, clipped)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stripe_image() -> Image {
        // 40 pixels wide so rows span two words.
        let mut image = Image::new(40, 3);
        for x in 0..40 {
            image.set(x, 1, true);
        }
        image
    }

    #[test]
    fn copy_composition_is_idempotent() {
        let source = stripe_image();
        let mut canvas = Canvas::new(40, 3);
        canvas.composite(&source, Point::new(0, 0), None, None, Composition::Copy);
        let once = canvas.image().clone();
        canvas.composite(&source, Point::new(0, 0), None, None, Composition::Copy);
        assert_eq!(canvas.image(), &once);
        assert_eq!(once, source);
    }

    #[test]
    fn unaligned_edges_keep_outside_pixels() {
        let mut canvas = Canvas::new(64, 1);
        canvas.fill_rectangle(Rectangle::new(0, 0, 1, 64), None, Composition::Or);
        // Whiten a span crossing a word boundary.
        canvas.fill_rectangle(Rectangle::new(0, 29, 1, 37), None, Composition::Mask);
        assert!(canvas.image().get(28, 0));
        assert!(!canvas.image().get(29, 0));
        assert!(!canvas.image().get(36, 0));
        assert!(canvas.image().get(37, 0));
    }

    #[test]
    fn composite_shifts_pixels_to_the_position() {
        let mut source = Image::new(8, 1);
        source.set(0, 0, true);
        let mut canvas = Canvas::new(64, 2);
        canvas.composite(&source, Point::new(35, 1), None, None, Composition::Or);
        assert!(canvas.image().get(35, 1));
        assert!(!canvas.image().get(34, 1));
        assert!(!canvas.image().get(36, 1));
        assert!(!canvas.image().get(35, 0));
    }

    #[test]
    fn clip_rectangle_restricts_the_drawing() {
        let source = stripe_image();
        let mut canvas = Canvas::new(40, 3);
        canvas.composite(
            &source,
            Point::new(0, 0),
            None,
            Some(Rectangle::new(0, 0, 3, 10)),
            Composition::Or,
        );
        assert!(canvas.image().get(9, 1));
        assert!(!canvas.image().get(10, 1));
    }

    #[test]
    fn xor_twice_restores_the_canvas() {
        let source = stripe_image();
        let mut canvas = Canvas::new(40, 3);
        canvas.composite(&source, Point::new(0, 0), None, None, Composition::Xor);
        canvas.composite(&source, Point::new(0, 0), None, None, Composition::Xor);
        assert_eq!(canvas.image(), &Image::new(40, 3));
    }
}
