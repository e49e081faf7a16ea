//! # hypercard-reader
//!
//! A reader for classic HyperCard stack files.
//! Decodes the block structure of the data fork into a graph of cards,
//! backgrounds and parts, renders the WOBA compressed pictures, and reads
//! the resource fork with its icons and sounds (including MACE compressed
//! audio).
//!
//! **Note:** Password-protected stacks open with the password, or without
//! one when the header can be recovered from the data itself.
pub mod image;
pub mod resources;
pub mod stack;

// Re-export the main types for convenience
pub use image::{Canvas, Composition, Image, MaskedImage};
pub use resources::{DecodedResource, Resource, Sound};
pub use stack::{
    error::{Result, StackError},
    models::{Background, Card, Part, PartStyle, PartType, Rectangle, Stack, UserLevel},
    StackFile,
};
