//! Resources of the resource fork: listing, and lazy typed decoding.

pub mod fork;
pub mod mace;
pub mod sound;

use std::sync::{Arc, OnceLock};

use log::warn;

use crate::image::MaskedImage;
use crate::stack::data::{DataRange, FourCharCode};
use crate::stack::error::Result;

use fork::ResourceForkReader;
pub use sound::Sound;

pub const ICON_TYPE: FourCharCode = FourCharCode::from_tag(b"ICON");
pub const PICTURE_TYPE: FourCharCode = FourCharCode::from_tag(b"PICT");
pub const SOUND_TYPE: FourCharCode = FourCharCode::from_tag(b"snd ");

const ICON_SIDE: usize = 32;

/// The decoded form of a resource, depending on its type.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedResource {
    /// A 32x32 'ICON' raster.
    Icon(Arc<MaskedImage>),
    /// A 'PICT' drawing, kept as raw bytes for an external renderer.
    Picture(Arc<[u8]>),
    /// A 'snd ' sound, or nothing when it could not be decoded.
    Sound(Option<Arc<Sound>>),
    /// Any other type, kept as raw bytes.
    Generic(Arc<[u8]>),
}

/// A resource of the fork. The body is decoded on first access and the
/// result kept for the life of the resource.
#[derive(Debug)]
pub struct Resource {
    pub type_code: FourCharCode,
    pub identifier: i16,
    pub name: String,
    data: DataRange,
    decoded: OnceLock<DecodedResource>,
}

impl Resource {
    pub fn new(type_code: FourCharCode, identifier: i16, name: String, data: DataRange) -> Resource {
        Resource {
            type_code,
            identifier,
            name,
            data,
            decoded: OnceLock::new(),
        }
    }

    /// The raw body of the resource.
    pub fn data(&self) -> &DataRange {
        &self.data
    }

    /// The typed content of the resource. A body that fails to decode
    /// yields an absent sound or raw bytes, never an error: one bad
    /// resource must not take the list down.
    pub fn decoded(&self) -> &DecodedResource {
        self.decoded.get_or_init(|| self.decode())
    }

    fn decode(&self) -> DecodedResource {
        match self.type_code {
            ICON_TYPE => match MaskedImage::decode(&self.data, ICON_SIDE, ICON_SIDE) {
                Ok(icon) => DecodedResource::Icon(Arc::new(icon)),
                Err(error) => {
                    warn!("icon {} cannot be decoded: {error}", self.identifier);
                    DecodedResource::Generic(Arc::from(self.data.bytes()))
                }
            },
            PICTURE_TYPE => DecodedResource::Picture(Arc::from(self.data.bytes())),
            SOUND_TYPE => match sound::decode(&self.data) {
                Ok(decoded) => DecodedResource::Sound(Some(Arc::new(decoded))),
                Err(error) => {
                    warn!("sound {} cannot be decoded: {error}", self.identifier);
                    DecodedResource::Sound(None)
                }
            },
            _ => DecodedResource::Generic(Arc::from(self.data.bytes())),
        }
    }
}

/// Lists the resources of a fork, bodies located but not decoded. No fork
/// means no resources, not a failure.
///
/// # Errors
/// Fails with `CorruptResourceFork` when the map is inconsistent.
pub fn list_resources(fork: Option<&DataRange>) -> Result<Vec<Resource>> {
    let Some(fork) = fork else {
        return Ok(Vec::new());
    };
    let reader = ResourceForkReader::new(fork.clone())?;
    let references = reader.read_references()?;
    let mut resources = Vec::with_capacity(references.len());
    for reference in references {
        let data = reader.extract_data(reference.data_offset)?;
        resources.push(Resource::new(
            reference.type_code,
            reference.identifier,
            reference.name,
            data,
        ));
    }
    Ok(resources)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn no_fork_means_no_resources() {
        assert!(list_resources(None).unwrap().is_empty());
    }

    #[test]
    fn a_malformed_sound_decodes_to_silence() {
        let data = DataRange::whole(Arc::from(vec![0u8; 2]));
        let resource = Resource::new(SOUND_TYPE, 128, String::new(), data);
        assert_eq!(resource.decoded(), &DecodedResource::Sound(None));
    }

    #[test]
    fn unknown_types_keep_their_bytes() {
        let data = DataRange::whole(Arc::from(vec![1u8, 2, 3]));
        let resource = Resource::new(FourCharCode::from_tag(b"STR "), 0, String::new(), data);
        match resource.decoded() {
            DecodedResource::Generic(bytes) => assert_eq!(bytes.as_ref(), &[1, 2, 3]),
            other => panic!("unexpected decode: {other:?}"),
        }
    }
}
