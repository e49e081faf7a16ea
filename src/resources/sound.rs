//! Decoding of 'snd ' resources to PCM samples.
//!
//! Only the simple layouts that stacks actually contain are accepted: a
//! play command over a standard or compressed sound header. Everything
//! else fails with a typed error, which callers turn into silence.

use crate::stack::data::{DataRange, FourCharCode};
use crate::stack::error::{Result, StackError};

use super::mace::{self, Ratio};

/// A sound ready for playback.
#[derive(Debug, Clone, PartialEq)]
pub struct Sound {
    /// Samples per second.
    pub sample_rate: f64,
    /// Signed 16-bit PCM, one channel.
    pub samples: Vec<i16>,
}

const PLAY_BUFFER_COMMAND: u16 = 80;
const PLAY_SOUND_COMMAND: u16 = 81;
const NULL_COMMAND: u16 = 0;

const STANDARD_HEADER: u8 = 0x00;
const COMPRESSED_HEADER: u8 = 0xFE;

const NONE_TAG: FourCharCode = FourCharCode::from_tag(b"NONE");
const MACE3_TAG: FourCharCode = FourCharCode::from_tag(b"MAC3");
const MACE6_TAG: FourCharCode = FourCharCode::from_tag(b"MAC6");

/// Decodes a 'snd ' resource body.
///
/// # Errors
/// Fails with `UnsupportedFormat`, `UnsupportedCommandList` or
/// `UnsupportedCompression` on layouts the decoder does not handle, and
/// with `OutOfRange` when the body is shorter than its headers declare.
pub fn decode(data: &DataRange) -> Result<Sound> {
    let format = data.read_u16(0x0)?;
    let command_count_offset = match format {
        1 => 0xA,
        2 => 0x4,
        _ => return Err(StackError::UnsupportedFormat(format)),
    };

    let command_count = data.read_u16(command_count_offset)? as usize;
    let commands_offset = command_count_offset + 2;
    let mut commands = Vec::with_capacity(command_count);
    for index in 0..command_count {
        commands.push(data.read_u16(commands_offset + index * 8)? & 0x7FFF);
    }
    match commands.as_slice() {
        [PLAY_BUFFER_COMMAND] | [PLAY_SOUND_COMMAND] => (),
        [NULL_COMMAND, PLAY_BUFFER_COMMAND] | [NULL_COMMAND, PLAY_SOUND_COMMAND] => (),
        _ => return Err(StackError::UnsupportedCommandList(commands)),
    }

    let header = commands_offset + command_count * 8;
    let sample_rate = read_sample_rate(data, header)?;
    match data.read_u8(header + 0x14)? {
        STANDARD_HEADER => decode_standard(data, header, sample_rate),
        COMPRESSED_HEADER => decode_compressed(data, header, sample_rate),
        other => Err(StackError::UnsupportedCompression(format!(
            "sound header of kind 0x{other:02X}"
        ))),
    }
}

/// The stored rate is a 16.16 fixed-point number of samples per second. The
/// base pitch shifts it so the sound plays back at middle C.
fn read_sample_rate(data: &DataRange, header: usize) -> Result<f64> {
    let raw_rate = data.read_u32(header + 0x8)? as f64 / 65536.0;
    let base_pitch = data.read_u8(header + 0x15)?;
    Ok(raw_rate * ((60 - base_pitch as i32) as f64 / 12.0).exp2())
}

fn decode_standard(data: &DataRange, header: usize, sample_rate: f64) -> Result<Sound> {
    let sample_count = data.read_u32(header + 0x4)? as usize;
    let bytes = data.subrange(header + 0x16, sample_count)?;
    Ok(Sound {
        sample_rate,
        samples: widen_bytes(bytes.bytes().iter().copied()),
    })
}

fn decode_compressed(data: &DataRange, header: usize, sample_rate: f64) -> Result<Sound> {
    let channel_count = data.read_u32(header + 0x4)? as usize;
    let frame_count = data.read_u32(header + 0x16)? as usize;
    let compression = read_compression(data, header)?;
    let body = data.subrange(header + 0x40, data.len() - (header + 0x40).min(data.len()))?;

    let samples = match compression {
        Compression::NotCompressed => {
            // Raw 8-bit frames, channel-interleaved; keep channel 0.
            let available = if channel_count == 0 {
                0
            } else {
                (body.len() / channel_count).min(frame_count)
            };
            widen_bytes(
                (0..available).map(|index| body.bytes()[index * channel_count]),
            )
        }
        Compression::ThreeToOne => {
            mace::expand(body.bytes(), channel_count, frame_count, Ratio::ThreeToOne)
        }
        Compression::SixToOne => {
            mace::expand(body.bytes(), channel_count, frame_count, Ratio::SixToOne)
        }
    };
    Ok(Sound {
        sample_rate,
        samples,
    })
}

enum Compression {
    NotCompressed,
    ThreeToOne,
    SixToOne,
}

fn read_compression(data: &DataRange, header: usize) -> Result<Compression> {
    match data.read_i16(header + 0x38)? {
        -2 => Err(StackError::UnsupportedCompression(
            "variably compressed sound".to_owned(),
        )),
        -1 => {
            let tag = FourCharCode(data.read_u32(header + 0x28)?);
            match tag {
                NONE_TAG => Ok(Compression::NotCompressed),
                MACE3_TAG => Ok(Compression::ThreeToOne),
                MACE6_TAG => Ok(Compression::SixToOne),
                _ => Err(StackError::UnsupportedCompression(format!(
                    "codec {tag:?}"
                ))),
            }
        }
        0 => Ok(Compression::NotCompressed),
        3 => Ok(Compression::ThreeToOne),
        4 => Ok(Compression::SixToOne),
        other => Err(StackError::UnsupportedCompression(format!(
            "compression id {other}"
        ))),
    }
}

/// 8-bit samples are stored excess-128; scale them up to 16 bits.
fn widen_bytes(bytes: impl Iterator<Item = u8>) -> Vec<i16> {
    bytes.map(|byte| (byte as i16 - 128) * 256).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::{BigEndian, WriteBytesExt};
    use std::sync::Arc;

    fn build_standard_sound(samples: &[u8]) -> Vec<u8> {
        let mut data = Vec::new();
        data.write_u16::<BigEndian>(1).unwrap();
        // One data format entry, as format 1 resources carry.
        data.write_u16::<BigEndian>(1).unwrap();
        data.write_u16::<BigEndian>(5).unwrap();
        data.write_u32::<BigEndian>(0x80).unwrap();
        data.write_u16::<BigEndian>(1).unwrap();
        // Play-buffer command.
        data.write_u16::<BigEndian>(PLAY_BUFFER_COMMAND).unwrap();
        data.write_u16::<BigEndian>(0).unwrap();
        data.write_u32::<BigEndian>(0x14).unwrap();
        // Sound header.
        data.write_u32::<BigEndian>(0).unwrap();
        data.write_u32::<BigEndian>(samples.len() as u32).unwrap();
        data.write_u32::<BigEndian>(22050 << 16).unwrap();
        data.write_u32::<BigEndian>(0).unwrap();
        data.write_u32::<BigEndian>(0).unwrap();
        data.push(STANDARD_HEADER);
        data.push(60);
        data.extend_from_slice(samples);
        data
    }

    fn build_null_prefixed_sound(play_command: u16, samples: &[u8]) -> Vec<u8> {
        let mut data = Vec::new();
        data.write_u16::<BigEndian>(2).unwrap();
        data.write_u16::<BigEndian>(0).unwrap();
        data.write_u16::<BigEndian>(2).unwrap();
        for command in [NULL_COMMAND, play_command] {
            data.write_u16::<BigEndian>(command).unwrap();
            data.write_u16::<BigEndian>(0).unwrap();
            data.write_u32::<BigEndian>(0).unwrap();
        }
        // Sound header.
        data.write_u32::<BigEndian>(0).unwrap();
        data.write_u32::<BigEndian>(samples.len() as u32).unwrap();
        data.write_u32::<BigEndian>(22050 << 16).unwrap();
        data.write_u32::<BigEndian>(0).unwrap();
        data.write_u32::<BigEndian>(0).unwrap();
        data.push(STANDARD_HEADER);
        data.push(60);
        data.extend_from_slice(samples);
        data
    }

    fn range(bytes: Vec<u8>) -> DataRange {
        DataRange::whole(Arc::from(bytes))
    }

    #[test]
    fn a_standard_sound_decodes_its_samples() {
        let sound = decode(&range(build_standard_sound(&[128, 129, 127, 255, 0]))).unwrap();
        assert_eq!(sound.sample_rate, 22050.0);
        assert_eq!(sound.samples, vec![0, 256, -256, 32512, -32768]);
    }

    #[test]
    fn the_base_pitch_shifts_the_rate_by_octaves() {
        let mut bytes = build_standard_sound(&[128]);
        // Base pitch an octave below middle C.
        let pitch_offset = bytes.len() - 1 - 1;
        bytes[pitch_offset] = 48;
        let sound = decode(&range(bytes)).unwrap();
        assert!((sound.sample_rate - 44100.0).abs() < 1e-6);
    }

    #[test]
    fn a_null_command_before_the_play_command_is_tolerated() {
        for play_command in [PLAY_BUFFER_COMMAND, PLAY_SOUND_COMMAND] {
            let bytes = build_null_prefixed_sound(play_command, &[128, 130, 126]);
            let sound = decode(&range(bytes)).unwrap();
            assert_eq!(sound.sample_rate, 22050.0);
            assert_eq!(sound.samples, vec![0, 512, -512]);
        }
    }

    #[test]
    fn two_play_commands_are_rejected() {
        let mut data = Vec::new();
        data.write_u16::<BigEndian>(2).unwrap();
        data.write_u16::<BigEndian>(0).unwrap();
        data.write_u16::<BigEndian>(2).unwrap();
        for command in [PLAY_BUFFER_COMMAND, PLAY_SOUND_COMMAND] {
            data.write_u16::<BigEndian>(command).unwrap();
            data.write_u16::<BigEndian>(0).unwrap();
            data.write_u32::<BigEndian>(0).unwrap();
        }
        assert!(matches!(
            decode(&range(data)),
            Err(StackError::UnsupportedCommandList(commands)) if commands == vec![80, 81]
        ));
    }

    #[test]
    fn an_unknown_format_is_rejected() {
        let mut data = Vec::new();
        data.write_u16::<BigEndian>(3).unwrap();
        assert!(matches!(
            decode(&range(data)),
            Err(StackError::UnsupportedFormat(3))
        ));
    }

    #[test]
    fn an_empty_command_list_is_rejected() {
        let mut data = Vec::new();
        data.write_u16::<BigEndian>(2).unwrap();
        data.write_u16::<BigEndian>(0).unwrap();
        data.write_u16::<BigEndian>(0).unwrap();
        assert!(matches!(
            decode(&range(data)),
            Err(StackError::UnsupportedCommandList(commands)) if commands.is_empty()
        ));
    }

    #[test]
    fn a_truncated_body_fails_without_panicking() {
        let mut bytes = build_standard_sound(&[1, 2, 3, 4]);
        bytes.truncate(bytes.len() - 2);
        assert!(decode(&range(bytes)).is_err());
    }
}
