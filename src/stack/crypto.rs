//! Decryption of the stack block header of private access stacks.
//!
//! The scheme is the historical one: the 0x32 bytes at 0x18 are XORed with a
//! stream generated by the old Mac OS `Random` function, seeded with a hash
//! of the password. The cipher is behind a trait so a caller can substitute
//! its own scheme for stacks protected by third-party tools.

use encoding_rs::MACINTOSH;
use log::info;

use super::data::DataRange;
use super::error::Result;
use super::stack_block::{ENCODED_HEADER_LENGTH, ENCODED_HEADER_OFFSET};

/// Decrypts the encoded header region of a stack block.
pub trait HeaderDecrypter {
    /// Returns the decoded header bytes, or `None` when the password does
    /// not match.
    ///
    /// # Errors
    /// Fails when the stack block is too short to hold the encoded header.
    fn decrypt(&self, stack_block: &DataRange, password: &str) -> Result<Option<Vec<u8>>>;
}

/// The decrypter HyperCard itself used.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomXorDecrypter;

impl HeaderDecrypter for RandomXorDecrypter {
    fn decrypt(&self, stack_block: &DataRange, password: &str) -> Result<Option<Vec<u8>>> {
        let password_bytes = fold_password(password);

        let first_hash = hash_password(&password_bytes);
        let decoded = decode_with_hash(stack_block, first_hash)?;

        // The reference hash is the hash of the first hash written out as a
        // 4-character string.
        let password_hash = hash_password(&first_hash.to_be_bytes());
        let decoded_password_hash = u32::from_be_bytes([
            decoded[0x2C - ENCODED_HEADER_OFFSET],
            decoded[0x2D - ENCODED_HEADER_OFFSET],
            decoded[0x2E - ENCODED_HEADER_OFFSET],
            decoded[0x2F - ENCODED_HEADER_OFFSET],
        ]);
        if password_hash != decoded_password_hash {
            return Ok(None);
        }
        Ok(Some(decoded))
    }
}

/// Recovers the decoded header of a private access stack without the
/// password, by brute-forcing the first value of the XOR stream.
///
/// Returns `None` when no plausible stream value exists, which means the
/// header was not encrypted with the standard scheme.
pub fn hack(stack_block: &DataRange) -> Result<Option<Vec<u8>>> {
    let Some(mut x) = hack_first_xor(stack_block)? else {
        return Ok(None);
    };
    info!("Recovered the header XOR stream without a password");

    let mut data = encoded_header(stack_block)?;
    let mut i = 0;
    while i + 4 <= ENCODED_HEADER_LENGTH {
        for (j, byte) in x.to_be_bytes().into_iter().enumerate() {
            data[i + j] ^= byte;
        }
        x = hash_number(x);
        i += 2;
    }
    Ok(Some(data))
}

fn encoded_header(stack_block: &DataRange) -> Result<Vec<u8>> {
    Ok(stack_block
        .subrange(ENCODED_HEADER_OFFSET, ENCODED_HEADER_LENGTH)?
        .bytes()
        .to_vec())
}

fn decode_with_hash(stack_block: &DataRange, hash: u32) -> Result<Vec<u8>> {
    let mut x = hash;
    for _ in 0..10 {
        x = hash_number(x);
    }

    let mut data = encoded_header(stack_block)?;

    // The stream advances by two bytes per step, so consecutive XOR words
    // overlap by half.
    let mut i = 0;
    while i + 4 <= ENCODED_HEADER_LENGTH {
        x = hash_number(x);
        for (j, byte) in x.to_be_bytes().into_iter().enumerate() {
            data[i + j] ^= byte;
        }
        i += 2;
    }
    Ok(data)
}

/// Lowercases the password, strips the accents HyperCard ignored, and
/// encodes it to Mac OS Roman.
fn fold_password(password: &str) -> Vec<u8> {
    let folded: String = password
        .chars()
        .flat_map(char::to_lowercase)
        .map(strip_accent)
        .collect();
    let (bytes, _, _) = MACINTOSH.encode(&folded);
    bytes.into_owned()
}

fn strip_accent(c: char) -> char {
    match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => 'a',
        'ç' => 'c',
        'è' | 'é' | 'ê' | 'ë' => 'e',
        'ì' | 'í' | 'î' | 'ï' => 'i',
        'ñ' => 'n',
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' => 'o',
        'ù' | 'ú' | 'û' | 'ü' => 'u',
        'ÿ' => 'y',
        other => other,
    }
}

fn hash_password(password: &[u8]) -> u32 {
    let mut x: u32 = 0;

    let character0 = password.first().copied().unwrap_or(0) as u32;
    let mut s = character0 + password.len() as u32;
    if s > 0xFF {
        s &= 0xFF;
    } else if character0 > 0x80 {
        s |= 0xFFFF_FF00;
    }

    for &character in password {
        for i in 0..8 {
            s = hash_number(s);
            if (character >> (7 - i)) & 1 != 0 {
                x = x.wrapping_add(s);
            }
        }
    }

    // An empty hash encodes as 'Bill', after the author of HyperCard.
    if x == 0 {
        return 0x4269_6C6C;
    }
    x
}

/// The `Random` function of old Mac OS, which the scheme uses as a hash.
fn hash_number(x: u32) -> u32 {
    let mut result = (x as u64).wrapping_mul(0x41A7);
    result += result >> 31;
    (result & 0x7FFF_FFFF) as u32
}

/// Finds the first value of the XOR stream. The first encoded word is known
/// to hold the stack size, so the stream word is known up to its low 16
/// bits, which are brute-forced.
fn hack_first_xor(stack_block: &DataRange) -> Result<Option<u32>> {
    let xored = stack_block.read_u32(ENCODED_HEADER_OFFSET)?;
    let stack_size = stack_block.read_u32(0x0)?;
    let xor = xored ^ stack_size;

    let first_16_bits = xor & 0xFFFF_0000;
    for i in 0..0xFFFFu32 {
        let value = first_16_bits | i;
        let transformed = value ^ (hash_number(value) >> 16);
        if transformed == xor && is_first_xor_good(stack_block, value)? {
            return Ok(Some(value));
        }
    }
    Ok(None)
}

/// Checks a candidate stream value against the user level field, the most
/// constrained field of the decoded header.
fn is_first_xor_good(stack_block: &DataRange, value: u32) -> Result<bool> {
    let mut hash = value;
    for _ in 0..23 {
        hash = hash_number(hash);
    }
    let xored_user_level = stack_block.read_u16(0x48)?;
    let user_level = xored_user_level ^ (hash & 0xFFFF) as u16;
    Ok(user_level <= 5)
}
