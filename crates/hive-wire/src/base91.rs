//! basE91 text encoding.
//!
//! Packs 13 or 14 bits of input into two output characters drawn from a
//! 91-character alphabet, giving ~23% overhead versus 33% for base64. The
//! alphabet avoids `'`, `\` and `-` so the output is safe inside JSON
//! strings.

use crate::{Result, WireError};

const ALPHABET: &[u8; 91] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789!#$%&()*+,./:;<=>?@[]^_`{|}~\"";

fn decode_digit(c: u8) -> Result<u32> {
    ALPHABET
        .iter()
        .position(|&a| a == c)
        .map(|p| p as u32)
        .ok_or_else(|| WireError::Encoding(format!("invalid base91 character {:?}", c as char)))
}

/// Encode bytes as basE91 text.
pub fn encode(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 8 / 6 + 2);
    let mut accumulator: u32 = 0;
    let mut bits: u32 = 0;

    for &byte in data {
        accumulator |= u32::from(byte) << bits;
        bits += 8;
        if bits > 13 {
            let mut value = accumulator & 8191;
            if value > 88 {
                accumulator >>= 13;
                bits -= 13;
            } else {
                value = accumulator & 16383;
                accumulator >>= 14;
                bits -= 14;
            }
            out.push(ALPHABET[(value % 91) as usize] as char);
            out.push(ALPHABET[(value / 91) as usize] as char);
        }
    }

    if bits > 0 {
        out.push(ALPHABET[(accumulator % 91) as usize] as char);
        if bits > 7 || accumulator > 90 {
            out.push(ALPHABET[(accumulator / 91) as usize] as char);
        }
    }
    out
}

/// Decode basE91 text back to bytes.
pub fn decode(text: &str) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(text.len() * 7 / 8 + 1);
    let mut accumulator: u32 = 0;
    let mut bits: u32 = 0;
    let mut pending: Option<u32> = None;

    for &c in text.as_bytes() {
        let digit = decode_digit(c)?;
        match pending.take() {
            None => pending = Some(digit),
            Some(first) => {
                let value = first + digit * 91;
                accumulator |= value << bits;
                bits += if (value & 8191) > 88 { 13 } else { 14 };
                while bits > 7 {
                    out.push((accumulator & 0xFF) as u8);
                    accumulator >>= 8;
                    bits -= 8;
                }
            }
        }
    }

    if let Some(first) = pending {
        out.push((accumulator | (first << bits)) as u8);
    }
    Ok(out)
}
