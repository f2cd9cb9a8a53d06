//! Z85 text encoding (ZeroMQ 32/Z85) and the two arbitrary-length variants
//! used on the wire.
//!
//! Strict Z85 only encodes data whose length is a multiple of 4. The wire
//! supports two relaxations:
//!
//! - **Z85B** — the trailing partial chunk of `n` bytes is encoded into
//!   `n + 1` characters (85^(n+1) > 256^n for n ≤ 3).
//! - **Z85P** — the data is zero-padded to a multiple of 4 and prefixed
//!   with one digit character holding the pad count.

use crate::{Result, WireError};

const ALPHABET: &[u8; 85] =
    b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ.-:+=^!/*?&<>()[]{}@%$#";

fn decode_digit(c: u8) -> Result<u32> {
    ALPHABET
        .iter()
        .position(|&a| a == c)
        .map(|p| p as u32)
        .ok_or_else(|| WireError::Encoding(format!("invalid z85 character {:?}", c as char)))
}

fn encode_chunk(chunk: &[u8], out: &mut String) {
    // big-endian value of up to 4 bytes, n bytes -> n+1 digits
    let mut value: u32 = 0;
    for &b in chunk {
        value = (value << 8) | u32::from(b);
    }
    let digits = chunk.len() + 1;
    let mut buf = [0u8; 5];
    for slot in buf.iter_mut().take(digits).rev() {
        *slot = ALPHABET[(value % 85) as usize];
        value /= 85;
    }
    for &d in &buf[..digits] {
        out.push(d as char);
    }
}

fn decode_group(group: &[u8], out: &mut Vec<u8>) -> Result<()> {
    let nbytes = group.len() - 1;
    let mut value: u32 = 0;
    for &c in group {
        let digit = decode_digit(c)?;
        value = value
            .checked_mul(85)
            .and_then(|v| v.checked_add(digit))
            .ok_or_else(|| WireError::Encoding("z85 group overflow".into()))?;
    }
    for i in (0..nbytes).rev() {
        out.push((value >> (8 * i)) as u8);
    }
    Ok(())
}

/// Encode arbitrary-length data (Z85B variant).
pub fn encode_z85b(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 5 / 4 + 2);
    for chunk in data.chunks(4) {
        encode_chunk(chunk, &mut out);
    }
    out
}

/// Decode arbitrary-length data (Z85B variant).
pub fn decode_z85b(text: &str) -> Result<Vec<u8>> {
    let bytes = text.as_bytes();
    if bytes.len() % 5 == 1 {
        return Err(WireError::Encoding("invalid z85b length".into()));
    }
    let mut out = Vec::with_capacity(bytes.len() * 4 / 5 + 1);
    for group in bytes.chunks(5) {
        decode_group(group, &mut out)?;
    }
    Ok(out)
}

/// Encode with zero padding and a pad-count prefix (Z85P variant).
pub fn encode_z85p(data: &[u8]) -> String {
    let pad = (4 - data.len() % 4) % 4;
    let mut padded = data.to_vec();
    padded.resize(data.len() + pad, 0);

    let mut out = String::with_capacity(padded.len() * 5 / 4 + 1);
    out.push(char::from(b'0' + pad as u8));
    for chunk in padded.chunks(4) {
        encode_chunk(chunk, &mut out);
    }
    out
}

/// Decode a pad-count prefixed encoding (Z85P variant).
pub fn decode_z85p(text: &str) -> Result<Vec<u8>> {
    let bytes = text.as_bytes();
    let (&prefix, rest) = bytes
        .split_first()
        .ok_or_else(|| WireError::Encoding("empty z85p input".into()))?;
    let pad = match prefix {
        b'0'..=b'3' => (prefix - b'0') as usize,
        _ => return Err(WireError::Encoding("invalid z85p pad prefix".into())),
    };
    if rest.len() % 5 != 0 {
        return Err(WireError::Encoding("invalid z85p length".into()));
    }
    let mut out = Vec::with_capacity(rest.len() * 4 / 5);
    for group in rest.chunks(5) {
        decode_group(group, &mut out)?;
    }
    if pad > out.len() {
        return Err(WireError::Encoding("z85p pad exceeds data".into()));
    }
    out.truncate(out.len() - pad);
    Ok(out)
}
