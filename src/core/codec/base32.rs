//! core/codec/base32.rs: RFC 4648 base-32 with a lowercase alphabet.
//!
//! Registration ids derived from hardware keys are the base-32 form of a
//! SHA-256 digest with the `=` padding stripped. Output is always lowercase.

const ALPHABET: &[u8; 32] = b"abcdefghijklmnopqrstuvwxyz234567";
const PAD: u8 = b'=';

/// Encode `src`, padding the last group with `=` to a multiple of 8.
#[must_use]
pub fn encode(src: &[u8]) -> String {
    let mut out = String::with_capacity(src.len().div_ceil(5) * 8);
    for chunk in src.chunks(5) {
        let mut block = [0u8; 5];
        block[..chunk.len()].copy_from_slice(chunk);
        let bits = block.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
        // significant output characters for 1..=5 input bytes
        let used = match chunk.len() {
            1 => 2,
            2 => 4,
            3 => 5,
            4 => 7,
            _ => 8,
        };
        for i in 0..8 {
            if i < used {
                let idx = ((bits >> (35 - i * 5)) & 0x1f) as usize;
                out.push(char::from(ALPHABET[idx]));
            } else {
                out.push(char::from(PAD));
            }
        }
    }
    out
}

/// Encode without trailing padding.
#[must_use]
pub fn encode_unpadded(src: &[u8]) -> String {
    let mut s = encode(src);
    let trimmed = s.trim_end_matches(char::from(PAD)).len();
    s.truncate(trimmed);
    s
}
