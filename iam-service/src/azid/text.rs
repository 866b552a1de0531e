//! Crockford base32, lowercase, without padding.
//!
//! Bits are taken most-significant first in 5-bit groups; a final partial
//! group is zero-padded on the right. Decoding is case-insensitive and
//! accepts the Crockford aliases `o` for `0` and `i`/`l` for `1`.

use super::AzidError;

const ALPHABET: &[u8; 32] = b"0123456789abcdefghjkmnpqrstvwxyz";

pub fn encode(data: &[u8]) -> String {
    let mut out = String::with_capacity((data.len() * 8).div_ceil(5));
    let mut buffer: u16 = 0;
    let mut bits: u32 = 0;

    for &byte in data {
        buffer = (buffer << 8) | u16::from(byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(ALPHABET[usize::from((buffer >> bits) & 0x1f)] as char);
        }
        buffer &= (1 << bits) - 1;
    }

    if bits > 0 {
        out.push(ALPHABET[usize::from((buffer << (5 - bits)) & 0x1f)] as char);
    }

    out
}

pub fn decode(text: &str) -> Result<Vec<u8>, AzidError> {
    let mut out = Vec::with_capacity(text.len() * 5 / 8);
    let mut buffer: u16 = 0;
    let mut bits: u32 = 0;

    for c in text.chars() {
        buffer = (buffer << 5) | u16::from(decode_char(c)?);
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            out.push((buffer >> bits) as u8);
            buffer &= (1 << bits) - 1;
        }
    }

    // Leftover bits are padding: fewer than one group and all zero.
    if bits >= 5 || buffer != 0 {
        return Err(AzidError::NonCanonical);
    }

    Ok(out)
}

fn decode_char(c: char) -> Result<u8, AzidError> {
    let value = match c.to_ascii_lowercase() {
        'o' => 0,
        'i' | 'l' => 1,
        lower => ALPHABET
            .iter()
            .position(|&a| a as char == lower)
            .ok_or(AzidError::InvalidCharacter(c))? as u8,
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_known_values() {
        assert_eq!(encode(&[0x13, 0x00, 0x00, 0x03, 0xe8]), "2c0000z8");
        assert_eq!(encode(&[0x13, 0x70, 0x00, 0x00, 0x01]), "2dr00001");
        assert_eq!(encode(&[]), "");
        assert_eq!(encode(&[0xff]), "zw");
    }

    #[test]
    fn test_decode_accepts_aliases_and_uppercase() -> Result<(), AzidError> {
        assert_eq!(decode("2C0000Z8")?, vec![0x13, 0x00, 0x00, 0x03, 0xe8]);
        assert_eq!(decode("2cOOOOz8")?, vec![0x13, 0x00, 0x00, 0x03, 0xe8]);
        assert_eq!(decode("2dr0000l")?, vec![0x13, 0x70, 0x00, 0x00, 0x01]);
        Ok(())
    }

    #[test]
    fn test_decode_rejects_bad_input() {
        assert_eq!(decode("2u"), Err(AzidError::InvalidCharacter('u')));
        // 0xff encodes to "zw"; "zz" leaves non-zero padding bits.
        assert_eq!(decode("zz"), Err(AzidError::NonCanonical));
        // A dangling character that cannot complete a byte.
        assert_eq!(decode("zw0"), Err(AzidError::NonCanonical));
    }
}
