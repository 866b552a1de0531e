//! AZID identifier scheme.
//!
//! Every entity identifier is a fixed-width signed integer made of a clear
//! sign bit, a block of embedded category bits chosen at generation time and
//! a block of random identifier bits that must be non-zero.
//!
//! # Binary Form
//!
//! ```text
//! single:    [type tag][big-endian payload]
//! composite: [0x40][field count][type tag per field][field payloads...]
//! ```
//!
//! A composite nested inside another composite contributes its field count,
//! type tags and payloads (without the leading `0x40`) as its payload.
//!
//! # Text Form
//!
//! ```text
//! <entity prefix><crockford base32 lowercase, no padding>(binary form)
//! ```
//!
//! The zero identifier encodes to the empty string and decodes from it.

/// Display, FromStr and serde through the text form.
macro_rules! impl_azid_text_traits {
    ($ty:ty) => {
        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&$crate::azid::AzidText::azid_text(self))
            }
        }

        impl std::str::FromStr for $ty {
            type Err = $crate::azid::AzidError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                <$ty as $crate::azid::AzidText>::from_azid_text(s)
            }
        }

        impl serde::Serialize for $ty {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&$crate::azid::AzidText::azid_text(self))
            }
        }

        impl<'de> serde::Deserialize<'de> for $ty {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = <String as serde::Deserialize>::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

mod application;
mod session;
mod terminal;
pub mod text;
mod user;

pub use application::{ApplicationId, ApplicationKind};
pub use session::{SessionId, SessionIdNum};
pub use terminal::{TerminalId, TerminalIdNum};
pub use user::UserId;

use rand::Rng;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AzidError {
    #[error("identifier text must start with {expected:?}")]
    PrefixMismatch { expected: &'static str },

    #[error("invalid base32 character {0:?}")]
    InvalidCharacter(char),

    #[error("identifier text has a non-canonical length or padding")]
    NonCanonical,

    #[error("identifier data is truncated")]
    Truncated,

    #[error("unexpected type tag 0x{found:02x}, expected 0x{expected:02x}")]
    TypeMismatch { expected: u8, found: u8 },

    #[error("unexpected field count {found}, expected {expected}")]
    FieldCountMismatch { expected: u8, found: u8 },

    #[error("{0} trailing bytes after identifier data")]
    TrailingData(usize),

    #[error("identifier is not statically valid")]
    Invalid,
}

/// Type tags of the binary form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BinDataType {
    Unspecified = 0x00,
    Int16 = 0x12,
    Int32 = 0x13,
    Int64 = 0x14,
    Array = 0x40,
}

impl BinDataType {
    pub const fn to_byte(self) -> u8 {
        self as u8
    }
}

/// A value with a binary field encoding.
pub trait AzidBinField: Sized {
    const BIN_DATA_TYPE: BinDataType;

    /// Appends the field payload (without the leading type tag).
    fn write_bin_field(&self, out: &mut Vec<u8>);

    /// Decodes a field payload, returning the value and the bytes consumed.
    fn read_bin_field(data: &[u8]) -> Result<(Self, usize), AzidError>;

    fn azid_bin(&self) -> Vec<u8> {
        let mut out = vec![Self::BIN_DATA_TYPE.to_byte()];
        self.write_bin_field(&mut out);
        out
    }

    fn from_azid_bin(data: &[u8]) -> Result<Self, AzidError> {
        let (&tag, rest) = data.split_first().ok_or(AzidError::Truncated)?;
        expect_type(tag, Self::BIN_DATA_TYPE)?;
        let (value, consumed) = Self::read_bin_field(rest)?;
        if consumed != rest.len() {
            return Err(AzidError::TrailingData(rest.len() - consumed));
        }
        Ok(value)
    }
}

/// An identifier with a canonical text form.
pub trait AzidText: AzidBinField {
    const TEXT_PREFIX: &'static str;

    fn zero() -> Self;

    fn is_zero(&self) -> bool;

    /// Cheap local check; says nothing about whether the entity exists.
    fn is_statically_valid(&self) -> bool;

    fn azid_text(&self) -> String {
        if !self.is_statically_valid() {
            return String::new();
        }
        let mut out = String::from(Self::TEXT_PREFIX);
        out.push_str(&text::encode(&self.azid_bin()));
        out
    }

    fn from_azid_text(s: &str) -> Result<Self, AzidError> {
        if s.is_empty() {
            return Ok(Self::zero());
        }
        let payload = s
            .strip_prefix(Self::TEXT_PREFIX)
            .ok_or(AzidError::PrefixMismatch {
                expected: Self::TEXT_PREFIX,
            })?;
        let bin = text::decode(payload)?;
        let id = Self::from_azid_bin(&bin)?;
        if !id.is_statically_valid() {
            return Err(AzidError::Invalid);
        }
        Ok(id)
    }
}

fn expect_type(found: u8, expected: BinDataType) -> Result<(), AzidError> {
    if found != expected.to_byte() {
        return Err(AzidError::TypeMismatch {
            expected: expected.to_byte(),
            found,
        });
    }
    Ok(())
}

pub(crate) fn read_i32(data: &[u8]) -> Result<(i32, usize), AzidError> {
    let bytes: [u8; 4] = data
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .ok_or(AzidError::Truncated)?;
    Ok((i32::from_be_bytes(bytes), 4))
}

pub(crate) fn read_i64(data: &[u8]) -> Result<(i64, usize), AzidError> {
    let bytes: [u8; 8] = data
        .get(..8)
        .and_then(|b| b.try_into().ok())
        .ok_or(AzidError::Truncated)?;
    Ok((i64::from_be_bytes(bytes), 8))
}

pub(crate) fn write_composite_header(out: &mut Vec<u8>, field_types: &[BinDataType]) {
    out.push(field_types.len() as u8);
    out.extend(field_types.iter().map(|t| t.to_byte()));
}

/// Checks a composite header against the expected field types and returns
/// the number of header bytes.
pub(crate) fn read_composite_header(
    data: &[u8],
    field_types: &[BinDataType],
) -> Result<usize, AzidError> {
    let (&count, rest) = data.split_first().ok_or(AzidError::Truncated)?;
    if count as usize != field_types.len() {
        return Err(AzidError::FieldCountMismatch {
            expected: field_types.len() as u8,
            found: count,
        });
    }
    let tags = rest.get(..field_types.len()).ok_or(AzidError::Truncated)?;
    for (&tag, expected) in tags.iter().zip(field_types) {
        expect_type(tag, *expected)?;
    }
    Ok(1 + field_types.len())
}

/// Random identifier bits for a 32-bit identifier; never zero.
pub(crate) fn random_bits_u32(identifier_mask: u32) -> u32 {
    let mut rng = rand::thread_rng();
    loop {
        let bits = rng.gen::<u32>() & identifier_mask;
        if bits != 0 {
            return bits;
        }
    }
}

/// Random identifier bits for a 64-bit identifier; never zero.
pub(crate) fn random_bits_u64(identifier_mask: u64) -> u64 {
    let mut rng = rand::thread_rng();
    loop {
        let bits = rng.gen::<u64>() & identifier_mask;
        if bits != 0 {
            return bits;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_composite_header_rejects_wrong_count() {
        let data = [2u8, 0x13, 0x14];
        let err = read_composite_header(&data, &[BinDataType::Int32]).unwrap_err();
        assert_eq!(
            err,
            AzidError::FieldCountMismatch {
                expected: 1,
                found: 2
            }
        );
    }

    #[test]
    fn test_composite_header_rejects_wrong_tag() {
        let data = [2u8, 0x13, 0x13];
        let err =
            read_composite_header(&data, &[BinDataType::Int32, BinDataType::Int64]).unwrap_err();
        assert_eq!(
            err,
            AzidError::TypeMismatch {
                expected: 0x14,
                found: 0x13
            }
        );
    }

    #[test]
    fn test_random_bits_stay_inside_mask() {
        for _ in 0..64 {
            let bits = random_bits_u32(0x00FF_FFFF);
            assert_ne!(bits, 0);
            assert_eq!(bits & !0x00FF_FFFF, 0);
        }
    }
}
