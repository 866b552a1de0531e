use super::{read_i64, AzidBinField, AzidError, AzidText, BinDataType};

const IDENTIFIER_BITS_MASK: u64 = 0x0000_FFFF_FFFF_FFFF;
const BOT_MASK: u64 = 0x4000_0000_0000_0000;
const BOT_BITS: u64 = 0x4000_0000_0000_0000;

/// Identifier of a user account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct UserId(i64);

impl UserId {
    pub const ZERO: UserId = UserId(0);

    pub const fn from_primitive(value: i64) -> Self {
        Self(value)
    }

    pub const fn primitive(self) -> i64 {
        self.0
    }

    pub fn generate(bot: bool) -> Self {
        let mut bits = super::random_bits_u64(IDENTIFIER_BITS_MASK);
        if bot {
            bits |= BOT_BITS;
        }
        Self(bits as i64)
    }

    pub fn is_bot(self) -> bool {
        self.is_statically_valid() && ((self.0 as u64) & BOT_MASK) == BOT_BITS
    }

    pub fn is_normal_account(self) -> bool {
        self.is_statically_valid() && ((self.0 as u64) & BOT_MASK) == 0
    }
}

impl AzidBinField for UserId {
    const BIN_DATA_TYPE: BinDataType = BinDataType::Int64;

    fn write_bin_field(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.0.to_be_bytes());
    }

    fn read_bin_field(data: &[u8]) -> Result<(Self, usize), AzidError> {
        let (value, n) = read_i64(data)?;
        Ok((Self(value), n))
    }
}

impl AzidText for UserId {
    const TEXT_PREFIX: &'static str = "KUs0";

    fn zero() -> Self {
        Self::ZERO
    }

    fn is_zero(&self) -> bool {
        self.0 == 0
    }

    fn is_statically_valid(&self) -> bool {
        self.0 > 0 && ((self.0 as u64) & IDENTIFIER_BITS_MASK) != 0
    }
}

impl_azid_text_traits!(UserId);
