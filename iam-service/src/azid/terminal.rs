use super::{
    read_composite_header, read_i64, write_composite_header, AzidBinField, AzidError, AzidText,
    BinDataType,
};
use super::{ApplicationId, UserId};

const ID_NUM_BITS_MASK: u64 = 0x00FF_FFFF_FFFF_FFFF;

/// The random part of a [`TerminalId`]; the primary key in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TerminalIdNum(i64);

impl TerminalIdNum {
    pub const ZERO: TerminalIdNum = TerminalIdNum(0);

    pub const fn from_primitive(value: i64) -> Self {
        Self(value)
    }

    pub const fn primitive(self) -> i64 {
        self.0
    }

    pub fn generate() -> Self {
        Self(super::random_bits_u64(ID_NUM_BITS_MASK) as i64)
    }

    pub fn is_statically_valid(self) -> bool {
        self.0 > 0 && ((self.0 as u64) & ID_NUM_BITS_MASK) != 0
    }
}

/// A bound instance of an application, optionally tied to a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TerminalId {
    application: ApplicationId,
    user: UserId,
    id_num: TerminalIdNum,
}

const FIELD_TYPES: [BinDataType; 3] = [BinDataType::Int32, BinDataType::Int64, BinDataType::Int64];

impl TerminalId {
    pub const ZERO: TerminalId = TerminalId {
        application: ApplicationId::ZERO,
        user: UserId::ZERO,
        id_num: TerminalIdNum::ZERO,
    };

    pub const fn new(application: ApplicationId, user: UserId, id_num: TerminalIdNum) -> Self {
        Self {
            application,
            user,
            id_num,
        }
    }

    pub const fn application(&self) -> ApplicationId {
        self.application
    }

    pub const fn user(&self) -> UserId {
        self.user
    }

    pub const fn id_num(&self) -> TerminalIdNum {
        self.id_num
    }
}

impl AzidBinField for TerminalId {
    const BIN_DATA_TYPE: BinDataType = BinDataType::Array;

    fn write_bin_field(&self, out: &mut Vec<u8>) {
        write_composite_header(out, &FIELD_TYPES);
        self.application.write_bin_field(out);
        self.user.write_bin_field(out);
        out.extend_from_slice(&self.id_num.0.to_be_bytes());
    }

    fn read_bin_field(data: &[u8]) -> Result<(Self, usize), AzidError> {
        let mut offset = read_composite_header(data, &FIELD_TYPES)?;
        let (application, n) = ApplicationId::read_bin_field(&data[offset..])?;
        offset += n;
        let (user, n) = UserId::read_bin_field(&data[offset..])?;
        offset += n;
        let (id_num, n) = read_i64(&data[offset..])?;
        offset += n;
        Ok((
            Self::new(application, user, TerminalIdNum(id_num)),
            offset,
        ))
    }
}

impl AzidText for TerminalId {
    const TEXT_PREFIX: &'static str = "KTx0";

    fn zero() -> Self {
        Self::ZERO
    }

    fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Terminals of non user-agent applications carry no user.
    fn is_statically_valid(&self) -> bool {
        self.application.is_statically_valid()
            && self.id_num.is_statically_valid()
            && (self.user.is_zero() || self.user.is_statically_valid())
    }
}

impl_azid_text_traits!(TerminalId);
