use super::{
    read_composite_header, read_i32, write_composite_header, AzidBinField, AzidError, AzidText,
    BinDataType, TerminalId,
};

const ID_NUM_BITS_MASK: u32 = 0x00FF_FFFF;

/// Per-terminal part of a [`SessionId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct SessionIdNum(i32);

impl SessionIdNum {
    pub const ZERO: SessionIdNum = SessionIdNum(0);

    pub const fn from_primitive(value: i32) -> Self {
        Self(value)
    }

    pub const fn primitive(self) -> i32 {
        self.0
    }

    pub fn generate() -> Self {
        Self(super::random_bits_u32(ID_NUM_BITS_MASK) as i32)
    }

    pub fn is_statically_valid(self) -> bool {
        self.0 > 0 && ((self.0 as u32) & ID_NUM_BITS_MASK) != 0
    }
}

/// A time-boxed authorization instance of a terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SessionId {
    terminal: TerminalId,
    id_num: SessionIdNum,
}

const FIELD_TYPES: [BinDataType; 2] = [BinDataType::Array, BinDataType::Int32];

impl SessionId {
    pub const ZERO: SessionId = SessionId {
        terminal: TerminalId::ZERO,
        id_num: SessionIdNum::ZERO,
    };

    pub const fn new(terminal: TerminalId, id_num: SessionIdNum) -> Self {
        Self { terminal, id_num }
    }

    pub const fn terminal(&self) -> TerminalId {
        self.terminal
    }

    pub const fn id_num(&self) -> SessionIdNum {
        self.id_num
    }
}

impl AzidBinField for SessionId {
    const BIN_DATA_TYPE: BinDataType = BinDataType::Array;

    fn write_bin_field(&self, out: &mut Vec<u8>) {
        write_composite_header(out, &FIELD_TYPES);
        self.terminal.write_bin_field(out);
        out.extend_from_slice(&self.id_num.0.to_be_bytes());
    }

    fn read_bin_field(data: &[u8]) -> Result<(Self, usize), AzidError> {
        let mut offset = read_composite_header(data, &FIELD_TYPES)?;
        let (terminal, n) = TerminalId::read_bin_field(&data[offset..])?;
        offset += n;
        let (id_num, n) = read_i32(&data[offset..])?;
        offset += n;
        Ok((Self::new(terminal, SessionIdNum(id_num)), offset))
    }
}

impl AzidText for SessionId {
    const TEXT_PREFIX: &'static str = "KSe0";

    fn zero() -> Self {
        Self::ZERO
    }

    fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    fn is_statically_valid(&self) -> bool {
        self.terminal.is_statically_valid() && self.id_num.is_statically_valid()
    }
}

impl_azid_text_traits!(SessionId);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::azid::{ApplicationId, TerminalIdNum, UserId};

    fn sample_terminal() -> TerminalId {
        TerminalId::new(
            ApplicationId::from_primitive(0x3000_0042),
            UserId::from_primitive(0x1234),
            TerminalIdNum::from_primitive(0x5678),
        )
    }

    #[test]
    fn test_nested_binary_layout() {
        let id = SessionId::new(sample_terminal(), SessionIdNum::from_primitive(9));
        let bin = id.azid_bin();
        // outer header, then the terminal as a nested composite
        assert_eq!(&bin[..4], &[0x40, 2, 0x40, 0x13]);
        assert_eq!(&bin[4..8], &[3, 0x13, 0x14, 0x14]);
        assert_eq!(&bin[bin.len() - 4..], &9i32.to_be_bytes());
        assert_eq!(bin.len(), 4 + 4 + 4 + 8 + 8 + 4);
    }

    #[test]
    fn test_text_round_trip() -> Result<(), AzidError> {
        let id = SessionId::new(sample_terminal(), SessionIdNum::generate());
        let text = id.azid_text();
        assert!(text.starts_with("KSe0"));
        let back = SessionId::from_azid_text(&text)?;
        assert_eq!(back, id);
        assert_eq!(back.terminal(), sample_terminal());
        Ok(())
    }

    #[test]
    fn test_terminal_text_is_not_a_session() {
        let terminal_text = sample_terminal().azid_text();
        assert!(SessionId::from_azid_text(&terminal_text).is_err());
    }
}
