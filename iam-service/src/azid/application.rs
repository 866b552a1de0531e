use super::{read_i32, AzidBinField, AzidError, AzidText, BinDataType};

const IDENTIFIER_BITS_MASK: u32 = 0x03FF_FFFF;

const FIRST_PARTY_MASK: u32 = 0x4000_0000;
const FIRST_PARTY_BITS: u32 = 0x4000_0000;
const SERVICE_MASK: u32 = 0x2000_0000;
const SERVICE_BITS: u32 = 0x0000_0000;
const USER_AGENT_MASK: u32 = 0x2000_0000;
const USER_AGENT_BITS: u32 = 0x2000_0000;
const USER_AGENT_PUBLIC_MASK: u32 = 0x3000_0000;
const USER_AGENT_PUBLIC_BITS: u32 = 0x2000_0000;
const USER_AGENT_CONFIDENTIAL_MASK: u32 = 0x3000_0000;
const USER_AGENT_CONFIDENTIAL_BITS: u32 = 0x3000_0000;

/// Category bits embedded in an [`ApplicationId`] at generation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplicationKind {
    Service,
    UserAgentPublic,
    UserAgentConfidential,
}

impl ApplicationKind {
    fn embedded_bits(self) -> u32 {
        match self {
            ApplicationKind::Service => SERVICE_BITS,
            ApplicationKind::UserAgentPublic => USER_AGENT_PUBLIC_BITS,
            ApplicationKind::UserAgentConfidential => USER_AGENT_CONFIDENTIAL_BITS,
        }
    }
}

/// Identifier of a registered client application.
///
/// The category of the application (first-party, service, public or
/// confidential user agent) is part of the identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ApplicationId(i32);

impl ApplicationId {
    pub const ZERO: ApplicationId = ApplicationId(0);

    pub const fn from_primitive(value: i32) -> Self {
        Self(value)
    }

    pub const fn primitive(self) -> i32 {
        self.0
    }

    /// Generates a new identifier with random identifier bits.
    ///
    /// Uniqueness is not checked here; the store's primary key is.
    pub fn generate(kind: ApplicationKind, first_party: bool) -> Self {
        let mut bits = super::random_bits_u32(IDENTIFIER_BITS_MASK) | kind.embedded_bits();
        if first_party {
            bits |= FIRST_PARTY_BITS;
        }
        Self(bits as i32)
    }

    fn bits(self) -> u32 {
        self.0 as u32
    }

    pub fn is_first_party(self) -> bool {
        self.is_statically_valid() && (self.bits() & FIRST_PARTY_MASK) == FIRST_PARTY_BITS
    }

    pub fn is_service(self) -> bool {
        self.is_statically_valid() && (self.bits() & SERVICE_MASK) == SERVICE_BITS
    }

    pub fn is_user_agent(self) -> bool {
        self.is_statically_valid() && (self.bits() & USER_AGENT_MASK) == USER_AGENT_BITS
    }

    pub fn is_user_agent_public(self) -> bool {
        self.is_statically_valid()
            && (self.bits() & USER_AGENT_PUBLIC_MASK) == USER_AGENT_PUBLIC_BITS
    }

    pub fn is_user_agent_confidential(self) -> bool {
        self.is_statically_valid()
            && (self.bits() & USER_AGENT_CONFIDENTIAL_MASK) == USER_AGENT_CONFIDENTIAL_BITS
    }
}

impl AzidBinField for ApplicationId {
    const BIN_DATA_TYPE: BinDataType = BinDataType::Int32;

    fn write_bin_field(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.0.to_be_bytes());
    }

    fn read_bin_field(data: &[u8]) -> Result<(Self, usize), AzidError> {
        let (value, n) = read_i32(data)?;
        Ok((Self(value), n))
    }
}

impl AzidText for ApplicationId {
    const TEXT_PREFIX: &'static str = "KAp0";

    fn zero() -> Self {
        Self::ZERO
    }

    fn is_zero(&self) -> bool {
        self.0 == 0
    }

    fn is_statically_valid(&self) -> bool {
        self.0 > 0 && (self.bits() & IDENTIFIER_BITS_MASK) != 0
    }
}

impl_azid_text_traits!(ApplicationId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_validity() {
        assert!(!ApplicationId::from_primitive(0).is_statically_valid());
        assert!(!ApplicationId::from_primitive(-1).is_statically_valid());
        assert!(ApplicationId::from_primitive(1).is_statically_valid());
        assert!(ApplicationId::from_primitive(0xffff).is_statically_valid());
        assert!(ApplicationId::from_primitive(0x7fff_ffff).is_statically_valid());
        assert!(!ApplicationId::from_primitive(1 << 28).is_statically_valid());
    }

    #[test]
    fn test_text_encoding_known_values() {
        let cases = [
            (1, "KAp02c000001"),
            (1000, "KAp02c0000z8"),
            (1001, "KAp02c0000z9"),
            (1250, "KAp02c000172"),
            (2004, "KAp02c0001ym"),
            (0x7000_0001, "KAp02dr00001"),
            (0x7000_1250, "KAp02dr004jg"),
            (0x7001_2345, "KAp02dr028t5"),
            (0x7004_5678, "KAp02dr08nkr"),
        ];
        for (raw, text) in cases {
            let id = ApplicationId::from_primitive(raw);
            assert_eq!(id.azid_text(), text, "encoding {raw:#x}");
            assert_eq!(ApplicationId::from_azid_text(text), Ok(id), "decoding {text}");
        }
    }

    #[test]
    fn test_zero_and_invalid_encode_to_empty() {
        assert_eq!(ApplicationId::ZERO.azid_text(), "");
        assert_eq!(ApplicationId::from_primitive(-5).azid_text(), "");
        assert_eq!(ApplicationId::from_azid_text(""), Ok(ApplicationId::ZERO));
    }

    #[test]
    fn test_decode_rejects_foreign_prefix() {
        assert_eq!(
            ApplicationId::from_azid_text("KUs02c0000z8"),
            Err(AzidError::PrefixMismatch { expected: "KAp0" })
        );
    }

    #[test]
    fn test_generated_ids_carry_category() {
        let service = ApplicationId::generate(ApplicationKind::Service, true);
        assert!(service.is_statically_valid());
        assert!(service.is_service());
        assert!(service.is_first_party());
        assert!(!service.is_user_agent());

        let public = ApplicationId::generate(ApplicationKind::UserAgentPublic, false);
        assert!(public.is_user_agent());
        assert!(public.is_user_agent_public());
        assert!(!public.is_user_agent_confidential());
        assert!(!public.is_first_party());

        let confidential = ApplicationId::generate(ApplicationKind::UserAgentConfidential, false);
        assert!(confidential.is_user_agent_confidential());
        assert!(!confidential.is_service());
    }

    #[test]
    fn test_serde_uses_text_form() -> Result<(), serde_json::Error> {
        let id = ApplicationId::from_primitive(1000);
        assert_eq!(serde_json::to_string(&id)?, "\"KAp02c0000z8\"");
        let back: ApplicationId = serde_json::from_str("\"KAp02c0000z8\"")?;
        assert_eq!(back, id);
        Ok(())
    }
}
