//! Key contact values: phone numbers and email addresses.
//!
//! Both kinds can own a user account and both can be challenged with a
//! one-time code. Contacts reserved for testing never reach a delivery
//! channel.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use validator::ValidateEmail;

use super::terminal::VerificationType;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ContactError {
    #[error("phone number must start with '+' and the country code")]
    MissingCountryCode,

    #[error("phone number contains invalid character {0:?}")]
    InvalidCharacter(char),

    #[error("phone number has an invalid length")]
    InvalidLength,

    #[error("national number must not start with 0")]
    LeadingZero,

    #[error("invalid email address")]
    InvalidEmailAddress,
}

/// A contact value that can be claimed by a user and verified with a code.
pub trait Contact:
    Clone + fmt::Debug + fmt::Display + PartialEq + Send + Sync + 'static
{
    /// Terminal verification type recorded when this contact authorizes a
    /// terminal.
    const VERIFICATION_TYPE: VerificationType;

    /// Reserved values whose codes are never delivered.
    fn is_test_contact(&self) -> bool;
}

// ==================== Phone Number ====================

/// ITU calling codes with two digits. One-digit codes are 1 and 7; all
/// others have three digits. The set is prefix free.
const TWO_DIGIT_COUNTRY_CODES: &[i32] = &[
    20, 27, 30, 31, 32, 33, 34, 36, 39, 40, 41, 43, 44, 45, 46, 47, 48, 49, 51, 52, 53, 54, 55,
    56, 57, 58, 60, 61, 62, 63, 64, 65, 66, 81, 82, 84, 86, 90, 91, 92, 93, 94, 95, 98,
];

const MAX_DIGITS: usize = 15;
const MIN_NATIONAL_DIGITS: usize = 4;

/// Phone number in international form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PhoneNumber {
    country_code: i32,
    national_number: i64,
}

impl PhoneNumber {
    pub fn new(country_code: i32, national_number: i64) -> Self {
        Self {
            country_code,
            national_number,
        }
    }

    pub fn country_code(&self) -> i32 {
        self.country_code
    }

    pub fn national_number(&self) -> i64 {
        self.national_number
    }

    pub fn is_valid(&self) -> bool {
        self.country_code > 0 && self.national_number > 0
    }
}

fn country_code_len(digits: &str) -> usize {
    match digits.as_bytes().first() {
        Some(b'1') | Some(b'7') => 1,
        _ => {
            let two = digits.get(..2).and_then(|s| s.parse::<i32>().ok());
            match two {
                Some(cc) if TWO_DIGIT_COUNTRY_CODES.contains(&cc) => 2,
                _ => 3,
            }
        }
    }
}

impl FromStr for PhoneNumber {
    type Err = ContactError;

    /// Parses `+<country code><national number>`. Spaces, dashes, dots and
    /// parentheses are ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .trim()
            .strip_prefix('+')
            .ok_or(ContactError::MissingCountryCode)?;

        let mut digits = String::with_capacity(rest.len());
        for c in rest.chars() {
            match c {
                '0'..='9' => digits.push(c),
                ' ' | '-' | '.' | '(' | ')' => {}
                other => return Err(ContactError::InvalidCharacter(other)),
            }
        }
        if digits.len() > MAX_DIGITS || digits.starts_with('0') {
            return Err(ContactError::InvalidLength);
        }

        let cc_len = country_code_len(&digits);
        if digits.len() < cc_len + MIN_NATIONAL_DIGITS {
            return Err(ContactError::InvalidLength);
        }
        let (cc, nn) = digits.split_at(cc_len);
        // The national number is stored as an integer
        if nn.starts_with('0') {
            return Err(ContactError::LeadingZero);
        }
        let country_code = cc.parse().map_err(|_| ContactError::InvalidLength)?;
        let national_number = nn.parse().map_err(|_| ContactError::InvalidLength)?;
        let number = PhoneNumber::new(country_code, national_number);
        if !number.is_valid() {
            return Err(ContactError::InvalidLength);
        }
        Ok(number)
    }
}

impl fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "+{}{}", self.country_code, self.national_number)
    }
}

impl Contact for PhoneNumber {
    const VERIFICATION_TYPE: VerificationType = VerificationType::PhoneNumber;

    /// North American fictional range +1 555-0001 .. +1 555-9999.
    fn is_test_contact(&self) -> bool {
        self.country_code == 1 && self.national_number > 5_550_000 && self.national_number <= 5_559_999
    }
}

// ==================== Email Address ====================

const TEST_EMAIL_DOMAINS: &[&str] = &["example.com", "example.org", "example.net"];

/// Email address split at the last `@`. The domain is kept lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EmailAddress {
    local_part: String,
    domain_part: String,
}

impl EmailAddress {
    pub fn new(local_part: impl Into<String>, domain_part: impl Into<String>) -> Self {
        Self {
            local_part: local_part.into(),
            domain_part: domain_part.into().to_lowercase(),
        }
    }

    pub fn local_part(&self) -> &str {
        &self.local_part
    }

    pub fn domain_part(&self) -> &str {
        &self.domain_part
    }
}

impl FromStr for EmailAddress {
    type Err = ContactError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if !s.validate_email() {
            return Err(ContactError::InvalidEmailAddress);
        }
        let (local, domain) = s.rsplit_once('@').ok_or(ContactError::InvalidEmailAddress)?;
        Ok(EmailAddress::new(local, domain))
    }
}

impl fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.local_part, self.domain_part)
    }
}

impl Contact for EmailAddress {
    const VERIFICATION_TYPE: VerificationType = VerificationType::EmailAddress;

    fn is_test_contact(&self) -> bool {
        TEST_EMAIL_DOMAINS.contains(&self.domain_part.as_str())
    }
}
