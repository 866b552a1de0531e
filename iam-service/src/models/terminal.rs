//! Terminal model - a bound instance of an application.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::context::Actor;
use crate::azid::TerminalId;

/// How a terminal was (or will be) verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VerificationType {
    PhoneNumber,
    EmailAddress,
    #[serde(rename = "oauth2-authorization-code")]
    OAuth2AuthorizationCode,
    #[serde(rename = "oauth2-client-credentials")]
    OAuth2ClientCredentials,
    #[serde(rename = "oauth2-password")]
    OAuth2Password,
}

impl VerificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationType::PhoneNumber => "phone-number",
            VerificationType::EmailAddress => "email-address",
            VerificationType::OAuth2AuthorizationCode => "oauth2-authorization-code",
            VerificationType::OAuth2ClientCredentials => "oauth2-client-credentials",
            VerificationType::OAuth2Password => "oauth2-password",
        }
    }

    /// Types confirmed with a code delivered to a contact.
    pub fn is_contact(&self) -> bool {
        matches!(
            self,
            VerificationType::PhoneNumber | VerificationType::EmailAddress
        )
    }

    /// Types whose terminals receive a secret at insertion time.
    pub fn grants_secret_on_registration(&self) -> bool {
        matches!(
            self,
            VerificationType::OAuth2ClientCredentials | VerificationType::OAuth2Password
        )
    }

    /// Whether confirming an already verified terminal may return the
    /// persisted secret again.
    pub fn allows_replay(&self) -> bool {
        !matches!(self, VerificationType::OAuth2AuthorizationCode)
    }
}

impl fmt::Display for VerificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VerificationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "phone-number" => Ok(VerificationType::PhoneNumber),
            "email-address" => Ok(VerificationType::EmailAddress),
            "oauth2-authorization-code" => Ok(VerificationType::OAuth2AuthorizationCode),
            "oauth2-client-credentials" => Ok(VerificationType::OAuth2ClientCredentials),
            "oauth2-password" => Ok(VerificationType::OAuth2Password),
            other => Err(format!("unknown verification type: {other}")),
        }
    }
}

/// A persisted terminal.
#[derive(Debug, Clone)]
pub struct TerminalRecord {
    pub id: TerminalId,
    /// Empty until the terminal is verified.
    pub secret: String,
    pub display_name: String,
    pub accept_language: Vec<String>,
    pub verification_type: VerificationType,
    /// Verification row reference; zero when there is none.
    pub verification_id: i64,
    pub verified_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
    pub created_by: Actor,
    pub created_origin: Option<String>,
    pub deleted_utc: Option<DateTime<Utc>>,
    pub deleted_by: Option<Actor>,
}

impl TerminalRecord {
    pub fn is_verified(&self) -> bool {
        self.verified_utc.is_some()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_utc.is_some()
    }
}

/// Values needed to insert a terminal row.
#[derive(Debug, Clone)]
pub struct NewTerminal {
    pub id: TerminalId,
    pub secret: String,
    pub display_name: String,
    pub accept_language: Vec<String>,
    pub verification_type: VerificationType,
    pub verification_id: i64,
    pub verified_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
    pub created_by: Actor,
    pub created_origin: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verification_type_strings() {
        for vt in [
            VerificationType::PhoneNumber,
            VerificationType::EmailAddress,
            VerificationType::OAuth2AuthorizationCode,
            VerificationType::OAuth2ClientCredentials,
            VerificationType::OAuth2Password,
        ] {
            assert_eq!(vt.as_str().parse::<VerificationType>(), Ok(vt));
        }
        assert!("sms".parse::<VerificationType>().is_err());
    }

    #[test]
    fn test_secret_and_replay_policy() {
        assert!(VerificationType::OAuth2ClientCredentials.grants_secret_on_registration());
        assert!(VerificationType::OAuth2Password.grants_secret_on_registration());
        assert!(!VerificationType::PhoneNumber.grants_secret_on_registration());
        assert!(!VerificationType::OAuth2AuthorizationCode.allows_replay());
        assert!(VerificationType::EmailAddress.allows_replay());
        assert!(VerificationType::PhoneNumber.is_contact());
        assert!(!VerificationType::OAuth2AuthorizationCode.is_contact());
        assert!(!VerificationType::OAuth2Password.is_contact());
    }
}
