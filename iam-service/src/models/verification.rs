//! Verification model - a one-time-code challenge against a contact.

use chrono::{DateTime, Utc};

use super::context::Actor;

/// A persisted verification row.
#[derive(Debug, Clone)]
pub struct VerificationRecord {
    pub id: i64,
    /// SHA-256 hex digest of the code.
    pub code_hash: String,
    pub code_expiry_utc: DateTime<Utc>,
    /// May drop below zero; negative means the attempts are exhausted.
    pub attempts_remaining: i16,
    pub created_utc: DateTime<Utc>,
    pub confirmed_utc: Option<DateTime<Utc>>,
}

impl VerificationRecord {
    pub fn is_confirmed(&self) -> bool {
        self.confirmed_utc.is_some()
    }
}

/// Values needed to insert a verification row.
#[derive(Debug, Clone)]
pub struct NewVerification<C> {
    pub contact: C,
    pub code_hash: String,
    pub code_expiry_utc: DateTime<Utc>,
    pub attempts_remaining: i16,
    pub created_utc: DateTime<Utc>,
    pub created_by: Actor,
}

/// Result of starting a verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedVerification {
    pub verification_id: i64,
    pub code_expiry_utc: DateTime<Utc>,
    /// False when no message went out: a suppressed repeat, a test
    /// contact, or a "none" delivery method.
    pub delivered: bool,
}
