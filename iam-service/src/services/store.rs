//! Store abstraction.
//!
//! Every state transition is a single conditional statement whose outcome
//! is reported back (`bool` = this call changed the row). Concurrent
//! callers racing on the same row are serialized by the store.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::azid::{ApplicationId, TerminalIdNum, UserId};
use crate::models::{
    Actor, Application, Contact, ContactOwner, EmailAddress, NewTerminal, NewVerification,
    PhoneNumber, SessionRecord, TerminalRecord, UserRecord, VerificationRecord,
};

#[derive(Debug, Error)]
pub enum StoreError {
    /// A unique index or primary key rejected the write.
    #[error("unique constraint violated: {constraint}")]
    UniqueViolation { constraint: String },

    #[error("database error: {0}")]
    Database(#[source] anyhow::Error),
}

impl StoreError {
    /// Primary-key collisions are retried with a fresh identifier.
    pub fn is_primary_key_violation(&self) -> bool {
        matches!(self, StoreError::UniqueViolation { constraint } if constraint.ends_with("_pkey"))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let Some(db_err) = err.as_database_error() {
            if db_err.code().as_deref() == Some("23505") {
                return StoreError::UniqueViolation {
                    constraint: db_err.constraint().unwrap_or_default().to_string(),
                };
            }
        }
        StoreError::Database(anyhow::Error::new(err))
    }
}

#[async_trait]
pub trait ApplicationStore: Send + Sync {
    async fn find_application(&self, id: ApplicationId) -> Result<Option<Application>, StoreError>;

    async fn insert_application(&self, application: &Application) -> Result<(), StoreError>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Fails with a primary-key violation when the identifier is taken.
    async fn insert_user(
        &self,
        id: UserId,
        created_utc: DateTime<Utc>,
        created_by: Actor,
    ) -> Result<(), StoreError>;

    async fn find_user(&self, id: UserId) -> Result<Option<UserRecord>, StoreError>;

    async fn set_password_hash(
        &self,
        id: UserId,
        password_hash: &str,
        updated_utc: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn find_password_hash(&self, id: UserId) -> Result<Option<String>, StoreError>;
}

#[async_trait]
pub trait TerminalStore: Send + Sync {
    /// Fails with a primary-key violation when the id number is taken.
    async fn insert_terminal(&self, terminal: &NewTerminal) -> Result<(), StoreError>;

    async fn find_terminal(&self, id_num: TerminalIdNum)
        -> Result<Option<TerminalRecord>, StoreError>;

    /// Sets secret and verification time `WHERE verified IS NULL`.
    async fn set_terminal_verified(
        &self,
        id_num: TerminalIdNum,
        secret: &str,
        verified_utc: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Soft-deletes `WHERE deleted IS NULL`.
    async fn delete_terminal(
        &self,
        id_num: TerminalIdNum,
        deleted_utc: DateTime<Utc>,
        deleted_by: Actor,
    ) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Fails with a primary-key violation when the id number is taken for
    /// the terminal.
    async fn insert_session(&self, session: &SessionRecord) -> Result<(), StoreError>;
}

/// Ownership of key contacts (phone numbers, email addresses).
#[async_trait]
pub trait KeyContactStore<C: Contact>: Send + Sync {
    /// Most recent non-deleted claim, verified or not.
    async fn find_owner(&self, contact: &C) -> Result<Option<ContactOwner>, StoreError>;

    /// The user whose claim on the contact is verified.
    async fn find_verified_owner(&self, contact: &C) -> Result<Option<UserId>, StoreError>;

    /// Claims the contact for the user unless the user already holds a
    /// claim on it. Returns whether the existing claim is already verified.
    async fn claim(
        &self,
        user_id: UserId,
        contact: &C,
        created_utc: DateTime<Utc>,
        created_by: Actor,
    ) -> Result<bool, StoreError>;

    /// Marks the user's claim verified `WHERE verified IS NULL`. Fails with a
    /// unique violation when another user already verified the contact.
    async fn set_verified(
        &self,
        user_id: UserId,
        contact: &C,
        verification_id: i64,
        verified_utc: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
}

/// One-time-code challenges against contacts.
#[async_trait]
pub trait VerificationStore<C: Contact>: Send + Sync {
    /// Most recent unconfirmed challenge for the contact.
    async fn find_latest_unconfirmed(
        &self,
        contact: &C,
    ) -> Result<Option<VerificationRecord>, StoreError>;

    /// Returns the new verification id.
    async fn insert_verification(&self, verification: &NewVerification<C>)
        -> Result<i64, StoreError>;

    /// Decrements attempts remaining and returns the row after the update.
    async fn consume_attempt(&self, id: i64) -> Result<Option<VerificationRecord>, StoreError>;

    /// Sets confirmation time and actor `WHERE confirmed IS NULL`.
    async fn set_confirmed(
        &self,
        id: i64,
        confirmed_utc: DateTime<Utc>,
        confirmed_by: Actor,
    ) -> Result<bool, StoreError>;

    async fn find_contact(&self, id: i64) -> Result<Option<C>, StoreError>;
}

/// Every store the engine talks to.
#[derive(Clone)]
pub struct Stores {
    pub applications: Arc<dyn ApplicationStore>,
    pub users: Arc<dyn UserStore>,
    pub terminals: Arc<dyn TerminalStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub phone_numbers: Arc<dyn KeyContactStore<PhoneNumber>>,
    pub email_addresses: Arc<dyn KeyContactStore<EmailAddress>>,
    pub phone_verifications: Arc<dyn VerificationStore<PhoneNumber>>,
    pub email_verifications: Arc<dyn VerificationStore<EmailAddress>>,
}

impl Stores {
    /// Uses one backend for every concern.
    pub fn from_backend<S>(backend: Arc<S>) -> Self
    where
        S: ApplicationStore
            + UserStore
            + TerminalStore
            + SessionStore
            + KeyContactStore<PhoneNumber>
            + KeyContactStore<EmailAddress>
            + VerificationStore<PhoneNumber>
            + VerificationStore<EmailAddress>
            + 'static,
    {
        Self {
            applications: backend.clone(),
            users: backend.clone(),
            terminals: backend.clone(),
            sessions: backend.clone(),
            phone_numbers: backend.clone(),
            email_addresses: backend.clone(),
            phone_verifications: backend.clone(),
            email_verifications: backend,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_key_violation() {
        let pkey = StoreError::UniqueViolation {
            constraint: "terminals_pkey".to_string(),
        };
        assert!(pkey.is_primary_key_violation());

        let contact = StoreError::UniqueViolation {
            constraint: "user_phone_numbers_verified_uidx".to_string(),
        };
        assert!(!contact.is_primary_key_violation());
        assert!(!StoreError::Database(anyhow::anyhow!("down")).is_primary_key_violation());
    }
}
