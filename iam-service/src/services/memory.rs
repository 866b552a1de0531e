//! In-process implementation of the store traits.
//!
//! One lock guards every table so each call behaves like a single
//! conditional statement. Constraint names match the PostgreSQL schema.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::store::{
    ApplicationStore, KeyContactStore, SessionStore, StoreError, TerminalStore, UserStore,
    VerificationStore,
};
use crate::azid::{ApplicationId, SessionIdNum, TerminalIdNum, UserId};
use crate::models::{
    Actor, Application, Contact, ContactOwner, EmailAddress, NewTerminal, NewVerification,
    PhoneNumber, SessionRecord, TerminalRecord, UserRecord, VerificationRecord,
};

#[derive(Debug, Clone)]
struct ClaimRow<C> {
    user_id: UserId,
    contact: C,
    created_utc: DateTime<Utc>,
    verified_utc: Option<DateTime<Utc>>,
    deleted_utc: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct VerificationRow<C> {
    contact: C,
    record: VerificationRecord,
}

struct ContactTables<C> {
    claims: Vec<ClaimRow<C>>,
    verifications: BTreeMap<i64, VerificationRow<C>>,
}

impl<C> Default for ContactTables<C> {
    fn default() -> Self {
        Self {
            claims: Vec::new(),
            verifications: BTreeMap::new(),
        }
    }
}

#[derive(Default)]
struct Tables {
    applications: HashMap<ApplicationId, Application>,
    users: HashMap<UserId, UserRecord>,
    passwords: HashMap<UserId, String>,
    terminals: HashMap<TerminalIdNum, TerminalRecord>,
    sessions: HashMap<(TerminalIdNum, SessionIdNum), SessionRecord>,
    phone_numbers: ContactTables<PhoneNumber>,
    email_addresses: ContactTables<EmailAddress>,
    last_verification_id: i64,
}

/// Picks the tables of one contact kind.
trait MemoryContact: Contact {
    const KEY_TABLE: &'static str;

    fn tables(tables: &mut Tables) -> &mut ContactTables<Self>;
}

impl MemoryContact for PhoneNumber {
    const KEY_TABLE: &'static str = "user_phone_numbers";

    fn tables(tables: &mut Tables) -> &mut ContactTables<Self> {
        &mut tables.phone_numbers
    }
}

impl MemoryContact for EmailAddress {
    const KEY_TABLE: &'static str = "user_email_addresses";

    fn tables(tables: &mut Tables) -> &mut ContactTables<Self> {
        &mut tables.email_addresses
    }
}

fn unique_violation(constraint: impl Into<String>) -> StoreError {
    StoreError::UniqueViolation {
        constraint: constraint.into(),
    }
}

/// Store backed by process memory. Used by tests and local runs.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sessions issued for a terminal.
    pub async fn session_count(&self, terminal: TerminalIdNum) -> usize {
        let tables = self.tables.lock().await;
        tables.sessions.keys().filter(|(t, _)| *t == terminal).count()
    }
}

// ==================== Application Operations ====================

#[async_trait]
impl ApplicationStore for MemoryStore {
    async fn find_application(&self, id: ApplicationId) -> Result<Option<Application>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.applications.get(&id).cloned())
    }

    async fn insert_application(&self, application: &Application) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        if tables.applications.contains_key(&application.id) {
            return Err(unique_violation("applications_pkey"));
        }
        tables.applications.insert(application.id, application.clone());
        Ok(())
    }
}

// ==================== User Operations ====================

#[async_trait]
impl UserStore for MemoryStore {
    async fn insert_user(
        &self,
        id: UserId,
        created_utc: DateTime<Utc>,
        _created_by: Actor,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        if tables.users.contains_key(&id) {
            return Err(unique_violation("users_pkey"));
        }
        tables.users.insert(
            id,
            UserRecord {
                id,
                created_utc,
                deleted_utc: None,
            },
        );
        Ok(())
    }

    async fn find_user(&self, id: UserId) -> Result<Option<UserRecord>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.users.get(&id).cloned())
    }

    async fn set_password_hash(
        &self,
        id: UserId,
        password_hash: &str,
        _updated_utc: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        tables.passwords.insert(id, password_hash.to_string());
        Ok(())
    }

    async fn find_password_hash(&self, id: UserId) -> Result<Option<String>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.passwords.get(&id).cloned())
    }
}

// ==================== Terminal Operations ====================

#[async_trait]
impl TerminalStore for MemoryStore {
    async fn insert_terminal(&self, terminal: &NewTerminal) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let key = terminal.id.id_num();
        if tables.terminals.contains_key(&key) {
            return Err(unique_violation("terminals_pkey"));
        }
        tables.terminals.insert(
            key,
            TerminalRecord {
                id: terminal.id,
                secret: terminal.secret.clone(),
                display_name: terminal.display_name.clone(),
                accept_language: terminal.accept_language.clone(),
                verification_type: terminal.verification_type,
                verification_id: terminal.verification_id,
                verified_utc: terminal.verified_utc,
                created_utc: terminal.created_utc,
                created_by: terminal.created_by,
                created_origin: terminal.created_origin.clone(),
                deleted_utc: None,
                deleted_by: None,
            },
        );
        Ok(())
    }

    async fn find_terminal(
        &self,
        id_num: TerminalIdNum,
    ) -> Result<Option<TerminalRecord>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.terminals.get(&id_num).cloned())
    }

    async fn set_terminal_verified(
        &self,
        id_num: TerminalIdNum,
        secret: &str,
        verified_utc: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        match tables.terminals.get_mut(&id_num) {
            Some(terminal) if terminal.verified_utc.is_none() => {
                terminal.secret = secret.to_string();
                terminal.verified_utc = Some(verified_utc);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_terminal(
        &self,
        id_num: TerminalIdNum,
        deleted_utc: DateTime<Utc>,
        deleted_by: Actor,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        match tables.terminals.get_mut(&id_num) {
            Some(terminal) if terminal.deleted_utc.is_none() => {
                terminal.deleted_utc = Some(deleted_utc);
                terminal.deleted_by = Some(deleted_by);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

// ==================== Session Operations ====================

#[async_trait]
impl SessionStore for MemoryStore {
    async fn insert_session(&self, session: &SessionRecord) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let key = (session.id.terminal().id_num(), session.id.id_num());
        if tables.sessions.contains_key(&key) {
            return Err(unique_violation("sessions_pkey"));
        }
        tables.sessions.insert(key, session.clone());
        Ok(())
    }
}

// ==================== Contact Operations ====================

#[async_trait]
impl<C: MemoryContact> KeyContactStore<C> for MemoryStore {
    async fn find_owner(&self, contact: &C) -> Result<Option<ContactOwner>, StoreError> {
        let mut tables = self.tables.lock().await;
        let owner = C::tables(&mut tables)
            .claims
            .iter()
            .filter(|row| row.deleted_utc.is_none() && row.contact == *contact)
            .max_by_key(|row| row.created_utc)
            .map(|row| ContactOwner {
                user_id: row.user_id,
                verified: row.verified_utc.is_some(),
            });
        Ok(owner)
    }

    async fn find_verified_owner(&self, contact: &C) -> Result<Option<UserId>, StoreError> {
        let mut tables = self.tables.lock().await;
        let owner = C::tables(&mut tables)
            .claims
            .iter()
            .find(|row| {
                row.deleted_utc.is_none() && row.verified_utc.is_some() && row.contact == *contact
            })
            .map(|row| row.user_id);
        Ok(owner)
    }

    async fn claim(
        &self,
        user_id: UserId,
        contact: &C,
        created_utc: DateTime<Utc>,
        _created_by: Actor,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        let claims = &mut C::tables(&mut tables).claims;
        if let Some(existing) = claims.iter().find(|row| {
            row.deleted_utc.is_none() && row.user_id == user_id && row.contact == *contact
        }) {
            return Ok(existing.verified_utc.is_some());
        }
        claims.push(ClaimRow {
            user_id,
            contact: contact.clone(),
            created_utc,
            verified_utc: None,
            deleted_utc: None,
        });
        Ok(false)
    }

    async fn set_verified(
        &self,
        user_id: UserId,
        contact: &C,
        _verification_id: i64,
        verified_utc: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        let claims = &mut C::tables(&mut tables).claims;
        let Some(index) = claims.iter().position(|row| {
            row.deleted_utc.is_none()
                && row.verified_utc.is_none()
                && row.user_id == user_id
                && row.contact == *contact
        }) else {
            return Ok(false);
        };
        let taken = claims.iter().any(|row| {
            row.deleted_utc.is_none() && row.verified_utc.is_some() && row.contact == *contact
        });
        if taken {
            return Err(unique_violation(format!("{}_verified_uidx", C::KEY_TABLE)));
        }
        let row = &mut claims[index];
        row.verified_utc = Some(verified_utc);
        Ok(true)
    }
}

// ==================== Verification Operations ====================

#[async_trait]
impl<C: MemoryContact> VerificationStore<C> for MemoryStore {
    async fn find_latest_unconfirmed(
        &self,
        contact: &C,
    ) -> Result<Option<VerificationRecord>, StoreError> {
        let mut tables = self.tables.lock().await;
        let latest = C::tables(&mut tables)
            .verifications
            .values()
            .rev()
            .find(|row| row.record.confirmed_utc.is_none() && row.contact == *contact)
            .map(|row| row.record.clone());
        Ok(latest)
    }

    async fn insert_verification(
        &self,
        verification: &NewVerification<C>,
    ) -> Result<i64, StoreError> {
        let mut tables = self.tables.lock().await;
        tables.last_verification_id += 1;
        let id = tables.last_verification_id;
        C::tables(&mut tables).verifications.insert(
            id,
            VerificationRow {
                contact: verification.contact.clone(),
                record: VerificationRecord {
                    id,
                    code_hash: verification.code_hash.clone(),
                    code_expiry_utc: verification.code_expiry_utc,
                    attempts_remaining: verification.attempts_remaining,
                    created_utc: verification.created_utc,
                    confirmed_utc: None,
                },
            },
        );
        Ok(id)
    }

    async fn consume_attempt(&self, id: i64) -> Result<Option<VerificationRecord>, StoreError> {
        let mut tables = self.tables.lock().await;
        let record = C::tables(&mut tables).verifications.get_mut(&id).map(|row| {
            row.record.attempts_remaining = row.record.attempts_remaining.saturating_sub(1);
            row.record.clone()
        });
        Ok(record)
    }

    async fn set_confirmed(
        &self,
        id: i64,
        confirmed_utc: DateTime<Utc>,
        _confirmed_by: Actor,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        match C::tables(&mut tables).verifications.get_mut(&id) {
            Some(row) if row.record.confirmed_utc.is_none() => {
                row.record.confirmed_utc = Some(confirmed_utc);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_contact(&self, id: i64) -> Result<Option<C>, StoreError> {
        let mut tables = self.tables.lock().await;
        Ok(C::tables(&mut tables)
            .verifications
            .get(&id)
            .map(|row| row.contact.clone()))
    }
}
