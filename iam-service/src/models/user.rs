//! User account and key-contact ownership models.

use chrono::{DateTime, Utc};

use crate::azid::UserId;

/// A user account row.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: UserId,
    pub created_utc: DateTime<Utc>,
    pub deleted_utc: Option<DateTime<Utc>>,
}

impl UserRecord {
    pub fn is_deleted(&self) -> bool {
        self.deleted_utc.is_some()
    }
}

/// Current owner of a key contact, verified or not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContactOwner {
    pub user_id: UserId,
    pub verified: bool,
}
