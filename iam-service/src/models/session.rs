//! Session model - a time-boxed authorization instance of a terminal.

use chrono::{DateTime, Utc};

use super::context::Actor;
use crate::azid::SessionId;

/// A persisted session. Sessions are never mutated, only superseded.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub id: SessionId,
    pub issued_utc: DateTime<Utc>,
    pub expiry_utc: DateTime<Utc>,
    pub created_by: Actor,
    pub created_origin: Option<String>,
}

impl SessionRecord {
    pub fn is_expired_at(&self, at: DateTime<Utc>) -> bool {
        self.expiry_utc <= at
    }
}
