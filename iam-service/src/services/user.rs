//! User accounts: allocation, state and credentials.

use super::cache::InstanceState;
use super::engine::{IamCore, ID_GENERATION_ATTEMPTS};
use super::error::IamError;
use crate::azid::{AzidText, UserId};
use crate::models::{CallContext, EmailAddress, PhoneNumber};
use crate::utils::{hash_password, password_matches};

impl IamCore {
    /// Allocates a new user, retrying on id collisions.
    #[tracing::instrument(skip(self, ctx))]
    pub async fn create_user(&self, ctx: &CallContext) -> Result<UserId, IamError> {
        for attempt in 1..=ID_GENERATION_ATTEMPTS {
            let user_id = UserId::generate(false);
            match self
                .stores
                .users
                .insert_user(user_id, ctx.receive_time, ctx.actor())
                .await
            {
                Ok(()) => {
                    tracing::info!(user_id = %user_id, "User created");
                    self.users.record(
                        &user_id,
                        InstanceState {
                            registered: true,
                            deleted: false,
                        },
                    );
                    return Ok(user_id);
                }
                Err(e) if e.is_primary_key_violation() => {
                    tracing::warn!(attempt, "User id collision, regenerating");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(IamError::RetryExhausted(ID_GENERATION_ATTEMPTS))
    }

    pub async fn user_state(&self, user_id: UserId) -> Result<InstanceState, IamError> {
        if !user_id.is_statically_valid() {
            return Ok(InstanceState {
                registered: false,
                deleted: false,
            });
        }
        if let Some(state) = self.users.get(&user_id) {
            return Ok(state);
        }
        let state = match self.stores.users.find_user(user_id).await? {
            Some(user) => InstanceState {
                registered: true,
                deleted: user.is_deleted(),
            },
            None => InstanceState {
                registered: false,
                deleted: false,
            },
        };
        self.users.record(&user_id, state);
        Ok(state)
    }

    pub async fn is_user_active(&self, user_id: UserId) -> Result<bool, IamError> {
        Ok(self.user_state(user_id).await?.is_active())
    }

    pub async fn set_user_password(
        &self,
        ctx: &CallContext,
        user_id: UserId,
        password: &str,
    ) -> Result<(), IamError> {
        if !self.is_user_active(user_id).await? {
            return Err(IamError::invalid_argument("user_id", "not an active user"));
        }
        let hash = hash_password(password).map_err(|e| IamError::Internal(e.to_string()))?;
        self.stores
            .users
            .set_password_hash(user_id, &hash, ctx.receive_time)
            .await?;
        Ok(())
    }

    /// Whether the password matches the user's stored hash. Users without a
    /// password never match.
    pub async fn match_user_password(
        &self,
        user_id: UserId,
        password: &str,
    ) -> Result<bool, IamError> {
        let Some(hash) = self.stores.users.find_password_hash(user_id).await? else {
            return Ok(false);
        };
        password_matches(password, &hash).map_err(|e| IamError::Internal(e.to_string()))
    }

    /// Resolves a login identifier through verified key contacts, trying
    /// email addresses first and phone numbers second.
    pub async fn user_by_login_identifier(
        &self,
        identifier: &str,
    ) -> Result<Option<UserId>, IamError> {
        let identifier = identifier.trim();
        if let Ok(email) = identifier.parse::<EmailAddress>() {
            if let Some(user_id) = self.stores.email_addresses.find_verified_owner(&email).await? {
                return Ok(Some(user_id));
            }
        }
        if let Ok(phone) = identifier.parse::<PhoneNumber>() {
            if let Some(user_id) = self.stores.phone_numbers.find_verified_owner(&phone).await? {
                return Ok(Some(user_id));
            }
        }
        Ok(None)
    }
}
