//! Terminal authorization state machine.
//!
//! `Unregistered -> Registered(unverified) -> Registered(verified) -> Revoked`.
//! Verification and revocation are conditional updates, so each transition
//! happens at most once no matter how many callers race on it.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use rand::RngCore;
use subtle::ConstantTimeEq;

use super::engine::{IamCore, ID_GENERATION_ATTEMPTS};
use super::error::IamError;
use super::store::{KeyContactStore, StoreError};
use super::verification::{VerificationMethod, Verifier};
use crate::azid::{ApplicationId, AzidText, TerminalId, TerminalIdNum, UserId};
use crate::models::{
    CallContext, Contact, EmailAddress, NewTerminal, PhoneNumber, TerminalRecord,
    VerificationType,
};

const TERMINAL_SECRET_BYTES: usize = 16;

/// Input of [`IamCore::register_terminal`].
#[derive(Debug, Clone)]
pub struct TerminalRegistration {
    pub application_id: ApplicationId,
    /// Zero for applications that are not user agents.
    pub user_id: UserId,
    pub display_name: String,
    pub accept_language: Vec<String>,
    pub verification_type: VerificationType,
    /// Zero when there is no verification row.
    pub verification_id: i64,
}

#[derive(Debug, Clone)]
pub struct RegisteredTerminal {
    pub terminal_id: TerminalId,
    /// Empty unless the verification type grants a secret on registration.
    pub secret: String,
}

/// Result of starting a phone or email authorization.
#[derive(Debug, Clone)]
pub struct AuthorizationStarted {
    pub terminal_id: TerminalId,
    pub verification_id: i64,
    pub code_expiry_utc: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AuthorizationConfirmed {
    pub terminal_id: TerminalId,
    pub secret: String,
    pub user_id: UserId,
}

/// 16 random bytes, base64url without padding (22 characters).
pub fn generate_terminal_secret() -> String {
    let mut bytes = [0u8; TERMINAL_SECRET_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

impl IamCore {
    /// Inserts a new terminal, retrying on id collisions.
    #[tracing::instrument(
        skip(self, ctx, input),
        fields(application_id = %input.application_id, verification_type = %input.verification_type)
    )]
    pub async fn register_terminal(
        &self,
        ctx: &CallContext,
        input: TerminalRegistration,
    ) -> Result<RegisteredTerminal, IamError> {
        let app = input.application_id;
        if !app.is_statically_valid() {
            return Err(IamError::invalid_argument("application_id", "invalid"));
        }
        if !input.user_id.is_zero() && !input.user_id.is_statically_valid() {
            return Err(IamError::invalid_argument("user_id", "invalid"));
        }
        if input.user_id.is_statically_valid() != app.is_user_agent() {
            return Err(IamError::invalid_argument(
                "user_id",
                "a user is required for user-agent applications and only for them",
            ));
        }
        if !self.is_application_active(app).await? {
            return Err(IamError::invalid_argument("application_id", "not registered"));
        }

        let (secret, verified_utc) = if input.verification_type.grants_secret_on_registration() {
            (generate_terminal_secret(), Some(ctx.receive_time))
        } else {
            (String::new(), None)
        };

        for attempt in 1..=ID_GENERATION_ATTEMPTS {
            let terminal_id = TerminalId::new(app, input.user_id, TerminalIdNum::generate());
            let row = NewTerminal {
                id: terminal_id,
                secret: secret.clone(),
                display_name: input.display_name.trim().to_string(),
                accept_language: input.accept_language.clone(),
                verification_type: input.verification_type,
                verification_id: input.verification_id,
                verified_utc,
                created_utc: ctx.receive_time,
                created_by: ctx.actor(),
                created_origin: ctx.origin_address.clone(),
            };
            match self.stores.terminals.insert_terminal(&row).await {
                Ok(()) => {
                    tracing::info!(terminal_id = %terminal_id, "Terminal registered");
                    return Ok(RegisteredTerminal {
                        terminal_id,
                        secret,
                    });
                }
                Err(e) if e.is_primary_key_violation() => {
                    tracing::warn!(attempt, "Terminal id collision, regenerating");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(IamError::RetryExhausted(ID_GENERATION_ATTEMPTS))
    }

    /// Starts authorizing a new terminal by a phone number challenge.
    pub async fn start_authorization_by_phone(
        &self,
        ctx: &CallContext,
        application_id: ApplicationId,
        phone_number: &PhoneNumber,
        display_name: &str,
        methods: &[VerificationMethod],
    ) -> Result<AuthorizationStarted, IamError> {
        self.start_authorization(
            ctx,
            application_id,
            phone_number,
            display_name,
            methods,
            self.stores.phone_numbers.as_ref(),
            &self.phone_verifier,
        )
        .await
    }

    /// Starts authorizing a new terminal by an email address challenge.
    pub async fn start_authorization_by_email(
        &self,
        ctx: &CallContext,
        application_id: ApplicationId,
        email_address: &EmailAddress,
        display_name: &str,
        methods: &[VerificationMethod],
    ) -> Result<AuthorizationStarted, IamError> {
        self.start_authorization(
            ctx,
            application_id,
            email_address,
            display_name,
            methods,
            self.stores.email_addresses.as_ref(),
            &self.email_verifier,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    #[tracing::instrument(
        skip_all,
        fields(application_id = %application_id, contact_type = %C::VERIFICATION_TYPE)
    )]
    async fn start_authorization<C: Contact>(
        &self,
        ctx: &CallContext,
        application_id: ApplicationId,
        contact: &C,
        display_name: &str,
        methods: &[VerificationMethod],
        contacts: &dyn KeyContactStore<C>,
        verifier: &Verifier<C>,
    ) -> Result<AuthorizationStarted, IamError> {
        let auth = ctx.authorization;
        if auth.is_valid() && !auth.is_user_context() {
            return Err(IamError::AuthorizationInvalid);
        }

        let user_id = match contacts.find_owner(contact).await? {
            Some(owner) => {
                if auth.is_user_context() && auth.user_id() != owner.user_id {
                    return Err(IamError::Conflict(
                        "contact is owned by another user".to_string(),
                    ));
                }
                owner.user_id
            }
            None => {
                let user_id = if auth.is_user_context() {
                    auth.user_id()
                } else {
                    self.create_user(ctx).await?
                };
                contacts
                    .claim(user_id, contact, ctx.receive_time, ctx.actor())
                    .await?;
                user_id
            }
        };

        let started = verifier
            .start_verification(ctx, contact, None, &ctx.accept_language, methods)
            .await?;

        let registered = self
            .register_terminal(
                ctx,
                TerminalRegistration {
                    application_id,
                    user_id,
                    display_name: display_name.to_string(),
                    accept_language: ctx.accept_language.clone(),
                    verification_type: C::VERIFICATION_TYPE,
                    verification_id: started.verification_id,
                },
            )
            .await?;

        Ok(AuthorizationStarted {
            terminal_id: registered.terminal_id,
            verification_id: started.verification_id,
            code_expiry_utc: started.code_expiry_utc,
        })
    }

    /// Loads a terminal addressed by its full identifier.
    pub(super) async fn terminal_by_id(
        &self,
        terminal_id: TerminalId,
    ) -> Result<Option<TerminalRecord>, IamError> {
        if !terminal_id.is_statically_valid() {
            return Ok(None);
        }
        let record = self
            .stores
            .terminals
            .find_terminal(terminal_id.id_num())
            .await?;
        Ok(record.filter(|t| t.id == terminal_id))
    }

    /// Confirms a terminal and returns its secret.
    ///
    /// Phone and email terminals confirm `code` against their verification
    /// row. Authorization-code terminals take no code. Replay returns the
    /// persisted secret except for authorization-code terminals, which are
    /// claimed exactly once. Password and client-credentials terminals are
    /// verified at registration and cannot be confirmed.
    pub async fn confirm_authorization(
        &self,
        ctx: &CallContext,
        terminal_id: TerminalId,
        code: &str,
    ) -> Result<AuthorizationConfirmed, IamError> {
        self.confirm_terminal(ctx, terminal_id, code, |vt| {
            vt.is_contact() || vt == VerificationType::OAuth2AuthorizationCode
        })
        .await
    }

    /// Confirms a phone or email terminal with the code delivered to the
    /// contact. Any other terminal type is rejected.
    pub async fn confirm_contact_authorization(
        &self,
        ctx: &CallContext,
        terminal_id: TerminalId,
        code: &str,
    ) -> Result<AuthorizationConfirmed, IamError> {
        self.confirm_terminal(ctx, terminal_id, code, |vt| vt.is_contact())
            .await
    }

    /// Claims an authorization-code terminal issued by `authorize_client`.
    pub(super) async fn claim_authorization_code(
        &self,
        ctx: &CallContext,
        terminal_id: TerminalId,
    ) -> Result<AuthorizationConfirmed, IamError> {
        self.confirm_terminal(ctx, terminal_id, "", |vt| {
            vt == VerificationType::OAuth2AuthorizationCode
        })
        .await
    }

    #[tracing::instrument(skip(self, ctx, code, accepts), fields(terminal_id = %terminal_id))]
    async fn confirm_terminal(
        &self,
        ctx: &CallContext,
        terminal_id: TerminalId,
        code: &str,
        accepts: impl Fn(VerificationType) -> bool,
    ) -> Result<AuthorizationConfirmed, IamError> {
        let terminal = self
            .terminal_by_id(terminal_id)
            .await?
            .filter(|t| !t.is_deleted())
            .ok_or_else(|| IamError::invalid_argument("terminal_id", "not found"))?;
        if !accepts(terminal.verification_type) {
            tracing::warn!(
                verification_type = %terminal.verification_type,
                "Terminal type cannot be confirmed here"
            );
            return Err(IamError::invalid_argument(
                "terminal_id",
                "terminal type cannot be confirmed",
            ));
        }
        let user_id = terminal.id.user();

        if terminal.verification_type.is_contact() {
            if !user_id.is_statically_valid() {
                return Err(IamError::Internal("contact terminal has no user".to_string()));
            }
            match terminal.verification_type {
                VerificationType::PhoneNumber => {
                    self.confirm_contact(
                        ctx,
                        user_id,
                        terminal.verification_id,
                        code,
                        self.stores.phone_numbers.as_ref(),
                        &self.phone_verifier,
                    )
                    .await?;
                }
                VerificationType::EmailAddress => {
                    self.confirm_contact(
                        ctx,
                        user_id,
                        terminal.verification_id,
                        code,
                        self.stores.email_addresses.as_ref(),
                        &self.email_verifier,
                    )
                    .await?;
                }
                _ => {}
            }
        }

        let secret = generate_terminal_secret();
        let updated = self
            .stores
            .terminals
            .set_terminal_verified(terminal_id.id_num(), &secret, ctx.receive_time)
            .await?;
        if updated {
            tracing::info!("Terminal verified");
            return Ok(AuthorizationConfirmed {
                terminal_id,
                secret,
                user_id,
            });
        }

        if !terminal.verification_type.allows_replay() {
            tracing::warn!("Authorization code replayed");
            return Err(IamError::AlreadyClaimed);
        }

        let existing = self
            .terminal_by_id(terminal_id)
            .await?
            .filter(|t| t.is_verified() && !t.secret.is_empty())
            .ok_or_else(|| {
                IamError::Internal("verified terminal has no secret".to_string())
            })?;
        Ok(AuthorizationConfirmed {
            terminal_id,
            secret: existing.secret,
            user_id,
        })
    }

    /// Confirms the challenge and marks the user's contact verified. The
    /// first user to verify a contact keeps it.
    async fn confirm_contact<C: Contact>(
        &self,
        ctx: &CallContext,
        user_id: UserId,
        verification_id: i64,
        code: &str,
        contacts: &dyn KeyContactStore<C>,
        verifier: &Verifier<C>,
    ) -> Result<(), IamError> {
        verifier
            .confirm_verification(ctx, verification_id, code)
            .await?;

        let contact = verifier
            .contact_by_verification_id(verification_id)
            .await?
            .ok_or_else(|| IamError::Internal("verification row has no contact".to_string()))?;

        match contacts
            .set_verified(user_id, &contact, verification_id, ctx.receive_time)
            .await
        {
            Ok(true) => return Ok(()),
            Ok(false) => {}
            Err(StoreError::UniqueViolation { .. }) => {
                return Err(IamError::Conflict(
                    "contact already verified by another user".to_string(),
                ));
            }
            Err(e) => return Err(e.into()),
        }

        match contacts.find_verified_owner(&contact).await? {
            Some(owner) if owner == user_id => Ok(()),
            Some(_) => Err(IamError::Conflict(
                "contact already verified by another user".to_string(),
            )),
            None => Err(IamError::Conflict(
                "contact is no longer claimed by the user".to_string(),
            )),
        }
    }

    /// Revokes the terminal of the calling session. Returns whether this call
    /// performed the revocation.
    #[tracing::instrument(skip(self, ctx), fields(terminal_id = %terminal_id))]
    pub async fn delete_terminal(
        &self,
        ctx: &CallContext,
        terminal_id: TerminalId,
    ) -> Result<bool, IamError> {
        let auth = ctx.authorization;
        if !auth.is_valid() {
            return Err(IamError::AuthorizationInvalid);
        }
        if auth.terminal_id() != terminal_id {
            return Err(IamError::OperationNotAllowed);
        }
        let deleted = self
            .stores
            .terminals
            .delete_terminal(terminal_id.id_num(), ctx.receive_time, ctx.actor())
            .await?;
        if deleted {
            tracing::info!("Terminal revoked");
        }
        Ok(deleted)
    }

    /// Checks a terminal secret. Returns whether it authenticated and the
    /// terminal's user.
    #[tracing::instrument(skip(self, secret), fields(terminal_id = %terminal_id))]
    pub async fn authenticate_terminal(
        &self,
        terminal_id: TerminalId,
        secret: &str,
    ) -> Result<(bool, UserId), IamError> {
        let Some(terminal) = self.terminal_by_id(terminal_id).await? else {
            return Ok((false, UserId::ZERO));
        };
        if terminal.is_deleted() || !terminal.is_verified() || terminal.secret.is_empty() {
            return Ok((false, UserId::ZERO));
        }
        let matched = bool::from(terminal.secret.as_bytes().ct_eq(secret.as_bytes()));
        Ok((matched, terminal.id.user()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_secret_shape() {
        let secret = generate_terminal_secret();
        assert_eq!(secret.len(), 22);
        assert!(secret
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_ne!(secret, generate_terminal_secret());
    }
}
