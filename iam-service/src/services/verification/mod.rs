//! Verification subsystem: one-time codes bound to a contact value.
//!
//! A challenge is started with [`Verifier::start_verification`], which
//! persists a row and dispatches the code, and resolved with
//! [`Verifier::confirm_verification`]. Every confirmation call consumes one
//! attempt before the code is looked at.

pub mod delivery;
pub mod smtp;
pub mod templates;
pub mod twilio;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, DurationRound};
use rand::Rng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use super::error::IamError;
use super::store::VerificationStore;
use crate::models::{CallContext, Contact, EmailAddress, NewVerification, PhoneNumber, StartedVerification};

pub use delivery::{
    DeliveryRegistry, DeliveryRoutes, HtmlMessageDelivery, MockDelivery, NullDelivery,
    ProviderError, SentMessage, TextMessageDelivery,
};

const CODE_DIGITS: u32 = 6;
/// Repeated start requests within this window return the pending challenge.
const SUPPRESSION_WINDOW_SECONDS: i64 = 10;

/// How the caller would like the code delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationMethod {
    Unspecified,
    /// Persist the challenge but send nothing.
    None,
    Sms,
    Email,
    Unknown,
}

impl VerificationMethod {
    pub fn parse(s: &str) -> Self {
        match s {
            "" => VerificationMethod::Unspecified,
            "none" => VerificationMethod::None,
            "sms" => VerificationMethod::Sms,
            "email" => VerificationMethod::Email,
            _ => VerificationMethod::Unknown,
        }
    }

    /// Only an explicit, sole "none" suppresses delivery.
    fn suppresses_delivery(methods: &[VerificationMethod]) -> bool {
        matches!(methods, [VerificationMethod::None])
    }
}

#[derive(Debug, Clone)]
pub struct VerifierConfig {
    pub code_ttl: Duration,
    pub confirmation_attempts: i16,
}

/// Sends a generated code to a contact.
#[async_trait]
pub trait CodeDispatcher<C: Contact>: Send + Sync {
    async fn dispatch(
        &self,
        contact: &C,
        code: &str,
        preferred_locales: &[String],
    ) -> Result<(), ProviderError>;
}

/// SMS dispatch routed by country code.
pub struct PhoneCodeDispatcher {
    realm_name: String,
    retriever_app_hash: Option<String>,
    routes: DeliveryRoutes<dyn TextMessageDelivery>,
}

impl PhoneCodeDispatcher {
    pub fn new(
        realm_name: impl Into<String>,
        retriever_app_hash: Option<String>,
        routes: DeliveryRoutes<dyn TextMessageDelivery>,
    ) -> Self {
        Self {
            realm_name: realm_name.into(),
            retriever_app_hash,
            routes,
        }
    }
}

#[async_trait]
impl CodeDispatcher<PhoneNumber> for PhoneCodeDispatcher {
    async fn dispatch(
        &self,
        contact: &PhoneNumber,
        code: &str,
        preferred_locales: &[String],
    ) -> Result<(), ProviderError> {
        let body = templates::sms_body(
            &self.realm_name,
            code,
            preferred_locales,
            self.retriever_app_hash.as_deref(),
        );
        self.routes
            .select(&contact.country_code().to_string())
            .send_text_message(contact, &body)
            .await
    }
}

/// Email dispatch routed by recipient domain.
pub struct EmailCodeDispatcher {
    realm_name: String,
    routes: DeliveryRoutes<dyn HtmlMessageDelivery>,
}

impl EmailCodeDispatcher {
    pub fn new(realm_name: impl Into<String>, routes: DeliveryRoutes<dyn HtmlMessageDelivery>) -> Self {
        Self {
            realm_name: realm_name.into(),
            routes,
        }
    }
}

#[async_trait]
impl CodeDispatcher<EmailAddress> for EmailCodeDispatcher {
    async fn dispatch(
        &self,
        contact: &EmailAddress,
        code: &str,
        preferred_locales: &[String],
    ) -> Result<(), ProviderError> {
        let (subject, body) = templates::email_message(&self.realm_name, code, preferred_locales);
        self.routes
            .select(contact.domain_part())
            .send_html_message(contact, &subject, &body)
            .await
    }
}

/// Issues and confirms one-time codes for one kind of contact.
pub struct Verifier<C: Contact> {
    store: Arc<dyn VerificationStore<C>>,
    dispatcher: Arc<dyn CodeDispatcher<C>>,
    config: VerifierConfig,
}

impl<C: Contact> Verifier<C> {
    pub fn new(
        store: Arc<dyn VerificationStore<C>>,
        dispatcher: Arc<dyn CodeDispatcher<C>>,
        config: VerifierConfig,
    ) -> Self {
        Self {
            store,
            dispatcher,
            config,
        }
    }

    /// Starts a challenge against `contact`.
    ///
    /// A non-positive `code_ttl` uses the configured default. Delivery
    /// failure is returned to the caller; the persisted challenge stays
    /// confirmable.
    #[tracing::instrument(skip_all, fields(contact_type = %C::VERIFICATION_TYPE))]
    pub async fn start_verification(
        &self,
        ctx: &CallContext,
        contact: &C,
        code_ttl: Option<Duration>,
        preferred_locales: &[String],
        preferred_methods: &[VerificationMethod],
    ) -> Result<StartedVerification, IamError> {
        let now = ctx.receive_time;

        if let Some(pending) = self.store.find_latest_unconfirmed(contact).await? {
            let window_start = now - Duration::seconds(SUPPRESSION_WINDOW_SECONDS);
            if pending.created_utc > window_start
                && pending.attempts_remaining > 0
                && pending.code_expiry_utc > now
            {
                tracing::info!(
                    verification_id = pending.id,
                    "Returning pending verification within suppression window"
                );
                return Ok(StartedVerification {
                    verification_id: pending.id,
                    code_expiry_utc: pending.code_expiry_utc,
                    delivered: false,
                });
            }
        }

        let ttl = code_ttl
            .filter(|ttl| *ttl > Duration::zero())
            .unwrap_or(self.config.code_ttl);
        let code_expiry_utc = (now + ttl)
            .duration_trunc(Duration::minutes(1))
            .map_err(|e| IamError::Internal(format!("code expiry truncation: {e}")))?;

        let code = generate_code();
        let verification_id = self
            .store
            .insert_verification(&NewVerification {
                contact: contact.clone(),
                code_hash: hash_code(&code),
                code_expiry_utc,
                attempts_remaining: self.config.confirmation_attempts,
                created_utc: now,
                created_by: ctx.actor(),
            })
            .await?;

        let skip_delivery =
            contact.is_test_contact() || VerificationMethod::suppresses_delivery(preferred_methods);
        if !skip_delivery {
            if let Err(e) = self
                .dispatcher
                .dispatch(contact, &code, preferred_locales)
                .await
            {
                tracing::warn!(verification_id, error = %e, "Verification code delivery failed");
                return Err(IamError::Delivery(e));
            }
        }

        tracing::info!(verification_id, delivered = !skip_delivery, "Verification started");
        Ok(StartedVerification {
            verification_id,
            code_expiry_utc,
            delivered: !skip_delivery,
        })
    }

    /// Confirms a challenge. Already confirmed challenges succeed again
    /// without being touched as long as the code matches and attempts
    /// remain.
    #[tracing::instrument(skip(self, ctx, code))]
    pub async fn confirm_verification(
        &self,
        ctx: &CallContext,
        verification_id: i64,
        code: &str,
    ) -> Result<(), IamError> {
        let record = self
            .store
            .consume_attempt(verification_id)
            .await?
            .ok_or_else(|| IamError::invalid_argument("verification_id", "not found"))?;

        if record.attempts_remaining < 0 {
            return Err(IamError::CodeExpired);
        }
        if !code_matches(&record.code_hash, code) {
            return Err(IamError::CodeMismatch);
        }
        if record.code_expiry_utc < ctx.receive_time {
            return Err(IamError::CodeExpired);
        }
        if record.is_confirmed() {
            return Ok(());
        }

        let changed = self
            .store
            .set_confirmed(verification_id, ctx.receive_time, ctx.actor())
            .await?;
        if !changed {
            tracing::debug!("Verification confirmed concurrently");
        }
        Ok(())
    }

    /// The contact a challenge was issued for.
    pub async fn contact_by_verification_id(&self, verification_id: i64) -> Result<Option<C>, IamError> {
        Ok(self.store.find_contact(verification_id).await?)
    }
}

/// Uniform code of [`CODE_DIGITS`] digits, zero padded.
fn generate_code() -> String {
    let upper = 10u32.pow(CODE_DIGITS);
    let value = rand::thread_rng().gen_range(0..upper);
    format!("{:0width$}", value, width = CODE_DIGITS as usize)
}

fn hash_code(code: &str) -> String {
    hex::encode(Sha256::digest(code.as_bytes()))
}

fn code_matches(stored_hash: &str, code: &str) -> bool {
    let candidate = hash_code(code.trim());
    bool::from(stored_hash.as_bytes().ct_eq(candidate.as_bytes()))
}
