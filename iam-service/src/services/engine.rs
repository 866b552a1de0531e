//! The terminal authorization and session issuance engine.
//!
//! `IamCore` is request scoped and holds no authoritative state: every
//! transition goes through [`Stores`]. The only in-process state is the
//! advisory caches in [`super::cache`].

use chrono::Duration;

use super::cache::{InstanceState, InstanceStateCache};
use super::error::IamError;
use super::jwt::JwtService;
use super::store::Stores;
use super::verification::Verifier;
use crate::azid::{ApplicationId, AzidText, UserId};
use crate::models::{Application, ApplicationSeed, EmailAddress, PhoneNumber};

/// Attempts made to find an unused identifier before giving up.
pub const ID_GENERATION_ATTEMPTS: usize = 5;

pub const SESSION_TTL_MINUTES_DEFAULT: i64 = 20;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub realm_name: String,
    pub session_ttl: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            realm_name: "Kadisoka".to_string(),
            session_ttl: Duration::minutes(SESSION_TTL_MINUTES_DEFAULT),
        }
    }
}

pub struct IamCore {
    pub(super) stores: Stores,
    pub(super) phone_verifier: Verifier<PhoneNumber>,
    pub(super) email_verifier: Verifier<EmailAddress>,
    pub(super) signer: Option<JwtService>,
    pub(super) settings: EngineSettings,
    pub(super) applications: InstanceStateCache<ApplicationId>,
    pub(super) users: InstanceStateCache<UserId>,
}

impl IamCore {
    /// A missing signer is allowed; token operations then fail with a
    /// configuration error.
    pub fn new(
        stores: Stores,
        phone_verifier: Verifier<PhoneNumber>,
        email_verifier: Verifier<EmailAddress>,
        signer: Option<JwtService>,
        settings: EngineSettings,
    ) -> Self {
        if signer.is_none() {
            tracing::warn!("No token signer configured; token issuance is disabled");
        }
        Self {
            stores,
            phone_verifier,
            email_verifier,
            signer,
            settings,
            applications: InstanceStateCache::default(),
            users: InstanceStateCache::default(),
        }
    }

    pub fn realm_name(&self) -> &str {
        &self.settings.realm_name
    }

    pub fn session_ttl(&self) -> Duration {
        self.settings.session_ttl
    }

    pub(super) fn signer(&self) -> Result<&JwtService, IamError> {
        self.signer
            .as_ref()
            .ok_or_else(|| IamError::Configuration("token signer is not configured".to_string()))
    }

    pub fn phone_verifier(&self) -> &Verifier<PhoneNumber> {
        &self.phone_verifier
    }

    pub fn email_verifier(&self) -> &Verifier<EmailAddress> {
        &self.email_verifier
    }

    // ==================== Application Operations ====================

    /// Adds an application to the registry.
    #[tracing::instrument(skip(self, application), fields(application_id = %application.id))]
    pub async fn register_application(&self, application: &Application) -> Result<(), IamError> {
        if !application.id.is_statically_valid() {
            return Err(IamError::invalid_argument("application_id", "invalid"));
        }
        self.stores.applications.insert_application(application).await?;
        tracing::info!("Application registered");
        Ok(())
    }

    /// Registers startup applications, skipping ids already registered.
    /// Returns how many were added.
    pub async fn seed_applications(&self, seeds: Vec<ApplicationSeed>) -> Result<usize, IamError> {
        let mut added = 0;
        for seed in seeds {
            let application = seed.into_application(chrono::Utc::now());
            match self.register_application(&application).await {
                Ok(()) => added += 1,
                Err(IamError::Store(e)) if e.is_primary_key_violation() => {
                    tracing::debug!(application_id = %application.id, "Application already registered");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(added)
    }

    pub async fn application_by_id(
        &self,
        id: ApplicationId,
    ) -> Result<Option<Application>, IamError> {
        if !id.is_statically_valid() {
            return Ok(None);
        }
        let application = self.stores.applications.find_application(id).await?;
        if let Some(app) = &application {
            self.applications.record(
                &id,
                InstanceState {
                    registered: true,
                    deleted: app.is_deleted(),
                },
            );
        }
        Ok(application)
    }

    /// Registered and not deleted.
    pub async fn is_application_active(&self, id: ApplicationId) -> Result<bool, IamError> {
        if !id.is_statically_valid() {
            return Ok(false);
        }
        if let Some(state) = self.applications.get(&id) {
            return Ok(state.is_active());
        }
        let Some(app) = self.application_by_id(id).await? else {
            return Ok(false);
        };
        Ok(!app.is_deleted())
    }

    /// Authenticates a client application.
    ///
    /// Public user agents cannot keep a secret and authenticate by id alone;
    /// every other category must present its secret.
    #[tracing::instrument(skip(self, secret))]
    pub async fn authenticate_client(
        &self,
        id: ApplicationId,
        secret: Option<&str>,
    ) -> Result<Application, IamError> {
        let app = self
            .application_by_id(id)
            .await?
            .filter(|app| !app.is_deleted())
            .ok_or(IamError::AuthorizationInvalid)?;

        let secret = secret.unwrap_or_default();
        let authenticated = if id.is_user_agent_public() {
            secret.is_empty() || app.secret_matches(secret)
        } else {
            app.secret_matches(secret)
        };
        if !authenticated {
            tracing::warn!("Client authentication failed");
            return Err(IamError::AuthorizationInvalid);
        }
        Ok(app)
    }
}
