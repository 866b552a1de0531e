//! Application model - a registered client.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use subtle::ConstantTimeEq;

use crate::azid::ApplicationId;

/// A registered client application.
///
/// The category (service, public or confidential user agent) lives in the
/// identifier; everything else is registry data.
#[derive(Debug, Clone)]
pub struct Application {
    pub id: ApplicationId,
    pub display_name: String,
    pub secret: String,
    /// Only meaningful for user-agent applications.
    pub platform_type: Option<String>,
    pub required_scopes: Vec<String>,
    pub oauth2_redirect_uris: Vec<String>,
    pub created_utc: DateTime<Utc>,
    pub deleted_utc: Option<DateTime<Utc>>,
}

impl Application {
    pub fn new(id: ApplicationId, display_name: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            secret: secret.into(),
            platform_type: None,
            required_scopes: Vec::new(),
            oauth2_redirect_uris: Vec::new(),
            created_utc: Utc::now(),
            deleted_utc: None,
        }
    }

    pub fn with_redirect_uris(mut self, uris: Vec<String>) -> Self {
        self.oauth2_redirect_uris = uris;
        self
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_utc.is_some()
    }

    pub fn has_oauth2_redirect_uri(&self, redirect_uri: &str) -> bool {
        self.oauth2_redirect_uris.iter().any(|uri| uri == redirect_uri)
    }

    /// Constant-time comparison of the client secret.
    pub fn secret_matches(&self, secret: &str) -> bool {
        !self.secret.is_empty() && bool::from(self.secret.as_bytes().ct_eq(secret.as_bytes()))
    }
}

/// An application entry of the startup registry file.
#[derive(Debug, Clone, Deserialize)]
pub struct ApplicationSeed {
    pub id: ApplicationId,
    pub display_name: String,
    #[serde(default)]
    pub secret: String,
    pub platform_type: Option<String>,
    #[serde(default)]
    pub required_scopes: Vec<String>,
    #[serde(default)]
    pub oauth2_redirect_uris: Vec<String>,
}

impl ApplicationSeed {
    pub fn into_application(self, created_utc: DateTime<Utc>) -> Application {
        Application {
            id: self.id,
            display_name: self.display_name,
            secret: self.secret,
            platform_type: self.platform_type,
            required_scopes: self.required_scopes,
            oauth2_redirect_uris: self.oauth2_redirect_uris,
            created_utc,
            deleted_utc: None,
        }
    }
}
