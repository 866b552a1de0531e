use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::fs;

use super::error::IamError;
use crate::config::JwtConfig;

/// RS256 signer for access and refresh tokens.
#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    refresh_token_ttl: Duration,
}

/// Claims of an access token. One access token per session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Session identifier
    pub jti: String,
    pub iat: i64,
    pub iss: String,
    pub exp: i64,
    /// User identifier; absent for terminals without a user
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sub: String,
    /// Application identifier
    pub azp: String,
    pub terminal_id: String,
}

/// Claims of a refresh token. Self-contained: it carries the terminal
/// credentials instead of pointing at a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshTokenClaims {
    pub nbf: i64,
    pub exp: i64,
    pub terminal_id: String,
    pub terminal_secret: String,
}

impl JwtService {
    /// Loads the RSA key pair from PEM files.
    pub fn new(config: &JwtConfig, issuer: impl Into<String>) -> Result<Self, anyhow::Error> {
        let private_key_pem = fs::read_to_string(&config.private_key_path).map_err(|e| {
            anyhow::anyhow!(
                "Failed to read private key from {}: {}",
                config.private_key_path,
                e
            )
        })?;
        let encoding_key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
            .map_err(|e| anyhow::anyhow!("Failed to parse private key: {}", e))?;

        let public_key_pem = fs::read_to_string(&config.public_key_path).map_err(|e| {
            anyhow::anyhow!(
                "Failed to read public key from {}: {}",
                config.public_key_path,
                e
            )
        })?;
        let decoding_key = DecodingKey::from_rsa_pem(public_key_pem.as_bytes())
            .map_err(|e| anyhow::anyhow!("Failed to parse public key: {}", e))?;

        tracing::info!("JWT signer initialized with RS256 keys");

        Ok(Self {
            encoding_key,
            decoding_key,
            issuer: issuer.into(),
            refresh_token_ttl: Duration::days(config.refresh_token_ttl_days),
        })
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn sign_access_token(&self, claims: &AccessTokenClaims) -> Result<String, IamError> {
        encode(&Header::new(Algorithm::RS256), claims, &self.encoding_key)
            .map_err(|e| IamError::Internal(format!("Failed to encode access token: {e}")))
    }

    /// Refresh token valid from `issue_time` for the configured TTL.
    pub fn sign_refresh_token(
        &self,
        terminal_id: &str,
        terminal_secret: &str,
        issue_time: DateTime<Utc>,
    ) -> Result<String, IamError> {
        let claims = RefreshTokenClaims {
            nbf: issue_time.timestamp(),
            exp: (issue_time + self.refresh_token_ttl).timestamp(),
            terminal_id: terminal_id.to_string(),
            terminal_secret: terminal_secret.to_string(),
        };
        encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
            .map_err(|e| IamError::Internal(format!("Failed to encode refresh token: {e}")))
    }

    pub fn validate_access_token(&self, token: &str) -> Result<AccessTokenClaims, IamError> {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[&self.issuer]);
        let data = decode::<AccessTokenClaims>(token, &self.decoding_key, &validation).map_err(
            |e| {
                tracing::debug!(error = %e, "Access token rejected");
                IamError::AuthorizationInvalid
            },
        )?;
        Ok(data.claims)
    }

    pub fn validate_refresh_token(&self, token: &str) -> Result<RefreshTokenClaims, IamError> {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_nbf = true;
        let data = decode::<RefreshTokenClaims>(token, &self.decoding_key, &validation).map_err(
            |e| {
                tracing::debug!(error = %e, "Refresh token rejected");
                IamError::invalid_argument("refresh_token", "invalid or expired")
            },
        )?;
        Ok(data.claims)
    }
}
