//! Session issuance and token minting.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::engine::{IamCore, ID_GENERATION_ATTEMPTS};
use super::error::IamError;
use super::jwt::AccessTokenClaims;
use crate::azid::{AzidText, SessionId, SessionIdNum, TerminalId, UserId};
use crate::models::{Authorization, CallContext, SessionRecord};

/// Tokens handed to a client after a successful grant.
#[derive(Debug, Clone, Serialize)]
pub struct TokenSet {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub user_id: String,
    pub terminal_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub terminal_secret: String,
}

impl IamCore {
    /// Inserts a new session for the terminal, retrying on sequence number
    /// collisions. Earlier sessions of the terminal stay valid.
    #[tracing::instrument(skip(self, ctx), fields(terminal_id = %terminal_id))]
    pub async fn issue_session(
        &self,
        ctx: &CallContext,
        terminal_id: TerminalId,
    ) -> Result<SessionRecord, IamError> {
        if !terminal_id.is_statically_valid() {
            return Err(IamError::invalid_argument("terminal_id", "invalid"));
        }
        let issued_utc = ctx.receive_time;
        let expiry_utc = issued_utc + self.session_ttl();

        for attempt in 1..=ID_GENERATION_ATTEMPTS {
            let session = SessionRecord {
                id: SessionId::new(terminal_id, SessionIdNum::generate()),
                issued_utc,
                expiry_utc,
                created_by: ctx.actor(),
                created_origin: ctx.origin_address.clone(),
            };
            match self.stores.sessions.insert_session(&session).await {
                Ok(()) => {
                    tracing::debug!(session_id = %session.id, "Session issued");
                    return Ok(session);
                }
                Err(e) if e.is_primary_key_violation() => {
                    tracing::warn!(attempt, "Session id collision, regenerating");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(IamError::RetryExhausted(ID_GENERATION_ATTEMPTS))
    }

    /// Issues a session and signs its access token.
    pub async fn generate_access_token(
        &self,
        ctx: &CallContext,
        terminal_id: TerminalId,
        user_id: UserId,
    ) -> Result<(String, SessionRecord), IamError> {
        let signer = self.signer()?;
        let session = self.issue_session(ctx, terminal_id).await?;
        let claims = AccessTokenClaims {
            jti: session.id.azid_text(),
            iat: session.issued_utc.timestamp(),
            iss: signer.issuer().to_string(),
            exp: session.expiry_utc.timestamp(),
            sub: user_id.azid_text(),
            azp: terminal_id.application().azid_text(),
            terminal_id: terminal_id.azid_text(),
        };
        let token = signer.sign_access_token(&claims)?;
        Ok((token, session))
    }

    pub fn generate_refresh_token(
        &self,
        terminal_id: TerminalId,
        terminal_secret: &str,
        issue_time: DateTime<Utc>,
    ) -> Result<String, IamError> {
        self.signer()?
            .sign_refresh_token(&terminal_id.azid_text(), terminal_secret, issue_time)
    }

    /// Access token for a new session plus, when a secret is given, a
    /// refresh token carrying it.
    #[tracing::instrument(skip(self, ctx, terminal_secret), fields(terminal_id = %terminal_id))]
    pub async fn generate_token_set(
        &self,
        ctx: &CallContext,
        terminal_id: TerminalId,
        terminal_secret: &str,
    ) -> Result<TokenSet, IamError> {
        let user_id = terminal_id.user();
        let (access_token, session) = self.generate_access_token(ctx, terminal_id, user_id).await?;
        let refresh_token = if terminal_secret.is_empty() {
            None
        } else {
            Some(self.generate_refresh_token(terminal_id, terminal_secret, session.issued_utc)?)
        };
        Ok(TokenSet {
            access_token,
            token_type: "Bearer",
            expires_in: (session.expiry_utc - session.issued_utc).num_seconds(),
            refresh_token,
            user_id: user_id.azid_text(),
            terminal_id: terminal_id.azid_text(),
            terminal_secret: String::new(),
        })
    }

    /// Turns a bearer access token into the authorization of its session.
    pub fn authorization_from_access_token(&self, token: &str) -> Result<Authorization, IamError> {
        let claims = self.signer()?.validate_access_token(token)?;
        let session: SessionId = claims
            .jti
            .parse()
            .map_err(|_| IamError::AuthorizationInvalid)?;
        let terminal = session.terminal();
        if claims.terminal_id != terminal.azid_text()
            || claims.sub != terminal.user().azid_text()
            || claims.azp != terminal.application().azid_text()
        {
            return Err(IamError::AuthorizationInvalid);
        }
        Ok(Authorization::from_session(session))
    }
}
