//! OAuth2 grant orchestration.
//!
//! Each grant checks which application categories may use it, then composes
//! terminal registration or confirmation with token issuance.

use reqwest::Url;

use super::engine::IamCore;
use super::error::IamError;
use super::session::TokenSet;
use super::terminal::TerminalRegistration;
use crate::azid::{AzidText, TerminalId};
use crate::models::{Application, CallContext, VerificationType};

const TERMINAL_USERNAME_SCHEME: &str = "terminal";
const OTP_CODE_PREFIX: &str = "otp:";

/// A token request after client authentication.
#[derive(Debug, Clone)]
pub enum GrantRequest {
    ClientCredentials,
    Password {
        username: String,
        password: String,
    },
    AuthorizationCode {
        code: String,
        redirect_uri: Option<String>,
        client_id: Option<String>,
    },
    RefreshToken {
        refresh_token: String,
    },
}

impl GrantRequest {
    pub fn grant_type(&self) -> &'static str {
        match self {
            GrantRequest::ClientCredentials => "client_credentials",
            GrantRequest::Password { .. } => "password",
            GrantRequest::AuthorizationCode { .. } => "authorization_code",
            GrantRequest::RefreshToken { .. } => "refresh_token",
        }
    }
}

/// Outcome of an authorization request: the code and where to send it.
#[derive(Debug, Clone)]
pub struct AuthorizationCodeIssued {
    pub code: String,
    pub redirect_uri: Option<String>,
}

impl IamCore {
    /// Runs a grant for an authenticated client application.
    #[tracing::instrument(
        skip(self, ctx, client, request),
        fields(application_id = %client.id, grant_type = request.grant_type())
    )]
    pub async fn grant_token(
        &self,
        ctx: &CallContext,
        client: &Application,
        request: GrantRequest,
    ) -> Result<TokenSet, IamError> {
        if ctx.authorization.is_valid() {
            return Err(IamError::invalid_argument(
                "authorization",
                "token requests must not carry a session",
            ));
        }
        match request {
            GrantRequest::ClientCredentials => self.grant_client_credentials(ctx, client).await,
            GrantRequest::Password { username, password } => {
                self.grant_password(ctx, client, &username, &password).await
            }
            GrantRequest::AuthorizationCode {
                code,
                redirect_uri,
                client_id,
            } => {
                self.grant_authorization_code(
                    ctx,
                    client,
                    &code,
                    redirect_uri.as_deref(),
                    client_id.as_deref(),
                )
                .await
            }
            GrantRequest::RefreshToken { refresh_token } => {
                self.grant_refresh_token(ctx, client, &refresh_token).await
            }
        }
    }

    async fn grant_client_credentials(
        &self,
        ctx: &CallContext,
        client: &Application,
    ) -> Result<TokenSet, IamError> {
        if !client.id.is_service() && !client.id.is_user_agent_confidential() {
            return Err(IamError::UnauthorizedClient);
        }
        let registered = self
            .register_terminal(
                ctx,
                TerminalRegistration {
                    application_id: client.id,
                    user_id: ctx.authorization.user_id(),
                    display_name: String::new(),
                    accept_language: ctx.accept_language.clone(),
                    verification_type: VerificationType::OAuth2ClientCredentials,
                    verification_id: 0,
                },
            )
            .await?;
        let mut tokens = self
            .generate_token_set(ctx, registered.terminal_id, &registered.secret)
            .await?;
        tokens.terminal_secret = registered.secret;
        Ok(tokens)
    }

    async fn grant_password(
        &self,
        ctx: &CallContext,
        client: &Application,
        username: &str,
        password: &str,
    ) -> Result<TokenSet, IamError> {
        if !client.id.is_user_agent_confidential() {
            return Err(IamError::UnauthorizedClient);
        }
        if username.is_empty() {
            return Err(IamError::invalid_argument("username", "empty"));
        }

        if let Some((scheme, rest)) = username.split_once(':') {
            if scheme == TERMINAL_USERNAME_SCHEME {
                return self
                    .grant_password_with_terminal_credentials(ctx, client, rest, password)
                    .await;
            }
        }

        let user_id = self
            .user_by_login_identifier(username)
            .await?
            .ok_or(IamError::InvalidCredentials)?;
        if !self.is_user_active(user_id).await? {
            return Err(IamError::InvalidCredentials);
        }
        if !self.match_user_password(user_id, password).await? {
            tracing::warn!(user_id = %user_id, "Password mismatch");
            return Err(IamError::InvalidCredentials);
        }

        let registered = self
            .register_terminal(
                ctx,
                TerminalRegistration {
                    application_id: client.id,
                    user_id,
                    display_name: String::new(),
                    accept_language: ctx.accept_language.clone(),
                    verification_type: VerificationType::OAuth2Password,
                    verification_id: 0,
                },
            )
            .await?;
        let mut tokens = self
            .generate_token_set(ctx, registered.terminal_id, &registered.secret)
            .await?;
        tokens.terminal_secret = registered.secret;
        Ok(tokens)
    }

    async fn grant_password_with_terminal_credentials(
        &self,
        ctx: &CallContext,
        client: &Application,
        terminal_text: &str,
        terminal_secret: &str,
    ) -> Result<TokenSet, IamError> {
        let terminal_id: TerminalId = terminal_text
            .parse()
            .map_err(|_| IamError::invalid_argument("username", "not a terminal identifier"))?;

        let (authenticated, user_id) = self
            .authenticate_terminal(terminal_id, terminal_secret)
            .await?;
        if !authenticated {
            tracing::warn!(terminal_id = %terminal_id, "Terminal authentication failed");
            return Err(IamError::InvalidCredentials);
        }
        if user_id.is_statically_valid() && !self.is_user_active(user_id).await? {
            return Err(IamError::InvalidCredentials);
        }
        if terminal_id.application() != client.id {
            return Err(IamError::invalid_argument(
                "username",
                "terminal belongs to another client",
            ));
        }

        self.generate_token_set(ctx, terminal_id, terminal_secret)
            .await
    }

    async fn grant_authorization_code(
        &self,
        ctx: &CallContext,
        client: &Application,
        code: &str,
        redirect_uri: Option<&str>,
        client_id: Option<&str>,
    ) -> Result<TokenSet, IamError> {
        if code.is_empty() {
            return Err(IamError::invalid_argument("code", "empty"));
        }

        let (terminal_id, otp) = match code.strip_prefix(OTP_CODE_PREFIX) {
            Some(rest) => {
                if !client.id.is_user_agent_public() {
                    return Err(IamError::UnauthorizedClient);
                }
                let (terminal_text, otp) = rest
                    .split_once(':')
                    .filter(|(_, otp)| !otp.is_empty() && !otp.contains(':'))
                    .ok_or_else(|| IamError::invalid_argument("code", "malformed"))?;
                (parse_code_terminal(terminal_text)?, Some(otp))
            }
            None => {
                if !client.id.is_user_agent_confidential() {
                    return Err(IamError::UnauthorizedClient);
                }
                (parse_code_terminal(code)?, None)
            }
        };

        check_redirect_uri(client, redirect_uri)?;
        if let Some(client_id) = client_id.filter(|id| !id.is_empty()) {
            if client_id != client.id.azid_text() {
                return Err(IamError::invalid_argument("client_id", "does not match the client"));
            }
        }
        if terminal_id.application() != client.id {
            return Err(IamError::invalid_argument("code", "issued to another client"));
        }

        let confirmed = match otp {
            Some(otp) => {
                self.confirm_contact_authorization(ctx, terminal_id, otp)
                    .await?
            }
            None => self.claim_authorization_code(ctx, terminal_id).await?,
        };
        let mut tokens = self
            .generate_token_set(ctx, terminal_id, &confirmed.secret)
            .await?;
        tokens.terminal_secret = confirmed.secret;
        Ok(tokens)
    }

    async fn grant_refresh_token(
        &self,
        ctx: &CallContext,
        client: &Application,
        refresh_token: &str,
    ) -> Result<TokenSet, IamError> {
        let claims = self.signer()?.validate_refresh_token(refresh_token)?;
        let terminal_id: TerminalId = claims
            .terminal_id
            .parse()
            .map_err(|_| IamError::invalid_argument("refresh_token", "invalid terminal"))?;
        if terminal_id.application() != client.id {
            return Err(IamError::invalid_argument(
                "refresh_token",
                "issued to another client",
            ));
        }

        let (authenticated, user_id) = self
            .authenticate_terminal(terminal_id, &claims.terminal_secret)
            .await?;
        if !authenticated {
            return Err(IamError::InvalidCredentials);
        }
        if user_id.is_statically_valid() && !self.is_user_active(user_id).await? {
            return Err(IamError::InvalidCredentials);
        }

        let mut tokens = self.generate_token_set(ctx, terminal_id, "").await?;
        tokens.refresh_token = Some(refresh_token.to_string());
        Ok(tokens)
    }

    /// Registers an authorization-code terminal for the calling user and
    /// returns its identifier as the code.
    #[tracing::instrument(skip(self, ctx, client, state), fields(application_id = %client.id))]
    pub async fn authorize_client(
        &self,
        ctx: &CallContext,
        client: &Application,
        redirect_uri: Option<&str>,
        state: Option<&str>,
    ) -> Result<AuthorizationCodeIssued, IamError> {
        if !ctx.authorization.is_user_context() {
            return Err(IamError::UserContextRequired);
        }
        if !client.id.is_user_agent() {
            return Err(IamError::UnauthorizedClient);
        }
        let redirect_uri = match redirect_uri.filter(|uri| !uri.is_empty()) {
            Some(uri) if !client.has_oauth2_redirect_uri(uri) => {
                return Err(IamError::invalid_argument("redirect_uri", "not registered"));
            }
            Some(uri) => Some(uri.to_string()),
            None => client.oauth2_redirect_uris.first().cloned(),
        };

        let registered = self
            .register_terminal(
                ctx,
                TerminalRegistration {
                    application_id: client.id,
                    user_id: ctx.authorization.user_id(),
                    display_name: String::new(),
                    accept_language: ctx.accept_language.clone(),
                    verification_type: VerificationType::OAuth2AuthorizationCode,
                    verification_id: 0,
                },
            )
            .await?;
        let code = registered.terminal_id.azid_text();

        let redirect_uri = match redirect_uri {
            Some(uri) => {
                let mut url = Url::parse(&uri)
                    .map_err(|e| IamError::Internal(format!("registered redirect uri: {e}")))?;
                {
                    let mut query = url.query_pairs_mut();
                    query.append_pair("code", &code);
                    if let Some(state) = state.filter(|s| !s.is_empty()) {
                        query.append_pair("state", state);
                    }
                }
                Some(url.to_string())
            }
            None => None,
        };

        Ok(AuthorizationCodeIssued { code, redirect_uri })
    }
}

fn parse_code_terminal(text: &str) -> Result<TerminalId, IamError> {
    text.parse::<TerminalId>()
        .ok()
        .filter(|id| id.is_statically_valid())
        .ok_or_else(|| IamError::invalid_argument("code", "malformed"))
}

/// A supplied redirect URI must be registered; a client with registered
/// URIs must supply one.
fn check_redirect_uri(client: &Application, redirect_uri: Option<&str>) -> Result<(), IamError> {
    match redirect_uri.filter(|uri| !uri.is_empty()) {
        Some(uri) if !client.has_oauth2_redirect_uri(uri) => {
            Err(IamError::invalid_argument("redirect_uri", "not registered"))
        }
        None if !client.oauth2_redirect_uris.is_empty() => {
            Err(IamError::invalid_argument("redirect_uri", "required"))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::azid::ApplicationId;

    fn web_client() -> Application {
        Application::new(ApplicationId::from_primitive(0x3000_0001), "Web", "s3cret")
            .with_redirect_uris(vec!["https://app.example.net/callback".to_string()])
    }

    #[test]
    fn test_redirect_uri_must_be_registered() {
        let client = web_client();
        assert!(check_redirect_uri(&client, Some("https://app.example.net/callback")).is_ok());
        assert!(check_redirect_uri(&client, Some("https://evil.example.net/")).is_err());
        assert!(check_redirect_uri(&client, None).is_err());
        assert!(check_redirect_uri(&client, Some("")).is_err());
    }

    #[test]
    fn test_redirect_uri_optional_without_registration() {
        let client = Application::new(ApplicationId::from_primitive(0x3000_0002), "CLI", "s");
        assert!(check_redirect_uri(&client, None).is_ok());
        assert!(check_redirect_uri(&client, Some("https://app.example.net/")).is_err());
    }

    #[test]
    fn test_code_terminal_parse() {
        assert!(parse_code_terminal("").is_err());
        assert!(parse_code_terminal("KAp02c0000z8").is_err());
    }
}
