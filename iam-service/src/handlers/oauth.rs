//! OAuth2 token and authorization endpoints.
//!
//! Errors on these routes follow RFC 6749 section 5.2 instead of the
//! service-wide `AppError` body.

use axum::{
    extract::State,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Redirect, Response},
    Form, Json,
};
use serde::{Deserialize, Serialize};

use super::context::{basic_credentials, RequestContext};
use crate::azid::ApplicationId;
use crate::models::Application;
use crate::services::{GrantRequest, IamError};
use crate::AppState;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Serialize)]
struct OAuthErrorBody {
    error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_description: Option<String>,
}

/// An RFC 6749 error response.
#[derive(Debug)]
pub struct OAuthError {
    status: StatusCode,
    code: &'static str,
    description: Option<String>,
}

impl OAuthError {
    fn new(status: StatusCode, code: &'static str, description: impl Into<String>) -> Self {
        Self {
            status,
            code,
            description: Some(description.into()),
        }
    }

    pub fn invalid_request(description: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_request", description)
    }

    pub fn invalid_client() -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            code: "invalid_client",
            description: None,
        }
    }

    pub fn unsupported_grant_type(grant_type: &str) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            "unsupported_grant_type",
            format!("grant type {grant_type:?} is not supported"),
        )
    }

    pub fn code(&self) -> &'static str {
        self.code
    }
}

impl From<IamError> for OAuthError {
    fn from(err: IamError) -> Self {
        match err {
            IamError::AuthorizationInvalid => OAuthError::invalid_client(),
            IamError::UnauthorizedClient => {
                OAuthError::new(StatusCode::BAD_REQUEST, "unauthorized_client", err.to_string())
            }
            IamError::InvalidCredentials
            | IamError::CodeMismatch
            | IamError::CodeExpired
            | IamError::AlreadyClaimed
            | IamError::Conflict(_) => {
                OAuthError::new(StatusCode::BAD_REQUEST, "invalid_grant", err.to_string())
            }
            IamError::InvalidArgument { field, .. }
                if matches!(
                    field,
                    "code" | "refresh_token" | "username" | "redirect_uri" | "terminal_id"
                ) =>
            {
                OAuthError::new(StatusCode::BAD_REQUEST, "invalid_grant", err.to_string())
            }
            IamError::InvalidArgument { .. } => OAuthError::invalid_request(err.to_string()),
            IamError::UserContextRequired | IamError::OperationNotAllowed => {
                OAuthError::new(StatusCode::FORBIDDEN, "access_denied", err.to_string())
            }
            IamError::RetryExhausted(_)
            | IamError::Configuration(_)
            | IamError::Delivery(_)
            | IamError::Store(_)
            | IamError::Internal(_) => {
                tracing::error!(error = %err, "OAuth request failed");
                OAuthError {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    code: "server_error",
                    description: None,
                }
            }
        }
    }
}

impl IntoResponse for OAuthError {
    fn into_response(self) -> Response {
        let body = OAuthErrorBody {
            error: self.code,
            error_description: self.description,
        };
        let mut response = (self.status, Json(body)).into_response();
        let headers = response.headers_mut();
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        if self.status == StatusCode::UNAUTHORIZED {
            headers.insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static("Basic realm=\"oauth\""),
            );
        }
        response
    }
}

// ============================================================================
// Request/Response DTOs
// ============================================================================

/// Form body of `POST /oauth/token`.
#[derive(Debug, Default, Deserialize)]
pub struct TokenRequestForm {
    #[serde(default)]
    pub grant_type: String,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub refresh_token: Option<String>,
}

/// Form body of `POST /oauth/authorize`.
#[derive(Debug, Deserialize)]
pub struct AuthorizeForm {
    #[serde(default)]
    pub response_type: String,
    #[serde(default)]
    pub client_id: String,
    pub redirect_uri: Option<String>,
    pub state: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AuthorizeResponse {
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

fn required(value: Option<String>, field: &str) -> Result<String, OAuthError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| OAuthError::invalid_request(format!("{field} is required")))
}

/// Maps the form onto a grant, validating the fields each grant needs.
pub fn grant_request(form: &TokenRequestForm) -> Result<GrantRequest, OAuthError> {
    match form.grant_type.as_str() {
        "client_credentials" => Ok(GrantRequest::ClientCredentials),
        "password" => Ok(GrantRequest::Password {
            username: required(form.username.clone(), "username")?,
            password: form.password.clone().unwrap_or_default(),
        }),
        "authorization_code" => Ok(GrantRequest::AuthorizationCode {
            code: required(form.code.clone(), "code")?,
            redirect_uri: form.redirect_uri.clone(),
            client_id: form.client_id.clone(),
        }),
        "refresh_token" => Ok(GrantRequest::RefreshToken {
            refresh_token: required(form.refresh_token.clone(), "refresh_token")?,
        }),
        "" => Err(OAuthError::invalid_request("grant_type is required")),
        other => Err(OAuthError::unsupported_grant_type(other)),
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Authenticates the client from Basic credentials, falling back to the
/// form's `client_id`/`client_secret`. A form `client_id` sent alongside
/// Basic credentials must name the same client.
async fn token_client(
    state: &AppState,
    headers: &axum::http::HeaderMap,
    form: &TokenRequestForm,
) -> Result<Application, OAuthError> {
    let form_client_id = form.client_id.as_deref().filter(|id| !id.is_empty());
    let (client_id, secret) = match basic_credentials(headers) {
        Some((id, secret)) => (id, Some(secret)),
        None => (
            form_client_id.unwrap_or_default().to_string(),
            form.client_secret.clone(),
        ),
    };
    let application_id: ApplicationId = client_id
        .parse()
        .map_err(|_| OAuthError::invalid_client())?;
    if let Some(form_client_id) = form_client_id {
        if form_client_id.parse::<ApplicationId>().ok() != Some(application_id) {
            tracing::warn!(
                client_id = %application_id,
                form_client_id,
                "client_id does not match the authenticated client"
            );
            return Err(OAuthError::invalid_client());
        }
    }
    Ok(state
        .core
        .authenticate_client(application_id, secret.as_deref())
        .await?)
}

/// Issue tokens.
///
/// POST /oauth/token
#[tracing::instrument(skip_all, fields(grant_type = %form.grant_type))]
pub async fn token(
    State(state): State<AppState>,
    RequestContext(ctx): RequestContext,
    headers: axum::http::HeaderMap,
    Form(form): Form<TokenRequestForm>,
) -> Result<Response, OAuthError> {
    let request = grant_request(&form)?;
    let client = token_client(&state, &headers, &form).await?;

    let tokens = state.core.grant_token(&ctx, &client, request).await?;

    Ok((
        [
            (header::CACHE_CONTROL, "no-store"),
            (header::PRAGMA, "no-cache"),
        ],
        Json(tokens),
    )
        .into_response())
}

/// Authorize a client on behalf of the signed-in user.
///
/// POST /oauth/authorize
#[tracing::instrument(skip_all, fields(client_id = %form.client_id))]
pub async fn authorize(
    State(state): State<AppState>,
    RequestContext(ctx): RequestContext,
    Form(form): Form<AuthorizeForm>,
) -> Result<Response, OAuthError> {
    if form.response_type != "code" {
        return Err(OAuthError::new(
            StatusCode::BAD_REQUEST,
            "unsupported_response_type",
            "only the code response type is supported",
        ));
    }
    let client_id: ApplicationId = form
        .client_id
        .parse()
        .map_err(|_| OAuthError::invalid_request("client_id is malformed"))?;
    let client = state
        .core
        .application_by_id(client_id)
        .await?
        .filter(|app| !app.is_deleted())
        .ok_or_else(|| OAuthError::invalid_request("client_id does not refer to a client"))?;

    let issued = state
        .core
        .authorize_client(
            &ctx,
            &client,
            form.redirect_uri.as_deref(),
            form.state.as_deref(),
        )
        .await?;

    Ok(match issued.redirect_uri {
        Some(uri) => Redirect::to(&uri).into_response(),
        None => Json(AuthorizeResponse {
            code: issued.code,
            state: form.state,
        })
        .into_response(),
    })
}
