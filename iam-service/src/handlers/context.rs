//! Extractors turning HTTP request parts into engine inputs.

use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts},
    http::{header, request::Parts, HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
};
use axum_extra::headers::{
    authorization::{Basic, Bearer},
    Authorization as AuthorizationHeader, HeaderMapExt,
};
use service_core::error::AppError;
use std::net::SocketAddr;

use crate::azid::ApplicationId;
use crate::models::{parse_accept_language, Application, Authorization, CallContext};
use crate::services::IamError;
use crate::AppState;

/// The call context of a request: bearer session, origin and languages.
///
/// A request without a bearer token is anonymous; a bearer token that fails
/// validation is rejected.
pub struct RequestContext(pub CallContext);

#[async_trait]
impl FromRequestParts<AppState> for RequestContext {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let authorization = match bearer_token(&parts.headers) {
            Some(token) => state.core.authorization_from_access_token(&token)?,
            None => Authorization::anonymous(),
        };

        let mut ctx = CallContext::new(authorization);
        if let Some(origin) = origin_address(parts) {
            ctx = ctx.with_origin(origin);
        }
        if let Some(languages) = parts
            .headers
            .get(header::ACCEPT_LANGUAGE)
            .and_then(|v| v.to_str().ok())
        {
            ctx = ctx.with_accept_language(parse_accept_language(languages));
        }
        Ok(RequestContext(ctx))
    }
}

/// Client application authenticated with HTTP Basic credentials.
pub struct AuthenticatedClient(pub Application);

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedClient {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let realm = state.core.realm_name();
        let Some((client_id, secret)) = basic_credentials(&parts.headers) else {
            return Err(basic_challenge(realm, "client authentication required"));
        };
        let Ok(application_id) = client_id.parse::<ApplicationId>() else {
            return Err(basic_challenge(realm, "client authentication failed"));
        };

        match state
            .core
            .authenticate_client(application_id, Some(secret.as_str()))
            .await
        {
            Ok(application) => Ok(AuthenticatedClient(application)),
            Err(IamError::AuthorizationInvalid) => {
                Err(basic_challenge(realm, "client authentication failed"))
            }
            Err(e) => Err(AppError::from(e).into_response()),
        }
    }
}

pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .typed_get::<AuthorizationHeader<Bearer>>()
        .map(|auth| auth.token().to_string())
}

/// Client id and secret from an `Authorization: Basic` header.
pub fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    headers
        .typed_get::<AuthorizationHeader<Basic>>()
        .map(|auth| (auth.username().to_string(), auth.password().to_string()))
}

/// A 401 carrying a `WWW-Authenticate: Basic` challenge for the realm.
pub fn basic_challenge(realm: &str, reason: &'static str) -> Response {
    let realm = if realm.is_empty() { "Restricted" } else { realm };
    let mut response = AppError::Unauthorized(anyhow::anyhow!(reason)).into_response();
    if let Ok(value) = HeaderValue::from_str(&format!("Basic realm=\"{realm}\"")) {
        response.headers_mut().insert(header::WWW_AUTHENTICATE, value);
    }
    response
}

/// First `x-forwarded-for` hop, else the peer address.
fn origin_address(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| {
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_basic_credentials() {
        let mut headers = HeaderMap::new();
        // "KAp02c0000z8:s3cret"
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Basic S0FwMDJjMDAwMHo4OnMzY3JldA=="),
        );
        assert_eq!(
            basic_credentials(&headers),
            Some(("KAp02c0000z8".to_string(), "s3cret".to_string()))
        );
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn test_bearer_token() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer abc.def.ghi"),
        );
        assert_eq!(bearer_token(&headers).as_deref(), Some("abc.def.ghi"));
        assert_eq!(basic_credentials(&headers), None);
    }

    #[test]
    fn test_basic_challenge_names_realm() {
        let response = basic_challenge("Kadisoka", "client authentication required");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response
                .headers()
                .get(header::WWW_AUTHENTICATE)
                .and_then(|v| v.to_str().ok()),
            Some("Basic realm=\"Kadisoka\"")
        );
    }
}
