//! Terminal registration, confirmation and revocation.

use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use validator::Validate;

use super::context::{AuthenticatedClient, RequestContext};
use crate::azid::{AzidText, TerminalId};
use crate::models::{EmailAddress, PhoneNumber, VerificationType};
use crate::services::{IamError, VerificationMethod};
use crate::AppState;

// ============================================================================
// Request/Response DTOs
// ============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct TerminalRegisterRequest {
    /// A phone number complete with country code, or an email address.
    #[validate(length(min = 1, max = 254))]
    pub verification_resource_name: String,
    /// `phone-number` or `email-address`; detected from the name when absent.
    pub verification_resource_type: Option<String>,
    #[serde(default)]
    pub verification_methods: Vec<String>,
    #[serde(default)]
    #[validate(length(max = 255))]
    pub display_name: String,
}

#[derive(Debug, Serialize)]
pub struct TerminalRegisterResponse {
    pub terminal_id: String,
    pub code_expiry: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct TerminalConfirmRequest {
    #[validate(length(min = 1))]
    pub terminal_id: String,
    #[validate(length(min = 1, max = 16))]
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct TerminalConfirmResponse {
    pub terminal_id: String,
    pub terminal_secret: String,
    pub user_id: String,
}

enum ResourceName {
    Phone(PhoneNumber),
    Email(EmailAddress),
}

fn resolve_resource(req: &TerminalRegisterRequest) -> Result<ResourceName, IamError> {
    let name = req.verification_resource_name.as_str();
    let requested = match req.verification_resource_type.as_deref() {
        None | Some("") => None,
        Some(kind) => Some(
            kind.parse::<VerificationType>()
                .map_err(|e| IamError::invalid_argument("verification_resource_type", e))?,
        ),
    };

    match requested {
        Some(VerificationType::PhoneNumber) => name
            .parse()
            .map(ResourceName::Phone)
            .map_err(|e| IamError::invalid_argument("verification_resource_name", e.to_string())),
        Some(VerificationType::EmailAddress) => name
            .parse()
            .map(ResourceName::Email)
            .map_err(|e| IamError::invalid_argument("verification_resource_name", e.to_string())),
        Some(other) => Err(IamError::invalid_argument(
            "verification_resource_type",
            format!("{other} cannot be registered directly"),
        )),
        None => {
            if let Ok(email) = name.parse::<EmailAddress>() {
                return Ok(ResourceName::Email(email));
            }
            name.parse::<PhoneNumber>()
                .map(ResourceName::Phone)
                .map_err(|_| {
                    IamError::invalid_argument(
                        "verification_resource_name",
                        "neither a phone number nor an email address",
                    )
                })
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Start authorizing a new terminal with a phone or email challenge.
///
/// POST /terminals/register
#[tracing::instrument(skip_all, fields(application_id = %client.id))]
pub async fn register(
    State(state): State<AppState>,
    AuthenticatedClient(client): AuthenticatedClient,
    RequestContext(ctx): RequestContext,
    Json(req): Json<TerminalRegisterRequest>,
) -> Result<(StatusCode, Json<TerminalRegisterResponse>), AppError> {
    req.validate()?;

    if !client.id.is_user_agent_public() {
        tracing::warn!("Client category may not register terminals by contact");
        return Err(IamError::UnauthorizedClient.into());
    }

    let methods: Vec<VerificationMethod> = req
        .verification_methods
        .iter()
        .map(|m| VerificationMethod::parse(m))
        .filter(|m| *m != VerificationMethod::Unspecified)
        .collect();

    let started = match resolve_resource(&req)? {
        ResourceName::Phone(phone) => {
            state
                .core
                .start_authorization_by_phone(&ctx, client.id, &phone, &req.display_name, &methods)
                .await?
        }
        ResourceName::Email(email) => {
            state
                .core
                .start_authorization_by_email(&ctx, client.id, &email, &req.display_name, &methods)
                .await?
        }
    };

    Ok((
        StatusCode::CREATED,
        Json(TerminalRegisterResponse {
            terminal_id: started.terminal_id.azid_text(),
            code_expiry: started.code_expiry_utc,
        }),
    ))
}

/// Confirm a terminal with its verification code and receive its secret.
///
/// POST /terminals/confirm
#[tracing::instrument(skip_all, fields(application_id = %client.id))]
pub async fn confirm(
    State(state): State<AppState>,
    AuthenticatedClient(client): AuthenticatedClient,
    RequestContext(ctx): RequestContext,
    Json(req): Json<TerminalConfirmRequest>,
) -> Result<Json<TerminalConfirmResponse>, AppError> {
    req.validate()?;

    let terminal_id: TerminalId = req
        .terminal_id
        .parse()
        .map_err(|_| IamError::invalid_argument("terminal_id", "malformed"))?;
    if terminal_id.application() != client.id {
        return Err(IamError::OperationNotAllowed.into());
    }

    let confirmed = state
        .core
        .confirm_contact_authorization(&ctx, terminal_id, &req.code)
        .await?;

    Ok(Json(TerminalConfirmResponse {
        terminal_id: confirmed.terminal_id.azid_text(),
        terminal_secret: confirmed.secret,
        user_id: confirmed.user_id.azid_text(),
    }))
}

/// Revoke the terminal of the calling session. Repeating is harmless.
///
/// DELETE /terminals/self
#[tracing::instrument(skip_all)]
pub async fn delete_self(
    State(state): State<AppState>,
    RequestContext(ctx): RequestContext,
) -> Result<StatusCode, AppError> {
    let terminal_id = ctx.authorization.terminal_id();
    state.core.delete_terminal(&ctx, terminal_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(name: &str, kind: Option<&str>) -> TerminalRegisterRequest {
        TerminalRegisterRequest {
            verification_resource_name: name.to_string(),
            verification_resource_type: kind.map(str::to_string),
            verification_methods: Vec::new(),
            display_name: String::new(),
        }
    }

    #[test]
    fn test_resource_detection() {
        assert!(matches!(
            resolve_resource(&request("alice@example.com", None)),
            Ok(ResourceName::Email(_))
        ));
        assert!(matches!(
            resolve_resource(&request("+1 555-0100", None)),
            Ok(ResourceName::Phone(_))
        ));
        assert!(resolve_resource(&request("not a contact", None)).is_err());
    }

    #[test]
    fn test_explicit_type_must_match() {
        assert!(resolve_resource(&request("alice@example.com", Some("phone-number"))).is_err());
        assert!(matches!(
            resolve_resource(&request("+62 812 3456 789", Some("phone-number"))),
            Ok(ResourceName::Phone(_))
        ));
        assert!(resolve_resource(&request("+62 812 3456 789", Some("oauth2-password"))).is_err());
    }
}
