use axum::{extract::State, Json};
use serde_json::{json, Value};
use service_core::error::AppError;

use crate::AppState;

/// Service health check
///
/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    if let Some(db) = &state.database {
        db.health_check().await.map_err(|e| {
            tracing::error!(error = %e, "Database health check failed");
            AppError::ServiceUnavailable
        })?;
    }

    Ok(Json(json!({
        "status": "healthy",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "realm": state.core.realm_name(),
    })))
}
