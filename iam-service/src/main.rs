use iam_service::{
    build_router,
    config::{IamConfig, StoreBackend},
    db,
    models::ApplicationSeed,
    services::{
        verification::{
            smtp::SmtpEmailDelivery, twilio::TwilioSmsDelivery, DeliveryRegistry,
            EmailCodeDispatcher, NullDelivery, PhoneCodeDispatcher,
        },
        Database, EngineSettings, IamCore, JwtService, MemoryStore, Stores, Verifier,
        VerifierConfig,
    },
    AppState,
};
use service_core::error::AppError;
use service_core::observability::init_tracing;
use std::{net::SocketAddr, sync::Arc};
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Load configuration - fail fast if invalid
    let config = IamConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        realm = %config.realm_name,
        "Starting IAM service"
    );

    let (stores, database) = match config.store {
        StoreBackend::Postgres => {
            let pool = db::create_pool(&config.database).await?;
            db::run_migrations(&pool).await?;
            let database = Database::new(pool);
            (Stores::from_backend(Arc::new(database.clone())), Some(database))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using the in-memory store; state is lost on restart");
            (Stores::from_backend(Arc::new(MemoryStore::new())), None)
        }
    };

    let deliveries = delivery_registry(&config)?;
    let phone_dispatcher = PhoneCodeDispatcher::new(
        config.realm_name.clone(),
        config.phone_verification.sms_retriever_app_hash.clone(),
        deliveries
            .text_routes(&config.phone_verification.sms_delivery_service)
            .map_err(|e| AppError::ConfigError(e.into()))?,
    );
    let email_dispatcher = EmailCodeDispatcher::new(
        config.realm_name.clone(),
        deliveries
            .html_routes(&config.email_verification.email_delivery_service)
            .map_err(|e| AppError::ConfigError(e.into()))?,
    );

    let phone_verifier = Verifier::new(
        stores.phone_verifications.clone(),
        Arc::new(phone_dispatcher),
        VerifierConfig {
            code_ttl: chrono::Duration::minutes(config.phone_verification.code_ttl_minutes),
            confirmation_attempts: config.phone_verification.confirmation_attempts,
        },
    );
    let email_verifier = Verifier::new(
        stores.email_verifications.clone(),
        Arc::new(email_dispatcher),
        VerifierConfig {
            code_ttl: chrono::Duration::minutes(config.email_verification.code_ttl_minutes),
            confirmation_attempts: config.email_verification.confirmation_attempts,
        },
    );

    let signer = if config.jwt.private_key_path.is_empty() {
        None
    } else {
        Some(JwtService::new(&config.jwt, config.realm_name.clone()).map_err(AppError::ConfigError)?)
    };

    let core = IamCore::new(
        stores,
        phone_verifier,
        email_verifier,
        signer,
        EngineSettings {
            realm_name: config.realm_name.clone(),
            session_ttl: chrono::Duration::minutes(config.jwt.access_token_ttl_minutes),
        },
    );

    if let Some(path) = &config.applications_file {
        let seeds = read_application_seeds(path)?;
        let added = core.seed_applications(seeds).await?;
        tracing::info!(path = %path, added, "Application registry seeded");
    }

    let state = AppState::new(Arc::new(core), database, &config.rate_limit);
    let app = build_router(state);

    let addr = config.common.bind_address()?;

    let service_span = tracing::info_span!(
        "service",
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
    );
    let _guard = service_span.enter();

    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Service shutdown complete");
    Ok(())
}

/// Delivery channels named by the routing strings: `null` always, `twilio`
/// and `smtp` when configured.
fn delivery_registry(config: &IamConfig) -> Result<DeliveryRegistry, AppError> {
    let mut registry = DeliveryRegistry::new();
    registry.register_text("null", Arc::new(NullDelivery));
    registry.register_html("null", Arc::new(NullDelivery));

    if let Some(twilio) = &config.twilio {
        let delivery =
            TwilioSmsDelivery::new(twilio.clone()).map_err(|e| AppError::ConfigError(e.into()))?;
        registry.register_text("twilio", Arc::new(delivery));
        tracing::info!("Twilio SMS delivery configured");
    }
    if let Some(smtp) = &config.smtp {
        let delivery = SmtpEmailDelivery::new(smtp).map_err(|e| AppError::ConfigError(e.into()))?;
        registry.register_html("smtp", Arc::new(delivery));
        tracing::info!("SMTP email delivery configured");
    }
    Ok(registry)
}

fn read_application_seeds(path: &str) -> Result<Vec<ApplicationSeed>, AppError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        AppError::ConfigError(anyhow::anyhow!("Failed to read applications file {path}: {e}"))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        AppError::ConfigError(anyhow::anyhow!("Invalid applications file {path}: {e}"))
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
