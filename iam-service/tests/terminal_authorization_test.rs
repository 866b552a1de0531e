mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::{anonymous_ctx, extract_code, TestApp, TestAppOptions, MOBILE_APP, SERVICE_APP};
use iam_service::azid::{AzidText, TerminalId, TerminalIdNum, UserId};
use iam_service::models::{
    Actor, CallContext, EmailAddress, NewTerminal, PhoneNumber, TerminalRecord, VerificationType,
};
use iam_service::services::store::{StoreError, TerminalStore, VerificationStore};
use iam_service::services::verification::{
    DeliveryRoutes, PhoneCodeDispatcher, ProviderError, SentMessage, TextMessageDelivery,
};
use iam_service::services::{
    IamError, MemoryStore, TerminalRegistration, VerificationMethod, Verifier, VerifierConfig,
};

const PHONE: &str = "+62 812 3456 7890";
const PHONE_TEXT: &str = "+6281234567890";

fn phone() -> PhoneNumber {
    PHONE.parse().unwrap()
}

#[tokio::test]
async fn test_phone_authorization_issues_secret_and_user() {
    let app = TestApp::spawn().await;
    let ctx = anonymous_ctx();

    let started = app
        .core
        .start_authorization_by_phone(&ctx, MOBILE_APP, &phone(), "Pixel 8", &[])
        .await
        .unwrap();

    let now = Utc::now();
    assert!(started.code_expiry_utc > now + Duration::minutes(4) - Duration::seconds(5));
    assert!(started.code_expiry_utc <= now + Duration::minutes(5));
    assert_eq!(started.terminal_id.application(), MOBILE_APP);
    assert!(started.terminal_id.user().is_statically_valid());

    let sms = app.sms.last_to(PHONE_TEXT).expect("SMS sent");
    assert!(sms.body.starts_with("<#> Kadisoka - verification code: "));
    let code = app.last_sms_code(PHONE_TEXT).unwrap();

    let confirmed = app
        .core
        .confirm_authorization(&anonymous_ctx(), started.terminal_id, &code)
        .await
        .unwrap();
    assert_eq!(confirmed.secret.len(), 22);
    assert_eq!(confirmed.user_id, started.terminal_id.user());

    let (authenticated, user_id) = app
        .core
        .authenticate_terminal(started.terminal_id, &confirmed.secret)
        .await
        .unwrap();
    assert!(authenticated);
    assert_eq!(user_id, confirmed.user_id);

    let (authenticated, _) = app
        .core
        .authenticate_terminal(started.terminal_id, "wrong-secret")
        .await
        .unwrap();
    assert!(!authenticated);
}

#[tokio::test]
async fn test_confirmation_replay_returns_same_secret() {
    let app = TestApp::spawn().await;
    let started = app
        .core
        .start_authorization_by_phone(&anonymous_ctx(), MOBILE_APP, &phone(), "", &[])
        .await
        .unwrap();
    let code = app.last_sms_code(PHONE_TEXT).unwrap();

    let first = app
        .core
        .confirm_authorization(&anonymous_ctx(), started.terminal_id, &code)
        .await
        .unwrap();
    let second = app
        .core
        .confirm_authorization(&anonymous_ctx(), started.terminal_id, &code)
        .await
        .unwrap();
    assert_eq!(first.secret, second.secret);
}

#[tokio::test]
async fn test_repeated_start_within_window_is_suppressed() {
    let app = TestApp::spawn().await;

    let first = app
        .core
        .start_authorization_by_phone(&anonymous_ctx(), MOBILE_APP, &phone(), "", &[])
        .await
        .unwrap();
    let second = app
        .core
        .start_authorization_by_phone(&anonymous_ctx(), MOBILE_APP, &phone(), "", &[])
        .await
        .unwrap();

    assert_eq!(first.verification_id, second.verification_id);
    assert_eq!(first.code_expiry_utc, second.code_expiry_utc);
    assert_eq!(first.terminal_id.user(), second.terminal_id.user());
    assert_ne!(first.terminal_id, second.terminal_id);
    assert_eq!(app.sms.send_count(), 1);
}

#[tokio::test]
async fn test_sole_none_method_skips_delivery() {
    let app = TestApp::spawn().await;

    app.core
        .start_authorization_by_phone(
            &anonymous_ctx(),
            MOBILE_APP,
            &phone(),
            "",
            &[VerificationMethod::None],
        )
        .await
        .unwrap();

    assert_eq!(app.sms.send_count(), 0);
}

#[tokio::test]
async fn test_test_contacts_never_reach_delivery() {
    let app = TestApp::spawn().await;
    let test_phone: PhoneNumber = "+1 555-0123".parse().unwrap();
    let test_email: EmailAddress = "bob@example.com".parse().unwrap();

    app.core
        .start_authorization_by_phone(&anonymous_ctx(), MOBILE_APP, &test_phone, "", &[])
        .await
        .unwrap();
    app.core
        .start_authorization_by_email(&anonymous_ctx(), MOBILE_APP, &test_email, "", &[])
        .await
        .unwrap();

    assert_eq!(app.sms.send_count(), 0);
    assert_eq!(app.email.send_count(), 0);
}

#[tokio::test]
async fn test_attempts_are_exhausted_after_five_confirmations() {
    let app = TestApp::spawn().await;
    let started = app
        .core
        .start_authorization_by_phone(&anonymous_ctx(), MOBILE_APP, &phone(), "", &[])
        .await
        .unwrap();
    let code = app.last_sms_code(PHONE_TEXT).unwrap();
    let wrong = if code == "000000" { "111111" } else { "000000" };

    for _ in 0..5 {
        let err = app
            .core
            .confirm_authorization(&anonymous_ctx(), started.terminal_id, wrong)
            .await
            .unwrap_err();
        assert!(matches!(err, IamError::CodeMismatch), "got {err:?}");
    }

    let err = app
        .core
        .confirm_authorization(&anonymous_ctx(), started.terminal_id, &code)
        .await
        .unwrap_err();
    assert!(matches!(err, IamError::CodeExpired), "got {err:?}");
}

#[tokio::test]
async fn test_expired_code_is_rejected() {
    let app = TestApp::spawn().await;
    let started = app
        .core
        .start_authorization_by_phone(&anonymous_ctx(), MOBILE_APP, &phone(), "", &[])
        .await
        .unwrap();
    let code = app.last_sms_code(PHONE_TEXT).unwrap();

    let mut late = anonymous_ctx();
    late.receive_time = Utc::now() + Duration::minutes(6);
    let err = app
        .core
        .confirm_authorization(&late, started.terminal_id, &code)
        .await
        .unwrap_err();
    assert!(matches!(err, IamError::CodeExpired), "got {err:?}");
}

#[tokio::test]
async fn test_email_authorization() {
    let app = TestApp::spawn().await;
    let email: EmailAddress = "alice@kadisoka.id".parse().unwrap();

    let started = app
        .core
        .start_authorization_by_email(&anonymous_ctx(), MOBILE_APP, &email, "Laptop", &[])
        .await
        .unwrap();
    let now = Utc::now();
    assert!(started.code_expiry_utc > now + Duration::minutes(14) - Duration::seconds(5));

    let message = app.email.last_to("alice@kadisoka.id").expect("email sent");
    assert!(message.subject.is_some());
    let code = app.last_email_code("alice@kadisoka.id").unwrap();

    let confirmed = app
        .core
        .confirm_authorization(&anonymous_ctx(), started.terminal_id, &code)
        .await
        .unwrap();
    assert_eq!(confirmed.user_id, started.terminal_id.user());

    let owner = app
        .core
        .user_by_login_identifier("alice@kadisoka.id")
        .await
        .unwrap();
    assert_eq!(owner, Some(confirmed.user_id));
}

#[tokio::test]
async fn test_returning_contact_signs_in_as_same_user() {
    let app = TestApp::spawn().await;

    let first = app.sign_in_by_phone(PHONE).await;
    let second = app.sign_in_by_phone(PHONE).await;

    assert_eq!(first.user_id, second.user_id);
    assert_ne!(first.terminal_id, second.terminal_id);
}

#[tokio::test]
async fn test_contact_of_another_user_conflicts() {
    let app = TestApp::spawn().await;
    app.sign_in_by_phone(PHONE).await;

    let other = app.sign_in_by_email("carol@kadisoka.id").await;
    let ctx = app.session_ctx(&other);

    let err = app
        .core
        .start_authorization_by_phone(&ctx, MOBILE_APP, &phone(), "", &[])
        .await
        .unwrap_err();
    assert!(matches!(err, IamError::Conflict(_)), "got {err:?}");
}

#[tokio::test]
async fn test_signed_in_user_adds_contact() {
    let app = TestApp::spawn().await;
    let tokens = app.sign_in_by_email("dave@kadisoka.id").await;
    let ctx = app.session_ctx(&tokens);

    let started = app
        .core
        .start_authorization_by_phone(&ctx, MOBILE_APP, &phone(), "", &[])
        .await
        .unwrap();
    assert_eq!(started.terminal_id.user().azid_text(), tokens.user_id);
}

#[tokio::test]
async fn test_forged_terminal_id_is_rejected() {
    let app = TestApp::spawn().await;
    let started = app
        .core
        .start_authorization_by_phone(&anonymous_ctx(), MOBILE_APP, &phone(), "", &[])
        .await
        .unwrap();
    let code = app.last_sms_code(PHONE_TEXT).unwrap();

    // Same id number under a different user
    let forged = TerminalId::new(
        started.terminal_id.application(),
        UserId::generate(false),
        started.terminal_id.id_num(),
    );
    let err = app
        .core
        .confirm_authorization(&anonymous_ctx(), forged, &code)
        .await
        .unwrap_err();
    assert!(
        matches!(err, IamError::InvalidArgument { field: "terminal_id", .. }),
        "got {err:?}"
    );
}

#[tokio::test]
async fn test_delete_terminal_is_idempotent() {
    let app = TestApp::spawn().await;
    let tokens = app.sign_in_by_phone(PHONE).await;
    let ctx = app.session_ctx(&tokens);
    let terminal_id: TerminalId = tokens.terminal_id.parse().unwrap();

    assert!(app.core.delete_terminal(&ctx, terminal_id).await.unwrap());
    assert!(!app.core.delete_terminal(&ctx, terminal_id).await.unwrap());

    let (authenticated, _) = app
        .core
        .authenticate_terminal(terminal_id, &tokens.terminal_secret)
        .await
        .unwrap();
    assert!(!authenticated);
}

#[tokio::test]
async fn test_delete_requires_own_session() {
    let app = TestApp::spawn().await;
    let mine = app.sign_in_by_phone(PHONE).await;
    let theirs = app.sign_in_by_email("erin@kadisoka.id").await;
    let their_terminal: TerminalId = theirs.terminal_id.parse().unwrap();

    let err = app
        .core
        .delete_terminal(&CallContext::anonymous(), their_terminal)
        .await
        .unwrap_err();
    assert!(matches!(err, IamError::AuthorizationInvalid));

    let err = app
        .core
        .delete_terminal(&app.session_ctx(&mine), their_terminal)
        .await
        .unwrap_err();
    assert!(matches!(err, IamError::OperationNotAllowed));
}

#[tokio::test]
async fn test_sessions_accumulate_per_terminal() {
    let app = TestApp::spawn().await;
    let tokens = app.sign_in_by_phone(PHONE).await;
    let terminal_id: TerminalId = tokens.terminal_id.parse().unwrap();

    app.core
        .issue_session(&anonymous_ctx(), terminal_id)
        .await
        .unwrap();

    assert_eq!(app.store.session_count(terminal_id.id_num()).await, 2);
}

#[tokio::test]
async fn test_service_terminal_rejects_user() {
    let app = TestApp::spawn().await;

    let err = app
        .core
        .register_terminal(
            &anonymous_ctx(),
            TerminalRegistration {
                application_id: SERVICE_APP,
                user_id: UserId::generate(false),
                display_name: String::new(),
                accept_language: Vec::new(),
                verification_type: VerificationType::OAuth2ClientCredentials,
                verification_id: 0,
            },
        )
        .await
        .unwrap_err();
    assert!(
        matches!(err, IamError::InvalidArgument { field: "user_id", .. }),
        "got {err:?}"
    );
}

/// Terminal store whose every insert collides with an existing id.
#[derive(Default)]
struct CollidingTerminals {
    inserts: AtomicUsize,
}

#[async_trait]
impl TerminalStore for CollidingTerminals {
    async fn insert_terminal(&self, _terminal: &NewTerminal) -> Result<(), StoreError> {
        self.inserts.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::UniqueViolation {
            constraint: "terminals_pkey".to_string(),
        })
    }

    async fn find_terminal(
        &self,
        _id_num: TerminalIdNum,
    ) -> Result<Option<TerminalRecord>, StoreError> {
        Ok(None)
    }

    async fn set_terminal_verified(
        &self,
        _id_num: TerminalIdNum,
        _secret: &str,
        _verified_utc: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        Ok(false)
    }

    async fn delete_terminal(
        &self,
        _id_num: TerminalIdNum,
        _deleted_utc: DateTime<Utc>,
        _deleted_by: Actor,
    ) -> Result<bool, StoreError> {
        Ok(false)
    }
}

#[tokio::test]
async fn test_terminal_id_collisions_exhaust_retries() {
    let terminals = Arc::new(CollidingTerminals::default());
    let app = TestApp::spawn_with(TestAppOptions {
        terminals: Some(terminals.clone() as Arc<dyn TerminalStore>),
        ..TestAppOptions::default()
    })
    .await;

    let err = app
        .core
        .start_authorization_by_phone(&anonymous_ctx(), MOBILE_APP, &phone(), "", &[])
        .await
        .unwrap_err();
    assert!(matches!(err, IamError::RetryExhausted(5)), "got {err:?}");
    assert_eq!(terminals.inserts.load(Ordering::SeqCst), 5);
}

/// Hands the message to a gateway that then reports a failure.
#[derive(Default)]
struct FailingSms {
    attempted: Mutex<Vec<SentMessage>>,
}

#[async_trait]
impl TextMessageDelivery for FailingSms {
    async fn send_text_message(
        &self,
        recipient: &PhoneNumber,
        body: &str,
    ) -> Result<(), ProviderError> {
        self.attempted.lock().unwrap().push(SentMessage {
            recipient: recipient.to_string(),
            subject: None,
            body: body.to_string(),
        });
        Err(ProviderError::Connection("gateway timeout".to_string()))
    }
}

#[tokio::test]
async fn test_code_stays_confirmable_after_delivery_failure() {
    let store = Arc::new(MemoryStore::new());
    let sms = Arc::new(FailingSms::default());
    let verifier = Verifier::new(
        store.clone() as Arc<dyn VerificationStore<PhoneNumber>>,
        Arc::new(PhoneCodeDispatcher::new(
            common::REALM,
            None,
            DeliveryRoutes::single(sms.clone() as Arc<dyn TextMessageDelivery>),
        )),
        VerifierConfig {
            code_ttl: Duration::minutes(5),
            confirmation_attempts: 5,
        },
    );
    let ctx = anonymous_ctx();

    let err = verifier
        .start_verification(&ctx, &phone(), None, &[], &[])
        .await
        .unwrap_err();
    assert!(matches!(err, IamError::Delivery(_)), "got {err:?}");

    let pending = <MemoryStore as VerificationStore<PhoneNumber>>::find_latest_unconfirmed(
        &store,
        &phone(),
    )
    .await
    .unwrap()
    .expect("verification row kept");
    let message = sms.attempted.lock().unwrap().last().cloned().unwrap();
    let code = extract_code(&message).unwrap();

    verifier
        .confirm_verification(&ctx, pending.id, &code)
        .await
        .unwrap();
}
