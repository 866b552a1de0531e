//! PostgreSQL implementation of the store traits.
//!
//! Every state transition is one conditional statement; the outcome is read
//! from `rows_affected`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgArguments, PgPool, PgRow};
use sqlx::query::Query;
use sqlx::{FromRow, Postgres, Row};

use super::store::{
    ApplicationStore, KeyContactStore, SessionStore, StoreError, TerminalStore, UserStore,
    VerificationStore,
};
use crate::azid::{ApplicationId, AzidText, TerminalId, TerminalIdNum, UserId};
use crate::models::{
    Actor, Application, Contact, ContactOwner, EmailAddress, NewTerminal, NewVerification,
    PhoneNumber, SessionRecord, TerminalRecord, UserRecord, VerificationRecord, VerificationType,
};

/// PostgreSQL database wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database wrapper from a connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Health check - ping the database.
    pub async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await.map_err(|e| {
            tracing::error!("Database health check failed: {}", e);
            StoreError::from(e)
        })?;
        Ok(())
    }
}

fn actor_user(actor: &Actor) -> Option<i64> {
    actor.user_id.map(UserId::primitive)
}

fn actor_terminal(actor: &Actor) -> Option<i64> {
    actor.terminal_id.map(TerminalIdNum::primitive)
}

fn actor_from(user_id: Option<i64>, terminal_id: Option<i64>) -> Actor {
    Actor {
        user_id: user_id.map(UserId::from_primitive),
        terminal_id: terminal_id.map(TerminalIdNum::from_primitive),
    }
}

// ==================== Application Operations ====================

#[derive(Debug, FromRow)]
struct ApplicationRow {
    application_id: i32,
    display_name_text: String,
    secret_text: String,
    platform_type_code: Option<String>,
    required_scopes: Vec<String>,
    redirect_uris: Vec<String>,
    created_utc: DateTime<Utc>,
    deleted_utc: Option<DateTime<Utc>>,
}

impl From<ApplicationRow> for Application {
    fn from(row: ApplicationRow) -> Self {
        Application {
            id: ApplicationId::from_primitive(row.application_id),
            display_name: row.display_name_text,
            secret: row.secret_text,
            platform_type: row.platform_type_code,
            required_scopes: row.required_scopes,
            oauth2_redirect_uris: row.redirect_uris,
            created_utc: row.created_utc,
            deleted_utc: row.deleted_utc,
        }
    }
}

#[async_trait]
impl ApplicationStore for Database {
    async fn find_application(&self, id: ApplicationId) -> Result<Option<Application>, StoreError> {
        let row = sqlx::query_as::<_, ApplicationRow>(
            "SELECT * FROM applications WHERE application_id = $1",
        )
        .bind(id.primitive())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Application::from))
    }

    async fn insert_application(&self, application: &Application) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO applications (application_id, display_name_text, secret_text, platform_type_code, required_scopes, redirect_uris, created_utc, deleted_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(application.id.primitive())
        .bind(&application.display_name)
        .bind(&application.secret)
        .bind(&application.platform_type)
        .bind(&application.required_scopes)
        .bind(&application.oauth2_redirect_uris)
        .bind(application.created_utc)
        .bind(application.deleted_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// ==================== User Operations ====================

#[derive(Debug, FromRow)]
struct UserRow {
    user_id: i64,
    created_utc: DateTime<Utc>,
    deleted_utc: Option<DateTime<Utc>>,
}

#[async_trait]
impl UserStore for Database {
    async fn insert_user(
        &self,
        id: UserId,
        created_utc: DateTime<Utc>,
        created_by: Actor,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO users (user_id, created_utc, created_by_user_id, created_by_terminal_id)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(id.primitive())
        .bind(created_utc)
        .bind(actor_user(&created_by))
        .bind(actor_terminal(&created_by))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_user(&self, id: UserId) -> Result<Option<UserRecord>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT user_id, created_utc, deleted_utc FROM users WHERE user_id = $1",
        )
        .bind(id.primitive())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| UserRecord {
            id: UserId::from_primitive(r.user_id),
            created_utc: r.created_utc,
            deleted_utc: r.deleted_utc,
        }))
    }

    async fn set_password_hash(
        &self,
        id: UserId,
        password_hash: &str,
        updated_utc: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO user_passwords (user_id, password_hash_text, updated_utc)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id) DO UPDATE
            SET password_hash_text = EXCLUDED.password_hash_text, updated_utc = EXCLUDED.updated_utc
            "#,
        )
        .bind(id.primitive())
        .bind(password_hash)
        .bind(updated_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_password_hash(&self, id: UserId) -> Result<Option<String>, StoreError> {
        let hash = sqlx::query_scalar::<_, String>(
            "SELECT password_hash_text FROM user_passwords WHERE user_id = $1",
        )
        .bind(id.primitive())
        .fetch_optional(&self.pool)
        .await?;
        Ok(hash)
    }
}

// ==================== Terminal Operations ====================

#[derive(Debug, FromRow)]
struct TerminalRow {
    terminal_id: i64,
    application_id: i32,
    user_id: Option<i64>,
    secret_text: String,
    display_name_text: String,
    accept_language_text: String,
    verification_type_code: String,
    verification_id: i64,
    verified_utc: Option<DateTime<Utc>>,
    created_utc: DateTime<Utc>,
    created_by_user_id: Option<i64>,
    created_by_terminal_id: Option<i64>,
    created_origin_text: Option<String>,
    deleted_utc: Option<DateTime<Utc>>,
    deleted_by_user_id: Option<i64>,
    deleted_by_terminal_id: Option<i64>,
}

impl TryFrom<TerminalRow> for TerminalRecord {
    type Error = StoreError;

    fn try_from(row: TerminalRow) -> Result<Self, Self::Error> {
        let verification_type: VerificationType = row
            .verification_type_code
            .parse()
            .map_err(|e: String| StoreError::Database(anyhow::anyhow!(e)))?;
        let accept_language = row
            .accept_language_text
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        Ok(TerminalRecord {
            id: TerminalId::new(
                ApplicationId::from_primitive(row.application_id),
                row.user_id.map(UserId::from_primitive).unwrap_or(UserId::ZERO),
                TerminalIdNum::from_primitive(row.terminal_id),
            ),
            secret: row.secret_text,
            display_name: row.display_name_text,
            accept_language,
            verification_type,
            verification_id: row.verification_id,
            verified_utc: row.verified_utc,
            created_utc: row.created_utc,
            created_by: actor_from(row.created_by_user_id, row.created_by_terminal_id),
            created_origin: row.created_origin_text,
            deleted_utc: row.deleted_utc,
            deleted_by: row
                .deleted_utc
                .map(|_| actor_from(row.deleted_by_user_id, row.deleted_by_terminal_id)),
        })
    }
}

#[async_trait]
impl TerminalStore for Database {
    async fn insert_terminal(&self, terminal: &NewTerminal) -> Result<(), StoreError> {
        let user = terminal.id.user();
        sqlx::query(
            r#"
            INSERT INTO terminals (terminal_id, application_id, user_id, secret_text, display_name_text, accept_language_text,
                verification_type_code, verification_id, verified_utc,
                created_utc, created_by_user_id, created_by_terminal_id, created_origin_text)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(terminal.id.id_num().primitive())
        .bind(terminal.id.application().primitive())
        .bind((!user.is_zero()).then(|| user.primitive()))
        .bind(&terminal.secret)
        .bind(&terminal.display_name)
        .bind(terminal.accept_language.join(","))
        .bind(terminal.verification_type.as_str())
        .bind(terminal.verification_id)
        .bind(terminal.verified_utc)
        .bind(terminal.created_utc)
        .bind(actor_user(&terminal.created_by))
        .bind(actor_terminal(&terminal.created_by))
        .bind(&terminal.created_origin)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_terminal(
        &self,
        id_num: TerminalIdNum,
    ) -> Result<Option<TerminalRecord>, StoreError> {
        let row = sqlx::query_as::<_, TerminalRow>("SELECT * FROM terminals WHERE terminal_id = $1")
            .bind(id_num.primitive())
            .fetch_optional(&self.pool)
            .await?;
        row.map(TerminalRecord::try_from).transpose()
    }

    async fn set_terminal_verified(
        &self,
        id_num: TerminalIdNum,
        secret: &str,
        verified_utc: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE terminals SET secret_text = $1, verified_utc = $2
            WHERE terminal_id = $3 AND verified_utc IS NULL
            "#,
        )
        .bind(secret)
        .bind(verified_utc)
        .bind(id_num.primitive())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_terminal(
        &self,
        id_num: TerminalIdNum,
        deleted_utc: DateTime<Utc>,
        deleted_by: Actor,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE terminals SET deleted_utc = $1, deleted_by_user_id = $2, deleted_by_terminal_id = $3
            WHERE terminal_id = $4 AND deleted_utc IS NULL
            "#,
        )
        .bind(deleted_utc)
        .bind(actor_user(&deleted_by))
        .bind(actor_terminal(&deleted_by))
        .bind(id_num.primitive())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

// ==================== Session Operations ====================

#[async_trait]
impl SessionStore for Database {
    async fn insert_session(&self, session: &SessionRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO sessions (terminal_id, session_id, issued_utc, expiry_utc, created_by_user_id, created_by_terminal_id, created_origin_text)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(session.id.terminal().id_num().primitive())
        .bind(session.id.id_num().primitive())
        .bind(session.issued_utc)
        .bind(session.expiry_utc)
        .bind(actor_user(&session.created_by))
        .bind(actor_terminal(&session.created_by))
        .bind(&session.created_origin)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// ==================== Contact Operations ====================

/// Table layout of a contact kind.
trait PgContact: Contact + Sized {
    const KEY_TABLE: &'static str;
    const VERIFICATION_TABLE: &'static str;
    /// The two columns holding the contact value.
    const COLUMNS: [&'static str; 2];

    /// Binds the contact value as the next two parameters.
    fn bind_contact<'q>(
        &'q self,
        query: Query<'q, Postgres, PgArguments>,
    ) -> Query<'q, Postgres, PgArguments>;

    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error>;
}

impl PgContact for PhoneNumber {
    const KEY_TABLE: &'static str = "user_phone_numbers";
    const VERIFICATION_TABLE: &'static str = "phone_number_verifications";
    const COLUMNS: [&'static str; 2] = ["country_code", "national_number"];

    fn bind_contact<'q>(
        &'q self,
        query: Query<'q, Postgres, PgArguments>,
    ) -> Query<'q, Postgres, PgArguments> {
        query.bind(self.country_code()).bind(self.national_number())
    }

    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(PhoneNumber::new(
            row.try_get("country_code")?,
            row.try_get("national_number")?,
        ))
    }
}

impl PgContact for EmailAddress {
    const KEY_TABLE: &'static str = "user_email_addresses";
    const VERIFICATION_TABLE: &'static str = "email_address_verifications";
    const COLUMNS: [&'static str; 2] = ["local_part", "domain_part"];

    fn bind_contact<'q>(
        &'q self,
        query: Query<'q, Postgres, PgArguments>,
    ) -> Query<'q, Postgres, PgArguments> {
        query.bind(self.local_part()).bind(self.domain_part())
    }

    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        let local: String = row.try_get("local_part")?;
        let domain: String = row.try_get("domain_part")?;
        Ok(EmailAddress::new(local, domain))
    }
}

/// `a = $1 AND b = $2`
fn contact_predicate<C: PgContact>() -> String {
    format!("{} = $1 AND {} = $2", C::COLUMNS[0], C::COLUMNS[1])
}

#[async_trait]
impl<C: PgContact> KeyContactStore<C> for Database {
    async fn find_owner(&self, contact: &C) -> Result<Option<ContactOwner>, StoreError> {
        let sql = format!(
            "SELECT user_id, verified_utc IS NOT NULL AS verified FROM {} \
             WHERE {} AND deleted_utc IS NULL ORDER BY created_utc DESC LIMIT 1",
            C::KEY_TABLE,
            contact_predicate::<C>()
        );
        let row = contact
            .bind_contact(sqlx::query(&sql))
            .fetch_optional(&self.pool)
            .await?;
        Ok(match row {
            Some(r) => Some(ContactOwner {
                user_id: UserId::from_primitive(r.try_get("user_id")?),
                verified: r.try_get("verified")?,
            }),
            None => None,
        })
    }

    async fn find_verified_owner(&self, contact: &C) -> Result<Option<UserId>, StoreError> {
        let sql = format!(
            "SELECT user_id FROM {} \
             WHERE {} AND deleted_utc IS NULL AND verified_utc IS NOT NULL LIMIT 1",
            C::KEY_TABLE,
            contact_predicate::<C>()
        );
        let row = contact
            .bind_contact(sqlx::query(&sql))
            .fetch_optional(&self.pool)
            .await?;
        Ok(match row {
            Some(r) => Some(UserId::from_primitive(r.try_get("user_id")?)),
            None => None,
        })
    }

    async fn claim(
        &self,
        user_id: UserId,
        contact: &C,
        created_utc: DateTime<Utc>,
        created_by: Actor,
    ) -> Result<bool, StoreError> {
        let [c1, c2] = C::COLUMNS;
        let sql = format!(
            "INSERT INTO {table} ({c1}, {c2}, user_id, created_utc, created_by_user_id, created_by_terminal_id) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (user_id, {c1}, {c2}) WHERE deleted_utc IS NULL DO NOTHING",
            table = C::KEY_TABLE,
        );
        let result = contact
            .bind_contact(sqlx::query(&sql))
            .bind(user_id.primitive())
            .bind(created_utc)
            .bind(actor_user(&created_by))
            .bind(actor_terminal(&created_by))
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 1 {
            return Ok(false);
        }

        let sql = format!(
            "SELECT verified_utc IS NOT NULL AS verified FROM {} \
             WHERE {} AND user_id = $3 AND deleted_utc IS NULL",
            C::KEY_TABLE,
            contact_predicate::<C>()
        );
        let row = contact
            .bind_contact(sqlx::query(&sql))
            .bind(user_id.primitive())
            .fetch_optional(&self.pool)
            .await?;
        Ok(match row {
            Some(r) => r.try_get("verified")?,
            None => false,
        })
    }

    async fn set_verified(
        &self,
        user_id: UserId,
        contact: &C,
        verification_id: i64,
        verified_utc: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let sql = format!(
            "UPDATE {} SET verified_utc = $3, verification_id = $4 \
             WHERE {} AND user_id = $5 AND deleted_utc IS NULL AND verified_utc IS NULL",
            C::KEY_TABLE,
            contact_predicate::<C>()
        );
        let result = contact
            .bind_contact(sqlx::query(&sql))
            .bind(verified_utc)
            .bind(verification_id)
            .bind(user_id.primitive())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }
}

// ==================== Verification Operations ====================

#[derive(Debug, FromRow)]
struct VerificationRow {
    verification_id: i64,
    code_hash_text: String,
    code_expiry_utc: DateTime<Utc>,
    attempts_remaining: i16,
    created_utc: DateTime<Utc>,
    confirmed_utc: Option<DateTime<Utc>>,
}

impl From<VerificationRow> for VerificationRecord {
    fn from(row: VerificationRow) -> Self {
        VerificationRecord {
            id: row.verification_id,
            code_hash: row.code_hash_text,
            code_expiry_utc: row.code_expiry_utc,
            attempts_remaining: row.attempts_remaining,
            created_utc: row.created_utc,
            confirmed_utc: row.confirmed_utc,
        }
    }
}

const VERIFICATION_COLUMNS: &str =
    "verification_id, code_hash_text, code_expiry_utc, attempts_remaining, created_utc, confirmed_utc";

fn verification_from_row(row: Option<PgRow>) -> Result<Option<VerificationRecord>, StoreError> {
    Ok(match row {
        Some(r) => Some(VerificationRow::from_row(&r)?.into()),
        None => None,
    })
}

#[async_trait]
impl<C: PgContact> VerificationStore<C> for Database {
    async fn find_latest_unconfirmed(
        &self,
        contact: &C,
    ) -> Result<Option<VerificationRecord>, StoreError> {
        let sql = format!(
            "SELECT {VERIFICATION_COLUMNS} FROM {} \
             WHERE {} AND confirmed_utc IS NULL ORDER BY verification_id DESC LIMIT 1",
            C::VERIFICATION_TABLE,
            contact_predicate::<C>()
        );
        let row = contact
            .bind_contact(sqlx::query(&sql))
            .fetch_optional(&self.pool)
            .await?;
        verification_from_row(row)
    }

    async fn insert_verification(
        &self,
        verification: &NewVerification<C>,
    ) -> Result<i64, StoreError> {
        let [c1, c2] = C::COLUMNS;
        let sql = format!(
            "INSERT INTO {table} ({c1}, {c2}, code_hash_text, code_expiry_utc, attempts_remaining, \
             created_utc, created_by_user_id, created_by_terminal_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING verification_id",
            table = C::VERIFICATION_TABLE,
        );
        let row = verification
            .contact
            .bind_contact(sqlx::query(&sql))
            .bind(&verification.code_hash)
            .bind(verification.code_expiry_utc)
            .bind(verification.attempts_remaining)
            .bind(verification.created_utc)
            .bind(actor_user(&verification.created_by))
            .bind(actor_terminal(&verification.created_by))
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("verification_id")?)
    }

    async fn consume_attempt(&self, id: i64) -> Result<Option<VerificationRecord>, StoreError> {
        let sql = format!(
            "UPDATE {} SET attempts_remaining = attempts_remaining - 1 \
             WHERE verification_id = $1 RETURNING {VERIFICATION_COLUMNS}",
            C::VERIFICATION_TABLE
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        verification_from_row(row)
    }

    async fn set_confirmed(
        &self,
        id: i64,
        confirmed_utc: DateTime<Utc>,
        confirmed_by: Actor,
    ) -> Result<bool, StoreError> {
        let sql = format!(
            "UPDATE {} SET confirmed_utc = $1, confirmed_by_user_id = $2, confirmed_by_terminal_id = $3 \
             WHERE verification_id = $4 AND confirmed_utc IS NULL",
            C::VERIFICATION_TABLE
        );
        let result = sqlx::query(&sql)
            .bind(confirmed_utc)
            .bind(actor_user(&confirmed_by))
            .bind(actor_terminal(&confirmed_by))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn find_contact(&self, id: i64) -> Result<Option<C>, StoreError> {
        let [c1, c2] = C::COLUMNS;
        let sql = format!(
            "SELECT {c1}, {c2} FROM {} WHERE verification_id = $1",
            C::VERIFICATION_TABLE
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(match row {
            Some(r) => Some(C::from_row(&r)?),
            None => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contact_predicates() {
        assert_eq!(
            contact_predicate::<PhoneNumber>(),
            "country_code = $1 AND national_number = $2"
        );
        assert_eq!(
            contact_predicate::<EmailAddress>(),
            "local_part = $1 AND domain_part = $2"
        );
    }

    #[tokio::test]
    #[ignore] // Requires running PostgreSQL
    async fn test_terminal_verification_is_conditional() -> Result<(), anyhow::Error> {
        let url = std::env::var("DATABASE_URL")?;
        let pool = PgPool::connect(&url).await?;
        crate::db::run_migrations(&pool).await?;
        let db = Database::new(pool);

        let id = TerminalId::new(
            ApplicationId::from_primitive(0x0100_0001),
            UserId::ZERO,
            TerminalIdNum::generate(),
        );
        db.insert_terminal(&NewTerminal {
            id,
            secret: String::new(),
            display_name: String::new(),
            accept_language: vec!["en-US".to_string()],
            verification_type: VerificationType::PhoneNumber,
            verification_id: 0,
            verified_utc: None,
            created_utc: Utc::now(),
            created_by: Actor::default(),
            created_origin: None,
        })
        .await?;

        assert!(db.set_terminal_verified(id.id_num(), "s1", Utc::now()).await?);
        assert!(!db.set_terminal_verified(id.id_num(), "s2", Utc::now()).await?);
        let stored = db.find_terminal(id.id_num()).await?;
        assert_eq!(stored.map(|t| t.secret), Some("s1".to_string()));
        Ok(())
    }
}
