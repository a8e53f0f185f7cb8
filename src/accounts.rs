//! Account lookup, creation and password updates for the two account kinds.
//!
//! Users and sellers live in separate tables with the same core columns;
//! sellers additionally carry `phone_number` and `country`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use tokio::sync::RwLock;
use tracing::{Instrument, info_span};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::otp::OtpTemplate;

pub type DirectoryFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    User,
    Seller,
}

impl AccountKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Seller => "seller",
        }
    }

    #[must_use]
    pub const fn activation_template(self) -> OtpTemplate {
        match self {
            Self::User => OtpTemplate::UserActivation,
            Self::Seller => OtpTemplate::SellerActivation,
        }
    }

    #[must_use]
    pub const fn reset_template(self) -> OtpTemplate {
        match self {
            Self::User => OtpTemplate::UserPasswordReset,
            Self::Seller => OtpTemplate::SellerPasswordReset,
        }
    }

    /// Sellers must also provide a phone number and a country.
    #[must_use]
    pub const fn requires_contact_details(self) -> bool {
        matches!(self, Self::Seller)
    }

    /// Capitalized kind for user-facing messages.
    #[must_use]
    pub const fn title(self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Seller => "Seller",
        }
    }

    const fn table(self) -> &'static str {
        match self {
            Self::User => "users",
            Self::Seller => "sellers",
        }
    }
}

impl std::fmt::Display for AccountKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Account {
    pub id: Uuid,
    pub name: String,
    pub email: String,
}

/// Result of an insert; a duplicate email is not an infrastructure failure.
#[derive(Debug)]
pub enum CreateOutcome {
    Created(Account),
    Conflict,
}

pub struct NewAccount {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub phone_number: Option<String>,
    pub country: Option<String>,
}

impl std::fmt::Debug for NewAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewAccount")
            .field("name", &self.name)
            .field("email", &self.email)
            .field("password_hash", &"***")
            .field("phone_number", &self.phone_number)
            .field("country", &self.country)
            .finish()
    }
}

/// Persistent account storage, keyed by kind and normalized email.
pub trait AccountDirectory: Send + Sync {
    fn find_by_email<'a>(
        &'a self,
        kind: AccountKind,
        email: &'a str,
    ) -> DirectoryFuture<'a, Option<Account>>;

    fn create(&self, kind: AccountKind, account: NewAccount) -> DirectoryFuture<'_, CreateOutcome>;

    /// Stored password hash (PHC string) of an account.
    fn password_hash<'a>(
        &'a self,
        kind: AccountKind,
        email: &'a str,
    ) -> DirectoryFuture<'a, Option<String>>;

    /// Replace the password hash. Returns `false` when no account matched.
    fn update_password<'a>(
        &'a self,
        kind: AccountKind,
        email: &'a str,
        password_hash: &'a str,
    ) -> DirectoryFuture<'a, bool>;

    /// Round-trip to the backend, used by `/health`.
    fn ping(&self) -> DirectoryFuture<'_, ()>;
}

/// Postgres-backed directory (`users` and `sellers` tables).
#[derive(Clone, Debug)]
pub struct PgAccountDirectory {
    pool: PgPool,
}

impl PgAccountDirectory {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl AccountDirectory for PgAccountDirectory {
    fn find_by_email<'a>(
        &'a self,
        kind: AccountKind,
        email: &'a str,
    ) -> DirectoryFuture<'a, Option<Account>> {
        Box::pin(async move {
            let query = format!("SELECT id, name, email FROM {} WHERE email = $1", kind.table());
            let span = info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "SELECT",
                db.statement = query.as_str()
            );
            let row = sqlx::query(&query)
                .bind(email)
                .fetch_optional(&self.pool)
                .instrument(span)
                .await
                .with_context(|| format!("failed to lookup {kind} account"))?;

            Ok(row.map(|row| Account {
                id: row.get("id"),
                name: row.get("name"),
                email: row.get("email"),
            }))
        })
    }

    fn create(&self, kind: AccountKind, account: NewAccount) -> DirectoryFuture<'_, CreateOutcome> {
        Box::pin(async move {
            let query = match kind {
                AccountKind::User => {
                    r"
                    INSERT INTO users (name, email, password_hash)
                    VALUES ($1, $2, $3)
                    RETURNING id, name, email
                    "
                }
                AccountKind::Seller => {
                    r"
                    INSERT INTO sellers (name, email, password_hash, phone_number, country)
                    VALUES ($1, $2, $3, $4, $5)
                    RETURNING id, name, email
                    "
                }
            };
            let span = info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "INSERT",
                db.statement = query
            );

            let mut statement = sqlx::query(query)
                .bind(&account.name)
                .bind(&account.email)
                .bind(&account.password_hash);
            if kind.requires_contact_details() {
                statement = statement.bind(&account.phone_number).bind(&account.country);
            }

            let row = match statement.fetch_one(&self.pool).instrument(span).await {
                Ok(row) => row,
                Err(err) if is_unique_violation(&err) => return Ok(CreateOutcome::Conflict),
                Err(err) => {
                    return Err(err).with_context(|| format!("failed to insert {kind} account"));
                }
            };

            Ok(CreateOutcome::Created(Account {
                id: row.get("id"),
                name: row.get("name"),
                email: row.get("email"),
            }))
        })
    }

    fn password_hash<'a>(
        &'a self,
        kind: AccountKind,
        email: &'a str,
    ) -> DirectoryFuture<'a, Option<String>> {
        Box::pin(async move {
            let query = format!("SELECT password_hash FROM {} WHERE email = $1", kind.table());
            let span = info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "SELECT",
                db.statement = query.as_str()
            );
            let hash: Option<String> = sqlx::query_scalar(&query)
                .bind(email)
                .fetch_optional(&self.pool)
                .instrument(span)
                .await
                .with_context(|| format!("failed to read {kind} password hash"))?;
            Ok(hash)
        })
    }

    fn update_password<'a>(
        &'a self,
        kind: AccountKind,
        email: &'a str,
        password_hash: &'a str,
    ) -> DirectoryFuture<'a, bool> {
        Box::pin(async move {
            let query = format!(
                "UPDATE {} SET password_hash = $1 WHERE email = $2",
                kind.table()
            );
            let span = info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "UPDATE",
                db.statement = query.as_str()
            );
            let result = sqlx::query(&query)
                .bind(password_hash)
                .bind(email)
                .execute(&self.pool)
                .instrument(span)
                .await
                .with_context(|| format!("failed to update {kind} password"))?;
            Ok(result.rows_affected() > 0)
        })
    }

    fn ping(&self) -> DirectoryFuture<'_, ()> {
        Box::pin(async move {
            let span = info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
            sqlx::query("SELECT 1")
                .execute(&self.pool)
                .instrument(span)
                .await
                .context("failed to ping database")?;
            Ok(())
        })
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

#[derive(Debug)]
struct StoredAccount {
    account: Account,
    password_hash: String,
}

/// In-process directory for tests and local runs without Postgres.
#[derive(Debug, Default)]
pub struct MemoryAccountDirectory {
    accounts: RwLock<HashMap<(AccountKind, String), StoredAccount>>,
}

impl MemoryAccountDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an account directly, bypassing registration. It has no usable
    /// password hash.
    pub async fn insert(&self, kind: AccountKind, name: &str, email: &str) -> Account {
        self.insert_with_password(kind, name, email, "").await
    }

    /// Insert an account with a given password hash, bypassing registration.
    pub async fn insert_with_password(
        &self,
        kind: AccountKind,
        name: &str,
        email: &str,
        password_hash: &str,
    ) -> Account {
        let account = Account {
            id: Uuid::new_v4(),
            name: name.to_string(),
            email: email.to_string(),
        };
        self.accounts.write().await.insert(
            (kind, email.to_string()),
            StoredAccount {
                account: account.clone(),
                password_hash: password_hash.to_string(),
            },
        );
        account
    }
}

impl AccountDirectory for MemoryAccountDirectory {
    fn find_by_email<'a>(
        &'a self,
        kind: AccountKind,
        email: &'a str,
    ) -> DirectoryFuture<'a, Option<Account>> {
        Box::pin(async move {
            let accounts = self.accounts.read().await;
            Ok(accounts
                .get(&(kind, email.to_string()))
                .map(|stored| stored.account.clone()))
        })
    }

    fn create(&self, kind: AccountKind, account: NewAccount) -> DirectoryFuture<'_, CreateOutcome> {
        Box::pin(async move {
            let mut accounts = self.accounts.write().await;
            let key = (kind, account.email.clone());
            if accounts.contains_key(&key) {
                return Ok(CreateOutcome::Conflict);
            }
            let created = Account {
                id: Uuid::new_v4(),
                name: account.name,
                email: account.email,
            };
            accounts.insert(
                key,
                StoredAccount {
                    account: created.clone(),
                    password_hash: account.password_hash,
                },
            );
            Ok(CreateOutcome::Created(created))
        })
    }

    fn password_hash<'a>(
        &'a self,
        kind: AccountKind,
        email: &'a str,
    ) -> DirectoryFuture<'a, Option<String>> {
        Box::pin(async move {
            let accounts = self.accounts.read().await;
            Ok(accounts
                .get(&(kind, email.to_string()))
                .map(|stored| stored.password_hash.clone()))
        })
    }

    fn update_password<'a>(
        &'a self,
        kind: AccountKind,
        email: &'a str,
        password_hash: &'a str,
    ) -> DirectoryFuture<'a, bool> {
        Box::pin(async move {
            let mut accounts = self.accounts.write().await;
            match accounts.get_mut(&(kind, email.to_string())) {
                Some(stored) => {
                    stored.password_hash = password_hash.to_string();
                    Ok(true)
                }
                None => Ok(false),
            }
        })
    }

    fn ping(&self) -> DirectoryFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_selects_templates() {
        assert_eq!(
            AccountKind::User.activation_template(),
            OtpTemplate::UserActivation
        );
        assert_eq!(
            AccountKind::Seller.reset_template(),
            OtpTemplate::SellerPasswordReset
        );
        assert!(AccountKind::Seller.requires_contact_details());
        assert!(!AccountKind::User.requires_contact_details());
    }

    #[test]
    fn kind_deserializes_lowercase() -> Result<()> {
        let kind: AccountKind = serde_json::from_str("\"seller\"")?;
        assert_eq!(kind, AccountKind::Seller);
        assert!(serde_json::from_str::<AccountKind>("\"admin\"").is_err());
        assert_eq!(AccountKind::User.to_string(), "user");
        Ok(())
    }

    #[tokio::test]
    async fn memory_directory_separates_kinds() -> Result<()> {
        let directory = MemoryAccountDirectory::new();
        directory
            .insert(AccountKind::User, "Alice", "alice@example.com")
            .await;

        assert!(
            directory
                .find_by_email(AccountKind::User, "alice@example.com")
                .await?
                .is_some()
        );
        assert!(
            directory
                .find_by_email(AccountKind::Seller, "alice@example.com")
                .await?
                .is_none()
        );
        Ok(())
    }

    #[tokio::test]
    async fn memory_directory_rejects_duplicates() -> Result<()> {
        let directory = MemoryAccountDirectory::new();
        let new_account = || NewAccount {
            name: "Bob".to_string(),
            email: "bob@example.com".to_string(),
            password_hash: "hash".to_string(),
            phone_number: Some("+44 20 7946 0000".to_string()),
            country: Some("GB".to_string()),
        };

        let created = directory.create(AccountKind::Seller, new_account()).await?;
        assert!(
            matches!(created, CreateOutcome::Created(ref account) if account.email == "bob@example.com")
        );
        assert!(matches!(
            directory.create(AccountKind::Seller, new_account()).await?,
            CreateOutcome::Conflict
        ));
        Ok(())
    }

    #[tokio::test]
    async fn memory_directory_updates_password_per_kind() -> Result<()> {
        let directory = MemoryAccountDirectory::new();
        directory
            .insert_with_password(AccountKind::User, "Alice", "alice@example.com", "old")
            .await;

        assert!(
            directory
                .update_password(AccountKind::User, "alice@example.com", "new")
                .await?
        );
        assert_eq!(
            directory
                .password_hash(AccountKind::User, "alice@example.com")
                .await?
                .as_deref(),
            Some("new")
        );
        assert!(
            !directory
                .update_password(AccountKind::Seller, "alice@example.com", "new")
                .await?
        );
        assert_eq!(
            directory
                .password_hash(AccountKind::Seller, "alice@example.com")
                .await?,
            None
        );
        Ok(())
    }

    #[test]
    fn new_account_debug_redacts_hash() {
        let account = NewAccount {
            name: "Bob".to_string(),
            email: "bob@example.com".to_string(),
            password_hash: "$argon2id$secret".to_string(),
            phone_number: None,
            country: None,
        };
        assert!(!format!("{account:?}").contains("argon2id"));
    }
}
