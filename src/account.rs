use argon2::{
    Argon2, PasswordVerifier,
    password_hash::{PasswordHash, PasswordHasher, SaltString, rand_core::OsRng},
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use time::OffsetDateTime;
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::{
    error::{Error, Result},
    utils::now_utc,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Role {
    Student,
    Tutor,
    Admin,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Role::Student => "student",
            Role::Tutor => "tutor",
            Role::Admin => "admin",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AccountInfo {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub role: Role,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

fn validate_new_account(name: &str, email: &str, password: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::Validation("name must not be empty".to_string()));
    }
    if !email.contains('@') {
        return Err(Error::Validation(format!("invalid email: {email}")));
    }
    if password.chars().count() < 8 {
        return Err(Error::Validation(
            "password must be at least 8 characters".to_string(),
        ));
    }
    Ok(())
}

pub async fn create_account(
    database: &SqlitePool,
    name: String,
    email: String,
    password: String,
    role: Role,
) -> Result<i64> {
    validate_new_account(&name, &email, &password)?;
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?
        .to_string();
    let id = sqlx::query(
        "INSERT INTO account (name, email, password, role, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(name.trim())
    .bind(&email)
    .bind(password_hash)
    .bind(role)
    .bind(now_utc())
    .execute(database)
    .await?
    .last_insert_rowid();
    info!("created {} account {} <{}>", role, id, email);
    Ok(id)
}

pub async fn get_account(database: &SqlitePool, id: i64) -> Result<AccountInfo> {
    sqlx::query_as::<_, AccountInfo>(
        "SELECT id, name, email, role, created_at FROM account WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(database)
    .await?
    .ok_or_else(|| Error::NotFound(format!("account {id}")))
}

pub async fn list_accounts(database: &SqlitePool, role: Option<Role>) -> Result<Vec<AccountInfo>> {
    let accounts = sqlx::query_as::<_, AccountInfo>(
        "SELECT id, name, email, role, created_at FROM account \
         WHERE ?1 IS NULL OR role = ?1 ORDER BY id",
    )
    .bind(role)
    .fetch_all(database)
    .await?;
    Ok(accounts)
}

/// Fails with `Validation` unless the account exists and has `role`
pub async fn ensure_role(database: &SqlitePool, id: i64, role: Role) -> Result<()> {
    let account = get_account(database, id).await?;
    if account.role != role {
        return Err(Error::Validation(format!(
            "account {id} is a {}, expected a {role}",
            account.role
        )));
    }
    Ok(())
}

pub async fn login(database: &SqlitePool, email: String, password: String) -> Result<AccountInfo> {
    #[derive(sqlx::FromRow)]
    struct Credentials {
        id: i64,
        password: String,
    }
    let Some(credentials) =
        sqlx::query_as::<_, Credentials>("SELECT id, password FROM account WHERE email = ?")
            .bind(&email)
            .fetch_optional(database)
            .await?
    else {
        warn!("login attempt for unknown email {}", email);
        return Err(Error::Unauthorized);
    };
    let parsed_hash = PasswordHash::new(&credentials.password)
        .map_err(|e| anyhow::anyhow!("Failed to parse password hash: {}", e))?;
    if Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_err()
    {
        warn!("wrong password for account {}", credentials.id);
        return Err(Error::Unauthorized);
    }
    get_account(database, credentials.id).await
}

/// Create the admin named by `LMS_ADMIN_EMAIL` / `LMS_ADMIN_PASSWORD` if it does not exist yet
pub async fn bootstrap_admin(database: &SqlitePool) -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let (Ok(email), Ok(password)) = (
        dotenvy::var("LMS_ADMIN_EMAIL"),
        dotenvy::var("LMS_ADMIN_PASSWORD"),
    ) else {
        return Ok(());
    };
    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM account WHERE email = ?)")
        .bind(&email)
        .fetch_one(database)
        .await?;
    if exists {
        return Ok(());
    }
    create_account(database, "Administrator".to_string(), email, password, Role::Admin)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bootstrap admin: {}", e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::fixtures;

    #[tokio::test]
    async fn create_and_login() {
        let (_dir, database) = fixtures::database().await;
        let id = create_account(
            &database,
            "Ada".to_string(),
            "ada@example.com".to_string(),
            "correct horse".to_string(),
            Role::Tutor,
        )
        .await
        .unwrap();

        let account = login(
            &database,
            "ada@example.com".to_string(),
            "correct horse".to_string(),
        )
        .await
        .unwrap();
        assert_eq!(account.id, id);
        assert_eq!(account.role, Role::Tutor);

        let wrong = login(
            &database,
            "ada@example.com".to_string(),
            "battery staple".to_string(),
        )
        .await;
        assert!(matches!(wrong, Err(Error::Unauthorized)));
    }

    #[tokio::test]
    async fn duplicate_email_conflicts() {
        let (_dir, database) = fixtures::database().await;
        fixtures::account(&database, "bob@example.com", "student").await;
        let result = create_account(
            &database,
            "Bob".to_string(),
            "bob@example.com".to_string(),
            "password123".to_string(),
            Role::Student,
        )
        .await;
        assert!(matches!(result, Err(Error::Conflict(_))));
    }

    #[tokio::test]
    async fn rejects_short_password() {
        let (_dir, database) = fixtures::database().await;
        let result = create_account(
            &database,
            "Eve".to_string(),
            "eve@example.com".to_string(),
            "short".to_string(),
            Role::Student,
        )
        .await;
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn list_filters_by_role() {
        let (_dir, database) = fixtures::database().await;
        fixtures::account(&database, "s@example.com", "student").await;
        fixtures::account(&database, "t@example.com", "tutor").await;
        let tutors = list_accounts(&database, Some(Role::Tutor)).await.unwrap();
        assert_eq!(tutors.len(), 1);
        assert_eq!(tutors[0].email, "t@example.com");
        assert_eq!(list_accounts(&database, None).await.unwrap().len(), 2);
    }
}
