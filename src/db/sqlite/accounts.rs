use async_trait::async_trait;
use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::common::{PRINCIPAL_COLUMNS, principal_from_row};
use crate::{
    db::{
        error::{DbError, DbResult},
        repos::AccountRepo,
    },
    models::{CreatePrincipal, Principal, normalize_email},
};

pub struct SqliteAccountRepo {
    pool: SqlitePool,
}

impl SqliteAccountRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn insert(conn: &mut SqliteConnection, input: CreatePrincipal) -> DbResult<Principal> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let email = normalize_email(&input.email);

        sqlx::query(
            r#"
            INSERT INTO principals (id, email, first_name, last_name, account_type, enabled, password_hash, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(&email)
        .bind(&input.first_name)
        .bind(&input.last_name)
        .bind(input.account_type.as_str())
        .bind(input.enabled)
        .bind(&input.password_hash)
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => DbError::Conflict(
                format!("Principal with email '{}' already exists", email),
            ),
            _ => DbError::from(e),
        })?;

        Ok(Principal {
            id,
            email,
            first_name: input.first_name,
            last_name: input.last_name,
            account_type: input.account_type,
            enabled: input.enabled,
            password_hash: input.password_hash,
            created_at: now,
            updated_at: now,
        })
    }

    async fn attach(conn: &mut SqliteConnection, principal_id: Uuid, group_id: Uuid) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO group_members (group_id, principal_id, created_at)
            VALUES (?, ?, ?)
            ON CONFLICT (group_id, principal_id) DO NOTHING
            "#,
        )
        .bind(group_id.to_string())
        .bind(principal_id.to_string())
        .bind(Utc::now())
        .execute(&mut *conn)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation() => {
                DbError::NotFound
            }
            _ => DbError::from(e),
        })?;
        Ok(())
    }

    async fn ensure_group_exists(conn: &mut SqliteConnection, group_id: Uuid) -> DbResult<()> {
        let exists: Option<(String,)> = sqlx::query_as("SELECT id FROM groups WHERE id = ?")
            .bind(group_id.to_string())
            .fetch_optional(&mut *conn)
            .await?;
        exists.map(|_| ()).ok_or(DbError::NotFound)
    }
}

#[async_trait]
impl AccountRepo for SqliteAccountRepo {
    async fn find_by_email(&self, email: &str) -> DbResult<Option<Principal>> {
        let query = format!("SELECT {PRINCIPAL_COLUMNS} FROM principals WHERE email = ?");
        let row = sqlx::query(&query)
            .bind(normalize_email(email))
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(principal_from_row).transpose()
    }

    async fn create(&self, input: CreatePrincipal) -> DbResult<Principal> {
        let mut conn = self.pool.acquire().await?;
        Self::insert(&mut *conn, input).await
    }

    async fn save(&self, principal: &Principal) -> DbResult<Principal> {
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE principals
            SET first_name = ?, last_name = ?, enabled = ?, password_hash = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&principal.first_name)
        .bind(&principal.last_name)
        .bind(principal.enabled)
        .bind(&principal.password_hash)
        .bind(now)
        .bind(principal.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }

        Ok(Principal {
            updated_at: now,
            ..principal.clone()
        })
    }

    async fn create_with_group(
        &self,
        input: CreatePrincipal,
        group_id: Uuid,
    ) -> DbResult<Principal> {
        let mut tx = self.pool.begin().await?;

        Self::ensure_group_exists(&mut *tx, group_id).await?;
        let principal = Self::insert(&mut *tx, input).await?;
        Self::attach(&mut *tx, principal.id, group_id).await?;

        tx.commit().await?;
        Ok(principal)
    }

    async fn attach_to_group(&self, principal_id: Uuid, group_id: Uuid) -> DbResult<()> {
        let mut conn = self.pool.acquire().await?;
        let exists: Option<(String,)> = sqlx::query_as("SELECT id FROM principals WHERE id = ?")
            .bind(principal_id.to_string())
            .fetch_optional(&mut *conn)
            .await?;
        if exists.is_none() {
            return Err(DbError::NotFound);
        }
        Self::ensure_group_exists(&mut *conn, group_id).await?;
        Self::attach(&mut *conn, principal_id, group_id).await
    }
}
