use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::common::group_from_row;
use crate::{
    db::{
        error::{DbError, DbResult},
        repos::GroupRepo,
    },
    models::{CreateGroup, Group, normalize_email},
};

pub struct SqliteGroupRepo {
    pool: SqlitePool,
}

impl SqliteGroupRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GroupRepo for SqliteGroupRepo {
    async fn get_by_id(&self, id: Uuid) -> DbResult<Option<Group>> {
        let row = sqlx::query("SELECT id, name, created_at FROM groups WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(group_from_row).transpose()
    }

    async fn get_by_name(&self, name: &str) -> DbResult<Option<Group>> {
        let row = sqlx::query("SELECT id, name, created_at FROM groups WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(group_from_row).transpose()
    }

    async fn find_by_member_email(&self, email: &str) -> DbResult<Option<Group>> {
        let row = sqlx::query(
            r#"
            SELECT g.id, g.name, g.created_at
            FROM groups g
            INNER JOIN group_members gm ON gm.group_id = g.id
            INNER JOIN principals p ON p.id = gm.principal_id
            WHERE p.email = ?
            ORDER BY gm.rowid ASC
            LIMIT 1
            "#,
        )
        .bind(normalize_email(email))
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(group_from_row).transpose()
    }

    async fn list_for_principal(&self, principal_id: Uuid) -> DbResult<Vec<Group>> {
        let rows = sqlx::query(
            r#"
            SELECT g.id, g.name, g.created_at
            FROM groups g
            INNER JOIN group_members gm ON gm.group_id = g.id
            WHERE gm.principal_id = ?
            ORDER BY gm.rowid ASC
            "#,
        )
        .bind(principal_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(group_from_row).collect()
    }

    async fn create(&self, input: CreateGroup) -> DbResult<Group> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        sqlx::query("INSERT INTO groups (id, name, created_at) VALUES (?, ?, ?)")
            .bind(id.to_string())
            .bind(&input.name)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                    DbError::Conflict(format!("Group '{}' already exists", input.name))
                }
                _ => DbError::from(e),
            })?;

        Ok(Group {
            id,
            name: input.name,
            created_at: now,
        })
    }
}
