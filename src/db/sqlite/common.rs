use sqlx::{Row, sqlite::SqliteRow};
use uuid::Uuid;

use crate::{
    db::error::{DbError, DbResult},
    models::{AccountType, Group, Principal},
};

/// Parse a UUID string from the database, returning a DbError on failure
pub fn parse_uuid(s: &str) -> DbResult<Uuid> {
    Uuid::parse_str(s).map_err(|e| DbError::Internal(format!("Invalid UUID in database: {}", e)))
}

pub const PRINCIPAL_COLUMNS: &str =
    "id, email, first_name, last_name, account_type, enabled, password_hash, created_at, updated_at";

pub fn principal_from_row(row: &SqliteRow) -> DbResult<Principal> {
    let account_type: String = row.get("account_type");
    Ok(Principal {
        id: parse_uuid(&row.get::<String, _>("id"))?,
        email: row.get("email"),
        first_name: row.get("first_name"),
        last_name: row.get("last_name"),
        account_type: AccountType::from_str(&account_type).ok_or_else(|| {
            DbError::Internal(format!("Invalid account_type in database: {account_type}"))
        })?,
        enabled: row.get("enabled"),
        password_hash: row.get("password_hash"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

pub fn group_from_row(row: &SqliteRow) -> DbResult<Group> {
    Ok(Group {
        id: parse_uuid(&row.get::<String, _>("id"))?,
        name: row.get("name"),
        created_at: row.get("created_at"),
    })
}
