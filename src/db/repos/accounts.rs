use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    db::error::DbResult,
    models::{CreatePrincipal, Principal},
};

#[async_trait]
pub trait AccountRepo: Send + Sync {
    /// Look up a principal by email (exact match).
    async fn find_by_email(&self, email: &str) -> DbResult<Option<Principal>>;

    /// Create a principal. Fails with `Conflict` if the email is taken.
    async fn create(&self, input: CreatePrincipal) -> DbResult<Principal>;

    /// Persist names, enabled flag and password hash of an existing principal.
    /// Returns the stored row with a fresh `updated_at`.
    async fn save(&self, principal: &Principal) -> DbResult<Principal>;

    /// Create a principal and attach it to a group in one transaction.
    /// Neither write is visible if either fails.
    async fn create_with_group(
        &self,
        input: CreatePrincipal,
        group_id: Uuid,
    ) -> DbResult<Principal>;

    /// Add a membership. Attaching twice is a no-op.
    async fn attach_to_group(&self, principal_id: Uuid, group_id: Uuid) -> DbResult<()>;
}
