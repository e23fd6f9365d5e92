use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    db::error::DbResult,
    models::{CreateGroup, Group},
};

#[async_trait]
pub trait GroupRepo: Send + Sync {
    async fn get_by_id(&self, id: Uuid) -> DbResult<Option<Group>>;

    async fn get_by_name(&self, name: &str) -> DbResult<Option<Group>>;

    /// First group (in membership order) of the principal with this email.
    async fn find_by_member_email(&self, email: &str) -> DbResult<Option<Group>>;

    /// All groups of a principal, oldest membership first.
    async fn list_for_principal(&self, principal_id: Uuid) -> DbResult<Vec<Group>>;

    /// Create a group. Fails with `Conflict` if the name is taken.
    async fn create(&self, input: CreateGroup) -> DbResult<Group>;

    /// Resolve a group reference that is either a UUID or a name.
    async fn get_by_id_or_name(&self, key: &str) -> DbResult<Option<Group>> {
        if let Ok(id) = Uuid::parse_str(key)
            && let Some(group) = self.get_by_id(id).await?
        {
            return Ok(Some(group));
        }
        self.get_by_name(key).await
    }
}
