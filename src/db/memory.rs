//! In-process account and group storage.
//!
//! One [`MemoryDb`] backs both repository traits so that account creation and
//! group attachment can share a single write lock.

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    error::{DbError, DbResult},
    repos::{AccountRepo, GroupRepo},
};
use crate::models::{CreateGroup, CreatePrincipal, Group, Principal, normalize_email};

struct Membership {
    group_id: Uuid,
    principal_id: Uuid,
}

#[derive(Default)]
struct Tables {
    principals: Vec<Principal>,
    groups: Vec<Group>,
    /// Insertion order is membership order.
    memberships: Vec<Membership>,
}

impl Tables {
    fn insert_principal(&mut self, input: CreatePrincipal) -> DbResult<Principal> {
        let email = normalize_email(&input.email);
        if self.find_principal(&email).is_some() {
            return Err(DbError::Conflict(format!(
                "Principal with email '{}' already exists",
                email
            )));
        }

        let now = Utc::now();
        let principal = Principal {
            id: Uuid::new_v4(),
            email,
            first_name: input.first_name,
            last_name: input.last_name,
            account_type: input.account_type,
            enabled: input.enabled,
            password_hash: input.password_hash,
            created_at: now,
            updated_at: now,
        };
        self.principals.push(principal.clone());
        Ok(principal)
    }

    fn find_principal(&self, email: &str) -> Option<&Principal> {
        let email = normalize_email(email);
        self.principals.iter().find(|p| p.email == email)
    }

    fn attach(&mut self, principal_id: Uuid, group_id: Uuid) -> DbResult<()> {
        if !self.principals.iter().any(|p| p.id == principal_id) {
            return Err(DbError::NotFound);
        }
        if !self.groups.iter().any(|g| g.id == group_id) {
            return Err(DbError::NotFound);
        }
        let exists = self
            .memberships
            .iter()
            .any(|m| m.group_id == group_id && m.principal_id == principal_id);
        if !exists {
            self.memberships.push(Membership {
                group_id,
                principal_id,
            });
        }
        Ok(())
    }

    fn groups_of(&self, principal_id: Uuid) -> Vec<Group> {
        self.memberships
            .iter()
            .filter(|m| m.principal_id == principal_id)
            .filter_map(|m| self.groups.iter().find(|g| g.id == m.group_id).cloned())
            .collect()
    }
}

/// In-memory implementation of [`AccountRepo`] and [`GroupRepo`].
#[derive(Default)]
pub struct MemoryDb {
    tables: RwLock<Tables>,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountRepo for MemoryDb {
    async fn find_by_email(&self, email: &str) -> DbResult<Option<Principal>> {
        let tables = self.tables.read().await;
        Ok(tables.find_principal(email).cloned())
    }

    async fn create(&self, input: CreatePrincipal) -> DbResult<Principal> {
        self.tables.write().await.insert_principal(input)
    }

    async fn save(&self, principal: &Principal) -> DbResult<Principal> {
        let mut tables = self.tables.write().await;
        let stored = tables
            .principals
            .iter_mut()
            .find(|p| p.id == principal.id)
            .ok_or(DbError::NotFound)?;

        stored.first_name = principal.first_name.clone();
        stored.last_name = principal.last_name.clone();
        stored.enabled = principal.enabled;
        stored.password_hash = principal.password_hash.clone();
        stored.updated_at = Utc::now();
        Ok(stored.clone())
    }

    async fn create_with_group(
        &self,
        input: CreatePrincipal,
        group_id: Uuid,
    ) -> DbResult<Principal> {
        let mut tables = self.tables.write().await;
        if !tables.groups.iter().any(|g| g.id == group_id) {
            return Err(DbError::NotFound);
        }
        let principal = tables.insert_principal(input)?;
        tables.attach(principal.id, group_id)?;
        Ok(principal)
    }

    async fn attach_to_group(&self, principal_id: Uuid, group_id: Uuid) -> DbResult<()> {
        self.tables.write().await.attach(principal_id, group_id)
    }
}

#[async_trait]
impl GroupRepo for MemoryDb {
    async fn get_by_id(&self, id: Uuid) -> DbResult<Option<Group>> {
        let tables = self.tables.read().await;
        Ok(tables.groups.iter().find(|g| g.id == id).cloned())
    }

    async fn get_by_name(&self, name: &str) -> DbResult<Option<Group>> {
        let tables = self.tables.read().await;
        Ok(tables.groups.iter().find(|g| g.name == name).cloned())
    }

    async fn find_by_member_email(&self, email: &str) -> DbResult<Option<Group>> {
        let tables = self.tables.read().await;
        let Some(principal) = tables.find_principal(email) else {
            return Ok(None);
        };
        Ok(tables.groups_of(principal.id).into_iter().next())
    }

    async fn list_for_principal(&self, principal_id: Uuid) -> DbResult<Vec<Group>> {
        Ok(self.tables.read().await.groups_of(principal_id))
    }

    async fn create(&self, input: CreateGroup) -> DbResult<Group> {
        let mut tables = self.tables.write().await;
        if tables.groups.iter().any(|g| g.name == input.name) {
            return Err(DbError::Conflict(format!(
                "Group '{}' already exists",
                input.name
            )));
        }
        let group = Group {
            id: Uuid::new_v4(),
            name: input.name,
            created_at: Utc::now(),
        };
        tables.groups.push(group.clone());
        Ok(group)
    }
}
