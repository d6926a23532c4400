use async_trait::async_trait;
use uuid::Uuid;

use super::manager::DatabaseError;
use super::models::{GroupFilter, GroupMember, GroupUpdate, NewGroup, UserGroup};
use crate::permissions::{GrantSubject, PermissionContext, PermissionGrant};

/// Persistence for groups, memberships and contextual grants.
///
/// Grants are keyed by `(subject, permission_key, context)`; writing the same
/// triple again replaces the previous value.
#[async_trait]
pub trait PermissionStore: Send + Sync {
    /// Short backend label for health output.
    fn name(&self) -> &'static str;

    async fn health_check(&self) -> Result<(), DatabaseError>;

    /// Role name of a user, if the user is known.
    async fn user_role(&self, user_id: Uuid) -> Result<Option<String>, DatabaseError>;

    /// Active groups the user belongs to.
    async fn user_groups(&self, user_id: Uuid) -> Result<Vec<Uuid>, DatabaseError>;

    /// Grants held by any of `subjects` at any of `contexts`, optionally narrowed to one key.
    async fn grants_for(
        &self,
        subjects: &[GrantSubject],
        permission_key: Option<&str>,
        contexts: &[PermissionContext],
    ) -> Result<Vec<PermissionGrant>, DatabaseError>;

    /// Every grant held by one subject, across all contexts.
    async fn grants_of(&self, subject: &GrantSubject) -> Result<Vec<PermissionGrant>, DatabaseError>;

    async fn upsert_grant(&self, grant: PermissionGrant) -> Result<PermissionGrant, DatabaseError>;

    async fn delete_grant(
        &self,
        subject: &GrantSubject,
        permission_key: &str,
        context: &PermissionContext,
    ) -> Result<bool, DatabaseError>;

    async fn create_group(&self, group: NewGroup) -> Result<UserGroup, DatabaseError>;

    async fn get_group(&self, group_id: Uuid) -> Result<Option<UserGroup>, DatabaseError>;

    async fn list_groups(&self, filter: &GroupFilter) -> Result<Vec<UserGroup>, DatabaseError>;

    /// Applies the present fields. `None` when the group does not exist;
    /// `Conflict` when the new name is taken in the group's scope.
    async fn update_group(&self, group_id: Uuid, update: GroupUpdate) -> Result<Option<UserGroup>, DatabaseError>;

    /// Removes the group together with its memberships and grants.
    async fn delete_group(&self, group_id: Uuid) -> Result<bool, DatabaseError>;

    /// Fails with `Conflict` when the user is already a member.
    async fn add_member(
        &self,
        group_id: Uuid,
        user_id: Uuid,
        role: &str,
        added_by: Option<Uuid>,
    ) -> Result<GroupMember, DatabaseError>;

    async fn remove_member(&self, group_id: Uuid, user_id: Uuid) -> Result<bool, DatabaseError>;

    async fn list_members(&self, group_id: Uuid) -> Result<Vec<GroupMember>, DatabaseError>;
}
