pub mod group;
pub mod members;
pub mod permissions;

use uuid::Uuid;

use crate::database::models::UserGroup;
use crate::error::ApiError;
use crate::middleware::{require_permission, AuthUser, MANAGE_USERS};
use crate::permissions::PermissionContext;
use crate::state::AppState;

pub use group::{
    clone as group_clone, create as group_create, delete as group_delete, get as group_get, list as group_list,
    stats as group_stats, update as group_update,
};
pub use members::{add as members_add, bulk_add as members_bulk_add, list as members_list, remove as members_remove};
pub use permissions::{
    bulk as permissions_bulk, delete as permissions_delete, list as permissions_list, matrix as permissions_matrix,
    put as permissions_put,
};

/// Loads a group the caller is allowed to manage at the group's own scope.
async fn managed_group(state: &AppState, user: &AuthUser, group_id: Uuid) -> Result<UserGroup, ApiError> {
    let group = state.access.get_group(group_id).await?;
    require_permission(state, user, MANAGE_USERS, &group.context()).await?;
    Ok(group)
}

/// A grant may only target a scope the caller can manage, even when it is
/// wider than the group's own scope.
async fn require_grant_scope(
    state: &AppState,
    user: &AuthUser,
    group: &UserGroup,
    context: &PermissionContext,
) -> Result<(), ApiError> {
    if *context != group.context() {
        require_permission(state, user, MANAGE_USERS, context).await?;
    }
    Ok(())
}
