use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::cache::keys::{self, ttl};
use crate::cache::{CacheOptions, CacheService};
use crate::database::models::{GroupFilter, GroupMember, GroupUpdate, NewGroup, UserGroup};
use crate::database::{DatabaseError, PermissionStore};
use crate::permissions::catalog::{self, canonical_role};
use crate::permissions::{
    GrantSubject, PermissionContext, PermissionError, PermissionGrant, PermissionMatrix, PermissionResolver, Principal,
    Resolution,
};

/// One grant in a bulk request.
#[derive(Debug, Clone, Deserialize)]
pub struct GrantInput {
    pub permission_key: String,
    pub allowed: bool,
    #[serde(default)]
    pub context_type: Option<String>,
    #[serde(default)]
    pub context_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CloneGroupRequest {
    pub name: String,
    #[serde(default)]
    pub institution_id: Option<String>,
    #[serde(default)]
    pub school_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupStats {
    pub total_groups: usize,
    pub active_groups: usize,
    pub total_members: i64,
    pub average_group_size: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BulkAddResult {
    pub added: Vec<GroupMember>,
    /// Users that were already members.
    pub skipped: Vec<Uuid>,
}

/// Group, membership and grant management. Every mutation drops the cached
/// data that depends on it.
#[derive(Clone)]
pub struct AccessService {
    store: Arc<dyn PermissionStore>,
    resolver: PermissionResolver,
    cache: CacheService,
}

impl AccessService {
    pub fn new(store: Arc<dyn PermissionStore>, cache: CacheService) -> Self {
        Self {
            resolver: PermissionResolver::new(store.clone()),
            store,
            cache,
        }
    }

    pub fn resolver(&self) -> &PermissionResolver {
        &self.resolver
    }

    pub fn store_name(&self) -> &'static str {
        self.store.name()
    }

    pub async fn store_health(&self) -> Result<(), DatabaseError> {
        self.store.health_check().await
    }

    async fn invalidate(&self, mut tags: Vec<String>) {
        tags.push("permissions".to_string());
        self.cache.invalidate_tags(&tags).await;
    }

    fn group_tags(group_id: Uuid) -> Vec<String> {
        vec!["groups".to_string(), format!("groups:{}", group_id)]
    }

    /// Principal for a user id, with the role recorded in the store. Unknown
    /// users get no role and therefore no role defaults.
    pub async fn principal_for(&self, user_id: Uuid) -> Result<Principal, PermissionError> {
        let role = self.store.user_role(user_id).await?.unwrap_or_default();
        Ok(Principal::new(user_id, canonical_role(&role)))
    }

    /// Effective permissions at one context, cached per user and context.
    pub async fn effective_permissions(
        &self,
        principal: &Principal,
        context: &PermissionContext,
    ) -> Result<BTreeMap<String, Resolution>, PermissionError> {
        let options = CacheOptions::ttl(ttl::SHORT)
            .tag(format!("users:{}", principal.user_id))
            .tag("permissions");
        let key = format!("{}:{}", keys::user_permissions(principal.user_id, context), principal.role);
        self.cache
            .get_or_set(&key, options, || self.resolver.effective_permissions(principal, context))
            .await
    }

    // Groups

    pub async fn create_group(&self, group: NewGroup) -> Result<UserGroup, PermissionError> {
        let name = group.name.trim().to_string();
        if name.is_empty() {
            return Err(PermissionError::Validation("group name is required".to_string()));
        }
        let created = self.store.create_group(NewGroup { name, ..group }).await?;
        info!(group = %created.id, name = %created.name, "group created");
        self.invalidate(Self::group_tags(created.id)).await;
        Ok(created)
    }

    pub async fn get_group(&self, group_id: Uuid) -> Result<UserGroup, PermissionError> {
        self.store
            .get_group(group_id)
            .await?
            .ok_or(PermissionError::GroupNotFound(group_id))
    }

    pub async fn list_groups(&self, filter: &GroupFilter) -> Result<Vec<UserGroup>, PermissionError> {
        let options = CacheOptions::ttl(ttl::SHORT).tag("groups");
        let groups = self
            .cache
            .query_cache(&keys::list("groups", filter), options, || self.store.list_groups(filter))
            .await?;
        Ok(groups)
    }

    /// Renames, re-describes or (de)activates a group. Deactivated groups stop
    /// contributing grants to resolution.
    pub async fn update_group(&self, group_id: Uuid, update: GroupUpdate) -> Result<UserGroup, PermissionError> {
        if update.is_empty() {
            return Err(PermissionError::Validation("nothing to update".to_string()));
        }
        let name = match update.name {
            Some(name) => {
                let name = name.trim().to_string();
                if name.is_empty() {
                    return Err(PermissionError::Validation("group name is required".to_string()));
                }
                Some(name)
            }
            None => None,
        };
        let updated = self
            .store
            .update_group(group_id, GroupUpdate { name, ..update })
            .await?
            .ok_or(PermissionError::GroupNotFound(group_id))?;
        info!(group = %group_id, active = updated.is_active, "group updated");
        self.invalidate(Self::group_tags(group_id)).await;
        Ok(updated)
    }

    pub async fn delete_group(&self, group_id: Uuid) -> Result<(), PermissionError> {
        if !self.store.delete_group(group_id).await? {
            return Err(PermissionError::GroupNotFound(group_id));
        }
        info!(group = %group_id, "group deleted");
        self.invalidate(Self::group_tags(group_id)).await;
        Ok(())
    }

    /// Copies a group and its grants. Members are not copied. The copy keeps
    /// the source scope unless a new one is given.
    pub async fn clone_group(&self, source_id: Uuid, request: CloneGroupRequest) -> Result<UserGroup, PermissionError> {
        let source = self.get_group(source_id).await?;
        let keep_scope = request.institution_id.is_none() && request.school_id.is_none();
        let (institution_id, school_id) = if keep_scope {
            (source.institution_id.clone(), source.school_id.clone())
        } else {
            (request.institution_id, request.school_id)
        };

        let cloned = self
            .create_group(NewGroup {
                name: request.name,
                description: source.description.clone(),
                institution_id,
                school_id,
                is_active: source.is_active,
            })
            .await?;

        let grants = self.store.grants_of(&GrantSubject::Group(source_id)).await?;
        for grant in &grants {
            self.store
                .upsert_grant(PermissionGrant::new(
                    GrantSubject::Group(cloned.id),
                    grant.permission_key.clone(),
                    grant.allowed,
                    grant.context.clone(),
                ))
                .await?;
        }
        info!(source = %source_id, group = %cloned.id, grants = grants.len(), "group cloned");
        self.invalidate(Self::group_tags(cloned.id)).await;
        Ok(cloned)
    }

    /// Totals for the groups matching `filter`, cached until any group changes.
    pub async fn group_stats(&self, filter: &GroupFilter) -> Result<GroupStats, PermissionError> {
        self.cache
            .dynamic_cache(&keys::list("group_stats", filter), &["groups"], || self.count_groups(filter))
            .await
    }

    async fn count_groups(&self, filter: &GroupFilter) -> Result<GroupStats, PermissionError> {
        let groups = self.store.list_groups(filter).await?;
        let total_groups = groups.len();
        let active_groups = groups.iter().filter(|g| g.is_active).count();
        let total_members: i64 = groups.iter().map(|g| g.member_count).sum();
        let average_group_size = if total_groups == 0 {
            0.0
        } else {
            (total_members as f64 / total_groups as f64 * 100.0).round() / 100.0
        };
        Ok(GroupStats {
            total_groups,
            active_groups,
            total_members,
            average_group_size,
        })
    }

    // Members

    pub async fn add_member(
        &self,
        group_id: Uuid,
        user_id: Uuid,
        role: Option<&str>,
        added_by: Option<Uuid>,
    ) -> Result<GroupMember, PermissionError> {
        self.get_group(group_id).await?;
        let member = self
            .store
            .add_member(group_id, user_id, role.unwrap_or("member"), added_by)
            .await?;
        let mut tags = Self::group_tags(group_id);
        tags.push(format!("users:{}", user_id));
        self.invalidate(tags).await;
        Ok(member)
    }

    /// Adds several users; existing members are reported as skipped.
    pub async fn bulk_add_members(
        &self,
        group_id: Uuid,
        user_ids: &[Uuid],
        role: Option<&str>,
        added_by: Option<Uuid>,
    ) -> Result<BulkAddResult, PermissionError> {
        self.get_group(group_id).await?;
        let mut result = BulkAddResult::default();
        let mut tags = Self::group_tags(group_id);

        for user_id in user_ids {
            match self
                .store
                .add_member(group_id, *user_id, role.unwrap_or("member"), added_by)
                .await
            {
                Ok(member) => {
                    tags.push(format!("users:{}", user_id));
                    result.added.push(member);
                }
                Err(DatabaseError::Conflict(_)) => result.skipped.push(*user_id),
                Err(e) => return Err(e.into()),
            }
        }
        self.invalidate(tags).await;
        Ok(result)
    }

    pub async fn remove_member(&self, group_id: Uuid, user_id: Uuid) -> Result<(), PermissionError> {
        if !self.store.remove_member(group_id, user_id).await? {
            return Err(PermissionError::Store(DatabaseError::NotFound(format!(
                "user {} is not a member of group {}",
                user_id, group_id
            ))));
        }
        let mut tags = Self::group_tags(group_id);
        tags.push(format!("users:{}", user_id));
        self.invalidate(tags).await;
        Ok(())
    }

    pub async fn list_members(&self, group_id: Uuid) -> Result<Vec<GroupMember>, PermissionError> {
        self.get_group(group_id).await?;
        Ok(self.store.list_members(group_id).await?)
    }

    // Grants

    pub async fn group_permissions(&self, group_id: Uuid) -> Result<Vec<PermissionGrant>, PermissionError> {
        self.get_group(group_id).await?;
        Ok(self.store.grants_of(&GrantSubject::Group(group_id)).await?)
    }

    /// Raw stored values of a group across scopes.
    pub async fn group_matrix(&self, group_id: Uuid) -> Result<PermissionMatrix, PermissionError> {
        let grants = self.group_permissions(group_id).await?;
        Ok(PermissionMatrix::from_grants(&grants))
    }

    pub async fn set_group_permission(
        &self,
        group_id: Uuid,
        permission_key: &str,
        allowed: bool,
        context: PermissionContext,
    ) -> Result<PermissionGrant, PermissionError> {
        let key = catalog::ensure_known(permission_key)?;
        self.get_group(group_id).await?;
        let grant = self
            .store
            .upsert_grant(PermissionGrant::new(GrantSubject::Group(group_id), key, allowed, context))
            .await?;
        info!(group = %group_id, key, allowed, context = %grant.context, "group permission set");
        self.invalidate(Self::group_tags(group_id)).await;
        Ok(grant)
    }

    pub async fn remove_group_permission(
        &self,
        group_id: Uuid,
        permission_key: &str,
        context: &PermissionContext,
    ) -> Result<bool, PermissionError> {
        let key = catalog::ensure_known(permission_key)?;
        self.get_group(group_id).await?;
        let removed = self
            .store
            .delete_grant(&GrantSubject::Group(group_id), key, context)
            .await?;
        if removed {
            info!(group = %group_id, key, context = %context, "group permission removed");
            self.invalidate(Self::group_tags(group_id)).await;
        }
        Ok(removed)
    }

    /// Validates every input before writing any of them.
    pub async fn bulk_set_group_permissions(
        &self,
        group_id: Uuid,
        inputs: &[GrantInput],
    ) -> Result<Vec<PermissionGrant>, PermissionError> {
        self.get_group(group_id).await?;
        let mut validated = Vec::with_capacity(inputs.len());
        for input in inputs {
            let key = catalog::ensure_known(&input.permission_key)?;
            let context = PermissionContext::parse(input.context_type.as_deref(), input.context_id.as_deref())?;
            validated.push(PermissionGrant::new(GrantSubject::Group(group_id), key, input.allowed, context));
        }

        let mut saved = Vec::with_capacity(validated.len());
        for grant in validated {
            saved.push(self.store.upsert_grant(grant).await?);
        }
        info!(group = %group_id, count = saved.len(), "group permissions set in bulk");
        self.invalidate(Self::group_tags(group_id)).await;
        Ok(saved)
    }

    pub async fn user_grants(&self, user_id: Uuid) -> Result<Vec<PermissionGrant>, PermissionError> {
        Ok(self.store.grants_of(&GrantSubject::User(user_id)).await?)
    }

    pub async fn set_user_permission(
        &self,
        user_id: Uuid,
        permission_key: &str,
        allowed: bool,
        context: PermissionContext,
    ) -> Result<PermissionGrant, PermissionError> {
        let key = catalog::ensure_known(permission_key)?;
        let grant = self
            .store
            .upsert_grant(PermissionGrant::new(GrantSubject::User(user_id), key, allowed, context))
            .await?;
        info!(user = %user_id, key, allowed, context = %grant.context, "user permission set");
        self.invalidate(vec![format!("users:{}", user_id)]).await;
        Ok(grant)
    }

    pub async fn remove_user_permission(
        &self,
        user_id: Uuid,
        permission_key: &str,
        context: &PermissionContext,
    ) -> Result<bool, PermissionError> {
        let key = catalog::ensure_known(permission_key)?;
        let removed = self
            .store
            .delete_grant(&GrantSubject::User(user_id), key, context)
            .await?;
        if removed {
            info!(user = %user_id, key, context = %context, "user permission removed");
            self.invalidate(vec![format!("users:{}", user_id)]).await;
        }
        Ok(removed)
    }

    /// Stored grants of a role; these override the built-in defaults.
    pub async fn role_grants(&self, role: &str) -> Result<Vec<PermissionGrant>, PermissionError> {
        Ok(self.store.grants_of(&GrantSubject::Role(canonical_role(role))).await?)
    }

    pub async fn set_role_permission(
        &self,
        role: &str,
        permission_key: &str,
        allowed: bool,
        context: PermissionContext,
    ) -> Result<PermissionGrant, PermissionError> {
        let key = catalog::ensure_known(permission_key)?;
        let role = canonical_role(role);
        if role.is_empty() {
            return Err(PermissionError::Validation("role is required".to_string()));
        }
        let grant = self
            .store
            .upsert_grant(PermissionGrant::new(GrantSubject::Role(role.clone()), key, allowed, context))
            .await?;
        info!(role = %role, key, allowed, context = %grant.context, "role permission set");
        self.invalidate(vec!["roles".to_string(), format!("roles:{}", role)]).await;
        Ok(grant)
    }
}
