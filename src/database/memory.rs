use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::manager::DatabaseError;
use super::models::{GroupFilter, GroupMember, GroupUpdate, NewGroup, UserGroup};
use super::store::PermissionStore;
use crate::permissions::{GrantSubject, PermissionContext, PermissionGrant};

type GrantKey = (GrantSubject, String, PermissionContext);

#[derive(Default)]
struct State {
    roles: HashMap<Uuid, String>,
    groups: HashMap<Uuid, UserGroup>,
    members: HashMap<Uuid, BTreeMap<Uuid, GroupMember>>,
    grants: HashMap<GrantKey, PermissionGrant>,
}

impl State {
    fn with_count(&self, group: &UserGroup) -> UserGroup {
        let mut group = group.clone();
        group.member_count = self.members.get(&group.id).map(|m| m.len() as i64).unwrap_or(0);
        group
    }
}

/// Process-local store used in development and tests
#[derive(Default)]
pub struct MemoryPermissionStore {
    state: RwLock<State>,
}

impl MemoryPermissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or changes) the role of a user.
    pub async fn set_user_role(&self, user_id: Uuid, role: impl Into<String>) {
        self.state.write().await.roles.insert(user_id, role.into());
    }
}

#[async_trait]
impl PermissionStore for MemoryPermissionStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn health_check(&self) -> Result<(), DatabaseError> {
        Ok(())
    }

    async fn user_role(&self, user_id: Uuid) -> Result<Option<String>, DatabaseError> {
        Ok(self.state.read().await.roles.get(&user_id).cloned())
    }

    async fn user_groups(&self, user_id: Uuid) -> Result<Vec<Uuid>, DatabaseError> {
        let state = self.state.read().await;
        let mut groups: Vec<Uuid> = state
            .members
            .iter()
            .filter(|(_, members)| members.contains_key(&user_id))
            .map(|(group_id, _)| *group_id)
            .filter(|group_id| state.groups.get(group_id).map(|g| g.is_active).unwrap_or(false))
            .collect();
        groups.sort();
        Ok(groups)
    }

    async fn grants_for(
        &self,
        subjects: &[GrantSubject],
        permission_key: Option<&str>,
        contexts: &[PermissionContext],
    ) -> Result<Vec<PermissionGrant>, DatabaseError> {
        let state = self.state.read().await;
        Ok(state
            .grants
            .values()
            .filter(|g| subjects.contains(&g.subject))
            .filter(|g| permission_key.map_or(true, |k| g.permission_key == k))
            .filter(|g| contexts.contains(&g.context))
            .cloned()
            .collect())
    }

    async fn grants_of(&self, subject: &GrantSubject) -> Result<Vec<PermissionGrant>, DatabaseError> {
        let state = self.state.read().await;
        let mut grants: Vec<PermissionGrant> = state
            .grants
            .values()
            .filter(|g| &g.subject == subject)
            .cloned()
            .collect();
        grants.sort_by(|a, b| {
            (&a.permission_key, &a.context).cmp(&(&b.permission_key, &b.context))
        });
        Ok(grants)
    }

    async fn upsert_grant(&self, mut grant: PermissionGrant) -> Result<PermissionGrant, DatabaseError> {
        let mut state = self.state.write().await;
        if let GrantSubject::Group(group_id) = &grant.subject {
            if !state.groups.contains_key(group_id) {
                return Err(DatabaseError::NotFound(format!("group {}", group_id)));
            }
        }
        grant.updated_at = Utc::now();
        let key = (grant.subject.clone(), grant.permission_key.clone(), grant.context.clone());
        state.grants.insert(key, grant.clone());
        Ok(grant)
    }

    async fn delete_grant(
        &self,
        subject: &GrantSubject,
        permission_key: &str,
        context: &PermissionContext,
    ) -> Result<bool, DatabaseError> {
        let key = (subject.clone(), permission_key.to_string(), context.clone());
        Ok(self.state.write().await.grants.remove(&key).is_some())
    }

    async fn create_group(&self, group: NewGroup) -> Result<UserGroup, DatabaseError> {
        let mut state = self.state.write().await;
        let duplicate = state.groups.values().any(|g| {
            g.name.eq_ignore_ascii_case(&group.name)
                && g.institution_id == group.institution_id
                && g.school_id == group.school_id
        });
        if duplicate {
            return Err(DatabaseError::Conflict(format!("group '{}' already exists in this scope", group.name)));
        }

        let now = Utc::now();
        let created = UserGroup {
            id: Uuid::new_v4(),
            name: group.name,
            description: group.description,
            institution_id: group.institution_id,
            school_id: group.school_id,
            is_active: group.is_active,
            member_count: 0,
            created_at: now,
            updated_at: now,
        };
        state.groups.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_group(&self, group_id: Uuid) -> Result<Option<UserGroup>, DatabaseError> {
        let state = self.state.read().await;
        Ok(state.groups.get(&group_id).map(|g| state.with_count(g)))
    }

    async fn list_groups(&self, filter: &GroupFilter) -> Result<Vec<UserGroup>, DatabaseError> {
        let state = self.state.read().await;
        let mut groups: Vec<UserGroup> = state
            .groups
            .values()
            .filter(|g| filter.matches(g))
            .map(|g| state.with_count(g))
            .collect();
        groups.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(groups)
    }

    async fn update_group(&self, group_id: Uuid, update: GroupUpdate) -> Result<Option<UserGroup>, DatabaseError> {
        let mut state = self.state.write().await;
        let Some(current) = state.groups.get(&group_id) else {
            return Ok(None);
        };
        if let Some(name) = &update.name {
            let taken = state.groups.values().any(|g| {
                g.id != group_id
                    && g.name.eq_ignore_ascii_case(name)
                    && g.institution_id == current.institution_id
                    && g.school_id == current.school_id
            });
            if taken {
                return Err(DatabaseError::Conflict(format!("group '{}' already exists in this scope", name)));
            }
        }

        let Some(group) = state.groups.get_mut(&group_id) else {
            return Ok(None);
        };
        if let Some(name) = update.name {
            group.name = name;
        }
        if let Some(description) = update.description {
            group.description = Some(description);
        }
        if let Some(active) = update.is_active {
            group.is_active = active;
        }
        group.updated_at = Utc::now();
        let updated = group.clone();
        Ok(Some(state.with_count(&updated)))
    }

    async fn delete_group(&self, group_id: Uuid) -> Result<bool, DatabaseError> {
        let mut state = self.state.write().await;
        if state.groups.remove(&group_id).is_none() {
            return Ok(false);
        }
        state.members.remove(&group_id);
        state
            .grants
            .retain(|(subject, _, _), _| subject != &GrantSubject::Group(group_id));
        Ok(true)
    }

    async fn add_member(
        &self,
        group_id: Uuid,
        user_id: Uuid,
        role: &str,
        added_by: Option<Uuid>,
    ) -> Result<GroupMember, DatabaseError> {
        let mut state = self.state.write().await;
        if !state.groups.contains_key(&group_id) {
            return Err(DatabaseError::NotFound(format!("group {}", group_id)));
        }
        let members = state.members.entry(group_id).or_default();
        if members.contains_key(&user_id) {
            return Err(DatabaseError::Conflict(format!("user {} is already a member", user_id)));
        }
        let member = GroupMember {
            group_id,
            user_id,
            role: role.to_string(),
            added_by,
            joined_at: Utc::now(),
        };
        members.insert(user_id, member.clone());
        Ok(member)
    }

    async fn remove_member(&self, group_id: Uuid, user_id: Uuid) -> Result<bool, DatabaseError> {
        let mut state = self.state.write().await;
        Ok(state
            .members
            .get_mut(&group_id)
            .map(|m| m.remove(&user_id).is_some())
            .unwrap_or(false))
    }

    async fn list_members(&self, group_id: Uuid) -> Result<Vec<GroupMember>, DatabaseError> {
        let state = self.state.read().await;
        if !state.groups.contains_key(&group_id) {
            return Err(DatabaseError::NotFound(format!("group {}", group_id)));
        }
        Ok(state
            .members
            .get(&group_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default())
    }
}
