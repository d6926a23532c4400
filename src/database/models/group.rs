use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::permissions::PermissionContext;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct UserGroup {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub institution_id: Option<String>,
    pub school_id: Option<String>,
    pub is_active: bool,
    pub member_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserGroup {
    /// Narrowest scope the group belongs to.
    pub fn context(&self) -> PermissionContext {
        match (&self.school_id, &self.institution_id) {
            (Some(school), _) => PermissionContext::school(school.clone()),
            (None, Some(institution)) => PermissionContext::institution(institution.clone()),
            (None, None) => PermissionContext::global(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewGroup {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub institution_id: Option<String>,
    #[serde(default)]
    pub school_id: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl Default for NewGroup {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: None,
            institution_id: None,
            school_id: None,
            is_active: true,
        }
    }
}

/// Partial update of a group; absent fields keep their value. The scope of a
/// group is fixed at creation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

impl GroupUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.description.is_none() && self.is_active.is_none()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupFilter {
    pub institution_id: Option<String>,
    pub school_id: Option<String>,
    pub is_active: Option<bool>,
    pub search: Option<String>,
}

impl GroupFilter {
    pub fn matches(&self, group: &UserGroup) -> bool {
        if let Some(institution) = &self.institution_id {
            if group.institution_id.as_ref() != Some(institution) {
                return false;
            }
        }
        if let Some(school) = &self.school_id {
            if group.school_id.as_ref() != Some(school) {
                return false;
            }
        }
        if let Some(active) = self.is_active {
            if group.is_active != active {
                return false;
            }
        }
        if let Some(search) = self.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            let needle = search.to_lowercase();
            let in_name = group.name.to_lowercase().contains(&needle);
            let in_description = group
                .description
                .as_deref()
                .map(|d| d.to_lowercase().contains(&needle))
                .unwrap_or(false);
            if !in_name && !in_description {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct GroupMember {
    pub group_id: Uuid,
    pub user_id: Uuid,
    pub role: String,
    pub added_by: Option<Uuid>,
    pub joined_at: DateTime<Utc>,
}
