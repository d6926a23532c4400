use serde::Serialize;
use std::collections::BTreeMap;

use super::catalog;
use super::types::{ContextType, PermissionContext, PermissionGrant};

/// Values of one permission key across scopes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PermissionRow {
    pub global: Option<bool>,
    pub institutions: BTreeMap<String, bool>,
    pub schools: BTreeMap<String, bool>,
}

/// Permission key -> per-scope values. Every catalog key has a row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PermissionMatrix(BTreeMap<String, PermissionRow>);

impl PermissionMatrix {
    pub fn empty() -> Self {
        Self(
            catalog::all_keys()
                .map(|key| (key.to_string(), PermissionRow::default()))
                .collect(),
        )
    }

    /// Raw stored values of one subject; unset cells stay empty.
    pub fn from_grants(grants: &[PermissionGrant]) -> Self {
        let mut matrix = Self::empty();
        for grant in grants {
            matrix.set(&grant.permission_key, &grant.context, grant.allowed);
        }
        matrix
    }

    pub fn set(&mut self, key: &str, context: &PermissionContext, allowed: bool) {
        let row = self.0.entry(key.to_string()).or_default();
        match (context.context_type, &context.context_id) {
            (ContextType::Global, _) => row.global = Some(allowed),
            (ContextType::Institution, Some(id)) => {
                row.institutions.insert(id.clone(), allowed);
            }
            (ContextType::School, Some(id)) => {
                row.schools.insert(id.clone(), allowed);
            }
            // Scoped contexts always carry an id once parsed.
            _ => {}
        }
    }

    pub fn get(&self, key: &str, context: &PermissionContext) -> Option<bool> {
        let row = self.0.get(key)?;
        match (context.context_type, context.context_id.as_deref()) {
            (ContextType::Global, _) => row.global,
            (ContextType::Institution, Some(id)) => row.institutions.get(id).copied(),
            (ContextType::School, Some(id)) => row.schools.get(id).copied(),
            _ => None,
        }
    }

    pub fn row(&self, key: &str) -> Option<&PermissionRow> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
