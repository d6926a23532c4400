use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use super::catalog::{self, UserRole};
use super::error::PermissionError;
use super::types::{GrantSource, GrantSubject, PermissionContext, PermissionGrant, Principal, Resolution};
use crate::database::PermissionStore;

/// Resolves effective permissions from role, group and direct grants.
///
/// At one context the tiers are consulted in `direct > group > role` order and
/// the first tier holding a value decides. Inside a tier a deny beats an allow.
/// When no tier has a value at the requested context the lookup is repeated at
/// global; when global has nothing either the key is denied.
#[derive(Clone)]
pub struct PermissionResolver {
    store: Arc<dyn PermissionStore>,
}

impl PermissionResolver {
    pub fn new(store: Arc<dyn PermissionStore>) -> Self {
        Self { store }
    }

    pub async fn resolve(
        &self,
        principal: &Principal,
        permission_key: &str,
        context: &PermissionContext,
    ) -> Result<Resolution, PermissionError> {
        let key = catalog::ensure_known(permission_key)?;
        let subjects = self.subjects_for(principal).await?;
        let contexts = lookup_contexts(std::slice::from_ref(context));
        let grants = self.store.grants_for(&subjects, Some(key), &contexts).await?;

        let resolution = decide(key, &principal.role, context, &grants);
        debug!(
            user = %principal.user_id,
            key,
            context = %context,
            allowed = resolution.allowed,
            source = ?resolution.source,
            "permission resolved"
        );
        Ok(resolution)
    }

    pub async fn has_permission(
        &self,
        principal: &Principal,
        permission_key: &str,
        context: &PermissionContext,
    ) -> Result<bool, PermissionError> {
        Ok(self.resolve(principal, permission_key, context).await?.allowed)
    }

    /// Every catalog key resolved at one context.
    pub async fn effective_permissions(
        &self,
        principal: &Principal,
        context: &PermissionContext,
    ) -> Result<BTreeMap<String, Resolution>, PermissionError> {
        let subjects = self.subjects_for(principal).await?;
        let contexts = lookup_contexts(std::slice::from_ref(context));
        let grants = self.store.grants_for(&subjects, None, &contexts).await?;

        Ok(catalog::all_keys()
            .map(|key| (key.to_string(), decide(key, &principal.role, context, &grants)))
            .collect())
    }

    /// Resolved values for every key at global and at each given scope id,
    /// fetched with a single store query.
    pub async fn resolve_matrix(
        &self,
        principal: &Principal,
        institutions: &[String],
        schools: &[String],
    ) -> Result<super::matrix::PermissionMatrix, PermissionError> {
        let mut requested = vec![PermissionContext::global()];
        requested.extend(institutions.iter().map(PermissionContext::institution));
        requested.extend(schools.iter().map(PermissionContext::school));

        let subjects = self.subjects_for(principal).await?;
        let grants = self.store.grants_for(&subjects, None, &requested).await?;

        let mut matrix = super::matrix::PermissionMatrix::empty();
        for key in catalog::all_keys() {
            for context in &requested {
                let resolution = decide(key, &principal.role, context, &grants);
                matrix.set(key, context, resolution.allowed);
            }
        }
        Ok(matrix)
    }

    /// Grant holders relevant to a principal: the user, each active group, the role.
    async fn subjects_for(&self, principal: &Principal) -> Result<Vec<GrantSubject>, PermissionError> {
        let groups = self.store.user_groups(principal.user_id).await?;
        let mut subjects = Vec::with_capacity(groups.len() + 2);
        subjects.push(GrantSubject::User(principal.user_id));
        subjects.extend(groups.into_iter().map(GrantSubject::Group));
        if !principal.role.is_empty() {
            subjects.push(GrantSubject::Role(principal.role.clone()));
        }
        Ok(subjects)
    }
}

/// Requested contexts plus global, deduplicated.
fn lookup_contexts(requested: &[PermissionContext]) -> Vec<PermissionContext> {
    let mut contexts: Vec<PermissionContext> = requested.to_vec();
    if !contexts.iter().any(PermissionContext::is_global) {
        contexts.push(PermissionContext::global());
    }
    contexts
}

/// Pure precedence rule over an already-fetched set of grants.
pub fn decide(key: &str, role: &str, requested: &PermissionContext, grants: &[PermissionGrant]) -> Resolution {
    if let Some((allowed, source)) = decide_at(key, role, requested, grants) {
        return Resolution {
            permission_key: key.to_string(),
            allowed,
            source: Some(source),
            decided_at: requested.clone(),
            fell_back: false,
        };
    }

    if !requested.is_global() {
        let global = PermissionContext::global();
        if let Some((allowed, source)) = decide_at(key, role, &global, grants) {
            return Resolution {
                permission_key: key.to_string(),
                allowed,
                source: Some(source),
                decided_at: global,
                fell_back: true,
            };
        }
    }

    Resolution {
        permission_key: key.to_string(),
        allowed: false,
        source: None,
        decided_at: requested.clone(),
        fell_back: false,
    }
}

fn decide_at(
    key: &str,
    role: &str,
    context: &PermissionContext,
    grants: &[PermissionGrant],
) -> Option<(bool, GrantSource)> {
    for source in GrantSource::PRECEDENCE {
        let mut value = grants
            .iter()
            .filter(|g| g.source() == source && g.permission_key == key && &g.context == context)
            .fold(None, |acc: Option<bool>, g| Some(acc.unwrap_or(true) && g.allowed));

        // Stored role grants override the built-in table; the table only speaks globally.
        if value.is_none() && source == GrantSource::Role && context.is_global() {
            value = role.parse::<UserRole>().ok().and_then(|r| r.default_for(key));
        }

        if let Some(allowed) = value {
            return Some((allowed, source));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::NewGroup;
    use crate::database::MemoryPermissionStore;
    use uuid::Uuid;

    fn grant(subject: GrantSubject, key: &str, allowed: bool, context: PermissionContext) -> PermissionGrant {
        PermissionGrant::new(subject, key, allowed, context)
    }

    #[test]
    fn direct_beats_group_beats_role() {
        let user = Uuid::new_v4();
        let group = Uuid::new_v4();
        let ctx = PermissionContext::school("s1");
        let grants = vec![
            grant(GrantSubject::Role("TEACHER".into()), "canManageGrades", true, ctx.clone()),
            grant(GrantSubject::Group(group), "canManageGrades", false, ctx.clone()),
            grant(GrantSubject::User(user), "canManageGrades", true, ctx.clone()),
        ];

        let r = decide("canManageGrades", "TEACHER", &ctx, &grants);
        assert!(r.allowed);
        assert_eq!(r.source, Some(GrantSource::Direct));

        let r = decide("canManageGrades", "TEACHER", &ctx, &grants[..2]);
        assert!(!r.allowed);
        assert_eq!(r.source, Some(GrantSource::Group));

        let r = decide("canManageGrades", "TEACHER", &ctx, &grants[..1]);
        assert!(r.allowed);
        assert_eq!(r.source, Some(GrantSource::Role));
        assert!(!r.fell_back);
    }

    #[test]
    fn deny_wins_inside_one_tier() {
        let ctx = PermissionContext::institution("i1");
        let grants = vec![
            grant(GrantSubject::Group(Uuid::new_v4()), "canManageClasses", true, ctx.clone()),
            grant(GrantSubject::Group(Uuid::new_v4()), "canManageClasses", false, ctx.clone()),
        ];
        let r = decide("canManageClasses", "", &ctx, &grants);
        assert!(!r.allowed);
        assert_eq!(r.source, Some(GrantSource::Group));
    }

    #[test]
    fn scoped_context_falls_back_to_global() {
        let user = Uuid::new_v4();
        let grants = vec![grant(
            GrantSubject::User(user),
            "canUploadResources",
            true,
            PermissionContext::global(),
        )];
        let r = decide("canUploadResources", "STUDENT", &PermissionContext::school("s9"), &grants);
        assert!(r.allowed);
        assert!(r.fell_back);
        assert_eq!(r.source, Some(GrantSource::Direct));
        assert_eq!(r.decided_at, PermissionContext::global());
    }

    #[test]
    fn any_grant_at_requested_context_blocks_fallback() {
        // A role grant at the school beats a direct grant that only exists globally.
        let user = Uuid::new_v4();
        let school = PermissionContext::school("s1");
        let grants = vec![
            grant(GrantSubject::User(user), "canManageGrades", true, PermissionContext::global()),
            grant(GrantSubject::Role("TEACHER".into()), "canManageGrades", false, school.clone()),
        ];
        let r = decide("canManageGrades", "TEACHER", &school, &grants);
        assert!(!r.allowed);
        assert_eq!(r.source, Some(GrantSource::Role));
        assert!(!r.fell_back);
    }

    #[test]
    fn role_defaults_apply_only_at_global() {
        let r = decide("canManageGrades", "TEACHER", &PermissionContext::global(), &[]);
        assert!(r.allowed);
        assert_eq!(r.source, Some(GrantSource::Role));

        // Nothing at the school, so the built-in table answers via global fallback.
        let r = decide("canManageGrades", "TEACHER", &PermissionContext::school("s1"), &[]);
        assert!(r.allowed);
        assert!(r.fell_back);
    }

    #[test]
    fn unknown_role_without_grants_is_denied_with_no_source() {
        let r = decide("canManageSystem", "JANITOR", &PermissionContext::global(), &[]);
        assert!(!r.allowed);
        assert_eq!(r.source, None);
    }

    #[test]
    fn stored_role_grant_overrides_builtin_default() {
        let grants = vec![grant(
            GrantSubject::Role("STUDENT".into()),
            "canViewOwnGrades",
            false,
            PermissionContext::global(),
        )];
        let r = decide("canViewOwnGrades", "STUDENT", &PermissionContext::global(), &grants);
        assert!(!r.allowed);
    }

    #[tokio::test]
    async fn resolver_reads_group_membership_from_store() {
        let store = Arc::new(MemoryPermissionStore::new());
        let group = store
            .create_group(NewGroup {
                name: "Finance".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        let user = Uuid::new_v4();
        store.add_member(group.id, user, "member", None).await.unwrap();
        store
            .upsert_grant(grant(
                GrantSubject::Group(group.id),
                "canViewPayments",
                true,
                PermissionContext::institution("i1"),
            ))
            .await
            .unwrap();

        let resolver = PermissionResolver::new(store.clone());
        let principal = Principal::new(user, "TEACHER");

        assert!(resolver
            .has_permission(&principal, "canViewPayments", &PermissionContext::institution("i1"))
            .await
            .unwrap());
        // Teacher default at global is deny.
        assert!(!resolver
            .has_permission(&principal, "canViewPayments", &PermissionContext::institution("i2"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn unknown_keys_are_rejected() {
        let resolver = PermissionResolver::new(Arc::new(MemoryPermissionStore::new()));
        let principal = Principal::new(Uuid::new_v4(), "TEACHER");
        let err = resolver
            .resolve(&principal, "canLaunchRockets", &PermissionContext::global())
            .await
            .unwrap_err();
        assert!(matches!(err, PermissionError::UnknownPermission(_)));
    }

    #[tokio::test]
    async fn effective_permissions_cover_catalog() {
        let resolver = PermissionResolver::new(Arc::new(MemoryPermissionStore::new()));
        let principal = Principal::new(Uuid::new_v4(), "GUARDIAN");
        let effective = resolver
            .effective_permissions(&principal, &PermissionContext::global())
            .await
            .unwrap();
        assert_eq!(effective.len(), catalog::all_keys().count());
        assert!(effective["canViewBoletos"].allowed);
        assert!(!effective["canManageGrades"].allowed);
    }

    #[tokio::test]
    async fn matrix_resolves_each_scope() {
        let store = Arc::new(MemoryPermissionStore::new());
        let user = Uuid::new_v4();
        store
            .upsert_grant(grant(
                GrantSubject::User(user),
                "canManageSchools",
                true,
                PermissionContext::institution("i1"),
            ))
            .await
            .unwrap();
        let resolver = PermissionResolver::new(store);
        let matrix = resolver
            .resolve_matrix(&Principal::new(user, "TEACHER"), &["i1".into(), "i2".into()], &["s1".into()])
            .await
            .unwrap();

        assert_eq!(matrix.get("canManageSchools", &PermissionContext::global()), Some(false));
        assert_eq!(matrix.get("canManageSchools", &PermissionContext::institution("i1")), Some(true));
        assert_eq!(matrix.get("canManageSchools", &PermissionContext::institution("i2")), Some(false));
        assert_eq!(matrix.get("canManageGrades", &PermissionContext::school("s1")), Some(true));
    }
}
