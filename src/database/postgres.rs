//! PostgreSQL-backed [`PermissionStore`].
//!
//! Expects these tables (created by the portal's migrations):
//!
//! ```sql
//! user_groups(id uuid pk, name text, description text, institution_id text,
//!             school_id text, is_active bool, created_at timestamptz, updated_at timestamptz)
//! group_members(group_id uuid, user_id uuid, role text, added_by uuid,
//!               joined_at timestamptz, primary key (group_id, user_id))
//! contextual_permissions(subject_type text, subject_id text, permission_key text,
//!                        allowed bool, context_type text, context_id text not null default '',
//!                        updated_at timestamptz,
//!                        unique (subject_type, subject_id, permission_key, context_type, context_id))
//! users(id uuid, role_id ...) joined with roles(id, name)
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};
use uuid::Uuid;

use super::manager::{DatabaseError, DatabaseManager};
use super::models::{GroupFilter, GroupMember, GroupUpdate, NewGroup, UserGroup};
use super::store::PermissionStore;
use crate::permissions::{GrantSubject, PermissionContext, PermissionGrant};

const GROUP_COLUMNS: &str = r#"
    g.id, g.name, g.description, g.institution_id, g.school_id, g.is_active,
    g.created_at, g.updated_at,
    (SELECT COUNT(*) FROM group_members m WHERE m.group_id = g.id) AS member_count
"#;

pub struct PgPermissionStore {
    pool: PgPool,
}

impl PgPermissionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn grant_from_row(row: &PgRow) -> Result<PermissionGrant, DatabaseError> {
        let subject_type: String = row.try_get("subject_type")?;
        let subject_id: String = row.try_get("subject_id")?;
        let context_type: String = row.try_get("context_type")?;
        let context_id: String = row.try_get("context_id")?;

        let subject = GrantSubject::from_parts(&subject_type, &subject_id).ok_or_else(|| {
            DatabaseError::Corrupt(format!("bad grant subject {}:{}", subject_type, subject_id))
        })?;
        let context = PermissionContext::parse(Some(&context_type), Some(&context_id))
            .map_err(|e| DatabaseError::Corrupt(e.to_string()))?;

        Ok(PermissionGrant {
            subject,
            permission_key: row.try_get("permission_key")?,
            allowed: row.try_get("allowed")?,
            context,
            updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
        })
    }

    /// Column value for a context id; global is stored as the empty string.
    fn context_id_column(context: &PermissionContext) -> String {
        context.context_id.clone().unwrap_or_default()
    }
}

#[async_trait]
impl PermissionStore for PgPermissionStore {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn health_check(&self) -> Result<(), DatabaseError> {
        DatabaseManager::health_check(&self.pool).await
    }

    async fn user_role(&self, user_id: Uuid) -> Result<Option<String>, DatabaseError> {
        let row = sqlx::query(
            r#"
            SELECT r.name AS role
            FROM users u
            JOIN roles r ON r.id = u.role_id
            WHERE u.id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some(row) => Some(row.try_get("role")?),
            None => None,
        })
    }

    async fn user_groups(&self, user_id: Uuid) -> Result<Vec<Uuid>, DatabaseError> {
        let rows = sqlx::query(
            r#"
            SELECT m.group_id
            FROM group_members m
            JOIN user_groups g ON g.id = m.group_id
            WHERE m.user_id = $1 AND g.is_active
            ORDER BY m.group_id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| row.try_get("group_id").map_err(DatabaseError::from))
            .collect()
    }

    async fn grants_for(
        &self,
        subjects: &[GrantSubject],
        permission_key: Option<&str>,
        contexts: &[PermissionContext],
    ) -> Result<Vec<PermissionGrant>, DatabaseError> {
        if subjects.is_empty() || contexts.is_empty() {
            return Ok(vec![]);
        }

        let subject_types: Vec<String> = subjects.iter().map(|s| s.kind().to_string()).collect();
        let subject_ids: Vec<String> = subjects.iter().map(|s| s.id_string()).collect();
        let context_types: Vec<String> = contexts
            .iter()
            .map(|c| c.context_type.as_str().to_string())
            .collect();
        let context_ids: Vec<String> = contexts.iter().map(Self::context_id_column).collect();

        let rows = sqlx::query(
            r#"
            SELECT subject_type, subject_id, permission_key, allowed,
                   context_type, context_id, updated_at
            FROM contextual_permissions
            WHERE (subject_type, subject_id) IN (SELECT * FROM UNNEST($1::text[], $2::text[]))
              AND (context_type, context_id) IN (SELECT * FROM UNNEST($3::text[], $4::text[]))
              AND ($5::text IS NULL OR permission_key = $5)
            "#,
        )
        .bind(&subject_types)
        .bind(&subject_ids)
        .bind(&context_types)
        .bind(&context_ids)
        .bind(permission_key)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::grant_from_row).collect()
    }

    async fn grants_of(&self, subject: &GrantSubject) -> Result<Vec<PermissionGrant>, DatabaseError> {
        let rows = sqlx::query(
            r#"
            SELECT subject_type, subject_id, permission_key, allowed,
                   context_type, context_id, updated_at
            FROM contextual_permissions
            WHERE subject_type = $1 AND subject_id = $2
            ORDER BY permission_key, context_type, context_id
            "#,
        )
        .bind(subject.kind())
        .bind(subject.id_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::grant_from_row).collect()
    }

    async fn upsert_grant(&self, grant: PermissionGrant) -> Result<PermissionGrant, DatabaseError> {
        if let GrantSubject::Group(group_id) = &grant.subject {
            if self.get_group(*group_id).await?.is_none() {
                return Err(DatabaseError::NotFound(format!("group {}", group_id)));
            }
        }

        let row = sqlx::query(
            r#"
            INSERT INTO contextual_permissions
                (subject_type, subject_id, permission_key, allowed, context_type, context_id, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            ON CONFLICT (subject_type, subject_id, permission_key, context_type, context_id)
            DO UPDATE SET allowed = EXCLUDED.allowed, updated_at = NOW()
            RETURNING subject_type, subject_id, permission_key, allowed,
                      context_type, context_id, updated_at
            "#,
        )
        .bind(grant.subject.kind())
        .bind(grant.subject.id_string())
        .bind(&grant.permission_key)
        .bind(grant.allowed)
        .bind(grant.context.context_type.as_str())
        .bind(Self::context_id_column(&grant.context))
        .fetch_one(&self.pool)
        .await?;

        Self::grant_from_row(&row)
    }

    async fn delete_grant(
        &self,
        subject: &GrantSubject,
        permission_key: &str,
        context: &PermissionContext,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            r#"
            DELETE FROM contextual_permissions
            WHERE subject_type = $1 AND subject_id = $2 AND permission_key = $3
              AND context_type = $4 AND context_id = $5
            "#,
        )
        .bind(subject.kind())
        .bind(subject.id_string())
        .bind(permission_key)
        .bind(context.context_type.as_str())
        .bind(Self::context_id_column(context))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn create_group(&self, group: NewGroup) -> Result<UserGroup, DatabaseError> {
        let duplicate: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM user_groups
            WHERE LOWER(name) = LOWER($1)
              AND institution_id IS NOT DISTINCT FROM $2
              AND school_id IS NOT DISTINCT FROM $3
            "#,
        )
        .bind(&group.name)
        .bind(&group.institution_id)
        .bind(&group.school_id)
        .fetch_one(&self.pool)
        .await?;
        if duplicate.0 > 0 {
            return Err(DatabaseError::Conflict(format!(
                "group '{}' already exists in this scope",
                group.name
            )));
        }

        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO user_groups
                (id, name, description, institution_id, school_id, is_active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW(), NOW())
            "#,
        )
        .bind(id)
        .bind(&group.name)
        .bind(&group.description)
        .bind(&group.institution_id)
        .bind(&group.school_id)
        .bind(group.is_active)
        .execute(&self.pool)
        .await?;

        self.get_group(id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("group {}", id)))
    }

    async fn get_group(&self, group_id: Uuid) -> Result<Option<UserGroup>, DatabaseError> {
        let sql = format!("SELECT {} FROM user_groups g WHERE g.id = $1", GROUP_COLUMNS);
        let group = sqlx::query_as::<_, UserGroup>(&sql)
            .bind(group_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(group)
    }

    async fn list_groups(&self, filter: &GroupFilter) -> Result<Vec<UserGroup>, DatabaseError> {
        let search = filter
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| format!("%{}%", s.replace('%', "\\%").replace('_', "\\_")));

        let sql = format!(
            r#"
            SELECT {}
            FROM user_groups g
            WHERE ($1::text IS NULL OR g.institution_id = $1)
              AND ($2::text IS NULL OR g.school_id = $2)
              AND ($3::bool IS NULL OR g.is_active = $3)
              AND ($4::text IS NULL OR g.name ILIKE $4 OR g.description ILIKE $4)
            ORDER BY g.name, g.id
            "#,
            GROUP_COLUMNS
        );

        let groups = sqlx::query_as::<_, UserGroup>(&sql)
            .bind(&filter.institution_id)
            .bind(&filter.school_id)
            .bind(filter.is_active)
            .bind(search)
            .fetch_all(&self.pool)
            .await?;
        Ok(groups)
    }

    async fn update_group(&self, group_id: Uuid, update: GroupUpdate) -> Result<Option<UserGroup>, DatabaseError> {
        if let Some(name) = &update.name {
            let taken: (i64,) = sqlx::query_as(
                r#"
                SELECT COUNT(*) FROM user_groups g
                JOIN user_groups cur ON cur.id = $1
                WHERE g.id <> $1
                  AND LOWER(g.name) = LOWER($2)
                  AND g.institution_id IS NOT DISTINCT FROM cur.institution_id
                  AND g.school_id IS NOT DISTINCT FROM cur.school_id
                "#,
            )
            .bind(group_id)
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
            if taken.0 > 0 {
                return Err(DatabaseError::Conflict(format!("group '{}' already exists in this scope", name)));
            }
        }

        let updated = sqlx::query(
            r#"
            UPDATE user_groups
            SET name = COALESCE($2, name),
                description = COALESCE($3, description),
                is_active = COALESCE($4, is_active),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(group_id)
        .bind(&update.name)
        .bind(&update.description)
        .bind(update.is_active)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Ok(None);
        }
        self.get_group(group_id).await
    }

    async fn delete_group(&self, group_id: Uuid) -> Result<bool, DatabaseError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM contextual_permissions WHERE subject_type = 'group' AND subject_id = $1")
            .bind(group_id.to_string())
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM group_members WHERE group_id = $1")
            .bind(group_id)
            .execute(&mut *tx)
            .await?;
        let deleted = sqlx::query("DELETE FROM user_groups WHERE id = $1")
            .bind(group_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok(deleted > 0)
    }

    async fn add_member(
        &self,
        group_id: Uuid,
        user_id: Uuid,
        role: &str,
        added_by: Option<Uuid>,
    ) -> Result<GroupMember, DatabaseError> {
        if self.get_group(group_id).await?.is_none() {
            return Err(DatabaseError::NotFound(format!("group {}", group_id)));
        }

        let inserted = sqlx::query_as::<_, GroupMember>(
            r#"
            INSERT INTO group_members (group_id, user_id, role, added_by, joined_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (group_id, user_id) DO NOTHING
            RETURNING group_id, user_id, role, added_by, joined_at
            "#,
        )
        .bind(group_id)
        .bind(user_id)
        .bind(role)
        .bind(added_by)
        .fetch_optional(&self.pool)
        .await?;

        inserted.ok_or_else(|| DatabaseError::Conflict(format!("user {} is already a member", user_id)))
    }

    async fn remove_member(&self, group_id: Uuid, user_id: Uuid) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM group_members WHERE group_id = $1 AND user_id = $2")
            .bind(group_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_members(&self, group_id: Uuid) -> Result<Vec<GroupMember>, DatabaseError> {
        if self.get_group(group_id).await?.is_none() {
            return Err(DatabaseError::NotFound(format!("group {}", group_id)));
        }

        let members = sqlx::query_as::<_, GroupMember>(
            r#"
            SELECT group_id, user_id, role, added_by, joined_at
            FROM group_members
            WHERE group_id = $1
            ORDER BY joined_at, user_id
            "#,
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_context_is_stored_as_empty_id() {
        assert_eq!(PgPermissionStore::context_id_column(&PermissionContext::global()), "");
        assert_eq!(PgPermissionStore::context_id_column(&PermissionContext::school("9")), "9");
    }
}
