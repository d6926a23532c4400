//! Cache key helpers and TTL presets.

use serde::Serialize;
use sha2::{Digest, Sha256};
pub mod ttl {
    use std::time::Duration;

    pub const VERY_SHORT: Duration = Duration::from_secs(60);
    pub const SHORT: Duration = Duration::from_secs(300);
    pub const MEDIUM: Duration = Duration::from_secs(900);
    pub const LONG: Duration = Duration::from_secs(3600);
    pub const VERY_LONG: Duration = Duration::from_secs(86_400);
    pub const STATIC: Duration = Duration::from_secs(604_800);
}

/// Full key of the set tracking every key stored with `tag`.
pub fn tag_set(prefix: &str, tag: &str) -> String {
    format!("{}tag:{}", prefix, tag)
}

pub fn user(user_id: impl std::fmt::Display) -> String {
    format!("user:{}", user_id)
}

pub fn user_permissions(user_id: impl std::fmt::Display, context: impl std::fmt::Display) -> String {
    format!("user:{}:permissions:{}", user_id, context)
}

pub fn group(group_id: impl std::fmt::Display) -> String {
    format!("group:{}", group_id)
}

pub fn catalog() -> String {
    "permissions:catalog".to_string()
}

/// Key of a filtered listing. Filters are hashed so that the key length stays
/// bounded; field order does not matter because `serde_json` maps are sorted.
pub fn list<F: Serialize>(resource: &str, filters: &F) -> String {
    let canonical = serde_json::to_value(filters)
        .map(|v| v.to_string())
        .unwrap_or_default();
    format!("list:{}:{}", resource, short_hash(&canonical))
}

/// First 16 hex chars of the SHA-256 of `input`.
pub fn short_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    digest.iter().take(8).map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn list_keys_ignore_field_order() {
        let a = list("groups", &json!({"institution_id": "1", "is_active": true}));
        let b = list("groups", &json!({"is_active": true, "institution_id": "1"}));
        assert_eq!(a, b);
        assert!(a.starts_with("list:groups:"));
        assert_eq!(a.len(), "list:groups:".len() + 16);

        let c = list("groups", &json!({"institution_id": "2"}));
        assert_ne!(a, c);
    }

    #[test]
    fn presets_match_documented_values() {
        assert_eq!(ttl::VERY_SHORT.as_secs(), 60);
        assert_eq!(ttl::MEDIUM.as_secs(), 900);
        assert_eq!(ttl::STATIC.as_secs(), 604_800);
        assert_eq!(tag_set("portal_cache:", "groups"), "portal_cache:tag:groups");
    }
}
