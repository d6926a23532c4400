use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::error::PermissionError;

/// Scope a grant applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextType {
    Global,
    Institution,
    School,
}

impl ContextType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextType::Global => "global",
            ContextType::Institution => "institution",
            ContextType::School => "school",
        }
    }
}

impl FromStr for ContextType {
    type Err = PermissionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "global" => Ok(ContextType::Global),
            "institution" => Ok(ContextType::Institution),
            "school" => Ok(ContextType::School),
            other => Err(PermissionError::InvalidContext(format!(
                "context_type must be global, institution or school (got '{}')",
                other
            ))),
        }
    }
}

/// A validated `(context_type, context_id)` pair.
///
/// `Global` never carries an id; `Institution` and `School` always do.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PermissionContext {
    pub context_type: ContextType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,
}

impl PermissionContext {
    pub fn global() -> Self {
        Self {
            context_type: ContextType::Global,
            context_id: None,
        }
    }

    pub fn institution(id: impl Into<String>) -> Self {
        Self {
            context_type: ContextType::Institution,
            context_id: Some(id.into()),
        }
    }

    pub fn school(id: impl Into<String>) -> Self {
        Self {
            context_type: ContextType::School,
            context_id: Some(id.into()),
        }
    }

    /// Build a context from loosely-typed request input. A missing type means global,
    /// and blank ids are treated as absent.
    pub fn parse(context_type: Option<&str>, context_id: Option<&str>) -> Result<Self, PermissionError> {
        let context_type = match context_type.map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) => raw.parse::<ContextType>()?,
            None => ContextType::Global,
        };
        let context_id = context_id
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        match (context_type, context_id) {
            (ContextType::Global, None) => Ok(Self::global()),
            (ContextType::Global, Some(id)) => Err(PermissionError::InvalidContext(format!(
                "global context does not take a context_id (got '{}')",
                id
            ))),
            (ctx, None) => Err(PermissionError::InvalidContext(format!(
                "{} context requires a context_id",
                ctx.as_str()
            ))),
            (ctx, Some(id)) => Ok(Self {
                context_type: ctx,
                context_id: Some(id),
            }),
        }
    }

    pub fn is_global(&self) -> bool {
        self.context_type == ContextType::Global
    }
}

impl Default for PermissionContext {
    fn default() -> Self {
        Self::global()
    }
}

impl fmt::Display for PermissionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.context_id {
            Some(id) => write!(f, "{}:{}", self.context_type.as_str(), id),
            None => f.write_str(self.context_type.as_str()),
        }
    }
}

/// Where a grant came from. Declaration order is precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantSource {
    Direct,
    Group,
    Role,
}

impl GrantSource {
    pub const PRECEDENCE: [GrantSource; 3] = [GrantSource::Direct, GrantSource::Group, GrantSource::Role];

    pub fn as_str(&self) -> &'static str {
        match self {
            GrantSource::Direct => "direct",
            GrantSource::Group => "group",
            GrantSource::Role => "role",
        }
    }
}

/// Holder of a grant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum GrantSubject {
    User(Uuid),
    Group(Uuid),
    Role(String),
}

impl GrantSubject {
    pub fn source(&self) -> GrantSource {
        match self {
            GrantSubject::User(_) => GrantSource::Direct,
            GrantSubject::Group(_) => GrantSource::Group,
            GrantSubject::Role(_) => GrantSource::Role,
        }
    }

    /// Discriminator persisted in the `subject_type` column.
    pub fn kind(&self) -> &'static str {
        match self {
            GrantSubject::User(_) => "user",
            GrantSubject::Group(_) => "group",
            GrantSubject::Role(_) => "role",
        }
    }

    pub fn id_string(&self) -> String {
        match self {
            GrantSubject::User(id) | GrantSubject::Group(id) => id.to_string(),
            GrantSubject::Role(name) => name.clone(),
        }
    }

    pub fn from_parts(kind: &str, id: &str) -> Option<Self> {
        match kind {
            "user" => Uuid::parse_str(id).ok().map(GrantSubject::User),
            "group" => Uuid::parse_str(id).ok().map(GrantSubject::Group),
            "role" => Some(GrantSubject::Role(id.to_string())),
            _ => None,
        }
    }
}

/// A stored allow/deny decision for one key at one context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionGrant {
    pub subject: GrantSubject,
    pub permission_key: String,
    pub allowed: bool,
    #[serde(flatten)]
    pub context: PermissionContext,
    pub updated_at: DateTime<Utc>,
}

impl PermissionGrant {
    pub fn new(subject: GrantSubject, permission_key: impl Into<String>, allowed: bool, context: PermissionContext) -> Self {
        Self {
            subject,
            permission_key: permission_key.into(),
            allowed,
            context,
            updated_at: Utc::now(),
        }
    }

    pub fn source(&self) -> GrantSource {
        self.subject.source()
    }
}

/// Outcome of resolving one key for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub permission_key: String,
    pub allowed: bool,
    /// `None` when no source had an opinion and the key is denied by default.
    pub source: Option<GrantSource>,
    /// Context the deciding grant lives in.
    pub decided_at: PermissionContext,
    /// True when the requested context had nothing and global decided.
    pub fell_back: bool,
}

/// Minimal identity the resolver needs about a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: Uuid,
    pub role: String,
}

impl Principal {
    pub fn new(user_id: Uuid, role: impl Into<String>) -> Self {
        Self {
            user_id,
            role: role.into(),
        }
    }
}
