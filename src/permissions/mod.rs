//! Contextual permission resolution.
//!
//! A permission is looked up for a user at a [`PermissionContext`]. Grants come
//! from three tiers (direct user grants, the user's groups, the user's role)
//! and the most specific tier with an opinion decides.

pub mod catalog;
pub mod error;
pub mod matrix;
pub mod resolver;
pub mod types;

pub use catalog::UserRole;
pub use error::PermissionError;
pub use matrix::{PermissionMatrix, PermissionRow};
pub use resolver::PermissionResolver;
pub use types::{ContextType, GrantSource, GrantSubject, PermissionContext, PermissionGrant, Principal, Resolution};
