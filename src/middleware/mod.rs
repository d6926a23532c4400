pub mod auth;
pub mod guard;
pub mod response;
pub mod response_cache;

pub use auth::{require_auth, AuthUser};
pub use guard::{require_permission, require_role, ScopeQuery, ADMIN_ROLES, MANAGE_USERS};
pub use response::{ApiResponse, ApiResult};
pub use response_cache::{response_cache, X_CACHE};
