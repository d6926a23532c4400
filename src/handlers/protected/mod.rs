// handlers/protected/mod.rs - Protected handlers (JWT authentication required)
//
// Security Level: valid access token whose session is still live
// Route Prefix: /api/*
// Middleware: require_auth (outer) then response_cache (inner)
//
// Group and grant management is checked per request against
// canManageInstitutionUsers at the affected scope. Session and cache
// administration is restricted by role.
pub mod cache;
pub mod groups;
pub mod permissions;
pub mod roles;
pub mod sessions;
pub mod users;
