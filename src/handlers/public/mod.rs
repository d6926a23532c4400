// handlers/public/mod.rs - Public handlers (no authentication required)
//
// Service metadata, liveness and access-token refresh. Nothing here passes
// through the response cache.
pub mod root;
pub mod sessions;

pub use root::{health, root};
