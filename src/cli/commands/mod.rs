pub mod cache;
pub mod permissions;
pub mod sessions;
pub mod token;
