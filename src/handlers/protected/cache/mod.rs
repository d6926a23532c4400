pub mod admin;

pub use admin::{clear, health, invalidate, stats};
