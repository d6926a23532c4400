// handlers/mod.rs - two handler tiers
//
// Public (no auth) → Protected (JWT auth + live session, response cache)
pub mod public;
pub mod protected;
