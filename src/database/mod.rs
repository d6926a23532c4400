pub mod manager;
pub mod memory;
pub mod models;
pub mod postgres;
pub mod store;

pub use manager::{DatabaseError, DatabaseManager};
pub use memory::MemoryPermissionStore;
pub use postgres::PgPermissionStore;
pub use store::PermissionStore;
