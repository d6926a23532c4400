pub mod admin;
pub mod session;

pub use admin::{cleanup, stats, terminate_all, user_sessions};
pub use session::{delete, logout, logout_all, my_sessions};
