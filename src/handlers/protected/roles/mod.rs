pub mod permissions;

pub use permissions::{list as roles_list, put as permissions_put};
