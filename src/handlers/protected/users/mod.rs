pub mod permissions;

pub use permissions::{
    check as permissions_check, contextual_delete as permissions_contextual_delete,
    contextual_get as permissions_contextual_get, contextual_put as permissions_contextual_put,
    effective as permissions_effective, matrix as permissions_matrix,
};
