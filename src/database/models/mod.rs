pub mod group;

pub use group::{GroupFilter, GroupMember, GroupUpdate, NewGroup, UserGroup};
