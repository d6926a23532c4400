pub mod catalog;

pub use catalog::get as catalog;
