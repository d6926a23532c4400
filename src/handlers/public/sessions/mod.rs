pub mod refresh;

pub use refresh::post as refresh;
