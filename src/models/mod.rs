pub mod document;
pub mod enums;
pub mod processing;

pub use document::*;
pub use processing::*;
