//! Core types and constants shared by the tag, anchor and locator sides

pub mod types;
pub mod constants;

pub use types::*;
pub use constants::*;
