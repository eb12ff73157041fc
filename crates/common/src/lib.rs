/// esxi-native common library
///
/// Resource models, the unified error type and small helpers shared by the provider crates.

pub mod errors;
pub mod models;
pub mod utils;

// Re-export common types
pub use errors::{Error, Result};
