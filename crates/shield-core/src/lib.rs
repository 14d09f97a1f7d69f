//! shield/crates/shield-core/src/lib.rs
//!
//! Domain models, ports and record-set discipline shared by every Shield crate.

pub mod error;
pub mod models;
pub mod records;
pub mod traits;

// Re-exporting for easier access in other crates
pub use error::*;
pub use models::*;
pub use records::*;
pub use traits::*;
