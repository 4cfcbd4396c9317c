//! Type definitions for ledger storage.

mod ids;
mod records;
mod tokens;

// Re-export all types from submodules
pub use ids::*;
pub use records::*;
pub use tokens::*;
