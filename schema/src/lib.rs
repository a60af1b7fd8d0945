//! Schema definitions for devguard
//!
//! This crate contains the shared data structures exchanged between the
//! devguard daemon, its process engine, and local clients. All types here
//! implement JSON Schema generation for external consumption, and serialize
//! with snake_case field names; the names are part of the wire contract.

pub mod envelope;
pub mod ports;
pub mod process;
pub mod protection;
pub mod spawn;
pub mod tools;

// Testing modules
#[cfg(test)]
mod json_roundtrip_tests;

// Re-export the wire types for convenience
pub use envelope::*;
pub use ports::*;
pub use process::*;
pub use protection::*;
pub use spawn::*;
pub use tools::*;

/// Current wall-clock timestamp in RFC3339 format.
///
/// Every wire-visible timestamp in a response is produced through this
/// helper so that timestamps within a single response share a clock.
pub fn current_timestamp() -> String {
    chrono::Local::now().to_rfc3339()
}
