//! # drift-id
//!
//! Stable ID types, parsing, and validation for the driftd control plane.
//!
//! ## Design Principles
//!
//! - IDs are stable and system-generated; application names are
//!   user-controlled labels and never substitute for an ID
//! - All IDs have a canonical string representation with strict parsing
//! - IDs support roundtrip serialization (parse → format → parse)
//! - IDs are typed to prevent mixing different record types
//!
//! ## ID Format
//!
//! All record IDs use a prefixed format: `{prefix}_{ulid}`
//!
//! Examples:
//! - `app_01HV4Z2WQXKJNM8GPQY6VBKC3D`
//! - `sync_01HV4Z3MXNKPQR9HSTZ7WCLD4E`
//! - `ro_01HV4Z4NYPLTRS0JTUA8XDME5F`
//!
//! This format provides:
//! - Type safety (prefix indicates record type)
//! - Sortability (ULID is time-ordered, so operation histories sort by ID)
//! - Uniqueness (ULID has 80 bits of randomness)
//! - Human readability (clear prefixes)

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;
