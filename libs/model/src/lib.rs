//! # drift-model
//!
//! Shared data model for the driftd control plane.
//!
//! Everything the engine passes between components lives here: resource
//! identities and descriptors, immutable desired-state trees, live
//! snapshots, application records and sync policy, sync operation
//! lifecycle records, health statuses, rollout state, and analysis
//! types. The crate is deliberately logic-light: components own the
//! behavior, this crate owns the vocabulary.

mod analysis;
mod application;
mod health;
mod resource;
mod rollout;
mod sync;

pub use analysis::*;
pub use application::*;
pub use health::*;
pub use resource::*;
pub use rollout::*;
pub use sync::*;
