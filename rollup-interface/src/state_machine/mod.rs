//! Defines types, traits, and helpers that are used by the core state-machine of the rollup.
//! Items in this module must be fully deterministic, since they are re-executed by
//! whoever verifies a dispute.
pub mod collaborators;
pub mod crypto;
pub mod entities;
pub mod events;
pub mod optimistic;
pub mod transition;
pub mod types;

#[cfg(feature = "mocks")]
pub mod mocks;

pub use types::*;
