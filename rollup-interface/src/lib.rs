//! This crate defines the core types and interfaces shared by every component of the optimistic
//! rollup: the transition wire format, the committed entity layout, the Merkle commitment
//! scheme, signature recovery and the boundary to external collaborators (asset registry,
//! strategy adapters and asset custody).

#![deny(missing_docs)]

mod state_machine;
pub use state_machine::*;
