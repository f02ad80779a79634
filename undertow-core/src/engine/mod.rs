//! Swarm orchestrator built on the actor model
//!
//! A single actor task owns the peer registry, local progress and the
//! content buffer. Workers talk to it through channels and callers through
//! a cloneable [`SwarmHandle`].

pub mod actor;
pub mod commands;
mod core;
pub mod handle;
pub mod registry;

pub use actor::{SwarmSetup, spawn_swarm};
pub use commands::{PeerSummary, SwarmCommand, SwarmProgress};
pub use handle::SwarmHandle;
pub use registry::{PeerEntry, PeerRegistry};
