//! HTTP tracker announce and peer discovery.
//!
//! Builds announce URLs with raw-byte percent encoding, parses bencoded
//! responses with compact peer lists and fails over across announce URLs.

pub mod client;
pub mod manager;
pub mod types;

// Re-export public API
pub use client::HttpTrackerClient;
pub use manager::TrackerManager;
pub use types::{AnnounceRequest, AnnounceResponse, TrackerClient};
