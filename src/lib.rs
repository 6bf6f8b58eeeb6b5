//! ARP Run Coordinator workspace crate
//!
//! Re-exports [`arp_coordinator`] so workspace-level tests and benchmarks
//! have one import path.

pub use arp_coordinator::*;
