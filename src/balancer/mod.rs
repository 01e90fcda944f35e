//! Partition ownership balancing.
//!
//! Each balancing round an instance classifies every partition as claimable,
//! owned by itself, or actively owned by another instance, then adjusts its
//! claim set by at most one stolen partition per round. Convergence takes
//! multiple rounds; the only coordination substrate is the checkpoint
//! store's per-record conditional writes.

mod manager;

pub use manager::OwnershipManager;
