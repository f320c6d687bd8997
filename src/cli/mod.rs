//! Terminal output of the `netsplit` binary
//!
//! The library reports progress through a callback; this module turns it
//! into a bar counting segmented partitions.

pub mod progress;

pub use progress::ProgressManager;
