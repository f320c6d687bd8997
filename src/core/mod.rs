//! Core library modules for netsplit
//!
//! One module per pipeline stage, plus the shared network and demand models.

pub mod assignment;
pub mod config;
pub mod demand;
pub mod error;
pub mod metadata;
pub mod network;
pub mod partitioner;
pub mod pipeline;
pub mod reconcile;
pub mod segment;
pub mod subnet;
pub mod weights;

// Re-export main types for internal use
pub use pipeline::{Pipeline, RunOutcome, RunSummary};
