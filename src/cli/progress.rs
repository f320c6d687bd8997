//! CLI-specific progress handling for netsplit
//!
//! Shows how many partitions have been segmented.

use indicatif::{ProgressBar, ProgressStyle};

/// Creates a progress bar counting partitions
pub fn create_progress_bar(total_parts: u64) -> ProgressBar {
    let pb = ProgressBar::new(total_parts);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} partitions {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    pb.set_style(style);
    pb
}

/// Progress manager for a partitioning run
pub struct ProgressManager {
    pub pb: ProgressBar,
}

impl ProgressManager {
    /// Create a new progress manager
    pub fn new(total_parts: u64, message: &str) -> Self {
        let pb = create_progress_bar(total_parts);

        // Print initial message to stderr
        eprintln!("{}", message);

        Self { pb }
    }
}
