//! Configuration inputs for the tree engine and the group coordinator.
//!
//! `MAX_FILLED`/`MIN_FILLED` are configuration inputs rather than hardcoded
//! constants; this also bundles the coordinator's commit-delay and the
//! updater's checkpoint cadence.

use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TreeConfig {
    pub min_filled: usize,
    pub max_filled: usize,
}

impl TreeConfig {
    pub fn new(min_filled: usize, max_filled: usize) -> TreeConfig {
        assert!(min_filled > 0, "min_filled must be positive");
        assert!(
            max_filled >= 2 * min_filled,
            "max_filled must allow a split to leave both halves at or above min_filled"
        );
        TreeConfig { min_filled, max_filled }
    }
}

impl Default for TreeConfig {
    fn default() -> Self {
        TreeConfig::new(40, 80)
    }
}

/// Coordinator-side timing knobs.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GroupConfig {
    pub tree: TreeConfig,
    /// How long to wait before re-checking the database's committed
    /// sequence in `delayed_commit`.
    pub commit_delay: Duration,
    /// How many documents the updater processes before sending a
    /// `partial_update` to the coordinator.
    pub checkpoint_documents: u64,
    /// How long the updater runs before sending a `partial_update`
    /// regardless of document count.
    pub checkpoint_interval: Duration,
}

impl Default for GroupConfig {
    fn default() -> Self {
        GroupConfig {
            tree: TreeConfig::default(),
            commit_delay: Duration::from_secs(1),
            checkpoint_documents: 1000,
            checkpoint_interval: Duration::from_secs(5),
        }
    }
}
