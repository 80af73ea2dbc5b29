//! Shard graph queries over a single topology snapshot.
//!
//! Snapshots are plain slices of [`Shard`]s fetched fresh for every decision;
//! nothing here mutates or caches them.

use std::collections::HashSet;

use crate::types::Shard;

/// Shards that no other shard names as a parent.
///
/// These are the currently open shards, in listing order.
pub fn leaf_shards(shards: &[Shard]) -> Vec<&Shard> {
    let has_children: HashSet<&str> = shards.iter().flat_map(Shard::parents).collect();

    shards
        .iter()
        .filter(|s| !has_children.contains(s.shard_id()))
        .collect()
}

/// Shards that list `completed` as either parent.
pub fn children_of<'a>(completed: &str, shards: &'a [Shard]) -> Vec<&'a Shard> {
    shards.iter().filter(|s| s.has_parent(completed)).collect()
}

/// Reader bookkeeping owned by the consumer's monitor loop.
///
/// Tracks which shards have had a reader launched and which of those have
/// drained, so that every shard gets at most one reader and a merged child
/// waits for both of its parents.
#[derive(Debug, Default)]
pub struct ShardTracker {
    launched: HashSet<String>,
    completed: HashSet<String>,
}

impl ShardTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a reader launch. Returns false if the shard already had one.
    pub fn mark_launched(&mut self, shard_id: &str) -> bool {
        self.launched.insert(shard_id.to_string())
    }

    pub fn mark_completed(&mut self, shard_id: &str) {
        self.completed.insert(shard_id.to_string());
    }

    pub fn is_launched(&self, shard_id: &str) -> bool {
        self.launched.contains(shard_id)
    }

    pub fn is_completed(&self, shard_id: &str) -> bool {
        self.completed.contains(shard_id)
    }

    /// Number of readers launched that have not completed.
    pub fn active(&self) -> usize {
        self.launched.difference(&self.completed).count()
    }

    /// Whether `child` may start now.
    ///
    /// Every parent must either have drained or never have been read by this
    /// consumer (already closed when tailing began).
    pub fn parents_drained(&self, child: &Shard) -> bool {
        child
            .parents()
            .all(|p| self.completed.contains(p) || !self.launched.contains(p))
    }

    /// Children of `completed` that are ready to launch and have no reader yet.
    pub fn ready_children<'a>(&self, completed: &str, shards: &'a [Shard]) -> Vec<&'a Shard> {
        children_of(completed, shards)
            .into_iter()
            .filter(|child| !self.is_launched(child.shard_id()) && self.parents_drained(child))
            .collect()
    }
}
