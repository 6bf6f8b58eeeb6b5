//! NodeRun storage
//!
//! The store owns identity, versioning and transition legality. Every write
//! to an existing record is a compare-and-swap on its `version`: the caller
//! passes the version it read and the snapshot it wants committed, and the
//! store either commits `version + 1` or reports a conflict.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;

use crate::error::{CoordinatorError, CoordinatorResult};
use crate::types::{NodeRun, NodeRunId};

/// Trait for NodeRun storage backends
#[async_trait]
pub trait NodeRunStore: Send + Sync {
    /// Insert a new record; fails `AlreadyExists` if the id is taken
    async fn put(&self, node_run: NodeRun) -> CoordinatorResult<NodeRun>;

    /// Read the latest committed snapshot
    async fn get(&self, node_run_id: &NodeRunId) -> CoordinatorResult<NodeRun>;

    /// Replace the record if its version still equals `expected_version`.
    ///
    /// On commit the store sets `version = expected_version + 1` and
    /// `updated_at = now` on `next` and returns it.
    async fn compare_and_swap(
        &self,
        node_run_id: &NodeRunId,
        expected_version: u64,
        next: NodeRun,
    ) -> CoordinatorResult<NodeRun>;

    /// Number of stored records
    async fn len(&self) -> usize;

    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Sharded in-memory store. Each record is locked independently, so writes to
/// unrelated NodeRuns never wait on each other.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNodeRunStore {
    records: Arc<DashMap<NodeRunId, NodeRun>>,
}

impl InMemoryNodeRunStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// Check that `next` is a legal successor of `current`
fn validate_successor(current: &NodeRun, next: &NodeRun) -> CoordinatorResult<()> {
    if next.node_run_id != current.node_run_id {
        return Err(CoordinatorError::invalid_request(format!(
            "cannot replace NodeRun {} with a snapshot of {}",
            current.node_run_id, next.node_run_id
        )));
    }
    if next.spec != current.spec
        || next.run_id != current.run_id
        || next.parent_node_run_id != current.parent_node_run_id
        || next.created_at != current.created_at
    {
        return Err(CoordinatorError::invalid_request(format!(
            "NodeRun {} spec and linkage are immutable",
            current.node_run_id
        )));
    }
    if !current.state.can_transition_to(next.state) {
        return Err(CoordinatorError::InvalidState {
            node_run_id: current.node_run_id.to_string(),
            reason: format!("illegal transition '{}' -> '{}'", current.state, next.state),
        });
    }
    if current.outputs.is_some() && next.outputs != current.outputs {
        return Err(CoordinatorError::conflict(
            current.node_run_id.as_str(),
            "outputs are already set",
        ));
    }
    Ok(())
}

#[async_trait]
impl NodeRunStore for InMemoryNodeRunStore {
    async fn put(&self, node_run: NodeRun) -> CoordinatorResult<NodeRun> {
        match self.records.entry(node_run.node_run_id.clone()) {
            Entry::Occupied(_) => Err(CoordinatorError::AlreadyExists {
                entity: "NodeRun",
                id: node_run.node_run_id.to_string(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(node_run.clone());
                Ok(node_run)
            }
        }
    }

    async fn get(&self, node_run_id: &NodeRunId) -> CoordinatorResult<NodeRun> {
        self.records
            .get(node_run_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| CoordinatorError::node_run_not_found(node_run_id.as_str()))
    }

    async fn compare_and_swap(
        &self,
        node_run_id: &NodeRunId,
        expected_version: u64,
        mut next: NodeRun,
    ) -> CoordinatorResult<NodeRun> {
        // Holding the entry guard makes check-then-write atomic for this record only.
        let mut entry = self
            .records
            .get_mut(node_run_id)
            .ok_or_else(|| CoordinatorError::node_run_not_found(node_run_id.as_str()))?;

        let current = entry.value();
        if current.version != expected_version {
            return Err(CoordinatorError::version_conflict(
                node_run_id.as_str(),
                expected_version,
                current.version,
            ));
        }
        validate_successor(current, &next)?;

        next.version = expected_version + 1;
        next.updated_at = Utc::now();
        *entry.value_mut() = next.clone();
        Ok(next)
    }

    async fn len(&self) -> usize {
        self.records.len()
    }
}
