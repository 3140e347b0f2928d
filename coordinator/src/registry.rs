use comms::specs::NetworkInfo;

use crate::error::{CoordinatorErr, Result};

/// The fixed set of workers taking part in a run, built once at startup.
///
/// A worker's id is its position in the configured address list.
#[derive(Debug, Clone)]
pub struct NodeRegistry {
    coordinator_address: String,
    workers: Vec<String>,
    val_indices: Vec<usize>,
}

impl NodeRegistry {
    /// Creates a new `NodeRegistry`.
    ///
    /// # Arguments
    /// * `coordinator_address` - The address workers should reach the coordinator at.
    /// * `workers` - The worker addresses, in id order.
    /// * `val_indices` - The sample positions held out for validation.
    ///
    /// # Returns
    /// A new registry or an error if there are no workers.
    pub fn new(
        coordinator_address: String,
        workers: Vec<String>,
        val_indices: Vec<usize>,
    ) -> Result<Self> {
        if workers.is_empty() {
            return Err(CoordinatorErr::InvalidConfig(
                "a run needs at least one worker".into(),
            ));
        }

        Ok(Self {
            coordinator_address,
            workers,
            val_indices,
        })
    }

    pub fn coordinator_address(&self) -> &str {
        &self.coordinator_address
    }

    pub fn workers(&self) -> &[String] {
        &self.workers
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Every worker address except the given worker's own.
    pub fn peers_of(&self, worker_id: usize) -> Vec<String> {
        self.workers
            .iter()
            .enumerate()
            .filter(|&(id, _)| id != worker_id)
            .map(|(_, addr)| addr.clone())
            .collect()
    }

    /// Builds the registration message for a single worker.
    pub fn network_info(&self, worker_id: usize) -> NetworkInfo {
        NetworkInfo {
            worker_id,
            coordinator_address: self.coordinator_address.clone(),
            node_addresses: self.peers_of(worker_id),
            val_indices: self.val_indices.clone(),
        }
    }
}
