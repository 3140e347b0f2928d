use serde::{Deserialize, Serialize};

/// Wire-level registration payload for a single worker node.
///
/// Sent once per worker before training starts, it tells the worker who its
/// coordinator and peers are and which global samples are held out for validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInfo {
    /// Identifier the worker must use on every submission.
    pub worker_id: usize,
    pub coordinator_address: String,
    /// Every other worker of the run, the receiver itself excluded.
    pub node_addresses: Vec<String>,
    pub val_indices: Vec<usize>,
}
