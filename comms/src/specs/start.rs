use serde::{Deserialize, Serialize};

/// The hyperparameters broadcast to every worker to begin local SGD.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StartSpec {
    pub learning_rate: f32,
    pub lambda_reg: f32,
    pub epochs: usize,
    pub subset_size: usize,
    pub dim: usize,
}
