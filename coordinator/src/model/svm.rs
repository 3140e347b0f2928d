use super::Model;
use crate::{
    aggregation::WeightDelta,
    dataset::{Dataset, Label},
};

/// A linear support vector machine trained on the hinge loss with L2 regularization.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearSvm {
    lambda_reg: f32,
    weights: Vec<f32>,
}

impl LinearSvm {
    /// Creates a new `LinearSvm` with every weight set to zero.
    ///
    /// # Arguments
    /// * `lambda_reg` - The regularization strength.
    /// * `dim` - The amount of weights.
    pub fn new(lambda_reg: f32, dim: usize) -> Self {
        Self {
            lambda_reg,
            weights: vec![0.0; dim],
        }
    }

    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    /// The signed distance of `sample` to the decision boundary, up to a norm.
    ///
    /// Features beyond the model's dimension contribute nothing.
    pub fn margin(&self, sample: &[(u32, f32)]) -> f32 {
        sample
            .iter()
            .filter_map(|&(i, x)| self.weights.get(i as usize).map(|w| w * x))
            .sum()
    }

    fn regularization(&self) -> f32 {
        let norm: f32 = self.weights.iter().map(|w| w * w).sum();
        self.lambda_reg / 2.0 * norm
    }
}

impl Model for LinearSvm {
    fn dimension(&self) -> usize {
        self.weights.len()
    }

    fn update_weights(&mut self, delta: &WeightDelta) {
        for (i, value) in delta.iter() {
            if let Some(w) = self.weights.get_mut(i as usize) {
                *w += value;
            }
        }
    }

    fn loss(&self, data: &Dataset) -> f32 {
        if data.is_empty() {
            return self.regularization();
        }

        let hinge: f32 = data
            .samples()
            .iter()
            .zip(data.labels())
            .map(|(x, &y)| (1.0 - y as f32 * self.margin(x)).max(0.0))
            .sum();

        hinge / data.len() as f32 + self.regularization()
    }

    fn predict(&self, data: &Dataset) -> Vec<Label> {
        data.samples()
            .iter()
            .map(|x| if self.margin(x) >= 0.0 { 1 } else { -1 })
            .collect()
    }
}
