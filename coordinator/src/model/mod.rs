mod svm;

pub use svm::LinearSvm;

use crate::{
    aggregation::WeightDelta,
    dataset::{Dataset, Label},
};

/// The coordinator's copy of the trained model.
///
/// Workers compute the deltas, the coordinator only folds them in and evaluates.
pub trait Model {
    /// The amount of weights in this model.
    fn dimension(&self) -> usize;

    /// Adds an aggregated delta to the current weights.
    ///
    /// # Arguments
    /// * `delta` - The sparse sum of one or more worker deltas.
    fn update_weights(&mut self, delta: &WeightDelta);

    /// Computes the training objective over a dataset.
    ///
    /// # Arguments
    /// * `data` - The samples to evaluate on, usually the validation set.
    ///
    /// # Returns
    /// The mean loss plus the regularization term.
    fn loss(&self, data: &Dataset) -> f32;

    /// Predicts a label for each sample of `data`.
    fn predict(&self, data: &Dataset) -> Vec<Label>;
}
