/// Decides when training should halt by watching the validation loss.
///
/// Training stops once the loss failed to strictly improve on the best seen value
/// for more than `persistence` consecutive rounds.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    persistence: usize,
    best: f32,
    rounds_since_best: usize,
    history: Vec<f32>,
}

impl EarlyStopping {
    /// Creates a new `EarlyStopping` monitor.
    ///
    /// # Arguments
    /// * `persistence` - The amount of consecutive non-improving rounds tolerated.
    pub fn new(persistence: usize) -> Self {
        Self {
            persistence,
            best: f32::INFINITY,
            rounds_since_best: 0,
            history: Vec::new(),
        }
    }

    /// Records a new validation loss.
    ///
    /// # Arguments
    /// * `loss` - The loss of the latest round, ties and `NaN` count as non-improving.
    ///
    /// # Returns
    /// `true` if training should stop.
    pub fn evaluate(&mut self, loss: f32) -> bool {
        self.history.push(loss);

        if loss < self.best {
            self.best = loss;
            self.rounds_since_best = 0;
            return false;
        }

        self.rounds_since_best += 1;
        self.rounds_since_best > self.persistence
    }

    /// The lowest loss seen so far, if any.
    pub fn best(&self) -> Option<f32> {
        self.best.is_finite().then_some(self.best)
    }

    pub fn rounds_since_best(&self) -> usize {
        self.rounds_since_best
    }

    pub fn history(&self) -> &[f32] {
        &self.history
    }
}
