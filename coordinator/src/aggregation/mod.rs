mod delta;
mod error;
mod state;

pub use delta::WeightDelta;
pub use error::AggregationErr;
pub use state::{AggregationState, Counters, WaitOutcome};
