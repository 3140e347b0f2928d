use std::{error::Error, fmt};

use crate::config::Mode;

/// Why an inbound call was rejected, a rejected call never changes the aggregation state.
#[derive(Debug, Clone, PartialEq)]
pub enum AggregationErr {
    UnknownWorker { worker_id: usize, workers: usize },
    IndexOutOfRange { index: u32, dim: usize },
    NonFiniteValue { index: u32 },
    DuplicateUpdate { worker_id: usize },
    DuplicateReady { worker_id: usize },
    DuplicateEpochDone { worker_id: usize },
    WrongMode { call: &'static str, mode: Mode },
}

impl fmt::Display for AggregationErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownWorker { worker_id, workers } => {
                write!(f, "unknown worker {worker_id}, there are {workers} workers")
            }
            Self::IndexOutOfRange { index, dim } => {
                write!(f, "index {index} out of range for dimension {dim}")
            }
            Self::NonFiniteValue { index } => write!(f, "non finite value at index {index}"),
            Self::DuplicateUpdate { worker_id } => {
                write!(f, "worker {worker_id} already submitted an update this round")
            }
            Self::DuplicateReady { worker_id } => {
                write!(f, "worker {worker_id} is already ready for the next round")
            }
            Self::DuplicateEpochDone { worker_id } => {
                write!(f, "worker {worker_id} already finished its epochs")
            }
            Self::WrongMode { call, mode } => write!(f, "{call} is not valid in {mode} mode"),
        }
    }
}

impl Error for AggregationErr {}
