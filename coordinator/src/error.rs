use std::{error::Error, fmt, io};

use crate::{config::Mode, dataset::DatasetErr};

/// The coordinator's result type.
pub type Result<T> = std::result::Result<T, CoordinatorErr>;

/// All errors that can end a training run.
#[derive(Debug)]
pub enum CoordinatorErr {
    /// Invalid configuration, caught before connecting to anyone.
    InvalidConfig(String),
    /// A worker could not be reached or refused its registration, the run never starts.
    Registration { addr: String, source: io::Error },
    /// An outbound call to a worker failed once the run was under way.
    Transport {
        addr: String,
        step: &'static str,
        round: usize,
        mode: Mode,
        source: io::Error,
    },
    /// The operator interrupted the run.
    Cancelled,
    Dataset(DatasetErr),
    Json(serde_json::Error),
    /// An underlying I/O error not covered by the above variants.
    Io(io::Error),
}

impl fmt::Display for CoordinatorErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            Self::Registration { addr, source } => {
                write!(f, "failed to register worker {addr}: {source}")
            }
            Self::Transport {
                addr,
                step,
                round,
                mode,
                source,
            } => write!(
                f,
                "{step} to worker {addr} failed in {mode} round {round}: {source}"
            ),
            Self::Cancelled => write!(f, "run cancelled"),
            Self::Dataset(e) => write!(f, "dataset error: {e}"),
            Self::Json(e) => write!(f, "json error: {e}"),
            Self::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for CoordinatorErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Registration { source, .. } | Self::Transport { source, .. } => Some(source),
            Self::Dataset(e) => Some(e),
            Self::Json(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for CoordinatorErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<DatasetErr> for CoordinatorErr {
    fn from(value: DatasetErr) -> Self {
        Self::Dataset(value)
    }
}

impl From<serde_json::Error> for CoordinatorErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<CoordinatorErr> for io::Error {
    fn from(value: CoordinatorErr) -> Self {
        match value {
            CoordinatorErr::Io(e) => e,
            CoordinatorErr::Cancelled => io::Error::new(io::ErrorKind::Interrupted, value),
            other => io::Error::other(other),
        }
    }
}
