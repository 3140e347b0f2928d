mod client;
mod handler;
mod listener;
mod remote;

pub use client::{WorkerClient, WorkerClientTemplate};
pub use handler::{CallErr, dispatch};
pub use listener::CoordinationService;
pub use remote::RemoteWorker;
