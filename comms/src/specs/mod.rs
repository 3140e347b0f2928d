pub mod delta;
pub mod network;
pub mod start;

pub use delta::DeltaEntry;
pub use network::NetworkInfo;
pub use start::StartSpec;
