//! Cluster adapters: Kubernetes object store, conversions and watch feeds

pub mod convert;
#[cfg(test)]
pub(crate) mod memory;
pub mod store;
pub mod watch;

pub use convert::*;
pub use store::*;
pub use watch::*;
