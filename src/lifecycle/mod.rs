//! Volume lifecycle on this node: capacity reservation and teardown

pub mod journal;
pub mod reconciler;

pub use journal::*;
pub use reconciler::*;
