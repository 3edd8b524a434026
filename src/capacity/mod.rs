//! Capacity Module
//!
//! Exact storage quantities and the per-node capacity ledger kept on the
//! node status.

pub mod ledger;
pub mod quantity;

pub use ledger::*;
pub use quantity::*;
