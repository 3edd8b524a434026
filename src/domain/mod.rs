//! Domain layer - Core records, events and port definitions
//!
//! This module defines the records the scheduler and reconciler reason
//! about and the traits (ports) that cluster and host adapters implement.

pub mod events;
pub mod ports;

pub use events::*;
pub use ports::*;
