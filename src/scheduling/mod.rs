//! Claim scheduling: selector resolution, node picking and assignment

pub mod picker;
pub mod scheduler;
pub mod selector;

pub use picker::*;
pub use scheduler::*;
pub use selector::*;
