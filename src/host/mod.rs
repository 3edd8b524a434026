//! Host adapters: volume directories and project quotas

pub mod local;
pub mod quota;

pub use local::*;
pub use quota::*;
