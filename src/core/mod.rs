//! Core utilities and common types for the regional router.

pub mod error;
pub mod fanout;
pub mod types;

pub use error::{Error, Result};
pub use fanout::{JobStatus, RegionOutcome};
pub use types::*;
