//! `deferd-core`: configuration, identifiers and the top-level error type
//! shared by the scheduler engine and the gateway binary.

pub mod config;
pub mod error;
pub mod types;

pub use config::DeferdConfig;
pub use error::{DeferdError, Result};
pub use types::JobId;
