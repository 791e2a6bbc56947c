//! `reel-core`: configuration and error types shared by every Reel crate.

pub mod config;
pub mod error;

pub use config::ReelConfig;
pub use error::{ReelError, Result};
