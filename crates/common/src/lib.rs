//! Shared types, error definitions, and utilities used across all parley crates.

pub mod error;
pub mod text;
pub mod time;
pub mod types;

pub use error::{Error, Result};
