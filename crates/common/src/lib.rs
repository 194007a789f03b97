//! Common utilities and types shared across the server registry crates.

pub mod error;
pub mod logging;

pub use error::{Error, Result};
