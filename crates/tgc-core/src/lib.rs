//! Core scan-and-decision engine for Telegram conversation cleanup.
//!
//! The engine knows nothing about a concrete messaging client. Providers,
//! progress storage and operator confirmation live behind ports (traits);
//! adapter crates and the binary wire them up.

pub mod blacklist;
pub mod config;
pub mod deletion;
pub mod domain;
pub mod entity_cache;
pub mod errors;
pub mod logging;
pub mod matcher;
pub mod ports;
pub mod scanner;
pub mod selector;
pub mod store;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

pub use errors::{Error, Result};
