//! Broker-Wrangler - run wrangler with credentials fetched from a secret broker.
//!
//! This library resolves how to reach the broker, fetches the Cloudflare
//! credentials (and optionally a secret to pipe to stdin), runs the wrapped
//! program with them, and scrubs every secret once the program is gone.

pub mod broker;
pub mod config;
pub mod error;
pub mod launcher;
pub mod plan;
pub mod secrets;

pub use error::{Error, Result};
