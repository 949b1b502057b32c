//! Broker client seam.
//!
//! The launcher only needs one operation from the secret broker: fetch a
//! secret by name. [`BrokerClient`] is that seam; [`HttpBrokerClient`] is the
//! implementation the binary wires in, tests use in-memory doubles.

pub mod http;

pub use http::HttpBrokerClient;

use async_trait::async_trait;
use thiserror::Error;
use zeroize::Zeroizing;

/// Errors a broker can report for a single fetch.
#[derive(Error, Debug)]
pub enum BrokerError {
    /// The broker has no secret under this name.
    #[error("secret '{name}' not found")]
    NotFound { name: String },

    /// The broker rejected our credentials, or they could not be produced.
    #[error("unauthorized: {message}")]
    Unauthorized { message: String },

    /// The broker could not be reached or answered unintelligibly.
    #[error("broker unreachable: {message}")]
    Unreachable { message: String },
}

impl BrokerError {
    /// Create a not found error.
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    /// Create an unauthorized error.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    /// Create an unreachable error.
    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::Unreachable {
            message: message.into(),
        }
    }
}

/// A source of secrets, addressed by name.
///
/// Implementations MUST NOT log secret values. A single call is a single
/// attempt; retries are not expected.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Fetch the current value of the secret `name`.
    async fn get_secret(&self, name: &str) -> Result<Zeroizing<String>, BrokerError>;
}
