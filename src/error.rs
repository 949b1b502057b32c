//! Error types for configuration resolution and credential injection.

use crate::broker::BrokerError;

/// Result type alias for broker-wrangler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Fatal conditions surfaced to the user.
///
/// A child terminated by a signal is not an error; it is reported through
/// [`crate::launcher::ExitOutcome::Terminated`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No usable broker source, or a source that is structurally invalid.
    #[error("{message}")]
    Configuration { message: String },

    /// A mandatory or explicitly requested secret could not be fetched.
    #[error("failed to fetch secret '{name}' from broker: {source}")]
    SecretFetch {
        name: String,
        #[source]
        source: BrokerError,
    },

    /// The wrapped program could not be started.
    #[error("failed to start {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The command line could not be turned into an invocation plan.
    #[error("{message}")]
    Usage { message: String },
}

impl Error {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a secret fetch error.
    pub fn secret_fetch(name: impl Into<String>, source: BrokerError) -> Self {
        Self::SecretFetch {
            name: name.into(),
            source,
        }
    }

    /// Create a launch error.
    pub fn launch(program: impl Into<String>, source: std::io::Error) -> Self {
        Self::Launch {
            program: program.into(),
            source,
        }
    }

    /// Create a usage error.
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage {
            message: message.into(),
        }
    }
}
