// Broker-Wrangler Configuration Module
//
// This module resolves how to reach the secret broker, from environment
// variables or from ~/.openclaw/openclaw.json

use crate::error::{Error, Result};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};

/// Broker URL variable, checked first.
pub const ENV_BROKER_URL: &str = "BOTSTERS_BROKER_URL";
/// Broker token variable, checked first.
pub const ENV_BROKER_TOKEN: &str = "BOTSTERS_BROKER_TOKEN";
/// Legacy broker URL variable.
pub const LEGACY_ENV_BROKER_URL: &str = "SEKS_BROKER_URL";
/// Legacy broker token variable.
pub const LEGACY_ENV_BROKER_TOKEN: &str = "SEKS_BROKER_TOKEN";

/// Namespaces searched for a `broker` section, in order.
const NAMESPACES: &[&str] = &["botsters", "seks"];

const NO_SOURCE_MESSAGE: &str = "No broker config found. Set BOTSTERS_BROKER_URL + BOTSTERS_BROKER_TOKEN \
     (or SEKS_BROKER_URL + SEKS_BROKER_TOKEN) or configure ~/.openclaw/openclaw.json";

/// How a broker endpoint authenticates requests.
#[derive(Clone, PartialEq, Eq)]
pub enum EndpointAuth {
    /// A bearer token used as-is.
    StaticToken(String),
    /// A shell command whose stdout is the bearer token.
    TokenCommand(String),
}

impl fmt::Debug for EndpointAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StaticToken(_) => f.write_str("StaticToken(<redacted>)"),
            Self::TokenCommand(command) => f.debug_tuple("TokenCommand").field(command).finish(),
        }
    }
}

/// One broker endpoint: where it lives and how to authenticate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointCredential {
    pub url: String,
    pub auth: EndpointAuth,
}

impl EndpointCredential {
    /// Endpoint authenticated by a static token.
    pub fn with_token(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            auth: EndpointAuth::StaticToken(token.into()),
        }
    }

    /// Endpoint authenticated by the output of a command.
    pub fn with_token_command(url: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            auth: EndpointAuth::TokenCommand(command.into()),
        }
    }
}

/// Resolved broker configuration.
///
/// `primary` is always valid; `secondary` is only present when its own entry
/// was structurally valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    pub primary: EndpointCredential,
    pub secondary: Option<EndpointCredential>,
}

/// Raw endpoint entry as it appears in the JSON document.
#[derive(Debug, Default, Deserialize)]
struct EndpointEntry {
    url: Option<String>,
    token: Option<String>,
    #[serde(rename = "tokenCommand")]
    token_command: Option<String>,
}

impl EndpointEntry {
    fn from_value(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }

    /// Build a credential when the entry has a URL and some form of auth.
    /// A static token wins over a token command.
    fn into_credential(self) -> Option<EndpointCredential> {
        let url = non_empty(self.url)?;
        if let Some(token) = non_empty(self.token) {
            return Some(EndpointCredential::with_token(url, token));
        }
        non_empty(self.token_command)
            .map(|command| EndpointCredential::with_token_command(url, command))
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// A way of reading a broker section, tried in order until one matches.
type ShapeStrategy = fn(&Map<String, Value>) -> Option<BrokerConfig>;

const SHAPES: &[(&str, ShapeStrategy)] = &[
    ("primary/secondary", primary_secondary_shape),
    ("legacy url/token", legacy_flat_shape),
];

/// `{ "primary": {...}, "secondary"?: {...} }`
fn primary_secondary_shape(broker: &Map<String, Value>) -> Option<BrokerConfig> {
    let primary = broker
        .get("primary")
        .and_then(EndpointEntry::from_value)?
        .into_credential()?;

    let secondary = broker
        .get("secondary")
        .and_then(EndpointEntry::from_value)
        .and_then(EndpointEntry::into_credential);

    Some(BrokerConfig { primary, secondary })
}

/// `{ "url": "...", "token": "..." }`
fn legacy_flat_shape(broker: &Map<String, Value>) -> Option<BrokerConfig> {
    let url = non_empty(broker.get("url")?.as_str().map(str::to_string))?;
    let token = non_empty(broker.get("token")?.as_str().map(str::to_string))?;

    Some(BrokerConfig {
        primary: EndpointCredential::with_token(url, token),
        secondary: None,
    })
}

/// Find the first `<namespace>.broker` object in the document.
fn find_broker_section(document: &Value) -> Option<(&'static str, &Map<String, Value>)> {
    NAMESPACES.iter().find_map(|namespace| {
        document
            .get(*namespace)
            .and_then(|ns| ns.get("broker"))
            .and_then(Value::as_object)
            .map(|broker| (*namespace, broker))
    })
}

/// Environment variable lookup used by the resolver.
pub type EnvLookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Turns ambient inputs into a [`BrokerConfig`].
pub struct ConfigResolver {
    config_path: Option<PathBuf>,
    lookup: EnvLookup,
}

impl ConfigResolver {
    /// Create a resolver over an explicit config path and environment lookup.
    pub fn new<F>(config_path: Option<PathBuf>, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            config_path,
            lookup: Box::new(lookup),
        }
    }

    /// Resolver over the process environment and `~/.openclaw/openclaw.json`.
    pub fn from_env() -> Self {
        Self::new(default_config_path(), |key| std::env::var(key).ok())
    }

    /// The JSON document this resolver falls back to.
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Resolve the broker configuration. First match wins.
    pub fn resolve(&self) -> Result<BrokerConfig> {
        if let Some(config) = self.from_environment() {
            tracing::debug!("Using broker config from environment variables");
            return Ok(config);
        }

        let document = self.read_document()?;
        Self::from_document(&document)
    }

    /// Both a URL and a token must be set and non-empty. Each falls back to
    /// its legacy name only when the primary name is absent.
    fn from_environment(&self) -> Option<BrokerConfig> {
        let url = self.env_with_fallback(ENV_BROKER_URL, LEGACY_ENV_BROKER_URL)?;
        let token = self.env_with_fallback(ENV_BROKER_TOKEN, LEGACY_ENV_BROKER_TOKEN)?;

        Some(BrokerConfig {
            primary: EndpointCredential::with_token(url, token),
            secondary: None,
        })
    }

    fn env_with_fallback(&self, primary: &str, legacy: &str) -> Option<String> {
        non_empty((self.lookup)(primary).or_else(|| (self.lookup)(legacy)))
    }

    fn read_document(&self) -> Result<Value> {
        let path = self
            .config_path
            .as_ref()
            .ok_or_else(|| Error::configuration(NO_SOURCE_MESSAGE))?;

        let content = std::fs::read_to_string(path).map_err(|e| {
            tracing::debug!(path = %path.display(), error = %e, "Broker config file unreadable");
            Error::configuration(NO_SOURCE_MESSAGE)
        })?;

        serde_json::from_str(&content).map_err(|e| {
            Error::configuration(format!("Failed to parse {}: {}", path.display(), e))
        })
    }

    /// Interpret an already-parsed config document.
    pub fn from_document(document: &Value) -> Result<BrokerConfig> {
        let (namespace, broker) = find_broker_section(document).ok_or_else(|| {
            Error::configuration(
                "No botsters.broker or seks.broker section in ~/.openclaw/openclaw.json",
            )
        })?;

        SHAPES
            .iter()
            .find_map(|(shape, strategy)| {
                let config = strategy(broker)?;
                tracing::debug!(namespace, shape, "Using broker config from file");
                Some(config)
            })
            .ok_or_else(|| {
                Error::configuration(
                    "Invalid botsters.broker/seks.broker config in ~/.openclaw/openclaw.json",
                )
            })
    }
}

/// `~/.openclaw/openclaw.json`, if the home directory is known.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".openclaw").join("openclaw.json"))
}
