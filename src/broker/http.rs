//! HTTP broker client with primary/secondary failover.
//!
//! # Protocol
//!
//! - `GET {url}/v1/secrets/{name}` with `Authorization: Bearer <token>`
//! - `200` with `{"value": "..."}` on success
//! - `404` when the secret does not exist, `401`/`403` on bad credentials
//!
//! # Failover
//!
//! The primary endpoint is tried first. Any failure other than
//! [`BrokerError::NotFound`] moves on to the secondary endpoint, once.
//! There are no retries.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::OnceCell;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use super::{BrokerClient, BrokerError};
use crate::config::{BrokerConfig, EndpointAuth, EndpointCredential};
use crate::error::Error;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Deserialize, Zeroize, ZeroizeOnDrop)]
struct SecretResponse {
    value: String,
}

/// Decode a `{"value": "..."}` body without leaving the value behind.
fn parse_secret_body(body: &[u8]) -> Result<Zeroizing<String>, BrokerError> {
    let mut response: SecretResponse = serde_json::from_slice(body)
        .map_err(|e| BrokerError::unreachable(format!("invalid response body: {}", e)))?;
    Ok(Zeroizing::new(std::mem::take(&mut response.value)))
}

/// One configured endpoint and its lazily produced bearer token.
struct Endpoint {
    credential: EndpointCredential,
    token: OnceCell<Zeroizing<String>>,
}

impl Endpoint {
    fn new(credential: EndpointCredential) -> Self {
        Self {
            credential,
            token: OnceCell::new(),
        }
    }

    /// Bearer token for this endpoint; token commands run at most once.
    async fn bearer_token(&self) -> Result<&str, BrokerError> {
        let token = self
            .token
            .get_or_try_init(|| async {
                match &self.credential.auth {
                    EndpointAuth::StaticToken(token) => Ok(Zeroizing::new(token.clone())),
                    EndpointAuth::TokenCommand(command) => run_token_command(command).await,
                }
            })
            .await?;
        Ok(token.as_str())
    }
}

/// Run a token command through the shell and take its trimmed stdout.
async fn run_token_command(command: &str) -> Result<Zeroizing<String>, BrokerError> {
    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(std::process::Stdio::null())
        .output()
        .await
        .map_err(|e| BrokerError::unauthorized(format!("failed to run token command: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(BrokerError::unauthorized(format!(
            "token command failed: {}",
            if stderr.trim().is_empty() {
                "Unknown error"
            } else {
                stderr.trim()
            }
        )));
    }

    let stdout = Zeroizing::new(output.stdout);
    let token = std::str::from_utf8(&stdout)
        .map_err(|_| BrokerError::unauthorized("token command output is not valid UTF-8"))?
        .trim();

    if token.is_empty() {
        return Err(BrokerError::unauthorized("token command produced no output"));
    }

    Ok(Zeroizing::new(token.to_string()))
}

/// Broker client speaking HTTP to the configured endpoints.
pub struct HttpBrokerClient {
    client: reqwest::Client,
    endpoints: Vec<Endpoint>,
}

impl HttpBrokerClient {
    /// Create a client for a resolved configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the HTTP client cannot be built,
    /// for instance when the TLS backend fails to initialise.
    pub fn new(config: BrokerConfig) -> crate::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| {
                Error::configuration(format!("Failed to build broker HTTP client: {}", e))
            })?;

        let endpoints = std::iter::once(config.primary)
            .chain(config.secondary)
            .map(Endpoint::new)
            .collect();

        Ok(Self { client, endpoints })
    }

    async fn fetch_from(
        &self,
        endpoint: &Endpoint,
        name: &str,
    ) -> Result<Zeroizing<String>, BrokerError> {
        let url = secret_url(&endpoint.credential.url, name)?;
        let token = endpoint.bearer_token().await?;

        let mut response = self
            .client
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| BrokerError::unreachable(e.to_string()))?;

        match response.status() {
            StatusCode::OK => {
                let capacity = response.content_length().unwrap_or(0) as usize;
                let mut body = Zeroizing::new(Vec::with_capacity(capacity));
                while let Some(chunk) = response.chunk().await.map_err(|e| {
                    BrokerError::unreachable(format!("failed to read response body: {}", e))
                })? {
                    let chunk = Zeroizing::new(Vec::<u8>::from(chunk));
                    body.extend_from_slice(&chunk);
                }
                parse_secret_body(&body)
            }
            StatusCode::NOT_FOUND => Err(BrokerError::not_found(name)),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(BrokerError::unauthorized(
                format!("broker returned {}", response.status()),
            )),
            status => Err(BrokerError::unreachable(format!(
                "broker returned {}",
                status
            ))),
        }
    }
}

/// `{base}/v1/secrets/{name}`, with `name` encoded as a single path segment.
fn secret_url(base: &str, name: &str) -> Result<reqwest::Url, BrokerError> {
    let mut url = reqwest::Url::parse(base)
        .map_err(|e| BrokerError::unreachable(format!("invalid broker URL '{}': {}", base, e)))?;

    url.path_segments_mut()
        .map_err(|_| BrokerError::unreachable(format!("invalid broker URL '{}'", base)))?
        .pop_if_empty()
        .extend(["v1", "secrets", name]);

    Ok(url)
}

#[async_trait]
impl BrokerClient for HttpBrokerClient {
    async fn get_secret(&self, name: &str) -> Result<Zeroizing<String>, BrokerError> {
        let mut last_error = None;

        for endpoint in &self.endpoints {
            match self.fetch_from(endpoint, name).await {
                Ok(value) => return Ok(value),
                Err(e @ BrokerError::NotFound { .. }) => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        url = %endpoint.credential.url,
                        secret = %name,
                        error = %e,
                        "Broker endpoint failed"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| BrokerError::unreachable("no broker endpoints configured")))
    }
}
