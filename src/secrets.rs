//! Ephemeral secret material for one child-process invocation.
//!
//! # Security Guarantees
//!
//! - **Zeroized values**: every secret lives in a [`Zeroizing`] buffer that is
//!   overwritten when scrubbed or dropped
//! - **Private overlay**: injected variables live in a private map handed to
//!   the child, never in the wrapper's own process environment
//! - **Scoped scrubbing**: [`ScrubGuard`] scrubs on every exit path, including
//!   early returns and unwinding

use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};
use zeroize::Zeroizing;

/// Secrets fetched for a single launch, plus the environment overlay built
/// from them.
pub struct SecretMaterial {
    api_token: Option<Zeroizing<String>>,
    account_id: Option<Zeroizing<String>>,
    piped_secret: Option<Zeroizing<String>>,
    overlay: BTreeMap<String, Zeroizing<String>>,
    scrubbed: bool,
}

impl SecretMaterial {
    /// Create material around the mandatory credential.
    pub fn new(api_token: Zeroizing<String>) -> Self {
        Self {
            api_token: Some(api_token),
            account_id: None,
            piped_secret: None,
            overlay: BTreeMap::new(),
            scrubbed: false,
        }
    }

    /// Attach the optional account identifier.
    pub fn with_account_id(mut self, account_id: Option<Zeroizing<String>>) -> Self {
        self.account_id = account_id;
        self
    }

    /// Attach the secret destined for the child's stdin.
    pub fn with_piped_secret(mut self, piped_secret: Option<Zeroizing<String>>) -> Self {
        self.piped_secret = piped_secret;
        self
    }

    /// Overlay the credentials onto the child environment under the given
    /// variable names. The account id is only injected when present.
    pub fn build_overlay(&mut self, token_var: &str, account_var: &str) {
        if let Some(token) = &self.api_token {
            self.overlay.insert(token_var.to_string(), token.clone());
        }
        if let Some(account_id) = &self.account_id {
            self.overlay.insert(account_var.to_string(), account_id.clone());
        }
    }

    /// Variables to add on top of the inherited parent environment.
    pub fn overlay(&self) -> impl Iterator<Item = (&str, &str)> {
        self.overlay.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Whether the overlay currently carries `key`.
    pub fn has_var(&self, key: &str) -> bool {
        self.overlay.contains_key(key)
    }

    /// The stdin payload, if one was requested.
    pub fn piped_secret(&self) -> Option<&str> {
        self.piped_secret.as_deref().map(String::as_str)
    }

    /// Whether any secret value is still held.
    pub fn holds_secrets(&self) -> bool {
        self.api_token.is_some()
            || self.account_id.is_some()
            || self.piped_secret.is_some()
            || !self.overlay.is_empty()
    }

    /// Whether [`scrub`](Self::scrub) has run.
    pub fn is_scrubbed(&self) -> bool {
        self.scrubbed
    }

    /// Overwrite every held value and drop the injected variables.
    ///
    /// Idempotent.
    pub fn scrub(&mut self) {
        // Zeroizing overwrites each buffer as it is dropped.
        self.api_token = None;
        self.account_id = None;
        self.piped_secret = None;
        self.overlay.clear();

        if !self.scrubbed {
            tracing::debug!("Secret material scrubbed");
        }
        self.scrubbed = true;
    }
}

impl Drop for SecretMaterial {
    fn drop(&mut self) {
        self.scrub();
    }
}

/// Scrubs the borrowed [`SecretMaterial`] when it goes out of scope.
pub struct ScrubGuard<'a> {
    material: &'a mut SecretMaterial,
}

impl<'a> ScrubGuard<'a> {
    pub fn new(material: &'a mut SecretMaterial) -> Self {
        Self { material }
    }
}

impl Deref for ScrubGuard<'_> {
    type Target = SecretMaterial;

    fn deref(&self) -> &SecretMaterial {
        self.material
    }
}

impl DerefMut for ScrubGuard<'_> {
    fn deref_mut(&mut self) -> &mut SecretMaterial {
        self.material
    }
}

impl Drop for ScrubGuard<'_> {
    fn drop(&mut self) {
        self.material.scrub();
    }
}
