//! Injecting launcher: fetch credentials, run the wrapped program, scrub.
//!
//! # Lifecycle
//!
//! `Idle → SecretsFetched → ChildSpawned → {ChildExited | ChildSignaled |
//! SpawnFailed} → Scrubbed`. The last step is a [`ScrubGuard`] held for the
//! whole launch, so it cannot be skipped. Turning the [`ExitOutcome`] into
//! the wrapper's own termination is left to the caller via
//! [`ExitOutcome::exit_process`].
//!
//! # Security
//!
//! - Credentials reach the child through its environment only, never argv
//! - A piped secret is written once to the child's stdin, which is then closed
//! - Secret values are never logged

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};

use crate::broker::BrokerClient;
use crate::error::{Error, Result};
use crate::plan::InvocationPlan;
use crate::secrets::{ScrubGuard, SecretMaterial};

/// Program wrapped when `WRANGLER_BIN` is not set.
pub const DEFAULT_PROGRAM: &str = "wrangler";
/// Environment variable overriding the wrapped program.
pub const PROGRAM_ENV: &str = "WRANGLER_BIN";
/// Mandatory credential: broker secret name and injected variable.
pub const API_TOKEN_VAR: &str = "CLOUDFLARE_API_TOKEN";
/// Optional credential: broker secret name and injected variable.
pub const ACCOUNT_ID_VAR: &str = "CLOUDFLARE_ACCOUNT_ID";

/// What to run and which credentials to inject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSettings {
    /// Program looked up on `PATH`.
    pub program: String,
    /// Mandatory secret, fetched and injected under this name.
    pub token_var: String,
    /// Optional secret, fetched and injected under this name when available.
    pub account_var: String,
}

impl Default for LaunchSettings {
    fn default() -> Self {
        Self {
            program: DEFAULT_PROGRAM.to_string(),
            token_var: API_TOKEN_VAR.to_string(),
            account_var: ACCOUNT_ID_VAR.to_string(),
        }
    }
}

impl LaunchSettings {
    /// Defaults, with the program taken from `WRANGLER_BIN` when set.
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        if let Some(program) = std::env::var(PROGRAM_ENV).ok().filter(|p| !p.is_empty()) {
            settings.program = program;
        }
        settings
    }
}

/// How the wrapped program finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Normal exit with this code.
    Exited(i32),
    /// Killed by this signal number.
    Terminated(i32),
}

impl ExitOutcome {
    /// Classify a child's exit status. A missing exit code becomes 1.
    pub fn from_status(status: ExitStatus) -> Self {
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return Self::Terminated(signal);
            }
        }
        Self::Exited(status.code().unwrap_or(1))
    }

    /// Terminate the current process the way the child terminated.
    ///
    /// A signal is re-raised against ourselves with its default disposition
    /// restored, so the invoking shell sees the same signal.
    pub fn exit_process(self) -> ! {
        match self {
            Self::Exited(code) => std::process::exit(code),
            Self::Terminated(signal) => {
                reraise(signal);
                // Only reached for signals whose default action does not
                // terminate the process.
                std::process::exit(128 + signal)
            }
        }
    }
}

#[cfg(unix)]
fn reraise(signal: i32) {
    // SAFETY: restoring SIG_DFL and raising a signal number reported by
    // waitpid(2) touches no Rust-managed memory.
    unsafe {
        libc::signal(signal, libc::SIG_DFL);
        libc::raise(signal);
    }
}

#[cfg(not(unix))]
fn reraise(_signal: i32) {}

/// Fetches credentials through a [`BrokerClient`] and runs the wrapped
/// program with them.
pub struct Launcher<C> {
    client: C,
    settings: LaunchSettings,
}

impl<C: BrokerClient> Launcher<C> {
    pub fn new(client: C, settings: LaunchSettings) -> Self {
        Self { client, settings }
    }

    /// Acquire secrets, launch, wait, scrub.
    pub async fn run(&self, plan: &InvocationPlan) -> Result<ExitOutcome> {
        let mut material = self.acquire(plan).await?;
        self.launch(plan, &mut material).await
    }

    /// Fetch every secret the launch needs, in order: mandatory credential,
    /// optional credential, piped secret.
    ///
    /// # Errors
    ///
    /// [`Error::SecretFetch`] if the mandatory credential or the piped secret
    /// is unavailable. A missing optional credential is not an error.
    pub async fn acquire(&self, plan: &InvocationPlan) -> Result<SecretMaterial> {
        let token_var = &self.settings.token_var;
        let api_token = self
            .client
            .get_secret(token_var)
            .await
            .map_err(|e| Error::secret_fetch(token_var, e))?;

        let account_var = &self.settings.account_var;
        let account_id = match self.client.get_secret(account_var).await {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::debug!(secret = %account_var, error = %e, "Optional secret not injected");
                None
            }
        };

        let piped_secret = match &plan.injected_secret_name {
            Some(name) => Some(
                self.client
                    .get_secret(name)
                    .await
                    .map_err(|e| Error::secret_fetch(name, e))?,
            ),
            None => None,
        };

        let mut material = SecretMaterial::new(api_token)
            .with_account_id(account_id)
            .with_piped_secret(piped_secret);
        material.build_overlay(token_var, account_var);

        tracing::debug!(
            injected = ?material.overlay().map(|(k, _)| k).collect::<Vec<_>>(),
            piped = plan.pipes_secret(),
            "Secrets fetched"
        );

        Ok(material)
    }

    /// Run the wrapped program with `material` injected and wait for it.
    ///
    /// `material` is scrubbed before this returns, whatever the outcome.
    ///
    /// # Errors
    ///
    /// [`Error::Launch`] if the program cannot be found or started.
    pub async fn launch(
        &self,
        plan: &InvocationPlan,
        material: &mut SecretMaterial,
    ) -> Result<ExitOutcome> {
        let guard = ScrubGuard::new(material);
        let program = &self.settings.program;

        let resolved = which::which(program).map_err(|e| {
            Error::launch(
                program,
                std::io::Error::new(std::io::ErrorKind::NotFound, e.to_string()),
            )
        })?;

        let mut forwarder = SignalForwarder::install().map_err(|e| Error::launch(program, e))?;

        let mut child = spawn_child(&resolved, plan, &guard).map_err(|e| Error::launch(program, e))?;
        tracing::debug!(program = %resolved.display(), pid = ?child.id(), "Child spawned");

        if let Some(secret) = guard.piped_secret() {
            write_stdin(&mut child, secret).await;
        }

        let status = forwarder
            .wait(&mut child)
            .await
            .map_err(|e| Error::launch(program, e))?;

        drop(guard);

        let outcome = ExitOutcome::from_status(status);
        tracing::debug!(?outcome, "Child finished");
        Ok(outcome)
    }
}

fn spawn_child(
    program: &Path,
    plan: &InvocationPlan,
    material: &SecretMaterial,
) -> std::io::Result<Child> {
    let mut command = Command::new(program);
    command
        .args(&plan.target_argv)
        .envs(material.overlay())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());

    if plan.pipes_secret() {
        command.stdin(Stdio::piped());
    } else {
        command.stdin(Stdio::inherit());
    }

    if let Some(dir) = &plan.working_directory {
        command.current_dir(dir);
    }

    command.spawn()
}

/// Write the secret and a newline, then close stdin so the child sees EOF.
async fn write_stdin(child: &mut Child, secret: &str) {
    let Some(mut stdin) = child.stdin.take() else {
        return;
    };

    let written = async {
        stdin.write_all(secret.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.shutdown().await
    }
    .await;

    if let Err(e) = written {
        // The child may exit without reading; its status still decides.
        tracing::warn!(error = %e, "Failed to write secret to child stdin");
    }
}

/// Keeps signals aimed at the wrapper from killing it before it scrubs.
///
/// SIGTERM and SIGHUP are forwarded to the child. SIGINT is only absorbed:
/// the terminal already delivers it to the child's process group.
#[cfg(unix)]
struct SignalForwarder {
    terminate: tokio::signal::unix::Signal,
    hangup: tokio::signal::unix::Signal,
    interrupt: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl SignalForwarder {
    fn install() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            terminate: signal(SignalKind::terminate())?,
            hangup: signal(SignalKind::hangup())?,
            interrupt: signal(SignalKind::interrupt())?,
        })
    }

    async fn wait(&mut self, child: &mut Child) -> std::io::Result<ExitStatus> {
        loop {
            tokio::select! {
                status = child.wait() => return status,
                Some(()) = self.terminate.recv() => forward(child, libc::SIGTERM),
                Some(()) = self.hangup.recv() => forward(child, libc::SIGHUP),
                Some(()) = self.interrupt.recv() => {
                    tracing::debug!("SIGINT received, waiting for child");
                }
            }
        }
    }
}

#[cfg(unix)]
fn forward(child: &Child, signal: libc::c_int) {
    let Some(pid) = child.id() else {
        return;
    };
    tracing::debug!(pid, signal, "Forwarding signal to child");
    // SAFETY: kill(2) on a pid we spawned and have not yet reaped.
    let result = unsafe { libc::kill(pid as libc::pid_t, signal) };
    if result != 0 {
        tracing::warn!(
            pid,
            signal,
            error = %std::io::Error::last_os_error(),
            "Failed to forward signal"
        );
    }
}

#[cfg(not(unix))]
struct SignalForwarder;

#[cfg(not(unix))]
impl SignalForwarder {
    fn install() -> std::io::Result<Self> {
        Ok(Self)
    }

    async fn wait(&mut self, child: &mut Child) -> std::io::Result<ExitStatus> {
        child.wait().await
    }
}
