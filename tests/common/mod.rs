//! Common testing utilities for broker-wrangler integration tests.

use assert_cmd::Command;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Broker variables that must not leak in from the developer's shell.
const BROKER_VARS: &[&str] = &[
    "BOTSTERS_BROKER_URL",
    "BOTSTERS_BROKER_TOKEN",
    "SEKS_BROKER_URL",
    "SEKS_BROKER_TOKEN",
];

/// Test context that manages a fake home directory and a fake wrangler.
pub struct TestContext {
    /// Path to temporary directory, used as `$HOME`
    pub temp_path: PathBuf,
    /// The temporary directory (kept to prevent early deletion)
    _temp_dir: TempDir,
}

impl TestContext {
    /// Create a new test context with a temporary directory.
    pub fn new() -> anyhow::Result<Self> {
        let temp_dir = TempDir::new()?;
        let temp_path = temp_dir.path().to_path_buf();

        Ok(Self {
            temp_path,
            _temp_dir: temp_dir,
        })
    }

    /// Create a test file with content.
    pub fn create_file(&self, name: &str, content: &str) -> anyhow::Result<PathBuf> {
        let file_path = self.temp_path.join(name);
        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::File::create(&file_path)?;
        file.write_all(content.as_bytes())?;
        Ok(file_path)
    }

    /// Write `~/.openclaw/openclaw.json`.
    #[allow(dead_code)]
    pub fn create_openclaw_config(&self, document: &serde_json::Value) -> anyhow::Result<PathBuf> {
        self.create_file(".openclaw/openclaw.json", &serde_json::to_string_pretty(document)?)
    }

    /// Create an executable shell script standing in for wrangler.
    #[allow(dead_code)]
    pub fn create_fake_wrangler(&self, body: &str) -> anyhow::Result<PathBuf> {
        let script = format!("#!/bin/sh\n{}\n", body);
        let file_path = self.create_file("bin/wrangler", &script)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&file_path, fs::Permissions::from_mode(0o755))?;
        }

        Ok(file_path)
    }

    /// Get the path to a file in the temp directory.
    #[allow(dead_code)]
    pub fn path(&self, name: &str) -> PathBuf {
        self.temp_path.join(name)
    }

    /// The binary under test, isolated from the caller's broker settings.
    pub fn command(&self) -> Command {
        let mut cmd = assert_cmd::cargo_bin_cmd!("broker-wrangler");
        for var in BROKER_VARS {
            cmd.env_remove(var);
        }
        cmd.env_remove("WRANGLER_BIN");
        cmd.env("HOME", &self.temp_path);
        cmd
    }

    /// The binary under test, pointed at `broker` and `wrangler`.
    #[allow(dead_code)]
    pub fn wrapped_command(&self, broker: &MockBroker, wrangler: &Path) -> Command {
        let mut cmd = self.command();
        cmd.env("BOTSTERS_BROKER_URL", broker.uri())
            .env("BOTSTERS_BROKER_TOKEN", MockBroker::TOKEN)
            .env("WRANGLER_BIN", wrangler);
        cmd
    }

    /// Start the binary under test as a background process, so the test can
    /// signal it while the wrapped program runs.
    #[allow(dead_code)]
    pub fn spawn_wrapped(
        &self,
        broker: &MockBroker,
        wrangler: &Path,
        args: &[&str],
    ) -> std::io::Result<Child> {
        let mut cmd = std::process::Command::new(env!("CARGO_BIN_EXE_broker-wrangler"));
        for var in BROKER_VARS {
            cmd.env_remove(var);
        }
        cmd.env("HOME", &self.temp_path)
            .env("BOTSTERS_BROKER_URL", broker.uri())
            .env("BOTSTERS_BROKER_TOKEN", MockBroker::TOKEN)
            .env("WRANGLER_BIN", wrangler)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        cmd.spawn()
    }
}

/// Wait until `path` holds a pid, as written by a fake wrangler's `echo $$`.
#[allow(dead_code)]
pub async fn wait_for_pid(path: &Path, timeout: Duration) -> Option<i32> {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if let Some(pid) = fs::read_to_string(path)
            .ok()
            .and_then(|content| content.trim().parse().ok())
        {
            return Some(pid);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    None
}

/// Poll `child` until it exits or `timeout` passes.
#[allow(dead_code)]
pub async fn wait_for_exit(child: &mut Child, timeout: Duration) -> Option<ExitStatus> {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if let Ok(Some(status)) = child.try_wait() {
            return Some(status);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    None
}

/// Mock secret broker serving a fixed set of secrets.
#[allow(dead_code)]
pub struct MockBroker {
    server: MockServer,
}

#[allow(dead_code)]
impl MockBroker {
    /// Bearer token the mock expects.
    pub const TOKEN: &'static str = "broker-test-token";

    /// Start a broker serving `secrets`; anything else is a 404.
    pub async fn start(secrets: &[(&str, &str)]) -> Self {
        let server = MockServer::start().await;

        for (name, value) in secrets {
            Mock::given(method("GET"))
                .and(path(format!("/v1/secrets/{}", name)))
                .and(header("authorization", format!("Bearer {}", Self::TOKEN).as_str()))
                .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "value": value
                })))
                .mount(&server)
                .await;
        }

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        Self { server }
    }

    pub fn uri(&self) -> String {
        self.server.uri()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_test_context_create_file() {
        let ctx = TestContext::new().unwrap();
        let file_path = ctx.create_file("test.txt", "Hello, World!").unwrap();

        assert!(file_path.exists());
        assert_eq!(fs::read_to_string(&file_path).unwrap(), "Hello, World!");
    }

    #[test]
    fn test_fake_wrangler_is_executable() {
        let ctx = TestContext::new().unwrap();
        let wrangler = ctx.create_fake_wrangler("exit 0").unwrap();

        assert!(which::which(&wrangler).is_ok());
    }
}
