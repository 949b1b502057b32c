// Broker-Wrangler - wrangler wrapper with Cloudflare credential injection
//
// This is the main entry point for the application.

use anyhow::{Context, Result};
use broker_wrangler::broker::HttpBrokerClient;
use broker_wrangler::config::ConfigResolver;
use broker_wrangler::launcher::{ExitOutcome, LaunchSettings, Launcher};
use broker_wrangler::plan::{InvocationPlan, WrapperArgs};
use clap::Parser;
use std::io::IsTerminal;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter.
const LOG_ENV: &str = "BROKER_WRANGLER_LOG";

const USAGE: &str = "Usage: broker-wrangler [--cwd <path>] <wrangler args...>

Wraps wrangler and injects CLOUDFLARE_API_TOKEN from the broker.
Also injects CLOUDFLARE_ACCOUNT_ID when available.

Special handling:
  broker-wrangler [--cwd <path>] secret put <name> --secret-value <broker_secret_name> [wrangler args...]
    Fetches <broker_secret_name> from broker and pipes it to wrangler stdin.

Examples:
  broker-wrangler whoami
  broker-wrangler deploy
  broker-wrangler --cwd ./workers/my-app dev
  broker-wrangler secret put API_KEY --secret-value CLOUDFLARE_MY_API_KEY

Options:
  --cwd <path>   Working directory for wrangler
  --help         Show this help

Environment:
  BOTSTERS_BROKER_URL + BOTSTERS_BROKER_TOKEN   Broker endpoint (or SEKS_BROKER_URL + SEKS_BROKER_TOKEN)
  WRANGLER_BIN                                  Program to run instead of wrangler
  BROKER_WRANGLER_LOG                           Log filter (default: warn)

Without broker environment variables, ~/.openclaw/openclaw.json is read.";

/// Broker-Wrangler - wrangler wrapper with Cloudflare credential injection
///
/// `--cwd` and `--help` may appear anywhere on the command line, so they are
/// picked out by [`WrapperArgs::parse`] rather than declared here.
#[derive(Parser, Debug)]
#[command(name = "broker-wrangler")]
#[command(about = "Wraps wrangler and injects Cloudflare credentials from the broker", long_about = None)]
#[command(disable_help_flag = true)]
struct Cli {
    /// Wrapper flags and arguments passed through to wrangler
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "wrangler args")]
    args: Vec<String>,
}

fn usage() -> ! {
    eprintln!("{}", USAGE);
    std::process::exit(1);
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(false)
        .try_init();
}

fn run(plan: &InvocationPlan) -> Result<ExitOutcome> {
    let config = ConfigResolver::from_env().resolve()?;
    let client = HttpBrokerClient::new(config)?;
    let launcher = Launcher::new(client, LaunchSettings::from_env());

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    let outcome = runtime.block_on(launcher.run(plan))?;
    Ok(outcome)
}

fn main() {
    let cli = Cli::parse();
    init_logging();

    let (working_directory, target_args) = match WrapperArgs::parse(cli.args) {
        Ok(WrapperArgs::Run {
            working_directory,
            target_args,
        }) => (working_directory, target_args),
        Ok(WrapperArgs::Help) => usage(),
        Err(e) => {
            eprintln!("Error: {}", e);
            usage();
        }
    };

    let plan = match InvocationPlan::from_target_args(working_directory, target_args) {
        Ok(plan) => plan,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    match run(&plan) {
        Ok(outcome) => outcome.exit_process(),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
