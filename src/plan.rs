//! Turning the wrapped command line into an invocation plan.
//!
//! The wrapper's own flags (`--cwd <path>` and `--help`) are picked out
//! wherever they appear. Everything else passes straight through to the
//! wrapped program, with one exception: in
//! `secret put <name> --secret-value <broker-secret>` the `--secret-value`
//! pair is removed and the named broker secret is piped to the program's
//! stdin instead of appearing on its command line.

use crate::error::{Error, Result};
use std::path::PathBuf;

/// Flag naming the broker secret to pipe to stdin.
pub const SECRET_VALUE_FLAG: &str = "--secret-value";
/// Wrapper flag selecting the child's working directory.
pub const CWD_FLAG: &str = "--cwd";
/// Wrapper flag asking for usage.
pub const HELP_FLAG: &str = "--help";

/// What the command line asks the wrapper to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WrapperArgs {
    /// Print usage and stop.
    Help,
    /// Run the target arguments, optionally from another directory.
    Run {
        working_directory: Option<PathBuf>,
        target_args: Vec<String>,
    },
}

impl WrapperArgs {
    /// Split the wrapper's flags from the target arguments.
    ///
    /// `--help` anywhere wins. `--cwd <path>` may appear anywhere and is
    /// removed along with its value; the last one wins. With nothing left
    /// for the wrapped program this is [`WrapperArgs::Help`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Usage`] if `--cwd` has no value or an empty one.
    pub fn parse(argv: Vec<String>) -> Result<Self> {
        let mut working_directory = None;
        let mut target_args = Vec::with_capacity(argv.len());
        let mut iter = argv.into_iter();

        while let Some(arg) = iter.next() {
            match arg.as_str() {
                HELP_FLAG => return Ok(Self::Help),
                CWD_FLAG => match iter.next().filter(|path| !path.is_empty()) {
                    Some(path) => working_directory = Some(PathBuf::from(path)),
                    None => return Err(Error::usage("--cwd requires a value")),
                },
                _ => target_args.push(arg),
            }
        }

        if target_args.is_empty() {
            return Ok(Self::Help);
        }

        Ok(Self::Run {
            working_directory,
            target_args,
        })
    }
}

/// What to run, where, and which secret (if any) to pipe to stdin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationPlan {
    pub working_directory: Option<PathBuf>,
    pub target_argv: Vec<String>,
    pub injected_secret_name: Option<String>,
}

impl InvocationPlan {
    /// Build a plan from the arguments meant for the wrapped program.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Usage`] if there are no target arguments, or if
    /// `--secret-value` is given without a broker secret name in the
    /// `secret put` form.
    pub fn from_target_args(
        working_directory: Option<PathBuf>,
        args: Vec<String>,
    ) -> Result<Self> {
        if args.is_empty() {
            return Err(Error::usage("no command given"));
        }

        let (target_argv, injected_secret_name) = extract_secret_put_value(args)?;

        Ok(Self {
            working_directory,
            target_argv,
            injected_secret_name,
        })
    }

    /// Whether the child's stdin carries a secret.
    pub fn pipes_secret(&self) -> bool {
        self.injected_secret_name.is_some()
    }
}

/// `secret put <name> ...`, with a non-empty `<name>`.
fn is_secret_put(args: &[String]) -> bool {
    matches!(
        args,
        [first, second, name, ..] if first == "secret" && second == "put" && !name.is_empty()
    )
}

/// Strip `--secret-value <name>` from a `secret put` invocation.
///
/// Outside the `secret put` form the arguments are returned untouched. When
/// the flag appears more than once the last occurrence wins.
fn extract_secret_put_value(args: Vec<String>) -> Result<(Vec<String>, Option<String>)> {
    if !is_secret_put(&args) {
        return Ok((args, None));
    }

    let mut stripped = Vec::with_capacity(args.len());
    let mut secret_name = None;
    let mut iter = args.into_iter();

    while let Some(arg) = iter.next() {
        if arg == SECRET_VALUE_FLAG {
            match iter.next().filter(|name| !name.is_empty()) {
                Some(name) => secret_name = Some(name),
                None => {
                    return Err(Error::usage(
                        "--secret-value requires a broker secret name",
                    ))
                }
            }
            continue;
        }
        stripped.push(arg);
    }

    Ok((stripped, secret_name))
}
