use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::tools::exec_tool::{DEFAULT_INTERPRETER, EXEC_TIMEOUT_SECS};
use crate::tools::fs_tools::MAX_READ_CHARS;

/// Settings for one sandboxed tool layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxConfig {
    /// Directory every operation is confined to. Canonicalized when the
    /// dispatcher is built.
    pub root: PathBuf,
    /// Interpreter command line for `run_python_file` (e.g. `python3`, `uv run`).
    pub interpreter: String,
    /// Wall-clock limit for a script run.
    pub exec_timeout: Duration,
    /// Character cap for `get_file_content`.
    pub max_read_chars: usize,
}

impl SandboxConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            interpreter: DEFAULT_INTERPRETER.to_string(),
            exec_timeout: Duration::from_secs(EXEC_TIMEOUT_SECS),
            max_read_chars: MAX_READ_CHARS,
        }
    }

    /// Defaults overridden by `SANDBOX_PYTHON`, `SANDBOX_EXEC_TIMEOUT_SECS`
    /// and `SANDBOX_READ_MAX_CHARS`.
    pub fn from_env(root: impl Into<PathBuf>) -> Self {
        Self::from_vars(root, |key| std::env::var(key).ok())
    }

    /// Like [`Self::from_env`] with an explicit variable lookup.
    /// Unparsable or empty values keep the default.
    pub fn from_vars(root: impl Into<PathBuf>, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::new(root);
        Self {
            interpreter: lookup("SANDBOX_PYTHON")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.interpreter),
            exec_timeout: parse_var(&lookup, "SANDBOX_EXEC_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.exec_timeout),
            max_read_chars: parse_var(&lookup, "SANDBOX_READ_MAX_CHARS")
                .unwrap_or(defaults.max_read_chars),
            root: defaults.root,
        }
    }

    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = interpreter.into();
        self
    }

    pub fn with_exec_timeout(mut self, timeout: Duration) -> Self {
        self.exec_timeout = timeout;
        self
    }

    pub fn with_max_read_chars(mut self, max_chars: usize) -> Self {
        self.max_read_chars = max_chars;
        self
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable config override");
            None
        }
    }
}
