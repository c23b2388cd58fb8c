//! Sandboxed Python script execution tool.
//!
//! Scripts run as a direct child process (no shell) with the sandbox root as
//! working directory and a hard wall-clock timeout. The script leads its own
//! process group, and the whole group is killed before the call returns.

use std::ffi::OsStr;
use std::fmt;
use std::io;
use std::process::Stdio;
use std::time::Duration;

use rig::completion::ToolDefinition;
use rig::tool::Tool;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;

use super::{sandbox_check, ConfinedPath, Operation, SandboxRoot, ToolError};

/// Default timeout for script execution.
pub const EXEC_TIMEOUT_SECS: u64 = 30;

/// Interpreter used when none is configured.
pub const DEFAULT_INTERPRETER: &str = "python3";

/// How long to keep reading output once the script itself has exited.
const PIPE_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Extension a script must carry to be executed.
const SCRIPT_EXTENSION: &str = "py";

#[derive(Debug, Deserialize)]
pub struct RunPythonFileArgs {
    /// Script path relative to the sandbox root.
    pub file_path: String,
    /// Arguments handed to the script verbatim.
    #[serde(default)]
    pub args: Vec<String>,
}

/// What happened when a script was run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessOutcome {
    /// `None` when the process was killed by a signal (including our timeout).
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl ProcessOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

impl fmt::Display for ProcessOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if !self.stdout.is_empty() {
            parts.push(format!("STDOUT: {}", self.stdout));
        }
        if !self.stderr.is_empty() {
            parts.push(format!("STDERR: {}", self.stderr));
        }
        match self.exit_code {
            Some(0) => {}
            Some(code) => parts.push(format!("Process exited with code {code}")),
            None if self.timed_out => parts.push("Process was killed after timing out".into()),
            None => parts.push("Process was terminated by a signal".into()),
        }
        if parts.is_empty() {
            f.write_str("No output produced.")
        } else {
            f.write_str(&parts.join("\n"))
        }
    }
}

/// Run a Python file inside the sandbox, capturing stdout, stderr and exit code.
///
/// `interpreter` is a command line split into words (e.g. `python3` or
/// `uv run`); the script path and its arguments are appended as separate
/// argv entries.
#[derive(Debug, Clone)]
pub struct RunPythonFileTool {
    pub root: SandboxRoot,
    pub interpreter: String,
    pub timeout: Duration,
}

impl RunPythonFileTool {
    pub fn new(root: &SandboxRoot) -> Self {
        Self {
            root: root.clone(),
            interpreter: DEFAULT_INTERPRETER.to_string(),
            timeout: Duration::from_secs(EXEC_TIMEOUT_SECS),
        }
    }

    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = interpreter.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Validate the script path, run it, and fold a timeout into an error.
    pub async fn run(&self, args: &RunPythonFileArgs) -> Result<ProcessOutcome, ToolError> {
        let script = sandbox_check(&self.root, &args.file_path, Operation::Execute)?;
        if !script.as_path().is_file() {
            return Err(ToolError::ScriptNotFound(args.file_path.clone()));
        }
        if script.as_path().extension() != Some(OsStr::new(SCRIPT_EXTENSION)) {
            return Err(ToolError::NotAPythonFile(args.file_path.clone()));
        }

        let outcome = self.execute(&script, &args.file_path, &args.args).await?;
        if outcome.timed_out {
            return Err(ToolError::Timeout {
                path: args.file_path.clone(),
                limit: self.timeout,
            });
        }
        Ok(outcome)
    }

    /// Spawn the interpreter on an already-confined script.
    ///
    /// On timeout the process group is killed and the child awaited, and the
    /// returned outcome has `timed_out` set with no captured output.
    pub async fn execute(
        &self,
        script: &ConfinedPath,
        display_path: &str,
        script_args: &[String],
    ) -> Result<ProcessOutcome, ToolError> {
        let words = shlex::split(&self.interpreter)
            .ok_or_else(|| ToolError::InvalidInterpreter(self.interpreter.clone()))?;
        let (program, prefix) = words
            .split_first()
            .ok_or_else(|| ToolError::InvalidInterpreter(self.interpreter.clone()))?;

        let mut command = Command::new(program);
        command
            .args(prefix)
            .arg(script.as_path())
            .args(script_args)
            .current_dir(self.root.as_path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // The script leads its own process group, so anything it forks can be
        // killed along with it.
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|source| ToolError::Launch {
            path: display_path.to_string(),
            source,
        })?;
        let pgid = child.id();

        tracing::debug!(
            path = %display_path,
            pid = ?pgid,
            argc = script_args.len(),
            "run_python_file: spawned"
        );

        let mut stdout = tokio::spawn(read_pipe(child.stdout.take()));
        let mut stderr = tokio::spawn(read_pipe(child.stderr.take()));
        let waited = tokio::time::timeout(self.timeout, child.wait()).await;

        // Nothing the script started may outlive the call, whether it exited
        // on its own or hit the timeout.
        kill_process_group(pgid, display_path);

        let status = match waited {
            Ok(Ok(status)) => status,
            Ok(Err(source)) => {
                stdout.abort();
                stderr.abort();
                return Err(ToolError::Io {
                    op: Operation::Execute,
                    path: display_path.to_string(),
                    source,
                });
            }
            Err(_) => {
                // kill() also waits, so the child is reaped before we return.
                if let Err(e) = child.kill().await {
                    tracing::debug!(path = %display_path, error = %e, "kill after timeout");
                }
                stdout.abort();
                stderr.abort();
                tracing::warn!(
                    path = %display_path,
                    timeout = ?self.timeout,
                    "run_python_file: timed out, process group killed"
                );
                return Ok(ProcessOutcome {
                    exit_code: None,
                    stdout: String::new(),
                    stderr: String::new(),
                    timed_out: true,
                });
            }
        };

        let out = drain(&mut stdout, display_path).await;
        let err = drain(&mut stderr, display_path).await;
        Ok(ProcessOutcome {
            exit_code: status.code(),
            stdout: String::from_utf8_lossy(&out).into_owned(),
            stderr: String::from_utf8_lossy(&err).into_owned(),
            timed_out: false,
        })
    }
}

/// Collect a pipe reader after the child has exited.
///
/// A descendant that left the process group can hold the pipe open forever,
/// so the wait is bounded by [`PIPE_DRAIN_GRACE`].
async fn drain(reader: &mut JoinHandle<io::Result<Vec<u8>>>, display_path: &str) -> Vec<u8> {
    match tokio::time::timeout(PIPE_DRAIN_GRACE, &mut *reader).await {
        Ok(Ok(Ok(bytes))) => bytes,
        Ok(Ok(Err(e))) => {
            tracing::warn!(path = %display_path, error = %e, "run_python_file: pipe read failed");
            Vec::new()
        }
        Ok(Err(e)) => {
            tracing::warn!(path = %display_path, error = %e, "run_python_file: pipe reader aborted");
            Vec::new()
        }
        Err(_) => {
            reader.abort();
            tracing::warn!(path = %display_path, "run_python_file: pipe still open after exit");
            Vec::new()
        }
    }
}

#[cfg(unix)]
fn kill_process_group(pgid: Option<u32>, display_path: &str) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pgid) = pgid.and_then(|id| i32::try_from(id).ok()) else {
        return;
    };
    match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        Ok(()) => tracing::debug!(path = %display_path, pgid, "run_python_file: process group killed"),
        // Group already empty.
        Err(nix::errno::Errno::ESRCH) => {}
        Err(e) => tracing::warn!(path = %display_path, pgid, error = %e, "killpg failed"),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: Option<u32>, _display_path: &str) {}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

impl Tool for RunPythonFileTool {
    const NAME: &'static str = "run_python_file";
    type Error = ToolError;
    type Args = RunPythonFileArgs;
    type Output = ProcessOutcome;

    async fn definition(&self, _prompt: String) -> ToolDefinition {
        ToolDefinition {
            name: Self::NAME.into(),
            description: format!(
                "Executes a Python file within the permitted working directory, capturing its \
                 stdout, stderr, and exit code. Runs are killed after {} seconds.",
                self.timeout.as_secs()
            ),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "file_path": {
                        "type": "string",
                        "description": "Relative path of the Python file to execute."
                    },
                    "args": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Optional list of command-line arguments to pass to the \
                                        Python script."
                    }
                },
                "required": ["file_path"]
            }),
        }
    }

    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error> {
        self.run(&args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(code: Option<i32>, stdout: &str, stderr: &str) -> ProcessOutcome {
        ProcessOutcome {
            exit_code: code,
            stdout: stdout.into(),
            stderr: stderr.into(),
            timed_out: false,
        }
    }

    #[test]
    fn test_run_args_default_to_empty() {
        let args: RunPythonFileArgs = serde_json::from_str(r#"{"file_path": "main.py"}"#).unwrap();
        assert!(args.args.is_empty());
    }

    #[test]
    fn test_run_args_with_list() {
        let args: RunPythonFileArgs =
            serde_json::from_str(r#"{"file_path": "main.py", "args": ["3 + 5"]}"#).unwrap();
        assert_eq!(args.args, vec!["3 + 5".to_string()]);
    }

    #[test]
    fn test_render_no_output() {
        assert_eq!(outcome(Some(0), "", "").to_string(), "No output produced.");
    }

    #[test]
    fn test_render_success_stdout_only() {
        assert_eq!(outcome(Some(0), "8\n", "").to_string(), "STDOUT: 8\n");
    }

    #[test]
    fn test_render_failure_includes_code_and_stderr() {
        let text = outcome(Some(1), "", "boom").to_string();
        assert_eq!(text, "STDERR: boom\nProcess exited with code 1");
    }

    #[test]
    fn test_render_signal() {
        let text = outcome(None, "", "").to_string();
        assert_eq!(text, "Process was terminated by a signal");
    }

    #[test]
    fn test_success_flag() {
        assert!(outcome(Some(0), "", "").success());
        assert!(!outcome(Some(2), "", "").success());
        assert!(!outcome(None, "", "").success());
    }
}
