//! Name-based dispatch of model function calls onto the sandboxed tools.
//!
//! The registry is the closed [`ToolKind`] enum, so adding an operation means
//! adding a variant and handling it in every `match`. The sandbox root comes
//! from the [`Dispatcher`]'s configuration only; invocation arguments can never
//! name a different one.
//!
//! Every call yields a [`ToolResponse`]. Errors, bad arguments and panics
//! inside a tool all become a failed outcome rather than escaping to the
//! caller.
//!
//! # Example
//!
//! ```ignore
//! let dispatcher = Dispatcher::new(&SandboxConfig::new("./calculator"))?;
//! let response = dispatcher
//!     .dispatch(ToolInvocation::new("get_file_content", json!({"file_path": "main.py"})))
//!     .await;
//! println!("{}", serde_json::to_string(&response)?);
//! ```

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use rig::completion::ToolDefinition;
use rig::tool::Tool;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::exec_tool::{RunPythonFileArgs, RunPythonFileTool};
use super::fs_tools::{
    ListFilesArgs, ListFilesTool, ReadFileArgs, ReadFileTool, WriteFileArgs, WriteFileTool,
};
use super::{SandboxRoot, ToolError};
use crate::config::SandboxConfig;

/// Argument name some callers use to pass a root; always discarded.
const ROOT_ARG: &str = "working_directory";

/// The fixed set of operations a model may invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    GetFilesInfo,
    GetFileContent,
    WriteFile,
    RunPythonFile,
}

impl ToolKind {
    pub const ALL: [ToolKind; 4] = [
        ToolKind::GetFilesInfo,
        ToolKind::GetFileContent,
        ToolKind::WriteFile,
        ToolKind::RunPythonFile,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::GetFilesInfo => ListFilesTool::NAME,
            Self::GetFileContent => ReadFileTool::NAME,
            Self::WriteFile => WriteFileTool::NAME,
            Self::RunPythonFile => RunPythonFileTool::NAME,
        }
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolKind {
    type Err = ToolError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == name)
            .ok_or_else(|| ToolError::UnknownFunction(name.to_string()))
    }
}

/// A function call requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub name: String,
    #[serde(default = "empty_args")]
    pub args: Value,
}

fn empty_args() -> Value {
    Value::Object(Map::new())
}

impl ToolInvocation {
    pub fn new(name: impl Into<String>, args: Value) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

/// Result of one invocation: a rendered payload or an error message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "WireOutcome", try_from = "WireOutcome")]
pub enum ToolOutcome {
    Success { payload: String },
    Failure { message: String },
}

/// Serialized shape of [`ToolOutcome`]: a `success` flag plus either
/// `payload` or `message`.
#[derive(Serialize, Deserialize)]
struct WireOutcome {
    success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl From<ToolOutcome> for WireOutcome {
    fn from(outcome: ToolOutcome) -> Self {
        match outcome {
            ToolOutcome::Success { payload } => Self {
                success: true,
                payload: Some(payload),
                message: None,
            },
            ToolOutcome::Failure { message } => Self {
                success: false,
                payload: None,
                message: Some(message),
            },
        }
    }
}

impl TryFrom<WireOutcome> for ToolOutcome {
    type Error = String;

    fn try_from(wire: WireOutcome) -> Result<Self, Self::Error> {
        match (wire.success, wire.payload, wire.message) {
            (true, Some(payload), _) => Ok(Self::Success { payload }),
            (false, _, Some(message)) => Ok(Self::Failure { message }),
            (true, None, _) => Err("successful outcome is missing `payload`".into()),
            (false, _, None) => Err("failed outcome is missing `message`".into()),
        }
    }
}

/// Envelope relayed back to the model, keyed by the invoked function name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResponse {
    pub name: String,
    pub outcome: ToolOutcome,
}

impl ToolResponse {
    pub fn success(name: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            outcome: ToolOutcome::Success {
                payload: payload.into(),
            },
        }
    }

    pub fn failure(name: impl Into<String>, error: &ToolError) -> Self {
        Self {
            name: name.into(),
            outcome: ToolOutcome::Failure {
                message: error.to_string(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Success { .. })
    }

    /// Payload on success, message on failure.
    pub fn text(&self) -> &str {
        match &self.outcome {
            ToolOutcome::Success { payload } => payload,
            ToolOutcome::Failure { message } => message,
        }
    }
}

/// Routes invocations to the four tools, all bound to one sandbox root.
///
/// Clone-able; clones share the same tool instances.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    root: SandboxRoot,
    list: Arc<ListFilesTool>,
    read: Arc<ReadFileTool>,
    write: Arc<WriteFileTool>,
    run: Arc<RunPythonFileTool>,
}

impl Dispatcher {
    /// Build the tool set from `config`. Fails only if the root is not an
    /// existing directory.
    pub fn new(config: &SandboxConfig) -> Result<Self, ToolError> {
        let root = SandboxRoot::new(&config.root)?;
        Ok(Self {
            list: Arc::new(ListFilesTool::new(&root)),
            read: Arc::new(ReadFileTool::new(&root).with_max_chars(config.max_read_chars)),
            write: Arc::new(WriteFileTool::new(&root)),
            run: Arc::new(
                RunPythonFileTool::new(&root)
                    .with_interpreter(config.interpreter.clone())
                    .with_timeout(config.exec_timeout),
            ),
            root,
        })
    }

    /// The canonical root every invocation is confined to.
    pub fn root(&self) -> &SandboxRoot {
        &self.root
    }

    /// Tool definitions to advertise to the model, in [`ToolKind::ALL`] order.
    pub async fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs = Vec::with_capacity(ToolKind::ALL.len());
        for kind in ToolKind::ALL {
            let def = match kind {
                ToolKind::GetFilesInfo => self.list.definition(String::new()).await,
                ToolKind::GetFileContent => self.read.definition(String::new()).await,
                ToolKind::WriteFile => self.write.definition(String::new()).await,
                ToolKind::RunPythonFile => self.run.definition(String::new()).await,
            };
            defs.push(def);
        }
        defs
    }

    /// Execute one invocation and wrap the result. Never fails.
    pub async fn dispatch(&self, invocation: ToolInvocation) -> ToolResponse {
        let ToolInvocation { name, args } = invocation;
        tracing::info!(function = %name, "dispatching tool call");

        match self.route(&name, args).await {
            Ok(payload) => ToolResponse::success(name, payload),
            Err(err) => {
                tracing::warn!(function = %name, error = %err, "tool call failed");
                ToolResponse::failure(name, &err)
            }
        }
    }

    async fn route(&self, name: &str, args: Value) -> Result<String, ToolError> {
        let kind: ToolKind = name.parse()?;
        let args = strip_root_override(kind, args);

        match kind {
            ToolKind::GetFilesInfo => {
                let args: ListFilesArgs = parse_args(kind, args)?;
                let tool = Arc::clone(&self.list);
                blocking(kind, move || tool.list(&args)).await
            }
            ToolKind::GetFileContent => {
                let args: ReadFileArgs = parse_args(kind, args)?;
                let tool = Arc::clone(&self.read);
                blocking(kind, move || tool.read(&args)).await
            }
            ToolKind::WriteFile => {
                let args: WriteFileArgs = parse_args(kind, args)?;
                let tool = Arc::clone(&self.write);
                blocking(kind, move || tool.write(&args)).await
            }
            ToolKind::RunPythonFile => {
                let args: RunPythonFileArgs = parse_args(kind, args)?;
                let tool = Arc::clone(&self.run);
                spawned(kind, async move { tool.run(&args).await }).await
            }
        }
    }
}

fn strip_root_override(kind: ToolKind, args: Value) -> Value {
    match args {
        Value::Null => empty_args(),
        Value::Object(mut map) => {
            if map.remove(ROOT_ARG).is_some() {
                tracing::warn!(function = %kind, "ignoring caller-supplied {ROOT_ARG}");
            }
            Value::Object(map)
        }
        other => other,
    }
}

fn parse_args<A: DeserializeOwned>(kind: ToolKind, args: Value) -> Result<A, ToolError> {
    serde_json::from_value(args).map_err(|source| ToolError::InvalidArguments {
        function: kind.to_string(),
        source,
    })
}

/// Run a synchronous filesystem tool off the async workers, turning a panic
/// into [`ToolError::Aborted`].
async fn blocking<F, O>(kind: ToolKind, op: F) -> Result<String, ToolError>
where
    F: FnOnce() -> Result<O, ToolError> + Send + 'static,
    O: fmt::Display + Send + 'static,
{
    match tokio::task::spawn_blocking(op).await {
        Ok(result) => result.map(|out| out.to_string()),
        Err(e) => Err(aborted(kind, e)),
    }
}

/// Async counterpart of [`blocking`] for the process runner.
async fn spawned<Fut, O>(kind: ToolKind, fut: Fut) -> Result<String, ToolError>
where
    Fut: Future<Output = Result<O, ToolError>> + Send + 'static,
    O: fmt::Display + Send + 'static,
{
    match tokio::spawn(fut).await {
        Ok(result) => result.map(|out| out.to_string()),
        Err(e) => Err(aborted(kind, e)),
    }
}

fn aborted(kind: ToolKind, err: tokio::task::JoinError) -> ToolError {
    tracing::error!(function = %kind, error = %err, "tool task aborted");
    ToolError::Aborted {
        function: kind.to_string(),
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trips_names() {
        for kind in ToolKind::ALL {
            assert_eq!(kind.as_str().parse::<ToolKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_unknown_kind_message() {
        let err = "delete_file".parse::<ToolKind>().unwrap_err();
        assert_eq!(err.to_string(), "unknown function: delete_file");
    }

    #[test]
    fn test_strip_root_override_removes_key() {
        let args = serde_json::json!({"working_directory": "/", "directory": "pkg"});
        let stripped = strip_root_override(ToolKind::GetFilesInfo, args);
        assert_eq!(stripped, serde_json::json!({"directory": "pkg"}));
    }

    #[test]
    fn test_null_args_become_empty_object() {
        let stripped = strip_root_override(ToolKind::GetFilesInfo, Value::Null);
        assert_eq!(stripped, serde_json::json!({}));
    }

    #[test]
    fn test_invocation_args_default_to_object() {
        let inv: ToolInvocation = serde_json::from_str(r#"{"name": "get_files_info"}"#).unwrap();
        assert_eq!(inv.args, serde_json::json!({}));
    }

    #[test]
    fn test_outcome_wire_shape() {
        let ok = serde_json::to_value(ToolResponse::success("write_file", "done")).unwrap();
        assert_eq!(
            ok,
            serde_json::json!({"name": "write_file", "outcome": {"success": true, "payload": "done"}})
        );

        let err = ToolError::UnknownFunction("delete_file".into());
        let failed = serde_json::to_value(ToolResponse::failure("delete_file", &err)).unwrap();
        assert_eq!(
            failed,
            serde_json::json!({
                "name": "delete_file",
                "outcome": {"success": false, "message": "unknown function: delete_file"}
            })
        );
    }

    #[test]
    fn test_outcome_rejects_inconsistent_wire() {
        let bad = r#"{"name": "x", "outcome": {"success": true, "message": "nope"}}"#;
        assert!(serde_json::from_str::<ToolResponse>(bad).is_err());

        let good = r#"{"name": "x", "outcome": {"success": false, "message": "nope"}}"#;
        let parsed: ToolResponse = serde_json::from_str(good).unwrap();
        assert_eq!(parsed.text(), "nope");
        assert!(!parsed.is_success());
    }

    fn explode() -> Result<String, ToolError> {
        panic!("kaboom")
    }

    #[tokio::test]
    async fn test_blocking_panic_becomes_error() {
        let result = blocking(ToolKind::GetFileContent, explode).await;
        match result {
            Err(ToolError::Aborted { function, .. }) => assert_eq!(function, "get_file_content"),
            other => panic!("expected Aborted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_spawned_panic_becomes_error() {
        let result = spawned(ToolKind::RunPythonFile, async { explode() }).await;
        assert!(matches!(result, Err(ToolError::Aborted { .. })));
    }
}
