//! Rig-compatible tools confined to a single sandbox root.
//!
//! Each tool implements `rig::tool::Tool` so it can be attached to an agent
//! directly, and [`dispatch::Dispatcher`] routes named function calls to them
//! for callers that drive the model loop themselves. Every path argument goes
//! through [`sandbox_check`] before anything touches the filesystem.

pub mod dispatch;
pub mod exec_tool;
pub mod fs_tools;

use std::fmt;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

/// Symlink hops followed while resolving a dangling link before giving up.
const MAX_SYMLINK_HOPS: u8 = 40;

/// Errors that can occur during tool execution.
///
/// The `Display` text is what the model sees in a failed tool result, so each
/// message names the offending path or function.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Cannot {op} \"{path}\": {source}")]
    Io {
        op: Operation,
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("sandbox root `{}` is not an existing directory", .0.display())]
    InvalidRoot(PathBuf),

    #[error("Cannot {op} \"{path}\" as it is outside the permitted working directory")]
    OutsideSandbox { op: Operation, path: String },

    #[error("\"{0}\" is not a valid directory")]
    NotADirectory(String),

    #[error("File not found or is not a regular file: \"{0}\"")]
    NotAFile(String),

    #[error("Cannot write to \"{0}\" as it is a directory")]
    IsADirectory(String),

    #[error("\"{0}\" is not valid UTF-8 text")]
    InvalidEncoding(String),

    #[error("File \"{0}\" not found.")]
    ScriptNotFound(String),

    #[error("\"{0}\" is not a Python file.")]
    NotAPythonFile(String),

    #[error("interpreter command `{0}` is empty or malformed")]
    InvalidInterpreter(String),

    #[error("executing Python file \"{path}\": {source}")]
    Launch {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("executing Python file \"{path}\": timed out after {limit:?}")]
    Timeout { path: String, limit: Duration },

    #[error("unknown function: {0}")]
    UnknownFunction(String),

    #[error("invalid arguments for {function}: {source}")]
    InvalidArguments {
        function: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{function} aborted unexpectedly: {reason}")]
    Aborted { function: String, reason: String },
}

impl ToolError {
    /// Adapter for `map_err` that tags an I/O failure with what was attempted.
    pub(crate) fn io(op: Operation, path: &str) -> impl FnOnce(io::Error) -> Self {
        let path = path.to_string();
        move |source| Self::Io { op, path, source }
    }
}

/// The kind of access a path is being confined for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    List,
    Read,
    Write,
    Execute,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::List => "list",
            Self::Read => "read",
            Self::Write => "write to",
            Self::Execute => "execute",
        })
    }
}

/// Canonical absolute directory that every tool operation is confined to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxRoot(PathBuf);

impl SandboxRoot {
    /// Canonicalize `path` and pin it as the sandbox root.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, ToolError> {
        let path = path.as_ref();
        let canonical = path
            .canonicalize()
            .map_err(|_| ToolError::InvalidRoot(path.to_path_buf()))?;
        if !canonical.is_dir() {
            return Err(ToolError::InvalidRoot(path.to_path_buf()));
        }
        Ok(Self(canonical))
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }
}

/// A resolved path proven to be the sandbox root or one of its descendants.
///
/// Only [`sandbox_check`] constructs these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfinedPath(PathBuf);

impl ConfinedPath {
    pub fn as_path(&self) -> &Path {
        &self.0
    }
}

impl AsRef<Path> for ConfinedPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

/// Validate that `candidate` resolves inside the sandbox root.
///
/// Symlinks and `..` are resolved through the filesystem for every component
/// that exists; components that do not exist yet (write targets) are applied
/// lexically on top of the deepest existing ancestor. Containment is checked
/// per path component, never by string prefix. An empty candidate means the
/// root itself.
pub fn sandbox_check(
    root: &SandboxRoot,
    candidate: &str,
    op: Operation,
) -> Result<ConfinedPath, ToolError> {
    let requested = if candidate.is_empty() { "." } else { candidate };
    let resolved = resolve(&root.as_path().join(requested), MAX_SYMLINK_HOPS)
        .map_err(ToolError::io(op, candidate))?;

    if !resolved.starts_with(root.as_path()) {
        tracing::warn!(
            path = %candidate,
            op = %op,
            resolved = %resolved.display(),
            "rejected path outside sandbox root"
        );
        return Err(ToolError::OutsideSandbox {
            op,
            path: candidate.to_string(),
        });
    }
    Ok(ConfinedPath(resolved))
}

fn resolve(path: &Path, hops: u8) -> io::Result<PathBuf> {
    let components: Vec<Component<'_>> = path.components().collect();

    for split in (1..=components.len()).rev() {
        let prefix: PathBuf = components[..split].iter().collect();
        let tail = &components[split..];

        match prefix.canonicalize() {
            Ok(base) => return Ok(append_lexically(base, tail)),
            Err(_) => {
                // A dangling symlink has no canonical form; follow its target
                // by hand so it cannot smuggle a write outside the root.
                let is_link = fs::symlink_metadata(&prefix)
                    .map(|meta| meta.file_type().is_symlink())
                    .unwrap_or(false);
                if !is_link {
                    continue;
                }
                if hops == 0 {
                    return Err(io::Error::other("too many levels of symbolic links"));
                }
                let target = fs::read_link(&prefix)?;
                let mut redirected = prefix
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_default()
                    .join(target);
                redirected.extend(tail);
                return resolve(&redirected, hops - 1);
            }
        }
    }

    Err(io::Error::new(
        io::ErrorKind::NotFound,
        format!("cannot resolve path {}", path.display()),
    ))
}

fn append_lexically(mut base: PathBuf, tail: &[Component<'_>]) -> PathBuf {
    for component in tail {
        match component {
            Component::Normal(name) => base.push(name),
            Component::ParentDir => {
                base.pop();
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }
    base
}
