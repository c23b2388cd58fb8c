//! File system tools: list, read, and write within the sandbox root.

use std::fmt;
use std::fs::{self, File};
use std::io::Read;

use rig::completion::ToolDefinition;
use rig::tool::Tool;
use serde::{Deserialize, Serialize};

use super::{sandbox_check, Operation, SandboxRoot, ToolError};

/// Maximum characters returned by `get_file_content`.
pub const MAX_READ_CHARS: usize = 10_000;

// ---------------------------------------------------------------------------
// ListFilesTool
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ListFilesArgs {
    /// Directory relative to the sandbox root. Defaults to the root itself.
    #[serde(default = "default_directory")]
    pub directory: String,
}

fn default_directory() -> String {
    ".".to_string()
}

impl Default for ListFilesArgs {
    fn default() -> Self {
        Self {
            directory: default_directory(),
        }
    }
}

/// One immediate child of a listed directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEntry {
    pub name: String,
    pub size_bytes: u64,
    pub is_dir: bool,
}

/// Entries of a directory, sorted by name.
#[derive(Debug, Clone, Serialize)]
pub struct DirectoryListing {
    pub directory: String,
    pub entries: Vec<FileEntry>,
}

impl fmt::Display for DirectoryListing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.entries.is_empty() {
            return write!(f, "\"{}\" is empty", self.directory);
        }
        let lines: Vec<String> = self
            .entries
            .iter()
            .map(|e| {
                format!(
                    "- {}: file_size={} bytes, is_dir={}",
                    e.name, e.size_bytes, e.is_dir
                )
            })
            .collect();
        f.write_str(&lines.join("\n"))
    }
}

/// List the immediate entries of a directory inside the sandbox.
#[derive(Debug, Clone)]
pub struct ListFilesTool {
    pub root: SandboxRoot,
}

impl ListFilesTool {
    pub fn new(root: &SandboxRoot) -> Self {
        Self { root: root.clone() }
    }

    pub fn list(&self, args: &ListFilesArgs) -> Result<DirectoryListing, ToolError> {
        let dir = sandbox_check(&self.root, &args.directory, Operation::List)?;
        if !dir.as_path().is_dir() {
            return Err(ToolError::NotADirectory(args.directory.clone()));
        }

        let io_err = || ToolError::io(Operation::List, &args.directory);
        let mut entries = Vec::new();
        for entry in fs::read_dir(dir.as_path()).map_err(io_err())? {
            let entry = entry.map_err(io_err())?;
            let path = entry.path();
            // Only follow a link whose target stays inside the root; anything
            // else (escaping or dangling) reports the link itself.
            let meta = match fs::canonicalize(&path) {
                Ok(target) if target.starts_with(self.root.as_path()) => fs::metadata(&target),
                _ => fs::symlink_metadata(&path),
            }
            .map_err(io_err())?;
            entries.push(FileEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                size_bytes: meta.len(),
                is_dir: meta.is_dir(),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        tracing::debug!(directory = %args.directory, count = entries.len(), "get_files_info");
        Ok(DirectoryListing {
            directory: args.directory.clone(),
            entries,
        })
    }
}

impl Tool for ListFilesTool {
    const NAME: &'static str = "get_files_info";
    type Error = ToolError;
    type Args = ListFilesArgs;
    type Output = DirectoryListing;

    async fn definition(&self, _prompt: String) -> ToolDefinition {
        ToolDefinition {
            name: Self::NAME.into(),
            description: "Lists files in the specified directory along with their sizes, \
                          constrained to the working directory."
                .into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "directory": {
                        "type": "string",
                        "description": "The directory to list files from, relative to the working \
                                        directory. If not provided, lists files in the working \
                                        directory itself."
                    }
                }
            }),
        }
    }

    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error> {
        self.list(&args)
    }
}

// ---------------------------------------------------------------------------
// ReadFileTool
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ReadFileArgs {
    /// Path of the file relative to the sandbox root.
    pub file_path: String,
}

/// Read a text file from the sandbox, capped at `max_chars` characters.
///
/// Content past the cap is dropped without a marker. At most `4 * max_chars`
/// bytes (plus one) are pulled from disk, which is enough for any UTF-8 text
/// of that many characters.
#[derive(Debug, Clone)]
pub struct ReadFileTool {
    pub root: SandboxRoot,
    pub max_chars: usize,
}

impl ReadFileTool {
    pub fn new(root: &SandboxRoot) -> Self {
        Self {
            root: root.clone(),
            max_chars: MAX_READ_CHARS,
        }
    }

    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars;
        self
    }

    pub fn read(&self, args: &ReadFileArgs) -> Result<String, ToolError> {
        let path = sandbox_check(&self.root, &args.file_path, Operation::Read)?;
        if !path.as_path().is_file() {
            return Err(ToolError::NotAFile(args.file_path.clone()));
        }

        // One byte past the limit tells a cut from a file that really ends there.
        let byte_limit = self.max_chars.saturating_mul(4);
        let mut bytes = Vec::new();
        File::open(path.as_path())
            .and_then(|file| {
                file.take(byte_limit.saturating_add(1) as u64)
                    .read_to_end(&mut bytes)
            })
            .map_err(ToolError::io(Operation::Read, &args.file_path))?;
        let cut = bytes.len() > byte_limit;
        bytes.truncate(byte_limit);

        let text = match std::str::from_utf8(&bytes) {
            Ok(text) => text,
            // A multi-byte char split by the byte limit is not an encoding error.
            Err(e) if cut && e.error_len().is_none() => {
                std::str::from_utf8(&bytes[..e.valid_up_to()])
                    .map_err(|_| ToolError::InvalidEncoding(args.file_path.clone()))?
            }
            Err(_) => return Err(ToolError::InvalidEncoding(args.file_path.clone())),
        };

        let content = truncate_chars(text, self.max_chars);
        tracing::debug!(
            path = %args.file_path,
            chars = content.chars().count(),
            "get_file_content"
        );
        Ok(content.to_string())
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

impl Tool for ReadFileTool {
    const NAME: &'static str = "get_file_content";
    type Error = ToolError;
    type Args = ReadFileArgs;
    type Output = String;

    async fn definition(&self, _prompt: String) -> ToolDefinition {
        ToolDefinition {
            name: Self::NAME.into(),
            description: format!(
                "Reads the contents of a text file within the permitted working directory, \
                 up to {} characters.",
                self.max_chars
            ),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "file_path": {
                        "type": "string",
                        "description": "Path to the file (relative to the working directory) \
                                        whose content should be read."
                    }
                },
                "required": ["file_path"]
            }),
        }
    }

    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error> {
        self.read(&args)
    }
}

// ---------------------------------------------------------------------------
// WriteFileTool
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct WriteFileArgs {
    /// Path of the file relative to the sandbox root.
    pub file_path: String,
    /// Full replacement content.
    pub content: String,
}

/// Confirmation returned after a successful write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteReceipt {
    pub path: String,
    pub chars_written: usize,
}

impl fmt::Display for WriteReceipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Successfully wrote to \"{}\" ({} characters written)",
            self.path, self.chars_written
        )
    }
}

/// Write content to a file in the sandbox. Creates parent directories.
///
/// Existing content is replaced wholesale. A failure part way through leaves
/// whatever was written so far.
#[derive(Debug, Clone)]
pub struct WriteFileTool {
    pub root: SandboxRoot,
}

impl WriteFileTool {
    pub fn new(root: &SandboxRoot) -> Self {
        Self { root: root.clone() }
    }

    pub fn write(&self, args: &WriteFileArgs) -> Result<WriteReceipt, ToolError> {
        let path = sandbox_check(&self.root, &args.file_path, Operation::Write)?;
        if path.as_path().is_dir() {
            return Err(ToolError::IsADirectory(args.file_path.clone()));
        }

        match path.as_path().parent() {
            Some(parent) if parent != self.root.as_path() => fs::create_dir_all(parent)
                .map_err(ToolError::io(Operation::Write, &args.file_path))?,
            _ => tracing::debug!(
                path = %args.file_path,
                "write_file: target sits directly under the sandbox root"
            ),
        }

        fs::write(path.as_path(), &args.content)
            .map_err(ToolError::io(Operation::Write, &args.file_path))?;
        let receipt = WriteReceipt {
            path: args.file_path.clone(),
            chars_written: args.content.chars().count(),
        };
        tracing::debug!(path = %receipt.path, chars = receipt.chars_written, "write_file");
        Ok(receipt)
    }
}

impl Tool for WriteFileTool {
    const NAME: &'static str = "write_file";
    type Error = ToolError;
    type Args = WriteFileArgs;
    type Output = WriteReceipt;

    async fn definition(&self, _prompt: String) -> ToolDefinition {
        ToolDefinition {
            name: Self::NAME.into(),
            description: "Writes text content to a specified file within the permitted working \
                          directory. Creates parent directories if needed."
                .into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "file_path": {
                        "type": "string",
                        "description": "Relative path of the file to write to within the \
                                        working directory."
                    },
                    "content": {
                        "type": "string",
                        "description": "The text content to write into the file."
                    }
                },
                "required": ["file_path", "content"]
            }),
        }
    }

    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error> {
        self.write(&args)
    }
}

// ── Unit tests ──────────────────────────────────────────────────────
