//! Root-confined filesystem and script-execution tools for LLM agents.
//!
//! The four tools in [`tools`] are plain `rig` tools; [`Dispatcher`] maps a
//! model's named function call onto them and always answers with a
//! [`ToolResponse`] envelope.

pub mod config;
pub mod tools;

pub use config::SandboxConfig;
pub use tools::dispatch::{Dispatcher, ToolInvocation, ToolKind, ToolOutcome, ToolResponse};
pub use tools::{sandbox_check, ConfinedPath, Operation, SandboxRoot, ToolError};
