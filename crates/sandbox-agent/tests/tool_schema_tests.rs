//! Tool payload schema compatibility tests.
//!
//! The model only ever sees tool names, descriptions and parameter schemas.
//! These tests pin them so an accidental rename or a dropped parameter shows
//! up here instead of as silently failing function calls.

use rig::tool::Tool;
use sandbox_agent::tools::exec_tool::{RunPythonFileArgs, RunPythonFileTool};
use sandbox_agent::tools::fs_tools::{
    ListFilesArgs, ListFilesTool, ReadFileArgs, ReadFileTool, WriteFileArgs, WriteFileTool,
};
use sandbox_agent::{Dispatcher, SandboxConfig, SandboxRoot, ToolKind};

// ---------------------------------------------------------------------------
// Schema structure validation
// ---------------------------------------------------------------------------

/// Verify a tool definition has the expected name and valid parameter schema.
async fn assert_tool_schema<T: Tool>(
    tool: &T,
    expected_name: &str,
    expected_params: &[&str],
    expected_required: &[&str],
) {
    let def = tool.definition(String::new()).await;
    assert_eq!(def.name, expected_name, "Tool name mismatch for {expected_name}");
    assert_eq!(T::NAME, expected_name);
    assert!(
        !def.description.is_empty(),
        "Tool {expected_name} must have a description"
    );

    let params = &def.parameters;
    assert_eq!(
        params["type"], "object",
        "Tool {expected_name} parameters must be type 'object'"
    );

    let props = params["properties"]
        .as_object()
        .unwrap_or_else(|| panic!("Tool {expected_name} must have 'properties'"));
    assert_eq!(
        props.len(),
        expected_params.len(),
        "Tool {expected_name} has unexpected parameters: {props:?}"
    );

    for param in expected_params {
        let prop = props
            .get(*param)
            .unwrap_or_else(|| panic!("Tool {expected_name} missing parameter '{param}'"));
        assert!(
            prop.get("type").is_some(),
            "Tool {expected_name} parameter '{param}' missing 'type'"
        );
        assert!(
            prop.get("description").is_some(),
            "Tool {expected_name} parameter '{param}' missing 'description'"
        );
    }

    // Tools whose parameters are all optional omit "required" entirely.
    match params.get("required").and_then(|r| r.as_array()) {
        Some(required) => {
            let names: Vec<&str> = required.iter().filter_map(|v| v.as_str()).collect();
            assert_eq!(names, expected_required, "required mismatch for {expected_name}");
        }
        None => assert!(
            expected_required.is_empty(),
            "Tool {expected_name} should declare required {expected_required:?}"
        ),
    }
}

fn root() -> (tempfile::TempDir, SandboxRoot) {
    let dir = tempfile::tempdir().unwrap();
    let root = SandboxRoot::new(dir.path()).unwrap();
    (dir, root)
}

// ---------------------------------------------------------------------------
// Per-tool definition tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_get_files_info_schema() {
    let (_dir, root) = root();
    assert_tool_schema(&ListFilesTool::new(&root), "get_files_info", &["directory"], &[]).await;
}

#[tokio::test]
async fn test_get_file_content_schema() {
    let (_dir, root) = root();
    assert_tool_schema(
        &ReadFileTool::new(&root),
        "get_file_content",
        &["file_path"],
        &["file_path"],
    )
    .await;
}

#[tokio::test]
async fn test_get_file_content_description_mentions_cap() {
    let (_dir, root) = root();
    let def = ReadFileTool::new(&root)
        .with_max_chars(1234)
        .definition(String::new())
        .await;
    assert!(def.description.contains("1234"), "{}", def.description);
}

#[tokio::test]
async fn test_write_file_schema() {
    let (_dir, root) = root();
    assert_tool_schema(
        &WriteFileTool::new(&root),
        "write_file",
        &["file_path", "content"],
        &["file_path", "content"],
    )
    .await;
}

#[tokio::test]
async fn test_run_python_file_schema() {
    let (_dir, root) = root();
    let tool = RunPythonFileTool::new(&root);
    assert_tool_schema(&tool, "run_python_file", &["file_path", "args"], &["file_path"]).await;

    let def = tool.definition(String::new()).await;
    assert_eq!(def.parameters["properties"]["args"]["type"], "array");
    assert_eq!(def.parameters["properties"]["args"]["items"]["type"], "string");
}

#[tokio::test]
async fn test_no_schema_exposes_root() {
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = Dispatcher::new(&SandboxConfig::new(dir.path())).unwrap();
    for def in dispatcher.definitions().await {
        assert!(
            def.parameters["properties"].get("working_directory").is_none(),
            "{} must not let the model choose the root",
            def.name
        );
    }
}

#[tokio::test]
async fn test_dispatcher_definitions_match_registry() {
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = Dispatcher::new(&SandboxConfig::new(dir.path())).unwrap();
    let names: Vec<String> = dispatcher
        .definitions()
        .await
        .into_iter()
        .map(|d| d.name)
        .collect();
    let registry: Vec<String> = ToolKind::ALL.iter().map(|k| k.to_string()).collect();
    assert_eq!(names, registry);
}

// ---------------------------------------------------------------------------
// Canonical argument payloads
// ---------------------------------------------------------------------------

#[test]
fn test_canonical_payloads_deserialize() {
    let list: ListFilesArgs = serde_json::from_str(r#"{"directory": "pkg"}"#).unwrap();
    assert_eq!(list.directory, "pkg");

    let read: ReadFileArgs = serde_json::from_str(r#"{"file_path": "main.py"}"#).unwrap();
    assert_eq!(read.file_path, "main.py");

    let write: WriteFileArgs =
        serde_json::from_str(r#"{"file_path": "lorem.txt", "content": "hi"}"#).unwrap();
    assert_eq!(write.content, "hi");

    let run: RunPythonFileArgs =
        serde_json::from_str(r#"{"file_path": "main.py", "args": ["3 + 5"]}"#).unwrap();
    assert_eq!(run.args, vec!["3 + 5"]);
}

#[test]
fn test_wrong_argument_types_rejected() {
    assert!(serde_json::from_str::<ReadFileArgs>(r#"{"file_path": 7}"#).is_err());
    assert!(serde_json::from_str::<RunPythonFileArgs>(
        r#"{"file_path": "main.py", "args": "3 + 5"}"#
    )
    .is_err());
}
