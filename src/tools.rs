//! Local tools the model can call: filesystem helpers, a browser opener and
//! an application launcher.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::gemini::{FunctionCall, FunctionDeclaration, FunctionResponse, ObjectSchema, PropertySchema};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Success,
    /// The requested side effect was already in place.
    Skipped,
    Error,
}

/// Outcome of one tool call, relayed back to the model as the function
/// response payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolResult {
    pub status: ToolStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl ToolResult {
    fn with_status(status: ToolStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            files: None,
            directory_path: None,
            content: None,
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::with_status(ToolStatus::Success, message)
    }

    pub fn skipped(message: impl Into<String>) -> Self {
        Self::with_status(ToolStatus::Skipped, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::with_status(ToolStatus::Error, message)
    }

    /// Wrap the result as the response to `call`.
    pub fn into_response(self, call: &FunctionCall) -> FunctionResponse {
        let response = match serde_json::to_value(&self) {
            Ok(value) => value,
            Err(e) => serde_json::json!({"status": "error", "message": e.to_string()}),
        };
        FunctionResponse {
            id: call.id.clone(),
            name: call.name.clone(),
            response,
        }
    }
}

/// Why a call could not be turned into a [`Tool`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolError {
    #[error("Unknown tool '{0}'.")]
    Unknown(String),

    #[error("Invalid {0} provided.")]
    InvalidArgument(&'static str),

    #[error("The path '{0}' is outside the workspace.")]
    OutsideWorkspace(String),
}

/// Every tool the dispatcher knows how to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tool {
    CreateFolder { folder_path: String },
    CreateFile { file_path: String, content: String },
    EditFile { file_path: String, content: String },
    ListFiles { directory_path: String },
    ReadFile { file_path: String },
    OpenWebsite { url: String },
    OpenApplication { application_name: String },
}

/// A required, non-empty string argument.
fn required<'a>(args: &'a Value, key: &str, what: &'static str) -> Result<&'a str, ToolError> {
    match args.get(key).and_then(Value::as_str) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(ToolError::InvalidArgument(what)),
    }
}

/// A string argument that may be empty but must be present.
fn text<'a>(args: &'a Value, key: &str, what: &'static str) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or(ToolError::InvalidArgument(what))
}

impl Tool {
    pub fn from_call(call: &FunctionCall) -> Result<Self, ToolError> {
        let args = &call.args;
        let tool = match call.name.as_str() {
            "create_folder" => Self::CreateFolder {
                folder_path: required(args, "folder_path", "folder path")?.to_string(),
            },
            "create_file" => Self::CreateFile {
                file_path: required(args, "file_path", "file path")?.to_string(),
                content: text(args, "content", "content")?.to_string(),
            },
            "edit_file" => Self::EditFile {
                file_path: required(args, "file_path", "file path")?.to_string(),
                content: text(args, "content", "content")?.to_string(),
            },
            "list_files" => Self::ListFiles {
                directory_path: match args.get("directory_path") {
                    None | Some(Value::Null) => ".".to_string(),
                    Some(Value::String(path)) if path.is_empty() => ".".to_string(),
                    Some(Value::String(path)) => path.clone(),
                    Some(_) => return Err(ToolError::InvalidArgument("directory path")),
                },
            },
            "read_file" => Self::ReadFile {
                file_path: required(args, "file_path", "file path")?.to_string(),
            },
            "open_website" => Self::OpenWebsite {
                url: required(args, "url", "URL")?.to_string(),
            },
            "open_application" => Self::OpenApplication {
                application_name: required(args, "application_name", "application name")?.to_string(),
            },
            other => return Err(ToolError::Unknown(other.to_string())),
        };
        Ok(tool)
    }
}

/// Opens a URL outside the process.
pub type UrlOpener = Arc<dyn Fn(&str) -> std::io::Result<()> + Send + Sync>;

/// Starts a desktop application by name.
pub type AppLauncher = Arc<dyn Fn(&str) -> std::io::Result<()> + Send + Sync>;

/// Program and arguments that start `name` on this platform. Common names
/// are mapped to what the platform launcher expects; anything else is passed
/// through.
pub fn launch_command(name: &str) -> (String, Vec<String>) {
    let lower = name.to_lowercase();
    if cfg!(target_os = "windows") {
        let target = match lower.as_str() {
            "calculator" => "calc:",
            "notepad" => "notepad",
            "chrome" | "google chrome" => "chrome",
            "firefox" => "firefox",
            "explorer" | "file explorer" => "explorer",
            _ => name,
        };
        // The empty argument is the window title `start` expects first.
        let args = ["/C", "start", "", target].map(String::from).to_vec();
        ("cmd".to_string(), args)
    } else if cfg!(target_os = "macos") {
        let target = match lower.as_str() {
            "calculator" => "Calculator",
            "chrome" | "google chrome" => "Google Chrome",
            "firefox" => "Firefox",
            "finder" => "Finder",
            "textedit" => "TextEdit",
            _ => name,
        };
        ("open".to_string(), vec!["-a".to_string(), target.to_string()])
    } else {
        (lower, Vec::new())
    }
}

fn launch(name: &str) -> io::Result<()> {
    let (program, args) = launch_command(name);
    Command::new(program).args(args).spawn().map(|_| ())
}

/// Runs tool calls against a workspace directory.
#[derive(Clone)]
pub struct ToolDispatcher {
    root: PathBuf,
    opener: UrlOpener,
    launcher: AppLauncher,
}

impl ToolDispatcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            opener: Arc::new(|url: &str| open::that(url)),
            launcher: Arc::new(launch),
        }
    }

    /// Replace the browser opener.
    pub fn with_opener(mut self, opener: UrlOpener) -> Self {
        self.opener = opener;
        self
    }

    /// Replace the application launcher.
    pub fn with_launcher(mut self, launcher: AppLauncher) -> Self {
        self.launcher = launcher;
        self
    }

    /// Join `path` onto the workspace root. Absolute paths and `..` are
    /// refused so tools stay inside the root.
    fn resolve(&self, path: &str) -> Result<PathBuf, ToolError> {
        let escapes = Path::new(path)
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(ToolError::OutsideWorkspace(path.to_string()));
        }
        Ok(self.root.join(path))
    }

    /// Run one call. Never fails: every problem becomes an `error` result.
    pub fn dispatch(&self, call: &FunctionCall) -> ToolResult {
        info!("Tool call: {} ({})", call.name, call.id);
        debug!("Tool args: {}", call.args);

        let result = match Tool::from_call(call) {
            Ok(tool) => self.run(tool),
            Err(e) => ToolResult::error(e.to_string()),
        };

        if result.status == ToolStatus::Error {
            warn!("Tool {} failed: {}", call.name, result.message);
        } else {
            info!("Tool {} {:?}: {}", call.name, result.status, result.message);
        }
        result
    }

    pub fn run(&self, tool: Tool) -> ToolResult {
        match tool {
            Tool::CreateFolder { folder_path } => self.create_folder(&folder_path),
            Tool::CreateFile { file_path, content } => self.create_file(&file_path, &content),
            Tool::EditFile { file_path, content } => self.edit_file(&file_path, &content),
            Tool::ListFiles { directory_path } => self.list_files(&directory_path),
            Tool::ReadFile { file_path } => self.read_file(&file_path),
            Tool::OpenWebsite { url } => self.open_website(&url),
            Tool::OpenApplication { application_name } => self.open_application(&application_name),
        }
    }

    fn create_folder(&self, folder_path: &str) -> ToolResult {
        let path = match self.resolve(folder_path) {
            Ok(path) => path,
            Err(e) => return ToolResult::error(e.to_string()),
        };
        if path.exists() {
            return ToolResult::skipped(format!("The folder '{}' already exists.", folder_path));
        }
        match fs::create_dir_all(&path) {
            Ok(()) => ToolResult::success(format!(
                "Successfully created the folder at '{}'.",
                folder_path
            )),
            Err(e) => ToolResult::error(format!("An error occurred: {}", e)),
        }
    }

    fn create_file(&self, file_path: &str, content: &str) -> ToolResult {
        let path = match self.resolve(file_path) {
            Ok(path) => path,
            Err(e) => return ToolResult::error(e.to_string()),
        };
        if path.exists() {
            return ToolResult::skipped(format!("The file '{}' already exists.", file_path));
        }
        match fs::write(&path, content) {
            Ok(()) => ToolResult::success(format!(
                "Successfully created the file at '{}'.",
                file_path
            )),
            Err(e) => ToolResult::error(format!(
                "An error occurred while creating the file: {}",
                e
            )),
        }
    }

    fn edit_file(&self, file_path: &str, content: &str) -> ToolResult {
        let path = match self.resolve(file_path) {
            Ok(path) => path,
            Err(e) => return ToolResult::error(e.to_string()),
        };
        if !path.exists() {
            return ToolResult::error(format!(
                "The file '{}' does not exist. Please create it first.",
                file_path
            ));
        }
        let appended = fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .and_then(|mut file| write!(file, "\n{}", content));
        match appended {
            Ok(()) => ToolResult::success(format!(
                "Successfully appended content to the file at '{}'.",
                file_path
            )),
            Err(e) => ToolResult::error(format!(
                "An error occurred while editing the file: {}",
                e
            )),
        }
    }

    fn list_files(&self, directory_path: &str) -> ToolResult {
        let path = match self.resolve(directory_path) {
            Ok(path) => path,
            Err(e) => return ToolResult::error(e.to_string()),
        };
        if !path.is_dir() {
            return ToolResult::error(format!(
                "The path '{}' is not a valid directory.",
                directory_path
            ));
        }

        let entries = match fs::read_dir(&path) {
            Ok(entries) => entries,
            Err(e) => return ToolResult::error(format!("An error occurred: {}", e)),
        };
        let mut files = Vec::new();
        for entry in entries {
            match entry {
                Ok(entry) => files.push(entry.file_name().to_string_lossy().into_owned()),
                Err(e) => return ToolResult::error(format!("An error occurred: {}", e)),
            }
        }
        files.sort();

        let mut result = ToolResult::success(format!(
            "Found {} items in '{}'.",
            files.len(),
            directory_path
        ));
        result.files = Some(files);
        result.directory_path = Some(directory_path.to_string());
        result
    }

    fn read_file(&self, file_path: &str) -> ToolResult {
        let path = match self.resolve(file_path) {
            Ok(path) => path,
            Err(e) => return ToolResult::error(e.to_string()),
        };
        if !path.exists() {
            return ToolResult::error(format!("The file '{}' does not exist.", file_path));
        }
        if !path.is_file() {
            return ToolResult::error(format!("The path '{}' is not a file.", file_path));
        }
        match fs::read_to_string(&path) {
            Ok(content) => {
                let mut result =
                    ToolResult::success(format!("Successfully read the file '{}'.", file_path));
                result.content = Some(content);
                result
            }
            Err(e) => ToolResult::error(format!(
                "An error occurred while reading the file: {}",
                e
            )),
        }
    }

    fn open_website(&self, url: &str) -> ToolResult {
        let url = if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("https://{}", url)
        };
        match (self.opener)(&url) {
            Ok(()) => ToolResult::success(format!("Successfully opened '{}'.", url)),
            Err(e) => ToolResult::error(format!("An error occurred: {}", e)),
        }
    }

    fn open_application(&self, name: &str) -> ToolResult {
        match (self.launcher)(name) {
            Ok(()) => ToolResult::success(format!("Successfully launched '{}'.", name)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                ToolResult::error(format!("Application '{}' not found.", name))
            }
            Err(e) => ToolResult::error(format!("An error occurred: {}", e)),
        }
    }
}

fn string_property(description: &str) -> PropertySchema {
    PropertySchema {
        kind: "STRING",
        description: description.to_string(),
    }
}

fn declaration(
    name: &str,
    description: &str,
    properties: &[(&str, &str)],
    required: &[&str],
) -> FunctionDeclaration {
    FunctionDeclaration {
        name: name.to_string(),
        description: description.to_string(),
        parameters: ObjectSchema {
            kind: "OBJECT",
            properties: properties
                .iter()
                .map(|(key, desc)| (key.to_string(), string_property(desc)))
                .collect::<BTreeMap<_, _>>(),
            required: required.iter().map(|r| r.to_string()).collect(),
        },
    }
}

/// Declarations advertised to the model at session setup.
pub fn declarations() -> Vec<FunctionDeclaration> {
    vec![
        declaration(
            "create_folder",
            "Creates a new folder at the specified path relative to the workspace root.",
            &[("folder_path", "The path for the new folder (e.g., 'new_project/assets').")],
            &["folder_path"],
        ),
        declaration(
            "create_file",
            "Creates a new file with specified content at a given path.",
            &[
                ("file_path", "The path for the new file (e.g., 'new_project/notes.txt')."),
                ("content", "The content to write into the new file."),
            ],
            &["file_path", "content"],
        ),
        declaration(
            "edit_file",
            "Appends content to an existing file at a specified path.",
            &[
                ("file_path", "The path of the file to edit (e.g., 'project/notes.txt')."),
                ("content", "The content to append to the file."),
            ],
            &["file_path", "content"],
        ),
        declaration(
            "list_files",
            "Lists all files and directories within a specified folder. Defaults to the current directory if no path is provided.",
            &[(
                "directory_path",
                "The path of the directory to inspect. Defaults to '.' (current directory) if omitted.",
            )],
            &[],
        ),
        declaration(
            "read_file",
            "Reads the entire content of a specified file.",
            &[("file_path", "The path of the file to read (e.g., 'project/notes.txt').")],
            &["file_path"],
        ),
        declaration(
            "open_website",
            "Opens a given URL in the default web browser.",
            &[(
                "url",
                "The full URL of the website to open (e.g., 'https://www.google.com').",
            )],
            &["url"],
        ),
        declaration(
            "open_application",
            "Opens or launches a desktop application on the user's computer.",
            &[(
                "application_name",
                "The name of the application to open (e.g., 'Notepad', 'Calculator', 'Chrome').",
            )],
            &["application_name"],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn call(name: &str, args: Value) -> FunctionCall {
        FunctionCall {
            id: format!("{}-id", name),
            name: name.to_string(),
            args,
        }
    }

    fn dispatcher(dir: &TempDir) -> ToolDispatcher {
        ToolDispatcher::new(dir.path())
            .with_opener(Arc::new(|_: &str| Ok(())))
            .with_launcher(Arc::new(|_: &str| Ok(())))
    }

    #[test]
    fn test_create_file_then_skipped() {
        let dir = TempDir::new().unwrap();
        let tools = dispatcher(&dir);
        let create = call("create_file", json!({"file_path": "notes.txt", "content": "hi"}));

        let first = tools.dispatch(&create);
        assert_eq!(first.status, ToolStatus::Success);
        assert!(first.message.contains("created"));
        assert_eq!(fs::read_to_string(dir.path().join("notes.txt")).unwrap(), "hi");

        let second = tools.dispatch(&create);
        assert_eq!(second.status, ToolStatus::Skipped);
        assert!(second.message.contains("already exists"));
        assert_eq!(fs::read_to_string(dir.path().join("notes.txt")).unwrap(), "hi");
    }

    #[test]
    fn test_create_folder_then_skipped() {
        let dir = TempDir::new().unwrap();
        let tools = dispatcher(&dir);
        let create = call("create_folder", json!({"folder_path": "project/assets"}));

        assert_eq!(tools.dispatch(&create).status, ToolStatus::Success);
        assert!(dir.path().join("project/assets").is_dir());
        assert_eq!(tools.dispatch(&create).status, ToolStatus::Skipped);
    }

    #[test]
    fn test_edit_file() {
        let dir = TempDir::new().unwrap();
        let tools = dispatcher(&dir);

        let missing = tools.dispatch(&call("edit_file", json!({"file_path": "a.txt", "content": "x"})));
        assert_eq!(missing.status, ToolStatus::Error);
        assert!(missing.message.contains("does not exist"));
        assert!(!dir.path().join("a.txt").exists());

        fs::write(dir.path().join("a.txt"), "first").unwrap();
        let edited = tools.dispatch(&call("edit_file", json!({"file_path": "a.txt", "content": "second"})));
        assert_eq!(edited.status, ToolStatus::Success);
        let contents = fs::read_to_string(dir.path().join("a.txt")).unwrap();
        assert!(contents.starts_with("first"));
        assert_eq!(contents, "first\nsecond");
    }

    #[test]
    fn test_list_and_read() {
        let dir = TempDir::new().unwrap();
        let tools = dispatcher(&dir);
        fs::write(dir.path().join("b.txt"), "bee").unwrap();
        fs::write(dir.path().join("a.txt"), "ay").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();

        let listed = tools.dispatch(&call("list_files", json!({})));
        assert_eq!(listed.status, ToolStatus::Success);
        assert_eq!(listed.directory_path.as_deref(), Some("."));
        assert_eq!(
            listed.files,
            Some(vec!["a.txt".to_string(), "b.txt".to_string(), "sub".to_string()])
        );

        let not_dir = tools.dispatch(&call("list_files", json!({"directory_path": "a.txt"})));
        assert_eq!(not_dir.status, ToolStatus::Error);

        let read = tools.dispatch(&call("read_file", json!({"file_path": "b.txt"})));
        assert_eq!(read.content.as_deref(), Some("bee"));

        let read_dir = tools.dispatch(&call("read_file", json!({"file_path": "sub"})));
        assert_eq!(read_dir.status, ToolStatus::Error);
        assert!(read_dir.message.contains("not a file"));
    }

    #[test]
    fn test_invalid_arguments_and_unknown_tool() {
        let dir = TempDir::new().unwrap();
        let tools = dispatcher(&dir);

        let empty = tools.dispatch(&call("create_folder", json!({"folder_path": ""})));
        assert_eq!(empty.status, ToolStatus::Error);
        assert_eq!(empty.message, "Invalid folder path provided.");

        let wrong_type = tools.dispatch(&call("read_file", json!({"file_path": 3})));
        assert_eq!(wrong_type.message, "Invalid file path provided.");

        let no_app = tools.dispatch(&call("open_application", json!({})));
        assert_eq!(no_app.message, "Invalid application name provided.");

        let unknown = tools.dispatch(&call("delete_everything", json!({"path": "x"})));
        assert_eq!(unknown.status, ToolStatus::Error);
        assert!(unknown.message.contains("delete_everything"));
    }

    #[test]
    fn test_open_website_adds_scheme() {
        let dir = TempDir::new().unwrap();
        let opened = Arc::new(Mutex::new(Vec::new()));
        let record = opened.clone();
        let tools = ToolDispatcher::new(dir.path()).with_opener(Arc::new(move |url: &str| {
            record.lock().unwrap().push(url.to_string());
            Ok(())
        }));

        tools.dispatch(&call("open_website", json!({"url": "example.com"})));
        tools.dispatch(&call("open_website", json!({"url": "http://example.org"})));
        assert_eq!(
            *opened.lock().unwrap(),
            vec!["https://example.com".to_string(), "http://example.org".to_string()]
        );
    }

    #[test]
    fn test_open_application_reports_launch_outcome() {
        let dir = TempDir::new().unwrap();
        let launched = Arc::new(Mutex::new(Vec::new()));
        let record = launched.clone();
        let tools = ToolDispatcher::new(dir.path()).with_launcher(Arc::new(move |name: &str| {
            record.lock().unwrap().push(name.to_string());
            if name == "Calculator" {
                Ok(())
            } else {
                Err(io::Error::new(io::ErrorKind::NotFound, "no such program"))
            }
        }));

        let ok = tools.dispatch(&call("open_application", json!({"application_name": "Calculator"})));
        assert_eq!(ok.status, ToolStatus::Success);
        assert_eq!(ok.message, "Successfully launched 'Calculator'.");

        let missing = tools.dispatch(&call("open_application", json!({"application_name": "Nope"})));
        assert_eq!(missing.status, ToolStatus::Error);
        assert_eq!(missing.message, "Application 'Nope' not found.");
        assert_eq!(*launched.lock().unwrap(), vec!["Calculator", "Nope"]);
    }

    #[test]
    fn test_launch_command_maps_known_names() {
        let (program, args) = launch_command("Google Chrome");
        if cfg!(target_os = "windows") {
            assert_eq!(program, "cmd");
            assert_eq!(args.last().map(String::as_str), Some("chrome"));
        } else if cfg!(target_os = "macos") {
            assert_eq!(program, "open");
            assert_eq!(args, vec!["-a", "Google Chrome"]);
        } else {
            assert_eq!(program, "google chrome");
            assert!(args.is_empty());
        }
    }

    #[test]
    fn test_paths_outside_workspace_are_refused() {
        let parent = TempDir::new().unwrap();
        let root = parent.path().join("workspace");
        fs::create_dir(&root).unwrap();
        fs::write(parent.path().join("outside.txt"), "secret").unwrap();
        let tools = ToolDispatcher::new(&root);

        let up = tools.dispatch(&call("read_file", json!({"file_path": "../outside.txt"})));
        assert_eq!(up.status, ToolStatus::Error);
        assert!(up.message.contains("outside the workspace"));
        assert!(up.content.is_none());

        let absolute = parent.path().join("outside.txt");
        let abs = tools.dispatch(&call("read_file", json!({"file_path": absolute.to_str().unwrap()})));
        assert_eq!(abs.status, ToolStatus::Error);
        assert!(abs.message.contains("outside the workspace"));

        let folder = tools.dispatch(&call("create_folder", json!({"folder_path": "sub/../../escaped"})));
        assert_eq!(folder.status, ToolStatus::Error);
        assert!(!parent.path().join("escaped").exists());

        let file = tools.dispatch(&call("create_file", json!({"file_path": "../new.txt", "content": "x"})));
        assert_eq!(file.status, ToolStatus::Error);
        assert!(!parent.path().join("new.txt").exists());

        let listed = tools.dispatch(&call("list_files", json!({"directory_path": "./"})));
        assert_eq!(listed.status, ToolStatus::Success);
    }

    #[test]
    fn test_result_into_response() {
        let result = ToolResult::skipped("The folder 'x' already exists.");
        let response = result.into_response(&call("create_folder", json!({})));
        assert_eq!(response.id, "create_folder-id");
        assert_eq!(
            response.response,
            json!({"status": "skipped", "message": "The folder 'x' already exists."})
        );
    }

    #[test]
    fn test_declarations_schema() {
        let decls = declarations();
        let names: Vec<_> = decls.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(
            names,
            [
                "create_folder",
                "create_file",
                "edit_file",
                "list_files",
                "read_file",
                "open_website",
                "open_application"
            ]
        );
        let json = serde_json::to_value(&decls[1]).unwrap();
        assert_eq!(json["parameters"]["type"], "OBJECT");
        assert_eq!(json["parameters"]["properties"]["file_path"]["type"], "STRING");
        assert_eq!(json["parameters"]["required"], json!(["file_path", "content"]));
        let list = serde_json::to_value(&decls[3]).unwrap();
        assert!(list["parameters"].get("required").is_none());
    }
}
