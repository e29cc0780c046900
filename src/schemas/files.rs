use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Line list the file service reports when only a file *name* matched a search.
pub const FILENAME_MATCH_SENTINEL: &str = "[Filename matches search pattern]";

// --- Schemas for results ---
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FileMetadata {
    pub name: String,
    pub path: String,
    pub size: u64,
    pub mod_time: Option<DateTime<Utc>>,
    pub is_dir: bool,
    pub content_type: Option<String>,
    pub permissions: String,
}

/// Acknowledgement body returned by create/update style endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MutationAck {
    pub message: String,
    pub path: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchEntry {
    pub path: String,
    pub success: bool,
    #[serde(rename = "result", skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchResults {
    pub pattern: String,
    pub path: String,
    pub recursive: bool,
    pub matched_files: usize,
    pub results: BTreeMap<String, Vec<String>>,
}

impl SearchResults {
    /// True when the service matched the file name rather than its content.
    pub fn is_filename_only(lines: &[String]) -> bool {
        lines.len() == 1 && lines[0] == FILENAME_MATCH_SENTINEL
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DirectoryEntry {
    pub name: String,
    pub path: String,
    pub size: u64,
    pub is_dir: bool,
    pub children: Vec<DirectoryEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryTree {
    pub path: String,
    pub tree: Vec<DirectoryEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DirectorySize {
    pub path: String,
    pub size: u64,
    pub size_formatted: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProjectSummary {
    pub name: String,
    pub root_path: String,
    pub file_count: usize,
    pub dir_count: usize,
    pub total_size: u64,
    pub file_types: BTreeMap<String, usize>,
    pub key_files: Vec<String>,
    pub recent_files: Vec<FileMetadata>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SourceFile {
    pub content: String,
    pub dependencies: Vec<String>,
    pub size: u64,
    pub mod_time: Option<String>,
    pub language: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CodeContext {
    pub project_name: String,
    pub main_files: BTreeMap<String, SourceFile>,
    pub dependencies: Vec<String>,
    pub file_structure: BTreeMap<String, StructureNode>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct CodeContextWire {
    pub project_name: String,
    pub main_files: BTreeMap<String, SourceFile>,
    #[serde(rename = "projectDependencies")]
    pub dependencies: Vec<String>,
    pub file_structure: Value,
}

/// One entry of an exported project structure.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StructureNode {
    File {
        size: u64,
        mod_time: Option<String>,
    },
    Directory {
        children: BTreeMap<String, StructureNode>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct FileStructure {
    pub path: String,
    pub depth: i64,
    pub entries: BTreeMap<String, StructureNode>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct FileStructureWire {
    pub path: String,
    pub depth: i64,
    pub structure: Value,
}

fn is_file_leaf(entry: &Map<String, Value>) -> bool {
    entry.len() == 2
        && entry.get("size").is_some_and(Value::is_u64)
        && entry.get("modTime").is_some_and(Value::is_string)
}

impl StructureNode {
    fn from_entry(name: &str, value: &Value) -> Result<Self, String> {
        let entry = value
            .as_object()
            .ok_or_else(|| format!("structure entry '{}' is not an object", name))?;
        if is_file_leaf(entry) {
            return Ok(StructureNode::File {
                size: entry.get("size").and_then(Value::as_u64).unwrap_or_default(),
                mod_time: entry.get("modTime").and_then(Value::as_str).map(str::to_string),
            });
        }
        let children = entry
            .iter()
            .map(|(child, value)| Ok((child.clone(), StructureNode::from_entry(child, value)?)))
            .collect::<Result<BTreeMap<_, _>, String>>()?;
        Ok(StructureNode::Directory { children })
    }

    pub fn is_file(&self) -> bool {
        matches!(self, StructureNode::File { .. })
    }
}

/// Decodes the nested name -> entry map the file service emits. The service
/// sometimes double-encodes it as a JSON string.
pub fn decode_structure(value: &Value) -> Result<BTreeMap<String, StructureNode>, String> {
    let parsed;
    let value = match value {
        Value::String(text) => {
            parsed = serde_json::from_str::<Value>(text).map_err(|e| e.to_string())?;
            &parsed
        }
        Value::Null => return Ok(BTreeMap::new()),
        other => other,
    };
    let root = value
        .as_object()
        .ok_or_else(|| "structure root is not an object".to_string())?;
    root.iter()
        .map(|(name, entry)| Ok((name.clone(), StructureNode::from_entry(name, entry)?)))
        .collect()
}

/// Flattens a structure map into `dir/file` paths of its file leaves.
pub fn structure_file_paths(entries: &BTreeMap<String, StructureNode>) -> Vec<String> {
    let mut paths = Vec::new();
    let mut stack: Vec<(String, &BTreeMap<String, StructureNode>)> = vec![(String::new(), entries)];
    while let Some((prefix, level)) = stack.pop() {
        for (name, node) in level {
            let full = if prefix.is_empty() { name.clone() } else { format!("{}/{}", prefix, name) };
            match node {
                StructureNode::File { .. } => paths.push(full),
                StructureNode::Directory { children } => stack.push((full, children)),
            }
        }
    }
    paths.sort();
    paths
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffPatch {
    pub patches: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchResponse {
    pub result: String,
    pub path: String,
}

// Private envelopes around list payloads.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct FileListing {
    pub files: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct MetadataListing {
    pub files: Vec<FileMetadata>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct DirectoryListing {
    pub directories: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct FileBody {
    pub content: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct BatchResults {
    pub results: Vec<BatchEntry>,
}
