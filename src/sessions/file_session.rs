use super::{RemoteSession, SessionCore};
use crate::error::AppError;
use crate::schemas::files::{
    BatchEntry, BatchResults, CodeContext, CodeContextWire, DirectoryListing, DirectorySize,
    DirectoryTree, DiffPatch, FileBody, FileListing, FileMetadata, FileStructure, FileStructureWire,
    MetadataListing, MutationAck, PatchResponse, ProjectSummary, SearchResults, decode_structure,
};
use crate::transport::{encode_segments, HttpTransport};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, instrument, warn};

/// One session against the file service.
#[derive(Debug)]
pub struct FileSession {
    core: SessionCore,
}

#[async_trait::async_trait]
impl RemoteSession for FileSession {
    fn core(&self) -> &SessionCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SessionCore {
        &mut self.core
    }
}

fn resource_path(prefix: &str, path: &str) -> Result<String, AppError> {
    let encoded = encode_segments(path);
    if encoded.is_empty() {
        return Err(AppError::InvalidPath(format!("'{}' does not name a file or directory", path)));
    }
    Ok(format!("{}/{}", prefix, encoded))
}

fn dot_extension(extension: &str) -> String {
    if extension.starts_with('.') {
        extension.to_string()
    } else {
        format!(".{}", extension)
    }
}

/// Splits a remote path into parent and final component.
fn split_remote(path: &str) -> (&str, &str) {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some(("", name)) => ("/", name),
        Some((parent, name)) => (parent, name),
        None => (".", trimmed),
    }
}

impl FileSession {
    pub async fn open(transport: HttpTransport, working_dir: &Path) -> Result<Self, AppError> {
        let core = SessionCore::open(transport, working_dir).await?;
        Ok(Self { core })
    }

    /// Wraps a core that has not been created yet; `open` is the usual entry point.
    pub fn unbound(transport: HttpTransport) -> Self {
        Self { core: SessionCore::new(transport) }
    }

    async fn get<T: DeserializeOwned>(&self, suffix: &str, query: &[(&str, String)]) -> Result<T, AppError> {
        let path = self.core.session_path(suffix)?;
        self.core
            .transport()
            .call_typed(Method::GET, &path, None, query, StatusCode::OK)
            .await
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        suffix: &str,
        body: Option<&Value>,
        expected: StatusCode,
    ) -> Result<T, AppError> {
        let path = self.core.session_path(suffix)?;
        self.core
            .transport()
            .call_typed(method, &path, body, &[], expected)
            .await
    }

    async fn delete(&self, suffix: &str) -> Result<(), AppError> {
        let path = self.core.session_path(suffix)?;
        self.core
            .transport()
            .call(Method::DELETE, &path, None, &[], StatusCode::NO_CONTENT)
            .await
            .map(|_| ())
    }

    // --- Files ---
    #[instrument(skip(self))]
    pub async fn list_files(&self, path: &str) -> Result<Vec<String>, AppError> {
        let listing: FileListing = self.get("/files", &[("path", path.to_string())]).await?;
        Ok(listing.files)
    }

    #[instrument(skip(self))]
    pub async fn list_files_with_metadata(&self, path: &str) -> Result<Vec<FileMetadata>, AppError> {
        let listing: MetadataListing = self
            .get("/files-metadata", &[("path", path.to_string())])
            .await?;
        Ok(listing.files)
    }

    #[instrument(skip(self))]
    pub async fn read_file(&self, path: &str) -> Result<String, AppError> {
        let body: FileBody = self.get(&resource_path("/files", path)?, &[]).await?;
        debug!(bytes = body.content.len(), "Read file");
        Ok(body.content)
    }

    #[instrument(skip(self, content), fields(bytes = content.len()))]
    pub async fn create_file(&self, path: &str, content: &str) -> Result<MutationAck, AppError> {
        let body = json!({ "content": content });
        self.send(Method::POST, &resource_path("/files", path)?, Some(&body), StatusCode::CREATED)
            .await
    }

    #[instrument(skip(self, content), fields(bytes = content.len()))]
    pub async fn update_file(&self, path: &str, content: &str) -> Result<MutationAck, AppError> {
        let body = json!({ "content": content });
        self.send(Method::PUT, &resource_path("/files", path)?, Some(&body), StatusCode::OK)
            .await
    }

    #[instrument(skip(self))]
    pub async fn delete_file(&self, path: &str) -> Result<(), AppError> {
        self.delete(&resource_path("/files", path)?).await
    }

    #[instrument(skip(self))]
    pub async fn file_metadata(&self, path: &str) -> Result<FileMetadata, AppError> {
        self.get(&resource_path("/file-metadata", path)?, &[]).await
    }

    /// Reads several files in one call. Per-file failures come back as
    /// entries with `success == false`, not as an error.
    #[instrument(skip(self), fields(count = paths.len()))]
    pub async fn batch_read(&self, paths: &[String]) -> Result<Vec<BatchEntry>, AppError> {
        let body = json!({ "files": paths });
        let results: BatchResults = self
            .send(Method::POST, "/batch-read", Some(&body), StatusCode::OK)
            .await?;
        Ok(results.results)
    }

    #[instrument(skip(self))]
    pub async fn search(&self, pattern: &str, path: &str, recursive: bool) -> Result<SearchResults, AppError> {
        let body = json!({ "pattern": pattern, "path": path, "recursive": recursive });
        let results: SearchResults = self
            .send(Method::POST, "/search", Some(&body), StatusCode::OK)
            .await?;
        debug!(matched = results.matched_files, "Search finished");
        Ok(results)
    }

    /// Path -> content. Unreadable files map to an `ERROR: ...` string.
    #[instrument(skip(self), fields(count = paths.len()))]
    pub async fn extract_content(&self, paths: &[String]) -> Result<BTreeMap<String, String>, AppError> {
        let body = json!({ "files": paths });
        self.send(Method::POST, "/extract", Some(&body), StatusCode::OK).await
    }

    // --- Directories ---
    #[instrument(skip(self))]
    pub async fn list_directories(&self, path: &str) -> Result<Vec<String>, AppError> {
        let listing: DirectoryListing = self
            .get("/directories", &[("path", path.to_string())])
            .await?;
        Ok(listing.directories)
    }

    #[instrument(skip(self))]
    pub async fn create_directory(&self, path: &str) -> Result<MutationAck, AppError> {
        self.send(Method::POST, &resource_path("/directories", path)?, None, StatusCode::CREATED)
            .await
    }

    #[instrument(skip(self))]
    pub async fn delete_directory(&self, path: &str) -> Result<(), AppError> {
        self.delete(&resource_path("/directories", path)?).await
    }

    #[instrument(skip(self))]
    pub async fn directory_tree(&self, path: &str, depth: u32) -> Result<DirectoryTree, AppError> {
        self.get(
            "/directory-tree",
            &[("path", path.to_string()), ("depth", depth.to_string())],
        )
        .await
    }

    #[instrument(skip(self))]
    pub async fn directory_size(&self, path: &str) -> Result<DirectorySize, AppError> {
        let suffix = match encode_segments(path) {
            encoded if encoded.is_empty() => "/directory-size/.".to_string(),
            encoded => format!("/directory-size/{}", encoded),
        };
        self.get(&suffix, &[]).await
    }

    // --- Project ---
    #[instrument(skip(self))]
    pub async fn project_summary(&self) -> Result<ProjectSummary, AppError> {
        self.get("/project", &[]).await
    }

    #[instrument(skip(self))]
    pub async fn code_context(&self, max_files: u32) -> Result<CodeContext, AppError> {
        let wire: CodeContextWire = self
            .get("/project/context", &[("maxFiles", max_files.to_string())])
            .await?;
        let file_structure = decode_structure(&wire.file_structure).map_err(|message| {
            AppError::MalformedResponse { service: self.service(), message }
        })?;
        Ok(CodeContext {
            project_name: wire.project_name,
            main_files: wire.main_files,
            dependencies: wire.dependencies,
            file_structure,
        })
    }

    #[instrument(skip(self))]
    pub async fn file_structure(&self, path: &str, depth: u32) -> Result<FileStructure, AppError> {
        let wire: FileStructureWire = self
            .get(
                "/project/structure",
                &[("path", path.to_string()), ("depth", depth.to_string())],
            )
            .await?;
        let entries = decode_structure(&wire.structure).map_err(|message| {
            AppError::MalformedResponse { service: self.service(), message }
        })?;
        Ok(FileStructure { path: wire.path, depth: wire.depth, entries })
    }

    #[instrument(skip(self, files), fields(count = files.len()))]
    pub async fn batch_create(&self, files: &BTreeMap<String, String>) -> Result<Vec<BatchEntry>, AppError> {
        let body = json!({ "files": files });
        let results: BatchResults = self
            .send(Method::POST, "/project/batch-create", Some(&body), StatusCode::OK)
            .await?;
        Ok(results.results)
    }

    // --- Diff and patch ---
    #[instrument(skip(self))]
    pub async fn diff_paths(&self, original_path: &str, modified_path: &str) -> Result<DiffPatch, AppError> {
        let body = json!({ "originalPath": original_path, "modifiedPath": modified_path });
        self.send(Method::POST, "/diff", Some(&body), StatusCode::OK).await
    }

    #[instrument(skip(self, original, modified))]
    pub async fn diff_contents(&self, original: &str, modified: &str) -> Result<DiffPatch, AppError> {
        let body = json!({ "original": original, "modified": modified });
        self.send(Method::POST, "/diff", Some(&body), StatusCode::OK).await
    }

    /// Applies `patches` to `original`. With a `file_path` the service also
    /// writes the result to that file.
    #[instrument(skip(self, original, patches))]
    pub async fn apply_patch(
        &self,
        file_path: Option<&str>,
        original: &str,
        patches: &str,
    ) -> Result<PatchResponse, AppError> {
        let body = json!({
            "filePath": file_path.unwrap_or_default(),
            "original": original,
            "patches": patches,
        });
        self.send(Method::POST, "/patch", Some(&body), StatusCode::OK).await
    }

    // --- Helpers ---
    /// False on any remote rejection; transport failures still propagate.
    pub async fn file_exists(&self, path: &str) -> Result<bool, AppError> {
        match self.file_metadata(path).await {
            Ok(meta) => Ok(!meta.is_dir),
            Err(e) if e.is_remote_rejection() => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn directory_exists(&self, path: &str) -> Result<bool, AppError> {
        let (parent, name) = split_remote(path);
        if name.is_empty() || name == "." {
            return Ok(true);
        }
        match self.list_directories(parent).await {
            Ok(dirs) => Ok(dirs.iter().any(|d| d == name || split_remote(d).1 == name)),
            Err(e) if e.is_remote_rejection() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Returns true when the directory had to be created.
    pub async fn ensure_directory_exists(&self, path: &str) -> Result<bool, AppError> {
        if self.directory_exists(path).await? {
            return Ok(false);
        }
        self.create_directory(path).await?;
        Ok(true)
    }

    /// Update-or-create.
    #[instrument(skip(self, content), fields(bytes = content.len()))]
    pub async fn save_file(&self, path: &str, content: &str) -> Result<MutationAck, AppError> {
        if self.file_exists(path).await? {
            self.update_file(path, content).await
        } else {
            self.create_file(path, content).await
        }
    }

    pub async fn read_and_update_file<F>(&self, path: &str, update: F) -> Result<MutationAck, AppError>
    where
        F: FnOnce(String) -> String + Send,
    {
        let current = self.read_file(path).await?;
        let updated = update(current);
        self.update_file(path, &updated).await
    }

    /// Copies `path` to `<path>.bak.<unix seconds>` and returns the new path.
    #[instrument(skip(self))]
    pub async fn backup_file(&self, path: &str) -> Result<String, AppError> {
        let content = self.read_file(path).await?;
        let backup_path = format!("{}.bak.{}", path, chrono::Utc::now().timestamp());
        self.create_file(&backup_path, &content).await?;
        info!(backup = %backup_path, "File backed up");
        Ok(backup_path)
    }

    pub async fn find_files_by_extension(
        &self,
        extension: &str,
        path: &str,
        recursive: bool,
    ) -> Result<Vec<String>, AppError> {
        let extension = dot_extension(extension);
        let results = self.search(&extension, path, recursive).await?;
        Ok(results
            .results
            .into_keys()
            .filter(|file| file.ends_with(&extension))
            .collect())
    }

    /// Up to `max_per_type` files for each extension the project summary reports.
    pub async fn project_files_by_type(
        &self,
        file_types: &[&str],
        max_per_type: usize,
    ) -> Result<BTreeMap<String, Vec<String>>, AppError> {
        let summary = self.project_summary().await?;
        let mut by_type = BTreeMap::new();
        for file_type in file_types {
            let extension = dot_extension(file_type);
            if summary.file_types.get(&extension).copied().unwrap_or(0) == 0 {
                continue;
            }
            match self.find_files_by_extension(&extension, ".", true).await {
                Ok(mut files) => {
                    files.truncate(max_per_type);
                    by_type.insert(extension, files);
                }
                Err(e) if e.is_remote_rejection() => {
                    warn!(extension = %extension, error = %e, "Skipping file type");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(by_type)
    }
}
