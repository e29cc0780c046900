use crate::coordinator::Coordinator;
use crate::error::AppError;
use crate::schemas::files::DiffPatch;
use serde::Serialize;
use tracing::{debug, instrument};

/// What to diff: two files in the session, or two literal strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffSource {
    Paths { original: String, modified: String },
    Contents { original: String, modified: String },
}

impl DiffSource {
    /// Builds a source from the four optional arguments callers usually hold.
    /// Exactly one complete pair must be present. An empty content string is
    /// still content; an empty path is not a path.
    pub fn from_parts(
        original_path: Option<&str>,
        modified_path: Option<&str>,
        original_content: Option<&str>,
        modified_content: Option<&str>,
    ) -> Result<Self, AppError> {
        let any_path = original_path.is_some() || modified_path.is_some();
        let any_content = original_content.is_some() || modified_content.is_some();
        match (any_path, any_content) {
            (true, true) => Err(AppError::usage(
                "Diff takes either two paths or two content strings, not a mix",
            )),
            (false, false) => Err(AppError::usage("Diff needs two paths or two content strings")),
            (true, false) => match (original_path, modified_path) {
                (Some(original), Some(modified)) => {
                    if original.trim().is_empty() || modified.trim().is_empty() {
                        return Err(AppError::usage("Diff paths must not be empty"));
                    }
                    Ok(DiffSource::Paths { original: original.to_string(), modified: modified.to_string() })
                }
                _ => Err(AppError::usage("Both original_path and modified_path are required")),
            },
            (false, true) => match (original_content, modified_content) {
                (Some(original), Some(modified)) => Ok(DiffSource::Contents {
                    original: original.to_string(),
                    modified: modified.to_string(),
                }),
                _ => Err(AppError::usage("Both original_content and modified_content are required")),
            },
        }
    }
}

/// Where a patch lands. A file is re-read right before patching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchTarget {
    File(String),
    Content(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LineChanges {
    pub added: usize,
    pub removed: usize,
}

impl LineChanges {
    pub fn between(before: &str, after: &str) -> Self {
        let mut changes = LineChanges::default();
        for line in diff::lines(before, after) {
            match line {
                diff::Result::Left(_) => changes.removed += 1,
                diff::Result::Right(_) => changes.added += 1,
                diff::Result::Both(_, _) => {}
            }
        }
        changes
    }

    pub fn is_empty(&self) -> bool {
        self.added == 0 && self.removed == 0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PatchOutcome {
    /// Set when the patch was written back to a file.
    pub path: Option<String>,
    pub result: String,
    pub changes: LineChanges,
}

#[instrument(skip(coordinator, source))]
pub async fn generate_diff(coordinator: &Coordinator, source: &DiffSource) -> Result<DiffPatch, AppError> {
    match source {
        DiffSource::Paths { original, modified } => coordinator.diff_paths(original, modified).await,
        DiffSource::Contents { original, modified } => coordinator.diff_contents(original, modified).await,
    }
}

#[instrument(skip(coordinator, target, patches))]
pub async fn apply_patch(
    coordinator: &Coordinator,
    target: &PatchTarget,
    patches: &str,
) -> Result<PatchOutcome, AppError> {
    let (file_path, original) = match target {
        PatchTarget::File(path) => (Some(path.as_str()), coordinator.read_file(path).await?),
        PatchTarget::Content(original) => (None, original.clone()),
    };
    let response = coordinator.apply_patch_raw(file_path, &original, patches).await?;
    let changes = LineChanges::between(&original, &response.result);
    debug!(added = changes.added, removed = changes.removed, "Patch applied");
    Ok(PatchOutcome {
        path: file_path.map(str::to_string),
        result: response.result,
        changes,
    })
}

/// Diffs `source`, then applies that patch to `target`.
pub async fn diff_then_patch(
    coordinator: &Coordinator,
    source: &DiffSource,
    target: &PatchTarget,
) -> Result<PatchOutcome, AppError> {
    let patch = generate_diff(coordinator, source).await?;
    apply_patch(coordinator, target, &patch.patches).await
}
