use crate::coordinator::Coordinator;
use crate::error::AppError;
use crate::schemas::files::SearchResults;
use globset::{Glob, GlobMatcher};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info, instrument, warn};

// --- Schemas for parameters ---
#[derive(Debug, Clone)]
pub struct FindReplace {
    /// Literal text, never a regex.
    pub pattern: String,
    pub replacement: String,
    pub path: String,
    pub recursive: bool,
    /// Only files whose path below `path` matches this glob are touched.
    pub file_glob: Option<String>,
}

impl FindReplace {
    pub fn new(pattern: impl Into<String>, replacement: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            replacement: replacement.into(),
            path: ".".to_string(),
            recursive: true,
            file_glob: None,
        }
    }

    pub fn in_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn matching(mut self, glob: impl Into<String>) -> Self {
        self.file_glob = Some(glob.into());
        self
    }

    fn validate(&self) -> Result<Option<GlobMatcher>, AppError> {
        if self.pattern.is_empty() {
            return Err(AppError::usage("Find-and-replace pattern must not be empty"));
        }
        self.file_glob
            .as_deref()
            .map(|glob| {
                Glob::new(glob)
                    .map(|g| g.compile_matcher())
                    .map_err(|e| AppError::usage(format!("Invalid file glob '{}': {}", glob, e)))
            })
            .transpose()
    }
}

/// Search keys are relative to the searched directory; file calls want
/// paths relative to the session's working directory.
fn session_relative(search_root: &str, key: &str) -> String {
    let root = search_root.trim_end_matches('/');
    if root.is_empty() || root == "." {
        key.to_string()
    } else {
        format!("{}/{}", root, key.trim_start_matches("./"))
    }
}

// --- Schemas for results ---
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The search hit the file name, not its content.
    FilenameOnly,
    ExcludedByGlob,
    /// Search reported a match that the re-read content no longer has.
    NoOccurrences,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedFile {
    pub path: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FindReplaceReport {
    pub pattern: String,
    pub replacement: String,
    pub files_modified: usize,
    pub occurrences_replaced: usize,
    pub modified_files: BTreeMap<String, usize>,
    pub skipped: Vec<SkippedFile>,
    pub errors: BTreeMap<String, String>,
}

impl FindReplaceReport {
    pub fn failed_files(&self) -> usize {
        self.errors.len()
    }
}

/// Literal search-and-replace over every file the search reports. Each file
/// is handled on its own: a failure is recorded and the batch carries on.
#[instrument(skip(coordinator, request), fields(pattern = %request.pattern, path = %request.path))]
pub async fn find_and_replace(
    coordinator: &Coordinator,
    request: &FindReplace,
) -> Result<FindReplaceReport, AppError> {
    let glob = request.validate()?;
    let search = coordinator
        .search(&request.pattern, &request.path, request.recursive)
        .await?;

    let mut report = FindReplaceReport {
        pattern: request.pattern.clone(),
        replacement: request.replacement.clone(),
        ..Default::default()
    };

    for (key, lines) in &search.results {
        let path = &session_relative(&request.path, key);
        if SearchResults::is_filename_only(lines) {
            report.skipped.push(SkippedFile { path: path.clone(), reason: SkipReason::FilenameOnly });
            continue;
        }
        if let Some(matcher) = &glob {
            if !matcher.is_match(key) {
                report.skipped.push(SkippedFile { path: path.clone(), reason: SkipReason::ExcludedByGlob });
                continue;
            }
        }

        let content = match coordinator.read_file(path).await {
            Ok(content) => content,
            Err(e) => {
                warn!(path = %path, error = %e, "Could not read search hit");
                report.errors.insert(path.clone(), e.to_string());
                continue;
            }
        };
        let occurrences = content.matches(request.pattern.as_str()).count();
        if occurrences == 0 {
            debug!(path = %path, "Search hit no longer contains pattern");
            report.skipped.push(SkippedFile { path: path.clone(), reason: SkipReason::NoOccurrences });
            continue;
        }

        let updated = content.replace(request.pattern.as_str(), &request.replacement);
        match coordinator.update_file(path, &updated).await {
            Ok(_) => {
                report.files_modified += 1;
                report.occurrences_replaced += occurrences;
                report.modified_files.insert(path.clone(), occurrences);
            }
            Err(e) => {
                warn!(path = %path, error = %e, "Could not write replacement");
                report.errors.insert(path.clone(), e.to_string());
            }
        }
    }

    info!(
        files_modified = report.files_modified,
        occurrences = report.occurrences_replaced,
        failed = report.failed_files(),
        "Find-and-replace finished"
    );
    Ok(report)
}
