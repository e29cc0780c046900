use crate::coordinator::Coordinator;
use crate::error::{AppError, ErrorKind};
use crate::schemas::commands::ExecOptions;
use crate::utils::path_utils::{normalize_lexically, to_remote_string};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

/// Which backup strategy produced the result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackupOutcome {
    /// `tar -czf` on the command host succeeded.
    Compressed { archive: PathBuf },
    /// Archiving failed; the tree was copied locally instead.
    Uncompressed { directory: PathBuf, reason: String },
}

impl BackupOutcome {
    pub fn path(&self) -> &Path {
        match self {
            BackupOutcome::Compressed { archive } => archive,
            BackupOutcome::Uncompressed { directory, .. } => directory,
        }
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self, BackupOutcome::Compressed { .. })
    }
}

struct BackupPlan {
    source: PathBuf,
    parent: PathBuf,
    name: String,
    output: PathBuf,
}

fn plan(working_dir: &Path, output_path: Option<&str>) -> Result<BackupPlan, AppError> {
    let name = working_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| AppError::InvalidPath(format!("Cannot back up '{}'", working_dir.display())))?;
    let parent = working_dir
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("/"));

    let output = match output_path.map(str::trim).filter(|p| !p.is_empty()) {
        Some(path) if Path::new(path).is_absolute() => PathBuf::from(path),
        Some(path) => parent.join(path),
        None => {
            let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
            parent.join(format!("{}_backup_{}", name, stamp))
        }
    };
    let output = normalize_lexically(&output);
    if output.starts_with(working_dir) {
        return Err(AppError::usage(format!(
            "Backup destination {} is inside the directory being backed up",
            output.display()
        )));
    }
    Ok(BackupPlan { source: working_dir.to_path_buf(), parent, name, output })
}

fn tar_command(plan: &BackupPlan, archive: &Path) -> Result<String, AppError> {
    let quote = |text: String| {
        shlex::try_quote(&text)
            .map(|q| q.into_owned())
            .map_err(|e| AppError::usage(format!("Cannot quote '{}' for the shell: {}", text, e)))
    };
    Ok(format!(
        "tar -czf {} -C {} {}",
        quote(to_remote_string(archive))?,
        quote(to_remote_string(&plan.parent))?,
        quote(plan.name.clone())?
    ))
}

/// Recursively copies `source` into a new directory `destination`.
pub async fn copy_tree(source: &Path, destination: &Path) -> Result<u64, AppError> {
    if fs::metadata(destination).await.is_ok() {
        return Err(AppError::InvalidPath(format!(
            "Backup destination already exists: {}",
            destination.display()
        )));
    }
    let mut copied = 0;
    for entry in WalkDir::new(source).follow_links(false) {
        let entry = entry.map_err(std::io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| AppError::InvalidPath(e.to_string()))?;
        let target = destination.join(relative);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target).await?;
        } else if file_type.is_file() {
            fs::copy(entry.path(), &target).await?;
            copied += 1;
        } else {
            debug!(path = %entry.path().display(), "Skipping non-regular file");
        }
    }
    Ok(copied)
}

/// Archives the working directory with `tar` on the command host. On a
/// non-zero `tar` or a transport/remote failure, copies the directory locally
/// instead. A missing session is returned as is.
#[instrument(skip(coordinator), fields(working_dir = %coordinator.working_dir().display()))]
pub async fn backup_project(
    coordinator: &Coordinator,
    output_path: Option<&str>,
) -> Result<BackupOutcome, AppError> {
    let plan = plan(coordinator.working_dir(), output_path)?;
    let archive = PathBuf::from(format!("{}.tar.gz", plan.output.display()));
    let command = tar_command(&plan, &archive)?;

    let reason = match coordinator.execute(&command, &ExecOptions::default()).await {
        Ok(output) if output.succeeded() => {
            info!(archive = %archive.display(), "Project archived");
            return Ok(BackupOutcome::Compressed { archive });
        }
        Ok(output) => format!("tar exited with status {}: {}", output.exit_code, output.stderr.trim()),
        Err(e) if matches!(e.kind(), ErrorKind::Transport | ErrorKind::RemoteRejection) => {
            format!("tar could not be run: {}", e)
        }
        Err(e) => return Err(e),
    };
    warn!(reason = %reason, "Falling back to local directory copy");

    let copied = copy_tree(&plan.source, &plan.output).await?;
    info!(directory = %plan.output.display(), files = copied, "Project copied");
    Ok(BackupOutcome::Uncompressed { directory: plan.output, reason })
}
