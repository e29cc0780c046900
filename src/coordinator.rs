//! One file session and one command session managed as a single unit.
//!
//! Directory changes are applied to the file session first and the command
//! session second, with no rollback. If the second bind fails the sessions
//! disagree until the next successful change; [`Coordinator::directory_sync`]
//! reports that state.

use crate::compound::backup::{self, BackupOutcome};
use crate::compound::diff_patch::{self, DiffSource, PatchOutcome, PatchTarget};
use crate::compound::edit_run::{self, EditRunOutcome};
use crate::compound::find_replace::{self, FindReplace, FindReplaceReport};
use crate::compound::script::{self, ScriptOutcome, ScriptRequest};
use crate::config::Config;
use crate::error::{AppError, Service};
use crate::schemas::commands::{
    Ack, BatchOutput, CommandOutput, ExecOptions, History, ProcessInfo, ProcessOutput, ShellInfo, Signal,
    SystemInfo,
};
use crate::schemas::files::{
    BatchEntry, CodeContext, DiffPatch, DirectorySize, DirectoryTree, FileMetadata, FileStructure,
    MutationAck, PatchResponse, ProjectSummary, SearchResults,
};
use crate::sessions::{CommandSession, FileSession, RemoteSession, SessionInfo, SessionState};
use crate::transport::HttpTransport;
use crate::utils::path_utils::resolve_remote_dir;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Cached working directories of the coordinator and both sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectorySync {
    pub coordinator: PathBuf,
    pub files: PathBuf,
    pub commands: PathBuf,
}

impl DirectorySync {
    pub fn is_diverged(&self) -> bool {
        self.files != self.commands || self.coordinator != self.files
    }
}

#[derive(Debug)]
pub struct Coordinator {
    config: Arc<Config>,
    files: FileSession,
    commands: CommandSession,
    working_dir: PathBuf,
}

impl Coordinator {
    /// Opens the file session, then the command session, both bound to the
    /// configured working directory. A failed command open closes the file
    /// session before the error is returned.
    #[instrument(skip(config), fields(working_dir = %config.working_dir.display()))]
    pub async fn connect(config: Arc<Config>) -> Result<Self, AppError> {
        let base = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        let working_dir = resolve_remote_dir(&config.working_dir.to_string_lossy(), &base)?;
        let file_transport = HttpTransport::new(Service::Files, &config.file_api_url, &config.user_agent)?;
        let command_transport =
            HttpTransport::new(Service::Commands, &config.terminal_api_url, &config.user_agent)?;

        let mut files = FileSession::open(file_transport, &working_dir).await?;
        let commands = match CommandSession::open(command_transport, &working_dir).await {
            Ok(commands) => commands,
            Err(e) => {
                warn!(error = %e, "Command session failed to open, closing file session");
                files.close().await;
                return Err(e);
            }
        };

        info!(
            file_session = ?files.session_id(),
            command_session = ?commands.session_id(),
            "Coordinator connected"
        );
        let working_dir = files.working_dir().to_path_buf();
        Ok(Self { config, files, commands, working_dir })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn files(&self) -> &FileSession {
        &self.files
    }

    pub fn commands(&self) -> &CommandSession {
        &self.commands
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn session_states(&self) -> (SessionState, SessionState) {
        (self.files.state(), self.commands.state())
    }

    pub fn directory_sync(&self) -> DirectorySync {
        DirectorySync {
            coordinator: self.working_dir.clone(),
            files: self.files.working_dir().to_path_buf(),
            commands: self.commands.working_dir().to_path_buf(),
        }
    }

    /// Rebinds both sessions to `path` (tilde-expanded, relative paths taken
    /// from the current working directory). When both binds succeed the cached
    /// value becomes the directory the file service reported, which may differ
    /// from `path` if the server resolves links.
    #[instrument(skip(self), fields(from = %self.working_dir.display()))]
    pub async fn change_working_directory(&mut self, path: &str) -> Result<PathBuf, AppError> {
        let target = resolve_remote_dir(path, &self.working_dir)?;
        self.files.bind_directory(&target).await?;
        if let Err(e) = self.commands.bind_directory(&target).await {
            warn!(target = %target.display(), error = %e, "Command session rejected directory change, sessions diverged");
            return Err(AppError::DirectoryDiverged {
                file_dir: self.files.working_dir().to_path_buf(),
                command_dir: self.commands.working_dir().to_path_buf(),
                source: Box::new(e),
            });
        }
        self.working_dir = self.files.working_dir().to_path_buf();
        info!(working_dir = %self.working_dir.display(), "Working directory changed");
        Ok(self.working_dir.clone())
    }

    pub async fn file_session_info(&self) -> Result<SessionInfo, AppError> {
        self.files.session_info().await
    }

    pub async fn command_session_info(&self) -> Result<SessionInfo, AppError> {
        self.commands.session_info().await
    }

    /// Closes the command session, then the file session. Idempotent.
    pub async fn cleanup(&mut self) {
        self.commands.close().await;
        self.files.close().await;
    }

    // --- File service ---
    pub async fn list_files(&self, path: &str) -> Result<Vec<String>, AppError> {
        self.files.list_files(path).await
    }

    pub async fn list_files_with_metadata(&self, path: &str) -> Result<Vec<FileMetadata>, AppError> {
        self.files.list_files_with_metadata(path).await
    }

    pub async fn read_file(&self, path: &str) -> Result<String, AppError> {
        self.files.read_file(path).await
    }

    pub async fn create_file(&self, path: &str, content: &str) -> Result<MutationAck, AppError> {
        self.files.create_file(path, content).await
    }

    pub async fn update_file(&self, path: &str, content: &str) -> Result<MutationAck, AppError> {
        self.files.update_file(path, content).await
    }

    pub async fn delete_file(&self, path: &str) -> Result<(), AppError> {
        self.files.delete_file(path).await
    }

    pub async fn file_metadata(&self, path: &str) -> Result<FileMetadata, AppError> {
        self.files.file_metadata(path).await
    }

    pub async fn batch_read(&self, paths: &[String]) -> Result<Vec<BatchEntry>, AppError> {
        self.files.batch_read(paths).await
    }

    pub async fn search(&self, pattern: &str, path: &str, recursive: bool) -> Result<SearchResults, AppError> {
        self.files.search(pattern, path, recursive).await
    }

    pub async fn extract_content(&self, paths: &[String]) -> Result<BTreeMap<String, String>, AppError> {
        self.files.extract_content(paths).await
    }

    pub async fn list_directories(&self, path: &str) -> Result<Vec<String>, AppError> {
        self.files.list_directories(path).await
    }

    pub async fn create_directory(&self, path: &str) -> Result<MutationAck, AppError> {
        self.files.create_directory(path).await
    }

    pub async fn delete_directory(&self, path: &str) -> Result<(), AppError> {
        self.files.delete_directory(path).await
    }

    pub async fn directory_tree(&self, path: &str, depth: u32) -> Result<DirectoryTree, AppError> {
        self.files.directory_tree(path, depth).await
    }

    pub async fn directory_size(&self, path: &str) -> Result<DirectorySize, AppError> {
        self.files.directory_size(path).await
    }

    pub async fn project_summary(&self) -> Result<ProjectSummary, AppError> {
        self.files.project_summary().await
    }

    pub async fn code_context(&self, max_files: u32) -> Result<CodeContext, AppError> {
        self.files.code_context(max_files).await
    }

    pub async fn file_structure(&self, path: &str, depth: u32) -> Result<FileStructure, AppError> {
        self.files.file_structure(path, depth).await
    }

    pub async fn batch_create(&self, files: &BTreeMap<String, String>) -> Result<Vec<BatchEntry>, AppError> {
        self.files.batch_create(files).await
    }

    pub async fn diff_paths(&self, original_path: &str, modified_path: &str) -> Result<DiffPatch, AppError> {
        self.files.diff_paths(original_path, modified_path).await
    }

    pub async fn diff_contents(&self, original: &str, modified: &str) -> Result<DiffPatch, AppError> {
        self.files.diff_contents(original, modified).await
    }

    pub async fn file_exists(&self, path: &str) -> Result<bool, AppError> {
        self.files.file_exists(path).await
    }

    pub async fn directory_exists(&self, path: &str) -> Result<bool, AppError> {
        self.files.directory_exists(path).await
    }

    pub async fn ensure_directory_exists(&self, path: &str) -> Result<bool, AppError> {
        self.files.ensure_directory_exists(path).await
    }

    pub async fn save_file(&self, path: &str, content: &str) -> Result<MutationAck, AppError> {
        self.files.save_file(path, content).await
    }

    pub async fn read_and_update_file<F>(&self, path: &str, update: F) -> Result<MutationAck, AppError>
    where
        F: FnOnce(String) -> String + Send,
    {
        self.files.read_and_update_file(path, update).await
    }

    pub async fn backup_file(&self, path: &str) -> Result<String, AppError> {
        self.files.backup_file(path).await
    }

    pub async fn find_files_by_extension(
        &self,
        extension: &str,
        path: &str,
        recursive: bool,
    ) -> Result<Vec<String>, AppError> {
        self.files.find_files_by_extension(extension, path, recursive).await
    }

    pub async fn project_files_by_type(
        &self,
        file_types: &[&str],
        max_per_type: usize,
    ) -> Result<BTreeMap<String, Vec<String>>, AppError> {
        self.files.project_files_by_type(file_types, max_per_type).await
    }

    // --- Command service ---
    pub async fn execute(&self, command: &str, options: &ExecOptions) -> Result<CommandOutput, AppError> {
        self.commands.execute(command, options).await
    }

    pub async fn execute_batch(
        &self,
        commands: &[String],
        continue_on_error: bool,
        options: &ExecOptions,
    ) -> Result<BatchOutput, AppError> {
        self.commands.execute_batch(commands, continue_on_error, options).await
    }

    pub async fn run_and_capture(&self, command: &str) -> Result<(i32, String, String), AppError> {
        self.commands.run_and_capture(command).await
    }

    pub async fn execute_in_shell(
        &self,
        commands: &[&str],
        shell: Option<&str>,
    ) -> Result<Vec<CommandOutput>, AppError> {
        self.commands.execute_in_shell(commands, shell).await
    }

    pub async fn start_process(&self, command: &str, options: &ExecOptions) -> Result<ProcessInfo, AppError> {
        self.commands.start_process(command, options).await
    }

    pub async fn run_interactive(&self, command: &str) -> Result<String, AppError> {
        self.commands.run_interactive(command).await
    }

    pub async fn list_processes(&self) -> Result<BTreeMap<String, ProcessInfo>, AppError> {
        self.commands.list_processes().await
    }

    pub async fn process(&self, process_id: &str) -> Result<ProcessInfo, AppError> {
        self.commands.process(process_id).await
    }

    pub async fn process_output(&self, process_id: &str) -> Result<ProcessOutput, AppError> {
        self.commands.process_output(process_id).await
    }

    pub async fn send_input(&self, process_id: &str, input: &str) -> Result<Ack, AppError> {
        self.commands.send_input(process_id, input).await
    }

    pub async fn send_signal(&self, process_id: &str, signal: Signal) -> Result<Ack, AppError> {
        self.commands.send_signal(process_id, signal).await
    }

    pub async fn terminate_process(&self, process_id: &str, signal: Signal) -> Result<ProcessInfo, AppError> {
        self.commands.terminate_process(process_id, signal).await
    }

    pub async fn wait_for_process(
        &self,
        process_id: &str,
        interval: Duration,
        max_polls: u32,
    ) -> Result<ProcessInfo, AppError> {
        self.commands.wait_for_process(process_id, interval, max_polls).await
    }

    pub async fn env_vars(&self) -> Result<HashMap<String, String>, AppError> {
        self.commands.env_vars().await
    }

    pub async fn environment_value(&self, key: &str) -> Result<Option<String>, AppError> {
        self.commands.environment_value(key).await
    }

    pub async fn set_env_var(&self, key: &str, value: &str) -> Result<Ack, AppError> {
        self.commands.set_env_var(key, value).await
    }

    pub async fn set_env_vars(&self, variables: &HashMap<String, String>) -> Result<Ack, AppError> {
        self.commands.set_env_vars(variables).await
    }

    pub async fn set_working_environment(&self, variables: &HashMap<String, String>) -> Result<Ack, AppError> {
        self.commands.set_working_environment(variables).await
    }

    pub async fn unset_env_var(&self, key: &str) -> Result<Ack, AppError> {
        self.commands.unset_env_var(key).await
    }

    pub async fn history(&self, limit: usize) -> Result<History, AppError> {
        self.commands.history(limit).await
    }

    pub async fn search_history(&self, query: &str) -> Result<History, AppError> {
        self.commands.search_history(query).await
    }

    pub async fn clear_history(&self) -> Result<Ack, AppError> {
        self.commands.clear_history().await
    }

    pub async fn system_info(&self) -> Result<SystemInfo, AppError> {
        self.commands.system_info().await
    }

    pub async fn available_shells(&self) -> Result<ShellInfo, AppError> {
        self.commands.available_shells().await
    }

    // --- Compound operations ---
    pub async fn find_and_replace(&self, request: &FindReplace) -> Result<FindReplaceReport, AppError> {
        find_replace::find_and_replace(self, request).await
    }

    pub async fn generate_diff(&self, source: &DiffSource) -> Result<DiffPatch, AppError> {
        diff_patch::generate_diff(self, source).await
    }

    pub async fn apply_patch(&self, target: &PatchTarget, patches: &str) -> Result<PatchOutcome, AppError> {
        diff_patch::apply_patch(self, target, patches).await
    }

    pub async fn diff_then_patch(&self, source: &DiffSource, target: &PatchTarget) -> Result<PatchOutcome, AppError> {
        diff_patch::diff_then_patch(self, source, target).await
    }

    /// Raw patch endpoint, for callers holding their own original text.
    pub async fn apply_patch_raw(
        &self,
        file_path: Option<&str>,
        original: &str,
        patches: &str,
    ) -> Result<PatchResponse, AppError> {
        self.files.apply_patch(file_path, original, patches).await
    }

    pub async fn edit_and_run(
        &self,
        path: &str,
        content: Option<&str>,
        options: &ExecOptions,
    ) -> Result<EditRunOutcome, AppError> {
        edit_run::edit_and_run(self, path, content, options).await
    }

    pub async fn script_and_execute(&self, request: &ScriptRequest) -> Result<ScriptOutcome, AppError> {
        script::script_and_execute(self, request).await
    }

    pub async fn backup_project(&self, output_path: Option<&str>) -> Result<BackupOutcome, AppError> {
        backup::backup_project(self, output_path).await
    }
}
