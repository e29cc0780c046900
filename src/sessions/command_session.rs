use super::{RemoteSession, SessionCore};
use crate::error::AppError;
use crate::schemas::commands::{
    Ack, BatchOutput, CommandOutput, ExecOptions, History, ProcessInfo, ProcessListing, ProcessOutput,
    ShellInfo, Signal, SystemInfo,
};
use crate::transport::HttpTransport;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// One session against the command service.
#[derive(Debug)]
pub struct CommandSession {
    core: SessionCore,
}

#[async_trait::async_trait]
impl RemoteSession for CommandSession {
    fn core(&self) -> &SessionCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SessionCore {
        &mut self.core
    }
}

fn process_suffix(process_id: &str, tail: &str) -> String {
    format!("/processes/{}{}", urlencoding::encode(process_id), tail)
}

impl CommandSession {
    pub async fn open(transport: HttpTransport, working_dir: &Path) -> Result<Self, AppError> {
        let core = SessionCore::open(transport, working_dir).await?;
        Ok(Self { core })
    }

    pub fn unbound(transport: HttpTransport) -> Self {
        Self { core: SessionCore::new(transport) }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        suffix: &str,
        body: Option<&Value>,
        query: &[(&str, String)],
        expected: StatusCode,
    ) -> Result<T, AppError> {
        let path = self.core.session_path(suffix)?;
        self.core
            .transport()
            .call_typed(method, &path, body, query, expected)
            .await
    }

    // --- Commands ---
    #[instrument(skip(self, options), fields(timeout = options.timeout_secs))]
    pub async fn execute(&self, command: &str, options: &ExecOptions) -> Result<CommandOutput, AppError> {
        let body = json!({
            "command": command,
            "timeout": options.timeout_secs,
            "environment": options.environment,
        });
        let output: CommandOutput = self
            .call(Method::POST, "/commands", Some(&body), &[], StatusCode::OK)
            .await?;
        debug!(exit_code = output.exit_code, elapsed = output.execution_time, "Command finished");
        Ok(output)
    }

    #[instrument(skip(self, commands, options), fields(count = commands.len()))]
    pub async fn execute_batch(
        &self,
        commands: &[String],
        continue_on_error: bool,
        options: &ExecOptions,
    ) -> Result<BatchOutput, AppError> {
        let body = json!({
            "commands": commands,
            "continueOnError": continue_on_error,
            "timeout": options.timeout_secs,
            "environment": options.environment,
        });
        self.call(Method::POST, "/commands/batch", Some(&body), &[], StatusCode::OK)
            .await
    }

    // --- Processes ---
    #[instrument(skip(self, options))]
    pub async fn start_process(&self, command: &str, options: &ExecOptions) -> Result<ProcessInfo, AppError> {
        let body = json!({
            "command": command,
            "timeout": options.timeout_secs,
            "environment": options.environment,
        });
        let process: ProcessInfo = self
            .call(Method::POST, "/processes", Some(&body), &[], StatusCode::CREATED)
            .await?;
        info!(process_id = %process.id, pid = ?process.pid, "Process started");
        Ok(process)
    }

    #[instrument(skip(self))]
    pub async fn list_processes(&self) -> Result<BTreeMap<String, ProcessInfo>, AppError> {
        let listing: ProcessListing = self
            .call(Method::GET, "/processes", None, &[], StatusCode::OK)
            .await?;
        Ok(listing.processes)
    }

    #[instrument(skip(self))]
    pub async fn process(&self, process_id: &str) -> Result<ProcessInfo, AppError> {
        self.call(Method::GET, &process_suffix(process_id, ""), None, &[], StatusCode::OK)
            .await
    }

    #[instrument(skip(self))]
    pub async fn process_output(&self, process_id: &str) -> Result<ProcessOutput, AppError> {
        self.call(Method::GET, &process_suffix(process_id, "/output"), None, &[], StatusCode::OK)
            .await
    }

    #[instrument(skip(self, input))]
    pub async fn send_input(&self, process_id: &str, input: &str) -> Result<Ack, AppError> {
        let body = json!({ "input": input });
        self.call(Method::POST, &process_suffix(process_id, "/input"), Some(&body), &[], StatusCode::OK)
            .await
    }

    #[instrument(skip(self))]
    pub async fn send_signal(&self, process_id: &str, signal: Signal) -> Result<Ack, AppError> {
        let body = json!({ "signal": signal });
        self.call(Method::POST, &process_suffix(process_id, "/signal"), Some(&body), &[], StatusCode::OK)
            .await
    }

    /// Sends `signal`, then re-queries the process. Delivery is asynchronous on
    /// the server, so the returned record may still report `is_running`.
    pub async fn terminate_process(&self, process_id: &str, signal: Signal) -> Result<ProcessInfo, AppError> {
        self.send_signal(process_id, signal).await?;
        self.process(process_id).await
    }

    /// Polls until the process stops or `max_polls` queries have been made.
    /// Returns the last observed record.
    #[instrument(skip(self))]
    pub async fn wait_for_process(
        &self,
        process_id: &str,
        interval: Duration,
        max_polls: u32,
    ) -> Result<ProcessInfo, AppError> {
        let mut polls = 0;
        loop {
            let process = self.process(process_id).await?;
            polls += 1;
            if !process.is_running || polls >= max_polls.max(1) {
                return Ok(process);
            }
            tokio::time::sleep(interval).await;
        }
    }

    // --- Environment ---
    #[instrument(skip(self))]
    pub async fn env_vars(&self) -> Result<HashMap<String, String>, AppError> {
        self.call(Method::GET, "/env", None, &[], StatusCode::OK).await
    }

    #[instrument(skip(self, value))]
    pub async fn set_env_var(&self, key: &str, value: &str) -> Result<Ack, AppError> {
        let body = json!({ "value": value });
        let suffix = format!("/env/{}", urlencoding::encode(key));
        self.call(Method::PUT, &suffix, Some(&body), &[], StatusCode::OK).await
    }

    #[instrument(skip(self, variables), fields(count = variables.len()))]
    pub async fn set_env_vars(&self, variables: &HashMap<String, String>) -> Result<Ack, AppError> {
        let body = json!({ "variables": variables });
        self.call(Method::PUT, "/env", Some(&body), &[], StatusCode::OK).await
    }

    #[instrument(skip(self))]
    pub async fn unset_env_var(&self, key: &str) -> Result<Ack, AppError> {
        let suffix = format!("/env/{}", urlencoding::encode(key));
        self.call(Method::DELETE, &suffix, None, &[], StatusCode::OK).await
    }

    // --- History ---
    /// `limit == 0` returns the full history.
    #[instrument(skip(self))]
    pub async fn history(&self, limit: usize) -> Result<History, AppError> {
        let query: Vec<(&str, String)> = if limit > 0 {
            vec![("limit", limit.to_string())]
        } else {
            Vec::new()
        };
        self.call(Method::GET, "/history", None, &query, StatusCode::OK).await
    }

    #[instrument(skip(self))]
    pub async fn search_history(&self, query: &str) -> Result<History, AppError> {
        self.call(
            Method::GET,
            "/history/search",
            None,
            &[("query", query.to_string())],
            StatusCode::OK,
        )
        .await
    }

    #[instrument(skip(self))]
    pub async fn clear_history(&self) -> Result<Ack, AppError> {
        self.call(Method::DELETE, "/history", None, &[], StatusCode::OK).await
    }

    // --- System ---
    #[instrument(skip(self))]
    pub async fn system_info(&self) -> Result<SystemInfo, AppError> {
        self.core
            .transport()
            .call_typed(Method::GET, "/system/info", None, &[], StatusCode::OK)
            .await
    }

    /// Shells installed on the server. Scoped to this session when one exists.
    #[instrument(skip(self))]
    pub async fn available_shells(&self) -> Result<ShellInfo, AppError> {
        let query: Vec<(&str, String)> = match self.core.id() {
            Some(id) => vec![("sessionId", id.to_string())],
            None => Vec::new(),
        };
        self.core
            .transport()
            .call_typed(Method::GET, "/system/shells", None, &query, StatusCode::OK)
            .await
    }

    // --- Helpers ---
    pub async fn run_and_capture(&self, command: &str) -> Result<(i32, String, String), AppError> {
        let output = self.execute(command, &ExecOptions::default()).await?;
        Ok((output.exit_code, output.stdout, output.stderr))
    }

    /// Starts `command` as a long-running process and returns its id.
    pub async fn run_interactive(&self, command: &str) -> Result<String, AppError> {
        let process = self.start_process(command, &ExecOptions::default()).await?;
        Ok(process.id)
    }

    pub async fn environment_value(&self, key: &str) -> Result<Option<String>, AppError> {
        let mut vars = self.env_vars().await?;
        Ok(vars.remove(key))
    }

    pub async fn set_working_environment(&self, variables: &HashMap<String, String>) -> Result<Ack, AppError> {
        self.set_env_vars(variables).await
    }

    /// Runs each command with `SHELL` pointed at `shell`. Stops at the first
    /// failed request; non-zero exits are returned, not raised.
    pub async fn execute_in_shell(
        &self,
        commands: &[&str],
        shell: Option<&str>,
    ) -> Result<Vec<CommandOutput>, AppError> {
        let options = match shell {
            Some(shell) => ExecOptions::default().with_env("SHELL", shell),
            None => ExecOptions::default(),
        };
        let mut outputs = Vec::with_capacity(commands.len());
        for command in commands {
            let output = self.execute(command, &options).await?;
            if !output.succeeded() {
                warn!(command = %command, exit_code = output.exit_code, "Command exited non-zero");
            }
            outputs.push(output);
        }
        Ok(outputs)
    }
}
