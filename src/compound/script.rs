use crate::coordinator::Coordinator;
use crate::error::AppError;
use crate::schemas::commands::{CommandOutput, ExecOptions};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

const MAX_NAME_ATTEMPTS: usize = 3;

// --- Schemas for parameters ---
#[derive(Debug, Clone)]
pub struct ScriptRequest {
    pub content: String,
    pub interpreter: String,
    /// Where to write the script. A fresh unique name is generated when unset.
    pub path: Option<String>,
    pub options: ExecOptions,
}

impl ScriptRequest {
    pub fn new(content: impl Into<String>, interpreter: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            interpreter: interpreter.into(),
            path: None,
            options: ExecOptions::default(),
        }
    }

    pub fn at(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_options(mut self, options: ExecOptions) -> Self {
        self.options = options;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScriptOutcome {
    pub script_path: String,
    pub command: String,
    pub output: CommandOutput,
}

pub fn script_extension(interpreter: &str) -> &'static str {
    match interpreter.to_lowercase().as_str() {
        "python" | "python3" => ".py",
        "bash" | "sh" => ".sh",
        "node" => ".js",
        "ruby" => ".rb",
        "perl" => ".pl",
        "php" => ".php",
        "go" => ".go",
        _ => ".txt",
    }
}

fn is_shell(interpreter: &str) -> bool {
    matches!(interpreter.to_lowercase().as_str(), "bash" | "sh")
}

fn unique_script_name(interpreter: &str) -> String {
    format!(
        "{}_script_{}{}",
        interpreter.to_lowercase(),
        Uuid::new_v4().simple(),
        script_extension(interpreter)
    )
}

/// `go` needs `go run`; everything else takes the script as its argument.
fn invocation(interpreter: &str, quoted_path: &str) -> String {
    if interpreter.eq_ignore_ascii_case("go") {
        format!("go run {}", quoted_path)
    } else {
        format!("{} {}", interpreter, quoted_path)
    }
}

/// Writes a new script file; a generated name is retried on collision.
async fn materialize(coordinator: &Coordinator, request: &ScriptRequest) -> Result<String, AppError> {
    if let Some(path) = &request.path {
        coordinator.create_file(path, &request.content).await?;
        return Ok(path.clone());
    }
    let mut attempt = 0;
    loop {
        attempt += 1;
        let name = unique_script_name(&request.interpreter);
        match coordinator.create_file(&name, &request.content).await {
            Ok(_) => return Ok(name),
            Err(e) if e.is_remote_rejection() && attempt < MAX_NAME_ATTEMPTS => {
                warn!(name = %name, error = %e, "Script name rejected, retrying with a new one");
            }
            Err(e) => return Err(e),
        }
    }
}

/// Creates a script from `request.content` and runs it with the interpreter.
#[instrument(skip(coordinator, request), fields(interpreter = %request.interpreter))]
pub async fn script_and_execute(
    coordinator: &Coordinator,
    request: &ScriptRequest,
) -> Result<ScriptOutcome, AppError> {
    let interpreter = request.interpreter.trim();
    if interpreter.is_empty() || interpreter.contains(char::is_whitespace) {
        return Err(AppError::usage(format!(
            "Interpreter must be a single program name, got '{}'",
            request.interpreter
        )));
    }

    let script_path = materialize(coordinator, request).await?;
    let quoted = shlex::try_quote(&script_path)
        .map_err(|e| AppError::usage(format!("Cannot quote '{}' for the shell: {}", script_path, e)))?
        .into_owned();

    if is_shell(interpreter) {
        let chmod = coordinator
            .execute(&format!("chmod +x {}", quoted), &ExecOptions::default())
            .await?;
        if !chmod.succeeded() {
            warn!(path = %script_path, stderr = %chmod.stderr, "chmod +x failed");
        }
    }

    let command = invocation(interpreter, &quoted);
    debug!(command = %command, "Running script");
    let output = coordinator.execute(&command, &request.options).await?;
    info!(path = %script_path, exit_code = output.exit_code, "Script executed");
    Ok(ScriptOutcome { script_path, command, output })
}
