use crate::coordinator::Coordinator;
use crate::error::AppError;
use crate::schemas::commands::{CommandOutput, ExecOptions};
use serde::Serialize;
use std::borrow::Cow;
use std::path::Path;
use tracing::{info, instrument};

#[derive(Debug, Clone, Serialize)]
pub struct EditRunOutcome {
    pub path: String,
    /// True when new content was written before running.
    pub saved: bool,
    pub command: String,
    pub output: CommandOutput,
}

fn quote(text: &str) -> Result<Cow<'_, str>, AppError> {
    shlex::try_quote(text).map_err(|e| AppError::usage(format!("Cannot quote '{}' for the shell: {}", text, e)))
}

/// Shell command that runs `path`, chosen by its extension.
pub fn run_command_for(path: &str) -> Result<String, AppError> {
    let file = Path::new(path);
    let extension = file
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let stem = file
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let quoted = quote(path)?;

    let command = match extension.as_str() {
        "py" => format!("python {}", quoted),
        "js" => format!("node {}", quoted),
        "sh" => format!("bash {}", quoted),
        "go" => format!("go run {}", quoted),
        "rb" => format!("ruby {}", quoted),
        "java" => format!("javac {} && java {}", quoted, quote(&stem)?),
        "cpp" | "cc" => {
            let out = quote(&stem)?;
            format!("g++ {} -o {} && ./{}", quoted, out, out)
        }
        "c" => {
            let out = quote(&stem)?;
            format!("gcc {} -o {} && ./{}", quoted, out, out)
        }
        "rs" => format!("rustc {} && ./{}", quoted, quote(&stem)?),
        "" => return Err(AppError::usage(format!("Don't know how to run '{}': no file extension", path))),
        other => {
            return Err(AppError::usage(format!(
                "Don't know how to run file with extension .{}",
                other
            )))
        }
    };
    Ok(command)
}

/// Optionally writes `content` to `path` (update-or-create), then runs it.
/// The extension is checked before anything is sent.
#[instrument(skip(coordinator, content, options), fields(has_content = content.is_some()))]
pub async fn edit_and_run(
    coordinator: &Coordinator,
    path: &str,
    content: Option<&str>,
    options: &ExecOptions,
) -> Result<EditRunOutcome, AppError> {
    let command = run_command_for(path)?;
    if let Some(content) = content {
        coordinator.save_file(path, content).await?;
    }
    let output = coordinator.execute(&command, options).await?;
    info!(command = %command, exit_code = output.exit_code, "Edit-and-run finished");
    Ok(EditRunOutcome {
        path: path.to_string(),
        saved: content.is_some(),
        command,
        output,
    })
}
