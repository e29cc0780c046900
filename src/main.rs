use anyhow::{Context, Result};
use pocketflow_client::compound::{DiffSource, FindReplace, PatchTarget, ScriptRequest};
use pocketflow_client::{registry, Config, Coordinator};
use serde_json::json;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::{filter::EnvFilter, fmt::format::FmtSpan, FmtSubscriber};

fn setup_logging(log_level_str: &str) -> Result<()> {
    let level = match log_level_str.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("pocketflow_client={}", level)));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .with_level(true)
        .with_span_events(FmtSpan::CLOSE)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber).context("Failed to set tracing subscriber")
}

fn print_step(step: &str, value: serde_json::Value) {
    println!("{}", json!({ "step": step, "result": value }));
}

async fn tour(coordinator: &Coordinator) -> Result<()> {
    print_step("system_info", serde_json::to_value(coordinator.system_info().await?)?);
    print_step("directory_sync", serde_json::to_value(coordinator.directory_sync())?);

    let demo_file = "pocketflow_demo.txt";
    coordinator
        .save_file(demo_file, "hello from the demo\nhello again\n")
        .await?;
    let report = coordinator
        .find_and_replace(&FindReplace::new("hello", "goodbye").matching("*.txt"))
        .await?;
    print_step("find_and_replace", serde_json::to_value(&report)?);

    let source = DiffSource::from_parts(None, None, Some("one\ntwo\n"), Some("one\n2\nthree\n"))?;
    let patched = coordinator
        .diff_then_patch(&source, &PatchTarget::Content("one\ntwo\n".to_string()))
        .await?;
    print_step("diff_then_patch", serde_json::to_value(&patched)?);

    let script = coordinator
        .script_and_execute(&ScriptRequest::new("echo \"running in $(pwd)\"", "bash"))
        .await?;
    print_step("script_and_execute", serde_json::to_value(&script)?);

    coordinator.delete_file(&script.script_path).await?;
    coordinator.delete_file(demo_file).await?;
    print_step("history", serde_json::to_value(coordinator.history(5).await?)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;
    setup_logging(&config.log_level)?;

    tracing::info!(version = %env!("CARGO_PKG_VERSION"), "Starting pocketflow demo");
    tracing::debug!("Loaded configuration: {:?}", config);

    let mut coordinator = Coordinator::connect(Arc::new(config))
        .await
        .context("Failed to open file and command sessions")?;

    let outcome = tour(&coordinator).await;
    coordinator.cleanup().await;

    let leftover = registry::teardown_all().await;
    if leftover > 0 {
        tracing::warn!(count = leftover, "Closed sessions that were still registered at exit");
    }
    outcome
}
