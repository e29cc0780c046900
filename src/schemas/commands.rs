use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

// --- Schemas for parameters ---
/// Per-call execution options forwarded to the command service.
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Seconds; 0 means no timeout.
    pub timeout_secs: u64,
    pub environment: HashMap<String, String>,
}

impl ExecOptions {
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    #[serde(rename = "SIGTERM")]
    Term,
    #[serde(rename = "SIGKILL")]
    Kill,
    #[serde(rename = "SIGINT")]
    Int,
    #[serde(rename = "SIGHUP")]
    Hup,
}

impl Signal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Term => "SIGTERM",
            Signal::Kill => "SIGKILL",
            Signal::Int => "SIGINT",
            Signal::Hup => "SIGHUP",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Signal {
    type Err = crate::error::AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().trim_start_matches("SIG") {
            "TERM" => Ok(Signal::Term),
            "KILL" => Ok(Signal::Kill),
            "INT" => Ok(Signal::Int),
            "HUP" => Ok(Signal::Hup),
            _ => Err(crate::error::AppError::usage(format!(
                "Unsupported signal '{}'; expected one of SIGTERM, SIGKILL, SIGINT, SIGHUP",
                s
            ))),
        }
    }
}

// --- Schemas for results ---
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// Seconds.
    pub execution_time: f64,
    pub command: String,
}

impl CommandOutput {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchOutput {
    pub results: Vec<CommandOutput>,
    pub count: usize,
}

/// Server-side descriptor of a long-running process. Observed, never owned.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProcessInfo {
    pub id: String,
    pub command: String,
    pub start_time: Option<DateTime<Utc>>,
    pub is_running: bool,
    pub exit_code: Option<i32>,
    pub pid: Option<u32>,
}

impl ProcessInfo {
    /// Exit code once terminated. The service omits a zero exit code.
    pub fn exit_status(&self) -> Option<i32> {
        if self.is_running {
            None
        } else {
            Some(self.exit_code.unwrap_or(0))
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessOutput {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryEntry {
    pub command: String,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct History {
    pub history: Vec<HistoryEntry>,
    pub count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SystemInfo {
    pub hostname: String,
    pub os: String,
    pub distribution: String,
    pub architecture: String,
    #[serde(rename = "numCPU")]
    pub num_cpu: usize,
    pub current_time: Option<DateTime<Utc>>,
    pub timezone: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ShellInfo {
    pub available_shells: BTreeMap<String, bool>,
    pub current_shell: String,
    pub session_id: String,
    pub shell_found_in_session: bool,
    pub system_shell: String,
}

impl ShellInfo {
    pub fn shells(&self) -> Vec<&str> {
        self.available_shells
            .iter()
            .filter(|(_, available)| **available)
            .map(|(shell, _)| shell.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Ack {
    pub message: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct ProcessListing {
    pub processes: BTreeMap<String, ProcessInfo>,
}
