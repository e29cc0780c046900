use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Which backend a request or session belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    Files,
    Commands,
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Service::Files => write!(f, "file service"),
            Service::Commands => write!(f, "command service"),
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{service} unreachable: {message}")]
    Transport { service: Service, message: String },

    #[error("{service} returned an unexpected payload: {message}")]
    MalformedResponse { service: Service, message: String },

    #[error("{service} rejected request with status {status}: {message}")]
    Remote {
        service: Service,
        status: u16,
        message: String,
        body: Value,
    },

    #[error("No active {0} session")]
    NoActiveSession(Service),

    #[error("Invalid input argument: {0}")]
    InvalidInputArgument(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error(
        "Working directories diverged: file session at {}, command session at {}",
        file_dir.display(),
        command_dir.display()
    )]
    DirectoryDiverged {
        file_dir: PathBuf,
        command_dir: PathBuf,
        #[source]
        source: Box<AppError>,
    },

    #[error("I/O error: {0}")]
    StdIoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] anyhow::Error),

    #[error("Serde JSON error: {0}")]
    SerdeJsonError(#[from] serde_json::Error),
}

/// Coarse failure classes callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    Session,
    RemoteRejection,
    Usage,
    Divergence,
    Local,
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Transport { .. } | AppError::MalformedResponse { .. } => ErrorKind::Transport,
            AppError::NoActiveSession(_) => ErrorKind::Session,
            AppError::Remote { .. } => ErrorKind::RemoteRejection,
            AppError::InvalidInputArgument(_) | AppError::InvalidPath(_) => ErrorKind::Usage,
            AppError::DirectoryDiverged { .. } => ErrorKind::Divergence,
            AppError::StdIoError(_) | AppError::ConfigError(_) | AppError::SerdeJsonError(_) => {
                ErrorKind::Local
            }
        }
    }

    /// HTTP status of a remote rejection.
    pub fn status(&self) -> Option<u16> {
        match self {
            AppError::Remote { status, .. } => Some(*status),
            AppError::DirectoryDiverged { source, .. } => source.status(),
            _ => None,
        }
    }

    /// Server-provided message of a remote rejection, verbatim.
    pub fn remote_message(&self) -> Option<&str> {
        match self {
            AppError::Remote { message, .. } => Some(message),
            AppError::DirectoryDiverged { source, .. } => source.remote_message(),
            _ => None,
        }
    }

    pub fn is_remote_rejection(&self) -> bool {
        self.kind() == ErrorKind::RemoteRejection
    }

    pub(crate) fn usage(message: impl Into<String>) -> Self {
        AppError::InvalidInputArgument(message.into())
    }
}
