//! Session lifecycle shared by the file and command clients.
//!
//! A session moves `Unbound -> Bound -> Ready -> Destroyed`. A failed
//! directory change drops `Ready` back to `Bound`: the server may or may not
//! have applied it, so the cached directory is no longer trusted.

pub mod command_session;
pub mod file_session;
pub mod registry;

use crate::error::{AppError, Service};
use crate::transport::HttpTransport;
use crate::utils::path_utils::to_remote_string;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use registry::RegistrationToken;
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

pub use command_session::CommandSession;
pub use file_session::FileSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Unbound,
    Bound,
    Ready,
    Destroyed,
}

/// Server-side session record. `env_vars` is only reported by the command service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionInfo {
    pub id: String,
    pub created_at: Option<DateTime<Utc>>,
    pub last_active: Option<DateTime<Utc>>,
    pub working_dir: String,
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub activity_log: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env_vars: Option<HashMap<String, String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SessionListing {
    sessions: Vec<SessionInfo>,
}

/// Id, cached directory and state of one remote session.
#[derive(Debug)]
pub struct SessionCore {
    transport: HttpTransport,
    id: Option<String>,
    working_dir: PathBuf,
    state: SessionState,
    registration: Option<RegistrationToken>,
}

impl SessionCore {
    pub fn new(transport: HttpTransport) -> Self {
        Self {
            transport,
            id: None,
            working_dir: PathBuf::new(),
            state: SessionState::Unbound,
            registration: None,
        }
    }

    /// Creates a session and binds it to `working_dir`. If the bind fails the
    /// fresh session is deleted before the error is returned.
    pub async fn open(transport: HttpTransport, working_dir: &Path) -> Result<Self, AppError> {
        let mut core = SessionCore::new(transport);
        core.create().await?;
        if let Err(e) = core.bind_directory(working_dir).await {
            warn!(service = %core.service(), error = %e, "Initial directory bind failed, closing session");
            core.close().await;
            return Err(e);
        }
        Ok(core)
    }

    pub fn transport(&self) -> &HttpTransport {
        &self.transport
    }

    pub fn service(&self) -> Service {
        self.transport.service()
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn require_id(&self) -> Result<&str, AppError> {
        self.id
            .as_deref()
            .ok_or(AppError::NoActiveSession(self.transport.service()))
    }

    /// `/sessions/{id}{suffix}` for the active session.
    pub fn session_path(&self, suffix: &str) -> Result<String, AppError> {
        let id = self.require_id()?;
        Ok(format!("/sessions/{}{}", urlencoding::encode(id), suffix))
    }

    #[instrument(skip(self), fields(service = %self.transport.service()))]
    pub async fn create(&mut self) -> Result<SessionInfo, AppError> {
        if self.id.is_some() {
            return Err(AppError::usage("Session already created"));
        }
        let created: SessionInfo = self
            .transport
            .call_typed(Method::POST, "/sessions", None, &[], StatusCode::CREATED)
            .await?;
        if created.id.is_empty() {
            return Err(AppError::MalformedResponse {
                service: self.transport.service(),
                message: "session create response carried no id".to_string(),
            });
        }
        self.registration = Some(registry::register(self.transport.clone(), &created.id));
        self.id = Some(created.id.clone());
        self.working_dir = PathBuf::from(&created.working_dir);
        self.state = SessionState::Bound;
        info!(session_id = %created.id, "Session created");
        Ok(created)
    }

    #[instrument(skip(self), fields(service = %self.transport.service(), dir = %dir.display()))]
    pub async fn bind_directory(&mut self, dir: &Path) -> Result<SessionInfo, AppError> {
        let path = self.session_path("/cwd")?;
        let body = json!({ "workingDirectory": to_remote_string(dir) });
        match self
            .transport
            .call_typed::<SessionInfo>(Method::PUT, &path, Some(&body), &[], StatusCode::OK)
            .await
        {
            Ok(session) => {
                self.working_dir = if session.working_dir.is_empty() {
                    dir.to_path_buf()
                } else {
                    PathBuf::from(&session.working_dir)
                };
                self.state = SessionState::Ready;
                debug!(working_dir = %self.working_dir.display(), "Working directory bound");
                Ok(session)
            }
            Err(e) => {
                if self.state == SessionState::Ready {
                    self.state = SessionState::Bound;
                }
                Err(e)
            }
        }
    }

    pub async fn info(&self) -> Result<SessionInfo, AppError> {
        let path = self.session_path("")?;
        self.transport
            .call_typed(Method::GET, &path, None, &[], StatusCode::OK)
            .await
    }

    /// Every session the service currently knows about, not just ours.
    pub async fn list_all(&self) -> Result<Vec<SessionInfo>, AppError> {
        let listing: SessionListing = self
            .transport
            .call_typed(Method::GET, "/sessions", None, &[], StatusCode::OK)
            .await?;
        Ok(listing.sessions)
    }

    /// Best-effort delete. Never fails; safe to call any number of times.
    pub async fn close(&mut self) {
        let Some(id) = self.id.take() else {
            if self.state != SessionState::Unbound {
                self.state = SessionState::Destroyed;
            }
            return;
        };
        if let Some(token) = self.registration.take() {
            registry::deregister(token);
        }
        self.state = SessionState::Destroyed;
        registry::delete_session(&self.transport, &id).await;
    }
}

impl Drop for SessionCore {
    fn drop(&mut self) {
        let Some(id) = self.id.take() else { return };
        // Without a runtime the exit registry keeps the entry.
        let Ok(handle) = tokio::runtime::Handle::try_current() else { return };
        // The entry stays registered until the delete is acknowledged: a
        // runtime shutting down cancels the task and leaves it for `teardown_all`.
        let registration = self.registration.take();
        let transport = self.transport.clone();
        debug!(service = %transport.service(), session_id = %id, "Session dropped while open, scheduling delete");
        handle.spawn(async move {
            if registry::delete_session(&transport, &id).await {
                if let Some(token) = registration {
                    registry::deregister(token);
                }
            }
        });
    }
}

/// Lifecycle surface common to both session clients.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    fn core(&self) -> &SessionCore;
    fn core_mut(&mut self) -> &mut SessionCore;

    fn service(&self) -> Service {
        self.core().service()
    }

    fn session_id(&self) -> Option<&str> {
        self.core().id()
    }

    fn working_dir(&self) -> &Path {
        self.core().working_dir()
    }

    fn state(&self) -> SessionState {
        self.core().state()
    }

    async fn session_info(&self) -> Result<SessionInfo, AppError> {
        self.core().info().await
    }

    async fn list_sessions(&self) -> Result<Vec<SessionInfo>, AppError> {
        self.core().list_all().await
    }

    async fn bind_directory(&mut self, dir: &Path) -> Result<SessionInfo, AppError> {
        self.core_mut().bind_directory(dir).await
    }

    async fn close(&mut self) {
        self.core_mut().close().await
    }
}
