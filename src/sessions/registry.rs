//! Process-wide safety net for sessions that were never closed.
//!
//! Every open session registers itself here and deregisters on `close()`.
//! Entries are keyed by a per-registration token, so unrelated coordinators
//! never touch each other's entries. [`teardown_all`] drains whatever is left;
//! binaries call it on the way out.

use crate::error::Service;
use crate::transport::HttpTransport;
use once_cell::sync::Lazy;
use reqwest::Method;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex as StdMutex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistrationToken(u64);

#[derive(Debug)]
struct Registration {
    transport: HttpTransport,
    session_id: String,
}

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);
static REGISTRY: Lazy<StdMutex<HashMap<RegistrationToken, Registration>>> =
    Lazy::new(|| StdMutex::new(HashMap::new()));

fn with_registry<R>(f: impl FnOnce(&mut HashMap<RegistrationToken, Registration>) -> R) -> R {
    // A panic while holding the lock cannot leave the map half-updated.
    let mut guard = REGISTRY.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    f(&mut guard)
}

pub(crate) fn register(transport: HttpTransport, session_id: &str) -> RegistrationToken {
    let token = RegistrationToken(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed));
    with_registry(|map| {
        map.insert(
            token,
            Registration {
                transport,
                session_id: session_id.to_string(),
            },
        )
    });
    debug!(session_id = %session_id, "Registered session for exit-time teardown");
    token
}

pub(crate) fn deregister(token: RegistrationToken) -> bool {
    with_registry(|map| map.remove(&token).is_some())
}

/// Sessions still awaiting teardown, as `(service, session id)` pairs.
pub fn pending_sessions() -> Vec<(Service, String)> {
    with_registry(|map| {
        map.values()
            .map(|r| (r.transport.service(), r.session_id.clone()))
            .collect()
    })
}

/// Best-effort delete of every session still registered. Returns how many
/// deletes the services acknowledged.
pub async fn teardown_all() -> usize {
    let drained: Vec<Registration> = with_registry(|map| map.drain().map(|(_, r)| r).collect());
    if drained.is_empty() {
        return 0;
    }
    info!(count = drained.len(), "Tearing down sessions left open at exit");
    let mut acknowledged = 0;
    for registration in drained {
        if delete_session(&registration.transport, &registration.session_id).await {
            acknowledged += 1;
        }
    }
    acknowledged
}

/// Issues `DELETE /sessions/{id}`. Failures are logged, never returned.
pub(crate) async fn delete_session(transport: &HttpTransport, session_id: &str) -> bool {
    let path = format!("/sessions/{}", urlencoding::encode(session_id));
    match transport.request(Method::DELETE, &path, None, &[]).await {
        Ok(response) if response.status.is_success() => {
            info!(service = %transport.service(), session_id = %session_id, "Session deleted");
            true
        }
        Ok(response) => {
            warn!(
                service = %transport.service(),
                session_id = %session_id,
                status = %response.status,
                body = %response.body,
                "Session delete rejected"
            );
            false
        }
        Err(e) => {
            warn!(service = %transport.service(), session_id = %session_id, error = %e, "Session delete failed");
            false
        }
    }
}
