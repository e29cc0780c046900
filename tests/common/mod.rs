//! In-process stand-ins for the file and command services.
#![allow(dead_code)]

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use pocketflow_client::schemas::files::FILENAME_MATCH_SENTINEL;
use pocketflow_client::Config;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::net::TcpListener;

const STAMP: &str = "2024-05-01T10:00:00Z";

// Process-wide, so ids never repeat between fakes sharing the exit registry.
static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

pub async fn serve(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind fake service");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("fake service crashed");
    });
    format!("http://{}", addr)
}

fn reject(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn ok(body: Value) -> Response {
    (StatusCode::OK, Json(body)).into_response()
}

/// `base` joined with a session-relative path, the way the services resolve them.
pub fn join(base: &str, rel: &str) -> String {
    let rel = rel.trim_start_matches('/').trim_start_matches("./");
    if rel.is_empty() || rel == "." {
        return base.to_string();
    }
    format!("{}/{}", base.trim_end_matches('/'), rel)
}

fn parent_of(path: &str) -> &str {
    match path.rsplit_once('/') {
        Some(("", _)) => "/",
        Some((parent, _)) => parent,
        None => ".",
    }
}

fn name_of(path: &str) -> &str {
    path.rsplit_once('/').map(|(_, name)| name).unwrap_or(path)
}

#[derive(Debug, Clone)]
pub struct FakeSession {
    pub id: String,
    pub working_dir: String,
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
pub struct ServiceState {
    prefix: &'static str,
    with_env: bool,
    pub sessions: BTreeMap<String, FakeSession>,
    pub deleted: Vec<String>,
    pub fail_create: bool,
    /// Absolute directory paths that exist.
    pub dirs: BTreeSet<String>,
    /// Directories this service refuses to bind even though they exist.
    pub rejected_dirs: BTreeSet<String>,
    /// Requested directory -> the resolved directory reported back on bind.
    pub dir_aliases: BTreeMap<String, String>,

    /// Absolute file path -> content.
    pub files: BTreeMap<String, String>,
    pub failing_updates: BTreeSet<String>,

    pub tar_exit_code: i32,
    /// Every command executed, in order.
    pub commands: Vec<String>,
    pub history: Vec<(String, String)>,
    next_process: u64,
    pub processes: BTreeMap<String, Value>,
}

impl ServiceState {
    fn session_json(&self, session: &FakeSession) -> Value {
        let mut value = json!({
            "id": session.id,
            "createdAt": STAMP,
            "lastActive": STAMP,
            "workingDir": session.working_dir,
            "isActive": true,
            "expiresAt": "2024-05-01T11:00:00Z",
            "activityLog": [],
        });
        if self.with_env {
            value["envVars"] = json!(session.env);
        }
        value
    }

    fn working_dir(&self, id: &str) -> Result<String, Response> {
        self.sessions
            .get(id)
            .map(|s| s.working_dir.clone())
            .ok_or_else(|| reject(StatusCode::NOT_FOUND, "session not found or inactive"))
    }

    fn add_dir_chain(&mut self, dir: &str) {
        let mut current = dir.to_string();
        while current != "/" && current != "." && !current.is_empty() {
            self.dirs.insert(current.clone());
            current = parent_of(&current).to_string();
        }
    }
}

#[derive(Clone, Default)]
pub struct Fake(pub Arc<Mutex<ServiceState>>);

impl Fake {
    fn new(prefix: &'static str, with_env: bool) -> Self {
        Fake(Arc::new(Mutex::new(ServiceState { prefix, with_env, ..Default::default() })))
    }

    pub fn state(&self) -> MutexGuard<'_, ServiceState> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn session_routes(router: Router<Fake>) -> Router<Fake> {
    router
        .route("/sessions", post(create_session).get(list_sessions))
        .route("/sessions/:id", get(get_session).delete(delete_session))
        .route("/sessions/:id/cwd", put(set_cwd))
}

async fn create_session(State(fake): State<Fake>) -> Response {
    let mut state = fake.state();
    if state.fail_create {
        return reject(StatusCode::INTERNAL_SERVER_ERROR, "session limit reached");
    }
    let session = FakeSession {
        id: format!("{}-{}", state.prefix, NEXT_SESSION.fetch_add(1, Ordering::Relaxed)),
        working_dir: "/".to_string(),
        env: BTreeMap::new(),
    };
    let body = state.session_json(&session);
    state.sessions.insert(session.id.clone(), session);
    (StatusCode::CREATED, Json(body)).into_response()
}

async fn list_sessions(State(fake): State<Fake>) -> Response {
    let state = fake.state();
    let all: Vec<Value> = state.sessions.values().map(|s| state.session_json(s)).collect();
    ok(json!({ "count": all.len(), "sessions": all }))
}

async fn get_session(State(fake): State<Fake>, Path(id): Path<String>) -> Response {
    let state = fake.state();
    match state.sessions.get(&id) {
        Some(session) => ok(state.session_json(session)),
        None => reject(StatusCode::NOT_FOUND, "session not found"),
    }
}

async fn delete_session(State(fake): State<Fake>, Path(id): Path<String>) -> Response {
    let mut state = fake.state();
    match state.sessions.remove(&id) {
        Some(_) => {
            state.deleted.push(id);
            StatusCode::NO_CONTENT.into_response()
        }
        None => reject(StatusCode::NOT_FOUND, "session not found"),
    }
}

async fn set_cwd(State(fake): State<Fake>, Path(id): Path<String>, Json(body): Json<Value>) -> Response {
    let mut state = fake.state();
    let dir = body["workingDirectory"].as_str().unwrap_or_default().to_string();
    if !state.dirs.contains(&dir) || state.rejected_dirs.contains(&dir) {
        return reject(StatusCode::BAD_REQUEST, "directory does not exist");
    }
    let dir = state.dir_aliases.get(&dir).cloned().unwrap_or(dir);
    let Some(session) = state.sessions.get_mut(&id) else {
        return reject(StatusCode::BAD_REQUEST, "session not found or inactive");
    };
    session.working_dir = dir;
    let session = session.clone();
    ok(state.session_json(&session))
}

// --- File service ---
pub fn file_router(fake: Fake) -> Router {
    session_routes(Router::new())
        .route("/sessions/:id/files", get(list_files))
        .route(
            "/sessions/:id/files/*path",
            get(read_file).post(create_file).put(update_file).delete(delete_file),
        )
        .route("/sessions/:id/file-metadata/*path", get(file_metadata))
        .route("/sessions/:id/directories", get(list_directories))
        .route("/sessions/:id/directories/*path", post(create_directory).delete(delete_directory))
        .route("/sessions/:id/search", post(search))
        .route("/sessions/:id/batch-read", post(batch_read))
        .route("/sessions/:id/project/structure", get(project_structure))
        .route("/sessions/:id/diff", post(diff))
        .route("/sessions/:id/patch", post(patch))
        .with_state(fake)
}

fn resolve(state: &ServiceState, id: &str, rel: &str) -> Result<String, Response> {
    Ok(join(&state.working_dir(id)?, rel))
}

async fn list_files(
    State(fake): State<Fake>,
    Path(id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let state = fake.state();
    let rel = query.get("path").cloned().unwrap_or_else(|| ".".to_string());
    let dir = match resolve(&state, &id, &rel) {
        Ok(dir) => dir,
        Err(response) => return response,
    };
    let files: Vec<&str> = state
        .files
        .keys()
        .filter(|f| parent_of(f) == dir)
        .map(|f| name_of(f))
        .collect();
    ok(json!({ "path": rel, "files": files }))
}

async fn read_file(State(fake): State<Fake>, Path((id, rel)): Path<(String, String)>) -> Response {
    let state = fake.state();
    let full = match resolve(&state, &id, &rel) {
        Ok(full) => full,
        Err(response) => return response,
    };
    match state.files.get(&full) {
        Some(content) => ok(json!({ "content": content })),
        None => reject(StatusCode::NOT_FOUND, format!("open {}: no such file or directory", full)),
    }
}

async fn create_file(
    State(fake): State<Fake>,
    Path((id, rel)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Response {
    let mut state = fake.state();
    let full = match resolve(&state, &id, &rel) {
        Ok(full) => full,
        Err(response) => return response,
    };
    if state.files.contains_key(&full) {
        return reject(StatusCode::INTERNAL_SERVER_ERROR, "file already exists");
    }
    state.add_dir_chain(parent_of(&full).to_string().as_str());
    state
        .files
        .insert(full, body["content"].as_str().unwrap_or_default().to_string());
    (StatusCode::CREATED, Json(json!({ "message": "File created successfully", "path": rel }))).into_response()
}

async fn update_file(
    State(fake): State<Fake>,
    Path((id, rel)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Response {
    let mut state = fake.state();
    let full = match resolve(&state, &id, &rel) {
        Ok(full) => full,
        Err(response) => return response,
    };
    if state.failing_updates.contains(&full) {
        return reject(StatusCode::INTERNAL_SERVER_ERROR, "disk quota exceeded");
    }
    state
        .files
        .insert(full, body["content"].as_str().unwrap_or_default().to_string());
    ok(json!({ "message": "File updated successfully", "path": rel }))
}

async fn delete_file(State(fake): State<Fake>, Path((id, rel)): Path<(String, String)>) -> Response {
    let mut state = fake.state();
    let full = match resolve(&state, &id, &rel) {
        Ok(full) => full,
        Err(response) => return response,
    };
    match state.files.remove(&full) {
        Some(_) => StatusCode::NO_CONTENT.into_response(),
        None => reject(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("remove {}: no such file or directory", full),
        ),
    }
}

async fn file_metadata(State(fake): State<Fake>, Path((id, rel)): Path<(String, String)>) -> Response {
    let state = fake.state();
    let full = match resolve(&state, &id, &rel) {
        Ok(full) => full,
        Err(response) => return response,
    };
    if let Some(content) = state.files.get(&full) {
        return ok(json!({
            "name": name_of(&full), "path": rel, "size": content.len(),
            "modTime": STAMP, "isDir": false, "permissions": "-rw-r--r--",
        }));
    }
    if state.dirs.contains(&full) {
        return ok(json!({
            "name": name_of(&full), "path": rel, "size": 4096,
            "modTime": STAMP, "isDir": true, "permissions": "drwxr-xr-x",
        }));
    }
    reject(StatusCode::NOT_FOUND, format!("stat {}: no such file or directory", full))
}

async fn list_directories(
    State(fake): State<Fake>,
    Path(id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let state = fake.state();
    let rel = query.get("path").cloned().unwrap_or_else(|| ".".to_string());
    let dir = match resolve(&state, &id, &rel) {
        Ok(dir) => dir,
        Err(response) => return response,
    };
    let dirs: Vec<&str> = state
        .dirs
        .iter()
        .filter(|d| parent_of(d) == dir)
        .map(|d| name_of(d))
        .collect();
    ok(json!({ "path": rel, "directories": dirs }))
}

async fn create_directory(State(fake): State<Fake>, Path((id, rel)): Path<(String, String)>) -> Response {
    let mut state = fake.state();
    let full = match resolve(&state, &id, &rel) {
        Ok(full) => full,
        Err(response) => return response,
    };
    state.add_dir_chain(&full);
    (StatusCode::CREATED, Json(json!({ "message": "Directory created successfully", "path": rel }))).into_response()
}

async fn delete_directory(State(fake): State<Fake>, Path((id, rel)): Path<(String, String)>) -> Response {
    let mut state = fake.state();
    let full = match resolve(&state, &id, &rel) {
        Ok(full) => full,
        Err(response) => return response,
    };
    let prefix = format!("{}/", full);
    state.dirs.retain(|d| d != &full && !d.starts_with(&prefix));
    state.files.retain(|f, _| !f.starts_with(&prefix));
    StatusCode::NO_CONTENT.into_response()
}

async fn search(State(fake): State<Fake>, Path(id): Path<String>, Json(body): Json<Value>) -> Response {
    let state = fake.state();
    let pattern = body["pattern"].as_str().unwrap_or_default().to_string();
    let rel = body["path"].as_str().filter(|p| !p.is_empty()).unwrap_or(".").to_string();
    let recursive = body["recursive"].as_bool().unwrap_or(false);
    let root = match resolve(&state, &id, &rel) {
        Ok(root) => root,
        Err(response) => return response,
    };
    let prefix = format!("{}/", root.trim_end_matches('/'));
    let mut results: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (path, content) in &state.files {
        let Some(relative) = path.strip_prefix(&prefix) else { continue };
        if !recursive && relative.contains('/') {
            continue;
        }
        if content.contains(&pattern) {
            let lines = content
                .lines()
                .filter(|line| line.contains(&pattern))
                .map(str::to_string)
                .collect();
            results.insert(relative.to_string(), lines);
        } else if name_of(relative).contains(&pattern) {
            results.insert(relative.to_string(), vec![FILENAME_MATCH_SENTINEL.to_string()]);
        }
    }
    ok(json!({
        "pattern": pattern, "path": rel, "recursive": recursive,
        "matchedFiles": results.len(), "results": results,
    }))
}

async fn batch_read(State(fake): State<Fake>, Path(id): Path<String>, Json(body): Json<Value>) -> Response {
    let state = fake.state();
    let base = match state.working_dir(&id) {
        Ok(base) => base,
        Err(response) => return response,
    };
    let results: Vec<Value> = body["files"]
        .as_array()
        .cloned()
        .unwrap_or_default()
        .iter()
        .filter_map(Value::as_str)
        .map(|rel| match state.files.get(&join(&base, rel)) {
            Some(content) => json!({ "path": rel, "success": true, "result": content }),
            None => json!({ "path": rel, "success": false, "error": "no such file or directory" }),
        })
        .collect();
    ok(json!({ "results": results }))
}

/// Nested name -> entry map, string-encoded the way the service sends it.
async fn project_structure(
    State(fake): State<Fake>,
    Path(id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let state = fake.state();
    let rel = query.get("path").cloned().unwrap_or_else(|| ".".to_string());
    let root = match resolve(&state, &id, &rel) {
        Ok(root) => root,
        Err(response) => return response,
    };
    let prefix = format!("{}/", root.trim_end_matches('/'));
    let mut tree = json!({});
    for dir in state.dirs.iter().filter_map(|d| d.strip_prefix(&prefix)) {
        let mut node = &mut tree;
        for part in dir.split('/') {
            node = node.as_object_mut().expect("object").entry(part).or_insert_with(|| json!({}));
        }
    }
    for (path, content) in &state.files {
        let Some(relative) = path.strip_prefix(&prefix) else { continue };
        let mut node = &mut tree;
        let parts: Vec<&str> = relative.split('/').collect();
        for part in &parts[..parts.len() - 1] {
            node = node.as_object_mut().expect("object").entry(*part).or_insert_with(|| json!({}));
        }
        node[parts[parts.len() - 1]] = json!({ "size": content.len(), "modTime": STAMP });
    }
    ok(json!({ "path": rel, "depth": query.get("depth").and_then(|d| d.parse::<i64>().ok()).unwrap_or(3), "structure": tree.to_string() }))
}

async fn diff(State(fake): State<Fake>, Path(id): Path<String>, Json(body): Json<Value>) -> Response {
    let state = fake.state();
    let base = match state.working_dir(&id) {
        Ok(base) => base,
        Err(response) => return response,
    };
    let side = |path_key: &str, content_key: &str| -> Result<String, Response> {
        match body[path_key].as_str().filter(|p| !p.is_empty()) {
            Some(rel) => state.files.get(&join(&base, rel)).cloned().ok_or_else(|| {
                reject(StatusCode::INTERNAL_SERVER_ERROR, format!("open {}: no such file or directory", rel))
            }),
            None => Ok(body[content_key].as_str().unwrap_or_default().to_string()),
        }
    };
    let (original, modified) = match (side("originalPath", "original"), side("modifiedPath", "modified")) {
        (Ok(o), Ok(m)) => (o, m),
        (Err(response), _) | (_, Err(response)) => return response,
    };
    // Opaque to the client: a serialized replacement that only applies to `from`.
    let patches = json!({ "from": original, "to": modified }).to_string();
    ok(json!({ "patches": patches }))
}

async fn patch(State(fake): State<Fake>, Path(id): Path<String>, Json(body): Json<Value>) -> Response {
    let mut state = fake.state();
    let base = match state.working_dir(&id) {
        Ok(base) => base,
        Err(response) => return response,
    };
    let Ok(parsed) = serde_json::from_str::<Value>(body["patches"].as_str().unwrap_or_default()) else {
        return reject(StatusCode::INTERNAL_SERVER_ERROR, "invalid patch text");
    };
    let original = body["original"].as_str().unwrap_or_default();
    if parsed["from"].as_str() != Some(original) {
        return reject(StatusCode::INTERNAL_SERVER_ERROR, "patch does not apply");
    }
    let result = parsed["to"].as_str().unwrap_or_default().to_string();
    let file_path = body["filePath"].as_str().unwrap_or_default().to_string();
    if !file_path.is_empty() {
        state.files.insert(join(&base, &file_path), result.clone());
    }
    ok(json!({ "result": result, "path": file_path }))
}

// --- Command service ---
pub fn command_router(fake: Fake) -> Router {
    session_routes(Router::new())
        .route("/sessions/:id/commands", post(execute))
        .route("/sessions/:id/commands/batch", post(execute_batch))
        .route("/sessions/:id/processes", post(start_process).get(list_processes))
        .route("/sessions/:id/processes/:pid", get(get_process))
        .route("/sessions/:id/processes/:pid/output", get(process_output))
        .route("/sessions/:id/processes/:pid/input", post(process_input))
        .route("/sessions/:id/processes/:pid/signal", post(process_signal))
        .route("/sessions/:id/env", get(get_env).put(set_env_batch))
        .route("/sessions/:id/env/:key", put(set_env).delete(unset_env))
        .route("/sessions/:id/history", get(get_history).delete(clear_history))
        .route("/sessions/:id/history/search", get(search_history))
        .route("/system/info", get(system_info))
        .with_state(fake)
}

fn run(state: &mut ServiceState, id: &str, command: &str) -> Value {
    state.commands.push(command.to_string());
    state.history.push((id.to_string(), command.to_string()));
    let (exit_code, stdout, stderr) = if let Some(text) = command.strip_prefix("echo ") {
        (0, format!("{}\n", text), String::new())
    } else if command.starts_with("tar ") {
        let code = state.tar_exit_code;
        let stderr = if code == 0 { String::new() } else { "tar: Cannot open: Permission denied".to_string() };
        (code, String::new(), stderr)
    } else if let Some(code) = command.strip_prefix("exit ") {
        (code.trim().parse().unwrap_or(1), String::new(), String::new())
    } else {
        (0, format!("ran: {}\n", command), String::new())
    };
    json!({
        "exitCode": exit_code, "stdout": stdout, "stderr": stderr,
        "executionTime": 0.01, "command": command,
    })
}

async fn execute(State(fake): State<Fake>, Path(id): Path<String>, Json(body): Json<Value>) -> Response {
    let mut state = fake.state();
    if let Err(response) = state.working_dir(&id) {
        return response;
    }
    let command = body["command"].as_str().unwrap_or_default().to_string();
    ok(run(&mut state, &id, &command))
}

async fn execute_batch(State(fake): State<Fake>, Path(id): Path<String>, Json(body): Json<Value>) -> Response {
    let mut state = fake.state();
    if let Err(response) = state.working_dir(&id) {
        return response;
    }
    let continue_on_error = body["continueOnError"].as_bool().unwrap_or(false);
    let mut results = Vec::new();
    for command in body["commands"].as_array().cloned().unwrap_or_default() {
        let output = run(&mut state, &id, command.as_str().unwrap_or_default());
        let failed = output["exitCode"].as_i64() != Some(0);
        results.push(output);
        if failed && !continue_on_error {
            break;
        }
    }
    ok(json!({ "count": results.len(), "results": results }))
}

async fn start_process(State(fake): State<Fake>, Path(id): Path<String>, Json(body): Json<Value>) -> Response {
    let mut state = fake.state();
    if let Err(response) = state.working_dir(&id) {
        return response;
    }
    state.next_process += 1;
    let process_id = format!("proc-{}", state.next_process);
    let process = json!({
        "id": process_id, "command": body["command"], "startTime": STAMP,
        "isRunning": true, "pid": 4000 + state.next_process,
    });
    state.processes.insert(process_id, process.clone());
    (StatusCode::CREATED, Json(process)).into_response()
}

async fn list_processes(State(fake): State<Fake>) -> Response {
    let state = fake.state();
    ok(json!({ "count": state.processes.len(), "processes": state.processes }))
}

async fn get_process(State(fake): State<Fake>, Path((_, pid)): Path<(String, String)>) -> Response {
    match fake.state().processes.get(&pid) {
        Some(process) => ok(process.clone()),
        None => reject(StatusCode::NOT_FOUND, "process not found"),
    }
}

async fn process_output(State(fake): State<Fake>, Path((_, pid)): Path<(String, String)>) -> Response {
    match fake.state().processes.get(&pid) {
        Some(_) => ok(json!({ "stdout": ["started"], "stderr": [] })),
        None => reject(StatusCode::NOT_FOUND, "process not found"),
    }
}

async fn process_input(State(fake): State<Fake>, Path((_, pid)): Path<(String, String)>) -> Response {
    match fake.state().processes.get(&pid) {
        Some(_) => ok(json!({ "message": "Input sent to process" })),
        None => reject(StatusCode::NOT_FOUND, "process not found"),
    }
}

async fn process_signal(
    State(fake): State<Fake>,
    Path((_, pid)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Response {
    let mut state = fake.state();
    let Some(process) = state.processes.get_mut(&pid) else {
        return reject(StatusCode::NOT_FOUND, "process not found");
    };
    process["isRunning"] = json!(false);
    process["exitCode"] = json!(-1);
    ok(json!({ "message": format!("Signal {} sent to process", body["signal"].as_str().unwrap_or("?")) }))
}

async fn get_env(State(fake): State<Fake>, Path(id): Path<String>) -> Response {
    match fake.state().sessions.get(&id) {
        Some(session) => ok(json!(session.env)),
        None => reject(StatusCode::NOT_FOUND, "session not found"),
    }
}

async fn set_env_batch(State(fake): State<Fake>, Path(id): Path<String>, Json(body): Json<Value>) -> Response {
    let mut state = fake.state();
    let Some(session) = state.sessions.get_mut(&id) else {
        return reject(StatusCode::NOT_FOUND, "session not found");
    };
    if let Some(vars) = body["variables"].as_object() {
        for (key, value) in vars {
            session.env.insert(key.clone(), value.as_str().unwrap_or_default().to_string());
        }
    }
    ok(json!({ "message": "Environment variables set" }))
}

async fn set_env(
    State(fake): State<Fake>,
    Path((id, key)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Response {
    let mut state = fake.state();
    let Some(session) = state.sessions.get_mut(&id) else {
        return reject(StatusCode::NOT_FOUND, "session not found");
    };
    session.env.insert(key.clone(), body["value"].as_str().unwrap_or_default().to_string());
    ok(json!({ "message": format!("Environment variable {} set", key) }))
}

async fn unset_env(State(fake): State<Fake>, Path((id, key)): Path<(String, String)>) -> Response {
    let mut state = fake.state();
    let Some(session) = state.sessions.get_mut(&id) else {
        return reject(StatusCode::NOT_FOUND, "session not found");
    };
    match session.env.remove(&key) {
        Some(_) => ok(json!({ "message": format!("Environment variable {} unset", key) })),
        None => reject(StatusCode::INTERNAL_SERVER_ERROR, format!("environment variable {} not set", key)),
    }
}

fn history_entries<'a>(state: &'a ServiceState, id: &'a str) -> impl Iterator<Item = &'a String> + 'a {
    state.history.iter().filter(move |(sid, _)| sid == id).map(|(_, command)| command)
}

async fn get_history(
    State(fake): State<Fake>,
    Path(id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let state = fake.state();
    let mut entries: Vec<Value> = history_entries(&state, &id)
        .map(|command| json!({ "command": command, "timestamp": STAMP }))
        .collect();
    if let Some(limit) = query.get("limit").and_then(|l| l.parse::<usize>().ok()) {
        let skip = entries.len().saturating_sub(limit);
        entries.drain(..skip);
    }
    ok(json!({ "count": entries.len(), "history": entries }))
}

async fn search_history(
    State(fake): State<Fake>,
    Path(id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let state = fake.state();
    let needle = query.get("query").cloned().unwrap_or_default();
    let entries: Vec<Value> = history_entries(&state, &id)
        .filter(|command| command.contains(&needle))
        .map(|command| json!({ "command": command, "timestamp": STAMP }))
        .collect();
    ok(json!({ "count": entries.len(), "history": entries, "query": needle }))
}

async fn clear_history(State(fake): State<Fake>, Path(id): Path<String>) -> Response {
    fake.state().history.retain(|(sid, _)| sid != &id);
    ok(json!({ "message": "Command history cleared" }))
}

async fn system_info() -> Response {
    ok(json!({
        "hostname": "fake-host", "os": "linux", "distribution": "Debian",
        "architecture": "amd64", "numCPU": 4, "currentTime": STAMP, "timezone": "UTC",
    }))
}

/// Both fakes plus a config pointing at them.
pub struct Harness {
    pub files: Fake,
    pub commands: Fake,
    pub config: Arc<Config>,
}

impl Harness {
    /// `dirs` exist on both hosts; the working directory is added to them.
    pub async fn start(working_dir: &str, dirs: &[&str]) -> Harness {
        let files = Fake::new("files", false);
        let commands = Fake::new("commands", true);
        for fake in [&files, &commands] {
            let mut state = fake.state();
            state.add_dir_chain(working_dir);
            for dir in dirs {
                state.add_dir_chain(dir);
            }
        }
        let file_url = serve(file_router(files.clone())).await;
        let command_url = serve(command_router(commands.clone())).await;
        let config = Config::new(&file_url, &command_url, working_dir).expect("valid test config");
        Harness { files, commands, config: Arc::new(config) }
    }

    pub fn seed_file(&self, absolute: &str, content: &str) {
        let mut state = self.files.state();
        state.add_dir_chain(parent_of(absolute));
        state.files.insert(absolute.to_string(), content.to_string());
    }

    pub fn file(&self, absolute: &str) -> Option<String> {
        self.files.state().files.get(absolute).cloned()
    }

    pub fn executed(&self) -> Vec<String> {
        self.commands.state().commands.clone()
    }
}
