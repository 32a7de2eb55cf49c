use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use notify::event::RemoveKind;
use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::time::Instant;

use mirror_core::markers::CONDITION_READY;
use mirror_core::{
    config, ControllerConfig, FsStore, Intent, IntentKey, ObjectStore, WatchEvent, WatchedKind,
};
use mirror_sync::conditions::is_condition_true;
use mirror_sync::correlation::{all_intents, requests_for_event};
use mirror_sync::pipeline::{self, ReconcileScope, ReconcileSummary};
use mirror_sync::{Cancellation, ReconcileAction, Reconciler, SyncError};

use crate::error::{io_err, DaemonError};
use crate::paths::{kvmirror_root, namespaces_root, socket_path, DEBOUNCE_WINDOW};
use crate::protocol::{DaemonRequest, DaemonResponse};
use crate::queue::WorkQueue;

/// Latest pass outcome for one intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntentRecord {
    pub last_reconcile_at_unix: u64,
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Keyed by `<namespace>/<name>`.
pub type ReconcileLog = BTreeMap<String, IntentRecord>;

struct ReconcileJob {
    scope: ReconcileScope,
    respond_to: oneshot::Sender<Result<RunSummary, String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub scope: String,
    pub intents: Vec<IntentOutcome>,
    pub duration_ms: u128,
}

#[derive(Debug, Clone, Serialize)]
pub struct IntentOutcome {
    pub intent: String,
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// State shared by the daemon tasks.
#[derive(Clone)]
struct Shared {
    store: Arc<dyn ObjectStore>,
    config: ControllerConfig,
    queue: Arc<WorkQueue>,
    log: Arc<RwLock<ReconcileLog>>,
}

impl Shared {
    fn new(store: Arc<dyn ObjectStore>, config: ControllerConfig) -> Self {
        Self {
            store,
            config,
            queue: Arc::new(WorkQueue::new()),
            log: Arc::new(RwLock::new(ReconcileLog::new())),
        }
    }
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf()))
}

/// Run the daemon: watcher, worker, resync timer and socket server.
pub async fn run(home: PathBuf) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;

    let config = config::load_at(&home)?;
    let fs_store = Arc::new(FsStore::at(&home));
    let shared = Shared::new(fs_store.clone(), config);
    let started_at_unix = unix_seconds_now();
    tracing::info!(
        identity = %shared.config.identity,
        root = %fs_store.root().display(),
        "kvmirror daemon starting",
    );

    let (job_tx, job_rx) = mpsc::channel::<ReconcileJob>(64);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let watcher_handle = {
        let shutdown = shutdown_tx.clone();
        let shared = shared.clone();
        let fs_store = fs_store.clone();
        tokio::spawn(async move {
            let result = watcher_task(fs_store, shared, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let worker_handle = {
        let shutdown = shutdown_tx.clone();
        let shared = shared.clone();
        tokio::spawn(async move {
            let result = worker_task(shared, job_rx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let resync_handle = {
        let shutdown = shutdown_tx.clone();
        let shared = shared.clone();
        tokio::spawn(async move {
            let result = resync_task(shared, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let shared = shared.clone();
        let home = home.clone();
        tokio::spawn(async move {
            let result = socket_server_task(
                home,
                shared,
                job_tx,
                shutdown.clone(),
                shutdown.subscribe(),
                started_at_unix,
            )
            .await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let (watcher_result, worker_result, resync_result, socket_result, signal_result) = tokio::join!(
        watcher_handle,
        worker_handle,
        resync_handle,
        socket_handle,
        signal_handle
    );

    handle_join("watcher", watcher_result)?;
    handle_join("worker", worker_result)?;
    handle_join("resync", resync_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    tracing::info!("kvmirror daemon stopped");
    Ok(())
}

// ---------------------------------------------------------------------------
// Watcher
// ---------------------------------------------------------------------------

async fn watcher_task(
    store: Arc<FsStore>,
    shared: Shared,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let root = store.namespaces_dir();
    if !root.exists() {
        fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
    }

    // FSEvents reports real paths (e.g. /private/var/... on macOS).
    let watched_root = fs::canonicalize(&root).unwrap_or(root);

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut watcher: RecommendedWatcher = recommended_watcher(move |event| {
        let _ = event_tx.send(event);
    })?;

    let mut watched_dirs = HashSet::new();
    register_tree(&mut watcher, &mut watched_dirs, &watched_root)?;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                let event = match event {
                    Ok(event) => event,
                    Err(err) => {
                        tracing::warn!(error = %err, "watcher event error");
                        continue;
                    }
                };
                if !is_relevant_event_kind(&event.kind) {
                    continue;
                }

                let mut changed = Vec::new();
                for path in event.paths {
                    if matches!(event.kind, EventKind::Remove(RemoveKind::Folder)) {
                        watched_dirs.remove(&path);
                    }
                    // FSEvents is directory-based; always register parent directory.
                    if let Some(dir) = directory_to_watch(&path) {
                        if dir.starts_with(&watched_root) && dir.exists() {
                            for new_dir in register_tree(&mut watcher, &mut watched_dirs, &dir)? {
                                changed.extend(yaml_files_in(&new_dir));
                            }
                        }
                    }
                    changed.push(path);
                }

                for path in changed {
                    let Some(change) = classify_path(&store, &watched_root, &path) else {
                        continue;
                    };
                    dispatch_event(&shared, change).await;
                }
            }
        }
    }

    Ok(())
}

/// Correlate one change and queue the affected intents.
///
/// Keys are queued after the debounce window; repeated events for the same
/// intent inside the window collapse into one pass.
async fn dispatch_event(shared: &Shared, change: WatchEvent) {
    let store = shared.store.clone();
    let identity = shared.config.identity.clone();
    let lookup = change.clone();
    let keys = tokio::task::spawn_blocking(move || {
        intents_for_event(store.as_ref(), &lookup, &identity)
    })
    .await;

    match keys {
        Ok(Ok(keys)) => {
            for key in keys {
                tracing::debug!(intent = %key, changed = %change.key, "queueing intent");
                shared.queue.add_after(key, DEBOUNCE_WINDOW);
            }
        }
        Ok(Err(err)) => {
            tracing::warn!(changed = %change.key, error = %err, "correlation failed");
        }
        Err(err) => {
            tracing::error!(error = %err, "correlation task join failure");
        }
    }
}

/// Intents to reconcile for a watch event.
///
/// Intent files change on every status write, so an intent event only counts
/// when there is something left to act on: an unobserved spec generation,
/// a deletion request, or a missing finalizer.
fn intents_for_event(
    store: &dyn ObjectStore,
    event: &WatchEvent,
    identity: &str,
) -> Result<Vec<IntentKey>, SyncError> {
    if event.kind != WatchedKind::Intent {
        return requests_for_event(store, event, identity);
    }
    match store.get_intent(&event.key) {
        Ok(intent) if needs_pass(&intent) => Ok(vec![event.key.clone()]),
        Ok(_) => Ok(Vec::new()),
        Err(e) if e.is_not_found() => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

fn needs_pass(intent: &Intent) -> bool {
    intent.metadata.is_deleting()
        || !intent.has_finalizer()
        || intent.status.observed_generation != intent.metadata.generation
}

fn classify_path(store: &FsStore, watched_root: &Path, path: &Path) -> Option<WatchEvent> {
    match path.strip_prefix(watched_root) {
        Ok(rel) => store.event_for_path(&store.namespaces_dir().join(rel)),
        Err(_) => store.event_for_path(path),
    }
}

/// Watch every directory under `root`; returns the newly watched ones.
fn register_tree(
    watcher: &mut RecommendedWatcher,
    watched_dirs: &mut HashSet<PathBuf>,
    root: &Path,
) -> Result<Vec<PathBuf>, DaemonError> {
    let mut added = Vec::new();
    for dir in collect_dirs(root)? {
        let canonical = match fs::canonicalize(&dir) {
            Ok(path) => path,
            Err(err) if err.kind() == ErrorKind::NotFound => continue,
            Err(err) => return Err(io_err(&dir, err)),
        };
        if watched_dirs.insert(canonical.clone()) {
            watcher.watch(&canonical, RecursiveMode::NonRecursive)?;
            tracing::debug!(path = %canonical.display(), "watching store directory");
            added.push(canonical);
        }
    }
    Ok(added)
}

fn collect_dirs(root: &Path) -> Result<Vec<PathBuf>, DaemonError> {
    let mut dirs = vec![root.to_path_buf()];
    let mut cursor = 0;
    while cursor < dirs.len() {
        let current = dirs[cursor].clone();
        cursor += 1;
        let entries = match fs::read_dir(&current) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => continue,
            Err(err) => return Err(io_err(&current, err)),
        };
        for entry in entries {
            let entry = entry.map_err(|e| io_err(&current, e))?;
            let ty = entry.file_type().map_err(|e| io_err(entry.path(), e))?;
            if ty.is_dir() {
                dirs.push(entry.path());
            }
        }
    }
    dirs.sort();
    dirs.dedup();
    Ok(dirs)
}

/// Files already present in a directory that was not watched until now.
fn yaml_files_in(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.extension().and_then(|ext| ext.to_str()) == Some("yaml"))
        .collect();
    files.sort();
    files
}

fn is_relevant_event_kind(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

fn directory_to_watch(path: &Path) -> Option<PathBuf> {
    if path.is_dir() {
        Some(path.to_path_buf())
    } else {
        path.parent().map(Path::to_path_buf)
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// The single worker: queued intent keys and socket-requested runs are
/// processed one at a time, so no intent ever has two passes in flight.
async fn worker_task(
    shared: Shared,
    mut job_rx: mpsc::Receiver<ReconcileJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let cancel = Cancellation::new();
    let reconciler = Reconciler::new(shared.store.clone(), shared.config.clone());

    // Abort an in-flight pass as soon as shutdown is requested.
    let mut cancel_rx = shutdown_rx.resubscribe();
    let canceller = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let _ = cancel_rx.recv().await;
            cancel.cancel();
        })
    };

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            maybe_job = job_rx.recv() => {
                let Some(job) = maybe_job else { break };
                let outcome = run_job(&shared, job.scope, &cancel).await;
                let _ = job.respond_to.send(outcome);
            }
            key = shared.queue.next() => {
                let started = Instant::now();
                let pass = {
                    let reconciler = reconciler.clone();
                    let cancel = cancel.clone();
                    let key = key.clone();
                    tokio::task::spawn_blocking(move || {
                        let result = reconciler.reconcile_with_retry(&key, &cancel);
                        let ready = is_ready(reconciler.store(), &key);
                        (result, ready)
                    })
                    .await
                };
                let (result, ready) = match pass {
                    Ok(pass) => pass,
                    Err(err) => {
                        shared.queue.done(&key);
                        return Err(DaemonError::Protocol(format!("reconcile task join error: {err}")));
                    }
                };
                tracing::debug!(
                    intent = %key,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "pass finished",
                );
                record(&shared.log, &key, ready, result.as_ref().err()).await;
                settle(&shared.queue, &key, &result);
            }
        }
    }

    canceller.abort();
    Ok(())
}

/// Feed a pass result back into the queue.
fn settle(queue: &WorkQueue, key: &IntentKey, result: &Result<ReconcileAction, SyncError>) {
    match result {
        Ok(ReconcileAction::Done) => queue.forget(key),
        Ok(ReconcileAction::Requeue) => {
            queue.forget(key);
            queue.add(key.clone());
        }
        Ok(ReconcileAction::RequeueAfter(delay)) => {
            queue.forget(key);
            queue.add_after(key.clone(), *delay);
        }
        Err(SyncError::Cancelled) => {
            tracing::info!(intent = %key, "pass cancelled");
        }
        Err(err) => {
            let delay = queue.add_rate_limited(key.clone());
            tracing::warn!(
                intent = %key,
                error = %err,
                retry_in_ms = delay.as_millis() as u64,
                "reconcile failed",
            );
        }
    }
    queue.done(key);
}

async fn run_job(
    shared: &Shared,
    scope: ReconcileScope,
    cancel: &Cancellation,
) -> Result<RunSummary, String> {
    let started = Instant::now();
    let label = scope_label(&scope);
    let summaries = {
        let store = shared.store.clone();
        let config = shared.config.clone();
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || pipeline::run(store, &config, scope, &cancel))
            .await
            .map_err(|err| format!("reconcile task join error: {err}"))?
            .map_err(|err| err.to_string())?
    };

    let mut intents = Vec::with_capacity(summaries.len());
    for summary in summaries {
        record(&shared.log, &summary.intent, summary.ready, summary.result.as_ref().err()).await;
        intents.push(outcome_of(summary));
    }
    tracing::info!(
        scope = %label,
        intents = intents.len(),
        duration_ms = started.elapsed().as_millis() as u64,
        "requested reconcile completed",
    );
    Ok(RunSummary {
        scope: label,
        intents,
        duration_ms: started.elapsed().as_millis(),
    })
}

fn outcome_of(summary: ReconcileSummary) -> IntentOutcome {
    let (action, error) = match summary.result {
        Ok(action) => (Some(action_label(action)), None),
        Err(err) => (None, Some(err.to_string())),
    };
    IntentOutcome {
        intent: summary.intent.to_string(),
        ready: summary.ready,
        action,
        error,
    }
}

fn action_label(action: ReconcileAction) -> String {
    match action {
        ReconcileAction::Done => "done".to_string(),
        ReconcileAction::Requeue => "requeue".to_string(),
        ReconcileAction::RequeueAfter(delay) => format!("requeue after {}s", delay.as_secs()),
    }
}

fn scope_label(scope: &ReconcileScope) -> String {
    match scope {
        ReconcileScope::All => "all".to_string(),
        ReconcileScope::Namespace(ns) => format!("namespace {ns}"),
        ReconcileScope::Intent(key) => key.to_string(),
    }
}

fn is_ready(store: &dyn ObjectStore, key: &IntentKey) -> bool {
    store
        .get_intent(key)
        .map(|intent| is_condition_true(&intent.status, CONDITION_READY))
        .unwrap_or(false)
}

async fn record(
    log: &RwLock<ReconcileLog>,
    key: &IntentKey,
    ready: bool,
    error: Option<&SyncError>,
) {
    if matches!(error, Some(SyncError::Cancelled)) {
        return;
    }
    log.write().await.insert(
        key.to_string(),
        IntentRecord {
            last_reconcile_at_unix: unix_seconds_now(),
            ready,
            error: error.map(ToString::to_string),
        },
    );
}

// ---------------------------------------------------------------------------
// Resync
// ---------------------------------------------------------------------------

/// Queue every intent at startup and again on each resync tick.
async fn resync_task(
    shared: Shared,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    enqueue_all(&shared).await;

    let Some(period) = shared.config.resync_interval() else {
        let _ = shutdown_rx.recv().await;
        return Ok(());
    };
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    interval.tick().await; // the first tick is immediate; startup already queued everything

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                tracing::debug!("periodic resync");
                enqueue_all(&shared).await;
            }
        }
    }
    Ok(())
}

async fn enqueue_all(shared: &Shared) {
    let store = shared.store.clone();
    match tokio::task::spawn_blocking(move || all_intents(store.as_ref())).await {
        Ok(Ok(keys)) => {
            for key in keys {
                shared.queue.add(key);
            }
        }
        Ok(Err(err)) => tracing::warn!(error = %err, "listing intents for resync failed"),
        Err(err) => tracing::error!(error = %err, "resync task join failure"),
    }
}

// ---------------------------------------------------------------------------
// Socket server
// ---------------------------------------------------------------------------

async fn socket_server_task(
    home: PathBuf,
    shared: Shared,
    job_tx: mpsc::Sender<ReconcileJob>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
    started_at_unix: u64,
) -> Result<(), DaemonError> {
    let socket = socket_path(&home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let shared = shared.clone();
                let job_tx = job_tx.clone();
                let shutdown_tx = shutdown_tx.clone();
                let home = home.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(
                        stream,
                        home,
                        shared,
                        job_tx,
                        shutdown_tx,
                        started_at_unix,
                    ).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    home: PathBuf,
    shared: Shared,
    job_tx: mpsc::Sender<ReconcileJob>,
    shutdown_tx: broadcast::Sender<()>,
    started_at_unix: u64,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request: DaemonRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request: {err}")),
                )
                .await?;
                continue;
            }
        };

        let stop = request == DaemonRequest::Stop;
        let response = match request {
            DaemonRequest::Status => {
                DaemonResponse::ok(build_status_payload(&home, &shared, started_at_unix).await)
            }
            DaemonRequest::Reconcile { intent } => match parse_scope(intent.as_deref()) {
                Ok(scope) => match enqueue_job(&job_tx, scope).await {
                    Ok(summary) => DaemonResponse::ok(json!(summary)),
                    Err(err) => DaemonResponse::error(err.to_string()),
                },
                Err(message) => DaemonResponse::error(message),
            },
            DaemonRequest::Stop => {
                let _ = shutdown_tx.send(());
                DaemonResponse::ok(json!({ "stopping": true }))
            }
        };

        write_response(&mut writer, &response).await?;
        if stop {
            break;
        }
    }

    Ok(())
}

fn parse_scope(intent: Option<&str>) -> Result<ReconcileScope, String> {
    match intent {
        None => Ok(ReconcileScope::All),
        Some(raw) => raw.parse::<IntentKey>().map(ReconcileScope::Intent),
    }
}

async fn enqueue_job(
    job_tx: &mpsc::Sender<ReconcileJob>,
    scope: ReconcileScope,
) -> Result<RunSummary, DaemonError> {
    let (tx, rx) = oneshot::channel();
    job_tx
        .send(ReconcileJob {
            scope,
            respond_to: tx,
        })
        .await
        .map_err(|_| DaemonError::ChannelClosed("reconcile queue"))?;

    let outcome = rx
        .await
        .map_err(|_| DaemonError::ChannelClosed("reconcile response"))?;
    outcome.map_err(DaemonError::Protocol)
}

async fn build_status_payload(home: &Path, shared: &Shared, started_at_unix: u64) -> Value {
    let snapshot: ReconcileLog = shared.log.read().await.clone();

    let intents: Vec<Value> = snapshot
        .iter()
        .map(|(intent, record)| {
            json!({
                "intent": intent,
                "last_reconcile_at_unix": record.last_reconcile_at_unix,
                "ready": record.ready,
                "error": record.error,
            })
        })
        .collect();

    let last_reconcile_at_unix = snapshot
        .values()
        .map(|record| record.last_reconcile_at_unix)
        .max()
        .unwrap_or(0);

    json!({
        "running": true,
        "identity": shared.config.identity,
        "started_at_unix": started_at_unix,
        "last_reconcile_at_unix": last_reconcile_at_unix,
        "queued": shared.queue.len(),
        "intents": intents,
        "socket": socket_path(home).display().to_string(),
        "store_root": kvmirror_root(home).display().to_string(),
    })
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    let namespaces = namespaces_root(home);
    if !namespaces.exists() {
        fs::create_dir_all(&namespaces).map_err(|e| io_err(&namespaces, e))?;
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}
