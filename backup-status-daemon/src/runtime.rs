use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;

use backup_status_core::FileAccessProvider;
use backup_status_store::{FileRefreshSignal, PreferencesStore, SharedDefaults, TokenStore};

use crate::config::DaemonConfig;
use crate::debounce::Debouncer;
use crate::error::{io_err, DaemonError};
use crate::gate::AccessGate;
use crate::orchestrator::{MonitorStatus, Orchestrator, RawChange};
use crate::paths::{app_root, socket_path, DAEMON_LABEL};
use crate::protocol::{DaemonRequest, DaemonResponse, CMD_STATUS, CMD_STOP, CMD_UPDATE_ACCESS};
use crate::watcher::{NotifyWatcher, Watcher};

/// Request routed from a socket client to the task that owns the orchestrator.
enum Control {
    Status(oneshot::Sender<MonitorStatus>),
    UpdateAccess(oneshot::Sender<MonitorStatus>),
}

/// Access gate over the shared namespace selected by `config`.
pub fn open_gate(home: &Path, config: &DaemonConfig) -> AccessGate {
    AccessGate::new(
        Arc::new(FileAccessProvider::new()),
        TokenStore::new(SharedDefaults::open(config.shared_dir_at(home))),
    )
}

/// Preferences store that posts refreshes through the shared signal file.
pub fn open_store(home: &Path, config: &DaemonConfig) -> PreferencesStore {
    let shared = config.shared_dir_at(home);
    PreferencesStore::new(
        SharedDefaults::open(shared.clone()),
        Box::new(FileRefreshSignal::in_dir(&shared)),
    )
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    let config = DaemonConfig::load_at(home)?;
    init_tracing(config.json_logs);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf(), config))
}

/// Run the daemon runtime.
pub async fn run(home: PathBuf, config: DaemonConfig) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home, &config)?;

    // Claim the socket before touching the store so a second daemon exits untouched.
    let socket = socket_path(&home);
    prepare_socket_for_bind(&socket)?;
    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "listening for control requests");

    let mut debouncer = Debouncer::new(config.cooldown());
    if !config.ignore_initial_event {
        debouncer = debouncer.accept_initial();
    }
    let (change_tx, change_rx) = mpsc::unbounded_channel::<RawChange>();
    let orchestrator = Orchestrator::new(
        open_gate(&home, &config),
        open_store(&home, &config),
        NotifyWatcher::new(),
        debouncer,
        change_tx,
    );

    let started_at_unix = unix_seconds_now();
    let (control_tx, control_rx) = mpsc::channel::<Control>(16);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    tracing::info!(
        home = %home.display(),
        cooldown_ms = config.cooldown_ms,
        "starting backup status daemon",
    );

    let processor_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            let result = processor_task(orchestrator, change_rx, control_rx, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        tokio::spawn(async move {
            let result = socket_server_task(
                listener,
                home,
                control_tx,
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
                        Err(err) => Err(DaemonError::Task {
                            task: "signal_handler",
                            reason: format!("ctrl-c handler failed: {err}"),
                        }),
                    }
                }
            }
        })
    };

    let (processor_result, socket_result, signal_result) =
        tokio::join!(processor_handle, socket_handle, signal_handle);

    handle_join("processor", processor_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

/// Sole owner of the orchestrator: raw changes and control requests are
/// handled one at a time, in arrival order.
async fn processor_task<W: Watcher + 'static>(
    mut orchestrator: Orchestrator<W>,
    mut change_rx: mpsc::UnboundedReceiver<RawChange>,
    mut control_rx: mpsc::Receiver<Control>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let state = orchestrator.init();
    tracing::info!(state = ?state, "monitor initialised");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            change = change_rx.recv() => {
                let Some(RawChange) = change else { break };
                orchestrator.on_raw_change(Instant::now());
            }
            control = control_rx.recv() => {
                let Some(control) = control else { break };
                match control {
                    Control::Status(respond_to) => {
                        let _ = respond_to.send(orchestrator.status());
                    }
                    Control::UpdateAccess(respond_to) => {
                        let state = orchestrator.update_access();
                        tracing::info!(state = ?state, "access re-queried");
                        let _ = respond_to.send(orchestrator.status());
                    }
                }
            }
        }
    }

    orchestrator.shutdown();
    Ok(())
}

async fn socket_server_task(
    listener: UnixListener,
    home: PathBuf,
    control_tx: mpsc::Sender<Control>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
    started_at_unix: u64,
) -> Result<(), DaemonError> {
    let socket = socket_path(&home);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let home = home.clone();
                let control_tx = control_tx.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(
                        stream,
                        home,
                        control_tx,
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
    control_tx: mpsc::Sender<Control>,
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
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let response = match request.cmd.as_str() {
            CMD_STATUS => match query(&control_tx, Control::Status).await {
                Ok(monitor) => DaemonResponse::ok(build_status_payload(&home, &monitor, started_at_unix)),
                Err(err) => DaemonResponse::error(err.to_string()),
            },
            CMD_UPDATE_ACCESS => match query(&control_tx, Control::UpdateAccess).await {
                Ok(monitor) => DaemonResponse::ok(json!(monitor)),
                Err(err) => DaemonResponse::error(err.to_string()),
            },
            CMD_STOP => {
                let _ = shutdown_tx.send(());
                DaemonResponse::ok(json!({ "stopping": true }))
            }
            other => DaemonResponse::error(format!("unknown command '{other}'")),
        };

        write_response(&mut writer, &response).await?;
        if request.cmd == CMD_STOP {
            break;
        }
    }

    Ok(())
}

async fn query(
    control_tx: &mpsc::Sender<Control>,
    make: fn(oneshot::Sender<MonitorStatus>) -> Control,
) -> Result<MonitorStatus, DaemonError> {
    let (tx, rx) = oneshot::channel();
    control_tx
        .send(make(tx))
        .await
        .map_err(|_| DaemonError::ChannelClosed("control queue"))?;
    rx.await
        .map_err(|_| DaemonError::ChannelClosed("control response"))
}

fn build_status_payload(home: &Path, monitor: &MonitorStatus, started_at_unix: u64) -> Value {
    json!({
        "running": true,
        "label": DAEMON_LABEL,
        "started_at_unix": started_at_unix,
        "socket": socket_path(home).display().to_string(),
        "monitor": monitor,
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

fn ensure_runtime_dirs(home: &Path, config: &DaemonConfig) -> Result<(), DaemonError> {
    for dir in [app_root(home), config.shared_dir_at(home)] {
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        }
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
    task: &'static str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Task {
            task,
            reason: format!("join failure: {err}"),
        }),
    }
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn init_tracing(json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = if json {
        fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .try_init()
    } else {
        fmt().with_env_filter(filter).with_target(false).try_init()
    };
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use backup_status_store::RecordingSignal;
    use plist::{Dictionary, Value as PlistValue};
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    use crate::orchestrator::MonitorState;
    use crate::watcher::ManualWatcher;

    fn write_prefs(path: &Path) {
        let mut dest = Dictionary::new();
        dest.insert("DestinationID".to_string(), PlistValue::from("D1"));
        let mut root = Dictionary::new();
        root.insert(
            "Destinations".to_string(),
            PlistValue::Array(vec![PlistValue::Dictionary(dest)]),
        );
        PlistValue::Dictionary(root).to_file_xml(path).unwrap();
    }

    fn manual_orchestrator(
        home: &Path,
        watcher: ManualWatcher,
    ) -> (Orchestrator<ManualWatcher>, mpsc::UnboundedReceiver<RawChange>) {
        let config = DaemonConfig::default();
        let (tx, rx) = mpsc::unbounded_channel();
        let store = PreferencesStore::new(
            SharedDefaults::open(config.shared_dir_at(home)),
            Box::new(RecordingSignal::new()),
        );
        let orchestrator = Orchestrator::new(
            open_gate(home, &config),
            store,
            watcher,
            Debouncer::new(Duration::from_millis(100)),
            tx,
        );
        (orchestrator, rx)
    }

    #[tokio::test]
    async fn processor_answers_control_requests_and_stops_on_shutdown() {
        let home = TempDir::new().unwrap();
        let prefs = home.path().join("prefs.plist");
        write_prefs(&prefs);

        let watcher = ManualWatcher::new();
        let (orchestrator, change_rx) = manual_orchestrator(home.path(), watcher.clone());
        let (control_tx, control_rx) = mpsc::channel(4);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(processor_task(orchestrator, change_rx, control_rx, shutdown_rx));

        let status = query(&control_tx, Control::Status).await.unwrap();
        assert_eq!(status.state, MonitorState::NoAccess);

        open_gate(home.path(), &DaemonConfig::default())
            .grant(&prefs)
            .unwrap();
        let status = query(&control_tx, Control::UpdateAccess).await.unwrap();
        assert_eq!(status.state, MonitorState::Watching);
        assert_eq!(status.destinations, 1);
        assert!(watcher.is_running());

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
        assert!(!watcher.is_running(), "shutdown detaches the watcher");
    }

    #[tokio::test]
    async fn socket_client_status_update_access_and_stop() {
        let home = TempDir::new().unwrap();
        let (control_tx, mut control_rx) = mpsc::channel::<Control>(8);
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);

        // Stand-in for the processor task.
        tokio::spawn(async move {
            while let Some(control) = control_rx.recv().await {
                let (respond_to, state) = match control {
                    Control::Status(tx) => (tx, MonitorState::NoAccess),
                    Control::UpdateAccess(tx) => (tx, MonitorState::Watching),
                };
                let _ = respond_to.send(MonitorStatus {
                    state,
                    has_access: state == MonitorState::Watching,
                    watched_path: None,
                    watcher_running: false,
                    destinations: 0,
                    publishes: 0,
                    last_published_at: None,
                    last_error: None,
                });
            }
        });

        let (mut client, server) = UnixStream::pair().unwrap();
        let server_task = tokio::spawn(handle_socket_client(
            server,
            home.path().to_path_buf(),
            control_tx,
            shutdown_tx,
            1_000_000,
        ));

        client
            .write_all(b"{\"cmd\":\"status\"}\n{\"cmd\":\"update-access\"}\nnot json\n{\"cmd\":\"bogus\"}\n{\"cmd\":\"stop\"}\n")
            .await
            .unwrap();
        let mut raw = String::new();
        client.read_to_string(&mut raw).await.unwrap();
        let responses: Vec<Value> = raw
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();

        assert_eq!(responses.len(), 5, "one response per request: {raw}");
        assert_eq!(responses[0]["ok"], json!(true));
        assert_eq!(responses[0]["data"]["started_at_unix"], json!(1_000_000u64));
        assert_eq!(responses[0]["data"]["monitor"]["state"], json!("no_access"));
        assert_eq!(responses[1]["data"]["state"], json!("watching"));
        assert_eq!(responses[2]["ok"], json!(false));
        assert!(responses[3]["error"].as_str().unwrap().contains("unknown command"));
        assert_eq!(responses[4]["data"]["stopping"], json!(true));

        shutdown_rx.recv().await.expect("shutdown signal");
        server_task.await.unwrap().unwrap();
    }

    #[test]
    fn stale_socket_is_removed_before_bind() {
        let home = TempDir::new().unwrap();
        let socket = home.path().join("daemon.sock");
        fs::write(&socket, b"").unwrap();
        prepare_socket_for_bind(&socket).unwrap();
        assert!(!socket.exists());
    }

    #[tokio::test]
    async fn live_socket_stops_second_daemon_before_store_is_touched() {
        let home = TempDir::new().unwrap();
        let config = DaemonConfig::default();
        let prefs = home.path().join("prefs.plist");
        write_prefs(&prefs);
        open_gate(home.path(), &config).grant(&prefs).unwrap();

        ensure_runtime_dirs(home.path(), &config).unwrap();
        let _running = std::os::unix::net::UnixListener::bind(socket_path(home.path())).unwrap();

        let err = run(home.path().to_path_buf(), config.clone()).await.unwrap_err();
        assert!(err.to_string().contains("already in use"), "got: {err}");
        assert!(
            open_store(home.path(), &config).load().is_none(),
            "the losing daemon must not publish"
        );
    }

    #[tokio::test]
    async fn panicked_task_is_reported_by_name() {
        let handle = tokio::spawn(async {
            if true {
                panic!("processor blew up");
            }
            Ok::<(), DaemonError>(())
        });
        let err = handle_join("processor", handle.await).unwrap_err();
        match err {
            DaemonError::Task { task, reason } => {
                assert_eq!(task, "processor");
                assert!(reason.contains("join failure"), "got: {reason}");
            }
            other => panic!("expected task error, got {other}"),
        }
    }

    #[test]
    fn status_payload_shape() {
        let home = TempDir::new().unwrap();
        let monitor = MonitorStatus {
            state: MonitorState::Stopped,
            has_access: false,
            watched_path: None,
            watcher_running: false,
            destinations: 0,
            publishes: 3,
            last_published_at: None,
            last_error: Some("boom".to_string()),
        };
        let payload = build_status_payload(home.path(), &monitor, 42);
        assert_eq!(payload["running"], json!(true));
        assert_eq!(payload["label"], json!(DAEMON_LABEL));
        assert_eq!(payload["monitor"]["state"], json!("stopped"));
        assert_eq!(payload["monitor"]["publishes"], json!(3));
        assert_eq!(payload["monitor"]["last_error"], json!("boom"));
    }
}
