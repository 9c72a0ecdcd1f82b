use std::fs;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Semaphore};

use meco_core::{Outcome, Processor};

use crate::error::{io_err, DaemonError};
use crate::liveness::{self, LivenessStore, PidFile};
use crate::paths::{MecoConfig, MAX_REQUEST_BYTES, MAX_WORKERS, SHUTDOWN_GRACE};
use crate::protocol::{echo_message, EchoReply, MecoRequest, MecoResponse};

/// State shared by every connection.
#[derive(Clone)]
pub struct Service {
    processor: Arc<Processor>,
    workers: Arc<Semaphore>,
    max_request_bytes: usize,
}

impl Service {
    pub fn new(processor: Processor, max_workers: usize) -> Self {
        Self {
            processor: Arc::new(processor),
            workers: Arc::new(Semaphore::new(max_workers)),
            max_request_bytes: MAX_REQUEST_BYTES,
        }
    }

    /// Longest accepted request line, newline excluded.
    pub fn with_max_request_bytes(mut self, limit: usize) -> Self {
        self.max_request_bytes = limit;
        self
    }

    /// Answer one request line. Always produces a response.
    pub async fn dispatch(&self, line: &str) -> MecoResponse {
        let request = match serde_json::from_str::<MecoRequest>(line) {
            Ok(request) => request,
            Err(err) => {
                tracing::warn!(error = %err, "undecodable request");
                return MecoResponse::Outcome(Outcome::fail(format!("Invalid request: {err}")));
            }
        };

        match request {
            MecoRequest::Echo { message } => {
                tracing::info!(%message, "echo received");
                MecoResponse::Echo(EchoReply {
                    message: echo_message(&message),
                })
            }
            MecoRequest::Start(descriptor) => {
                // Requests beyond MAX_WORKERS wait here for a permit.
                let Ok(_permit) = self.workers.acquire().await else {
                    return MecoResponse::Outcome(Outcome::unexpected("service is shutting down"));
                };
                let processor = self.processor.clone();
                let outcome = tokio::task::spawn_blocking(move || processor.handle(&descriptor))
                    .await
                    .unwrap_or_else(|err| {
                        tracing::error!(error = %err, "request worker failed");
                        Outcome::unexpected(err)
                    });
                MecoResponse::Outcome(outcome)
            }
        }
    }

    /// Wait until no request holds a worker, or `grace` elapses.
    async fn drain(&self, grace: Duration) {
        let permits = u32::try_from(MAX_WORKERS).unwrap_or(u32::MAX);
        match tokio::time::timeout(grace, self.workers.acquire_many(permits)).await {
            Ok(Ok(_all)) => tracing::debug!("in-flight requests drained"),
            Ok(Err(_)) => {}
            Err(_) => tracing::warn!(
                grace_secs = grace.as_secs(),
                "in-flight requests still running at shutdown"
            ),
        }
    }
}

/// Start the service runtime and block the current thread until it exits.
pub fn serve_blocking(config: &MecoConfig) -> Result<(), DaemonError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(config.clone()))
}

/// Run the service until SIGINT / SIGTERM.
pub async fn run(config: MecoConfig) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&config)?;

    // Armed before the endpoint is reachable, so a stop that races startup
    // still runs the cleanup below.
    let signals = ShutdownSignals::install()?;

    let listener = TcpListener::bind(config.addr)
        .await
        .map_err(|e| io_err(config.addr.to_string(), e))?;

    let record = PidFile::new(config.pid_file());
    let pid = std::process::id();
    record.write(pid)?;
    tracing::info!(
        pid,
        addr = %config.addr,
        storage = %config.storage_dir().display(),
        "meco service started",
    );

    let service = Service::new(Processor::new(config.storage_dir()), MAX_WORKERS);
    let (shutdown_tx, _) = broadcast::channel::<()>(4);

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        let mut shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            let mut signals = signals;
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = signals.recv() => {
                    let result = signal.map(|name| {
                        tracing::warn!(signal = name, "shutting down meco service");
                    });
                    let _ = shutdown.send(());
                    result
                }
            }
        })
    };

    let rotation_handle = {
        let shutdown_rx = shutdown_tx.subscribe();
        let runtime_dir = config.runtime_dir.clone();
        tokio::spawn(log_rotation_task(runtime_dir, shutdown_rx))
    };

    let serve_result = accept_loop(listener, service.clone(), shutdown_tx.subscribe()).await;
    let _ = shutdown_tx.send(());

    service.drain(SHUTDOWN_GRACE).await;

    match liveness::remove_if_owned(&record, pid) {
        Ok(true) => tracing::info!(pid, "PID record removed"),
        Ok(false) => tracing::debug!(pid, "PID record owned by another instance; left in place"),
        Err(err) => tracing::warn!(error = %err, "failed to remove PID record"),
    }

    let (signal_result, rotation_result) = tokio::join!(signal_handle, rotation_handle);
    serve_result?;
    handle_join("signal_handler", signal_result)?;
    handle_join("log_rotation", rotation_result)?;
    tracing::info!("meco service stopped");
    Ok(())
}

/// Accept connections until shutdown; each connection gets its own task.
pub async fn accept_loop(
    listener: TcpListener,
    service: Service,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        tracing::warn!(error = %err, "accept failed");
                        continue;
                    }
                };
                let service = service.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_client(stream, peer, service).await {
                        tracing::error!(%peer, error = %err, "client connection error");
                    }
                });
            }
        }
    }
    Ok(())
}

async fn handle_client(stream: TcpStream, peer: SocketAddr, service: Service) -> Result<(), DaemonError> {
    tracing::debug!(%peer, "client connected");
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let limit = service.max_request_bytes;
    let mut line = Vec::new();

    loop {
        line.clear();
        // One byte past the limit is enough to tell an oversized line apart.
        let read = (&mut reader)
            .take(u64::try_from(limit).unwrap_or(u64::MAX).saturating_add(1))
            .read_until(b'\n', &mut line)
            .await
            .map_err(|e| io_err(peer.to_string(), e))?;
        if read == 0 {
            break;
        }
        if line.last() != Some(&b'\n') && line.len() > limit {
            tracing::warn!(%peer, limit, "request line too long; discarding it");
            skip_line(&mut reader)
                .await
                .map_err(|e| io_err(peer.to_string(), e))?;
            let response = MecoResponse::Outcome(Outcome::fail(format!(
                "Invalid request: request line exceeds {limit} bytes"
            )));
            write_response(&mut writer, peer, &response).await?;
            continue;
        }

        let Ok(text) = std::str::from_utf8(&line) else {
            let response = MecoResponse::Outcome(Outcome::fail("Invalid request: not UTF-8 text"));
            write_response(&mut writer, peer, &response).await?;
            continue;
        };
        let request = text.trim();
        if request.is_empty() {
            continue;
        }
        let response = service.dispatch(request).await;
        write_response(&mut writer, peer, &response).await?;
    }

    Ok(())
}

/// Consume input up to and including the next newline without buffering it.
async fn skip_line<R>(reader: &mut R) -> std::io::Result<()>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    loop {
        let buf = reader.fill_buf().await?;
        if buf.is_empty() {
            return Ok(());
        }
        match buf.iter().position(|b| *b == b'\n') {
            Some(pos) => {
                reader.consume(pos + 1);
                return Ok(());
            }
            None => {
                let len = buf.len();
                reader.consume(len);
            }
        }
    }
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    peer: SocketAddr,
    response: &MecoResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err(peer.to_string(), e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err(peer.to_string(), e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err(peer.to_string(), e))?;
    Ok(())
}

/// SIGINT / SIGTERM listeners registered up front.
#[cfg(unix)]
struct ShutdownSignals {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl ShutdownSignals {
    fn install() -> Result<Self, DaemonError> {
        use tokio::signal::unix::{signal, SignalKind};

        let interrupt = signal(SignalKind::interrupt())
            .map_err(|e| DaemonError::Protocol(format!("SIGINT handler failed: {e}")))?;
        let terminate = signal(SignalKind::terminate())
            .map_err(|e| DaemonError::Protocol(format!("SIGTERM handler failed: {e}")))?;
        Ok(Self {
            interrupt,
            terminate,
        })
    }

    async fn recv(&mut self) -> Result<&'static str, DaemonError> {
        tokio::select! {
            _ = self.interrupt.recv() => Ok("SIGINT"),
            _ = self.terminate.recv() => Ok("SIGTERM"),
        }
    }
}

#[cfg(not(unix))]
struct ShutdownSignals;

#[cfg(not(unix))]
impl ShutdownSignals {
    fn install() -> Result<Self, DaemonError> {
        Ok(Self)
    }

    async fn recv(&mut self) -> Result<&'static str, DaemonError> {
        tokio::signal::ctrl_c()
            .await
            .map(|()| "ctrl-c")
            .map_err(|e| DaemonError::Protocol(format!("ctrl-c handler failed: {e}")))
    }
}

async fn log_rotation_task(
    runtime_dir: std::path::PathBuf,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut interval = tokio::time::interval(Duration::from_secs(5));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                let runtime_dir = runtime_dir.clone();
                tokio::task::spawn_blocking(move || {
                    crate::log_rotation::rotate_logs(&runtime_dir);
                })
                .await
                .ok();
            }
        }
    }
    Ok(())
}

fn ensure_runtime_dirs(config: &MecoConfig) -> Result<(), DaemonError> {
    for dir in [config.runtime_dir.clone(), config.storage_dir(), config.logs_dir()] {
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        }
    }
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tempfile::TempDir;

    fn service(root: &TempDir) -> Service {
        Service::new(Processor::new(root.path().join("uploads")), MAX_WORKERS)
    }

    async fn dispatch_json(service: &Service, request: Value) -> Value {
        let response = service.dispatch(&request.to_string()).await;
        serde_json::to_value(response).expect("encode response")
    }

    #[tokio::test]
    async fn echo_uses_fixed_template() {
        let root = TempDir::new().expect("tempdir");
        let response = dispatch_json(&service(&root), json!({"op": "echo", "message": "hi"})).await;
        assert_eq!(response, json!({"message": "Hello from M-E-C-O! You said: hi"}));
    }

    #[tokio::test]
    async fn start_without_payload_fails() {
        let root = TempDir::new().expect("tempdir");
        let response = dispatch_json(&service(&root), json!({"op": "start"})).await;
        assert_eq!(
            response,
            json!({"success": false, "message": "No file_path or file_content provided."})
        );
    }

    #[tokio::test]
    async fn start_with_inline_content_persists() {
        let root = TempDir::new().expect("tempdir");
        let response = dispatch_json(
            &service(&root),
            json!({"op": "start", "file_content": "{\"a\":1}", "save_as": "x"}),
        )
        .await;
        assert_eq!(response["success"], json!(true));
        assert!(root.path().join("uploads").join("x.yaml").is_file());
    }

    #[tokio::test]
    async fn malformed_lines_get_a_failure_outcome() {
        let root = TempDir::new().expect("tempdir");
        let service = service(&root);

        for line in ["{not json", r#"{"op":"launch"}"#, r#"{"op":"start","file_path":"/a","file_content":"{}"}"#] {
            let response = serde_json::to_value(service.dispatch(line).await).expect("encode");
            assert_eq!(response["success"], json!(false), "line: {line}");
            let message = response["message"].as_str().expect("message");
            assert!(message.starts_with("Invalid request: "), "got: {message}");
        }
    }

    #[tokio::test]
    async fn closed_worker_pool_reports_unexpected_error() {
        let root = TempDir::new().expect("tempdir");
        let service = service(&root);
        service.workers.close();

        let response =
            dispatch_json(&service, json!({"op": "start", "file_content": "{}"})).await;
        assert_eq!(response["success"], json!(false));
        assert_eq!(
            response["message"],
            json!("An unexpected error occurred: service is shutting down")
        );
    }

    #[tokio::test]
    async fn tcp_round_trip_over_loopback() {
        let root = TempDir::new().expect("tempdir");
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
        let server = tokio::spawn(accept_loop(listener, service(&root), shutdown_rx));

        let stream = TcpStream::connect(addr).await.expect("connect");
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        writer
            .write_all(b"{\"op\":\"echo\",\"message\":\"ping\"}\n\n{\"op\":\"start\",\"file_content\":\"nope\"}\n")
            .await
            .expect("write");

        let first: Value =
            serde_json::from_str(&lines.next_line().await.expect("read").expect("line")).expect("json");
        assert_eq!(first["message"], json!("Hello from M-E-C-O! You said: ping"));

        let second: Value =
            serde_json::from_str(&lines.next_line().await.expect("read").expect("line")).expect("json");
        assert_eq!(
            second,
            json!({"success": false, "message": "Error: Invalid JSON syntax."})
        );

        shutdown_tx.send(()).expect("shutdown");
        server.await.expect("join").expect("accept loop");
    }

    #[tokio::test]
    async fn oversized_request_line_is_refused() {
        let root = TempDir::new().expect("tempdir");
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
        let service = service(&root).with_max_request_bytes(64);
        let server = tokio::spawn(accept_loop(listener, service, shutdown_rx));

        let stream = TcpStream::connect(addr).await.expect("connect");
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        writer
            .write_all(b"{\"op\":\"echo\",\"message\":\"ok\"}\n")
            .await
            .expect("write short");
        let first: Value =
            serde_json::from_str(&lines.next_line().await.expect("read").expect("line")).expect("json");
        assert_eq!(first["message"], json!("Hello from M-E-C-O! You said: ok"));

        let long = format!("{{\"op\":\"echo\",\"message\":\"{}\"}}\n", "x".repeat(500));
        writer.write_all(long.as_bytes()).await.expect("write long");
        let refused: Value =
            serde_json::from_str(&lines.next_line().await.expect("read").expect("line")).expect("json");
        assert_eq!(
            refused,
            json!({"success": false, "message": "Invalid request: request line exceeds 64 bytes"})
        );

        writer
            .write_all(b"{\"op\":\"echo\",\"message\":\"again\"}\n")
            .await
            .expect("write after refusal");
        let after: Value =
            serde_json::from_str(&lines.next_line().await.expect("read").expect("line")).expect("json");
        assert_eq!(after["message"], json!("Hello from M-E-C-O! You said: again"));

        shutdown_tx.send(()).expect("shutdown");
        server.await.expect("join").expect("accept loop");
    }

    #[tokio::test]
    async fn blocking_client_talks_to_service() {
        let root = TempDir::new().expect("tempdir");
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
        let server = tokio::spawn(accept_loop(listener, service(&root), shutdown_rx));

        let config = MecoConfig::new(root.path(), port);
        let outcome = tokio::task::spawn_blocking(move || {
            crate::protocol::request_start(
                &config,
                meco_core::ResourceDescriptor::from_content("{\"a\":1}")
                    .save_as("x")
                    .dry_run(true),
            )
        })
        .await
        .expect("join")
        .expect("request");

        assert!(outcome.success);
        assert!(outcome.message.contains("(dry run)"));

        shutdown_tx.send(()).expect("shutdown");
        server.await.expect("join").expect("accept loop");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stop_signal_before_waiting_is_not_lost() {
        use nix::sys::signal::{raise, Signal};

        let mut signals = ShutdownSignals::install().expect("install handlers");
        raise(Signal::SIGTERM).expect("raise SIGTERM");

        let name = tokio::time::timeout(Duration::from_secs(5), signals.recv())
            .await
            .expect("signal delivered")
            .expect("signal stream");
        assert_eq!(name, "SIGTERM");
    }

    #[tokio::test]
    async fn drain_returns_once_workers_are_idle() {
        let root = TempDir::new().expect("tempdir");
        let service = service(&root);
        tokio::time::timeout(Duration::from_secs(1), service.drain(Duration::from_secs(5)))
            .await
            .expect("idle pool drains immediately");
    }
}
