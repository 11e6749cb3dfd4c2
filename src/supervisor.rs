//! Process supervision: each declared function runs as a child process owning
//! a call-protocol listener on an ephemeral port. The supervisor brings one
//! up, health-checks it until ready, relays its output, watches its handler
//! executable for rebuilds, and tears it down.

use std::{
    io,
    process::Stdio,
    sync::atomic::{AtomicBool, Ordering},
    sync::Arc,
    time::{Duration, Instant, SystemTime},
};

use nanoid::nanoid;
use thiserror::Error;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::{Child, Command},
    sync::{mpsc, Mutex},
};
use tracing::{error, info, warn};

use crate::{
    data_model::{ErrorRecord, FunctionDefinition, InvokeRequest, InvokeResponse},
    protocol::{Client, TransportError, PORT_ENV},
};

/// How often the readiness probe pings a starting process.
pub const PING_INTERVAL: Duration = Duration::from_millis(50);

/// How long a starting process gets to answer its first ping.
pub const STARTUP_TIMEOUT: Duration = Duration::from_secs(10);

/// How often the watcher stats the handler executable and checks the child.
pub const WATCH_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum StartError {
    #[error("function {function}: failed to reserve a local port: {source}")]
    ReservePort {
        function: String,
        #[source]
        source: io::Error,
    },
    #[error("function {function}: failed to launch {handler}: {source}")]
    Launch {
        function: String,
        handler: String,
        #[source]
        source: io::Error,
    },
    #[error("function {function}: no successful ping within {timeout:?}")]
    StartupTimeout { function: String, timeout: Duration },
}

#[derive(Debug, Error)]
pub enum StopError {
    #[error("function {function}: failed to kill process: {source}")]
    Kill {
        function: String,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum InvokeError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("function {function}: call rejected: {record}")]
    Rejected { function: String, record: ErrorRecord },
}

/// One running (or stopped) execution of a function definition.
///
/// An instance is never restarted in place: a reload constructs a brand-new
/// instance on a freshly reserved port, and this one is only ever stopped.
#[derive(Debug)]
pub struct FunctionProcess {
    definition: FunctionDefinition,
    instance_id: String,
    port: u16,
    child: Mutex<Child>,
    handler_mtime: SystemTime,
    stopped: AtomicBool,
    notifier: mpsc::Sender<String>,
}

impl FunctionProcess {
    /// Launches the handler executable and waits for it to become ready.
    ///
    /// The reserved port travels to the child in `TRIVET_SERVER_PORT`; the
    /// child must open its call-protocol listener there. Readiness is the
    /// first successful ping; if none lands within [`STARTUP_TIMEOUT`] the
    /// child is killed and the start fails.
    pub async fn start(
        definition: FunctionDefinition,
        notifier: mpsc::Sender<String>,
    ) -> Result<Arc<FunctionProcess>, StartError> {
        let name = definition.name.clone();
        let port = reserve_port().map_err(|source| StartError::ReservePort {
            function: name.clone(),
            source,
        })?;

        let mut child = Command::new(&definition.handler)
            .env(PORT_ENV, port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| StartError::Launch {
                function: name.clone(),
                handler: definition.handler.display().to_string(),
                source,
            })?;

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output(name.clone(), "stdout", stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(name.clone(), "stderr", stderr));
        }

        let deadline = Instant::now() + STARTUP_TIMEOUT;
        let mut ready = false;
        while Instant::now() < deadline {
            if ping(&name, port).await {
                ready = true;
                break;
            }
            tokio::time::sleep(PING_INTERVAL).await;
        }
        if !ready {
            if let Err(err) = child.kill().await {
                warn!(function = %name, error = %err, "failed to kill unready process");
            }
            return Err(StartError::StartupTimeout {
                function: name,
                timeout: STARTUP_TIMEOUT,
            });
        }

        // Baseline for rebuild detection. The handler was just executed, so
        // a stat failure here only costs us the watch, not the start.
        let handler_mtime = tokio::fs::metadata(&definition.handler)
            .await
            .and_then(|metadata| metadata.modified())
            .unwrap_or_else(|_| SystemTime::now());

        let instance = Arc::new(FunctionProcess {
            instance_id: nanoid!(),
            port,
            child: Mutex::new(child),
            handler_mtime,
            stopped: AtomicBool::new(false),
            notifier,
            definition,
        });
        info!(
            function = %name,
            instance = %instance.instance_id,
            port,
            "started"
        );

        tokio::spawn(watch(instance.clone()));
        Ok(instance)
    }

    pub fn definition(&self) -> &FunctionDefinition {
        &self.definition
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Force-terminates the process and signals the restart notifier.
    ///
    /// Calling this on an already-stopped instance, or on one whose process
    /// exited on its own, is a no-op rather than an error.
    pub async fn stop(&self) -> Result<(), StopError> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let result = {
            let mut child = self.child.lock().await;
            match child.try_wait() {
                Ok(Some(_)) => Ok(()),
                _ => child.kill().await.map_err(|source| StopError::Kill {
                    function: self.definition.name.clone(),
                    source,
                }),
            }
        };
        info!(
            function = %self.definition.name,
            instance = %self.instance_id,
            "stopped"
        );
        self.notify_restart();
        result
    }

    /// One invocation round trip against this instance.
    ///
    /// Every call opens its own connection, so concurrent invokes against the
    /// same instance never share calling-side state.
    pub async fn invoke(&self, request: InvokeRequest) -> Result<InvokeResponse, InvokeError> {
        let started = Instant::now();
        let request_id = request.request_id.clone();

        let mut client = Client::connect(&format!("127.0.0.1:{}", self.port)).await?;
        let reply = client.invoke(&self.definition.name, request).await?;

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        info!(
            function = %self.definition.name,
            request_id = %request_id,
            elapsed_ms,
            "invoke"
        );

        reply.map_err(|record| InvokeError::Rejected {
            function: self.definition.name.clone(),
            record,
        })
    }

    fn notify_restart(&self) {
        // Bounded and never awaited: a producer must not wedge behind a busy
        // or already-departed restart loop.
        if let Err(err) = self.notifier.try_send(self.definition.name.clone()) {
            warn!(function = %self.definition.name, error = %err, "restart notification dropped");
        }
    }
}

/// Watches one instance for its whole lifetime: a rebuilt handler executable
/// or an unexpected process exit stops the instance, which in turn feeds the
/// restart loop. Ends as soon as the instance is stopped by any path.
async fn watch(instance: Arc<FunctionProcess>) {
    loop {
        tokio::time::sleep(WATCH_INTERVAL).await;
        if instance.is_stopped() {
            return;
        }

        let exited = {
            let mut child = instance.child.lock().await;
            matches!(child.try_wait(), Ok(Some(_)))
        };
        if exited {
            // The stopped flag is swapped exactly once per instance, so a
            // crash racing a concurrent stop() emits a single notification.
            if !instance.stopped.swap(true, Ordering::SeqCst) {
                warn!(
                    function = %instance.definition.name,
                    instance = %instance.instance_id,
                    "process exited unexpectedly"
                );
                instance.notify_restart();
            }
            return;
        }

        let metadata = match tokio::fs::metadata(&instance.definition.handler).await {
            Ok(metadata) => metadata,
            Err(err) => {
                // The handler existed when we launched it; losing it is fatal
                // to this watch but not to the runtime.
                error!(
                    function = %instance.definition.name,
                    error = %err,
                    "failed to stat handler, abandoning watch"
                );
                return;
            }
        };
        let modified = metadata.modified().unwrap_or(instance.handler_mtime);
        if modified > instance.handler_mtime {
            info!(function = %instance.definition.name, "handler changed, stopping");
            if let Err(err) = instance.stop().await {
                error!(
                    function = %instance.definition.name,
                    error = %err,
                    "stop after handler change failed"
                );
            }
            return;
        }
    }
}

async fn forward_output<R>(function: String, stream: &'static str, output: R)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(output).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        info!(function = %function, stream, "{line}");
    }
}

async fn ping(function: &str, port: u16) -> bool {
    let Ok(mut client) = Client::connect(&format!("127.0.0.1:{port}")).await else {
        return false;
    };
    matches!(client.ping(function).await, Ok(Ok(_)))
}

/// Reserves a free ephemeral port by binding and immediately releasing a
/// listener on port 0. The port stays exclusively the new instance's for its
/// lifetime; every start reserves a fresh one.
fn reserve_port() -> io::Result<u16> {
    let listener = std::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}
