//! Assembles the running service: boots every declared function, wires the
//! dispatcher's restart loop, and serves the call-protocol listener and the
//! HTTP gateway until interrupted.

use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use axum_server::Handle;
use tokio::{net::TcpListener, signal, sync::watch};
use tracing::info;

use crate::{
    config::Config,
    dispatcher::{Dispatcher, Invoker},
    gateway::{self, GatewayState},
    rpc,
    supervisor::FunctionProcess,
};

pub struct Service {
    config: Config,
    dispatcher: Arc<Dispatcher>,
    shutdown_tx: watch::Sender<()>,
    shutdown_rx: watch::Receiver<()>,
}

impl Service {
    pub fn new(config: Config) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        Self {
            config,
            dispatcher: Arc::new(Dispatcher::new()),
            shutdown_tx,
            shutdown_rx,
        }
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        self.dispatcher.clone()
    }

    /// Runs until a shutdown signal arrives. A function that fails to start
    /// at boot fails the whole serve; once up, individual failures only
    /// surface per call or through the restart loop.
    pub async fn start(&self) -> Result<()> {
        for definition in self.config.definitions() {
            let name = definition.name.clone();
            let instance = FunctionProcess::start(definition, self.dispatcher.notifier())
                .await
                .with_context(|| format!("starting function {name}"))?;
            self.dispatcher.install(instance).await;
        }

        let restart_dispatcher = self.dispatcher.clone();
        let restart_shutdown = self.shutdown_rx.clone();
        tokio::spawn(async move {
            restart_dispatcher.run_restart_loop(restart_shutdown).await;
        });

        let rpc_listener = TcpListener::bind(&self.config.rpc_addr)
            .await
            .with_context(|| format!("failed to bind rpc listener on {}", self.config.rpc_addr))?;
        info!(addr = %self.config.rpc_addr, "rpc listening");
        let rpc_invoker: Arc<dyn Invoker> = self.dispatcher.clone();
        tokio::spawn(rpc::serve(
            rpc_listener,
            rpc_invoker,
            self.shutdown_rx.clone(),
        ));

        let state = GatewayState {
            invoker: self.dispatcher.clone(),
            routes: Arc::new(self.config.routes.clone()),
        };
        let routes = gateway::router(state);

        let handle = Handle::new();
        let signal_handle = handle.clone();
        let shutdown_tx = self.shutdown_tx.clone();
        tokio::spawn(async move {
            shutdown_signal(signal_handle, shutdown_tx).await;
        });

        let addr: SocketAddr = self
            .config
            .http_addr
            .parse()
            .with_context(|| format!("invalid http address: {}", self.config.http_addr))?;
        info!(addr = %self.config.http_addr, "http gateway listening");
        axum_server::bind(addr)
            .handle(handle)
            .serve(routes.into_make_service())
            .await?;

        self.dispatcher.stop_all().await;
        Ok(())
    }
}

async fn shutdown_signal(handle: Handle, shutdown_tx: watch::Sender<()>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("signal received, shutting down");
    handle.shutdown();
    let _ = shutdown_tx.send(());
}
