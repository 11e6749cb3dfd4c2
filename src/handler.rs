//! The function-side harness. A function binary hands its handler to
//! [`run`] from `main`; the harness reads the port assigned by the runtime,
//! opens the call-protocol listener before accepting connections, answers
//! liveness pings, and maps invocations through the handler.
//!
//! ```no_run
//! async fn reverse(payload: Vec<u8>) -> anyhow::Result<Vec<u8>> {
//!     let mut payload = payload;
//!     payload.reverse();
//!     Ok(payload)
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     trivet::handler::run(reverse).await
//! }
//! ```

use std::{env, future::Future, sync::Arc};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::net::TcpListener;

use crate::{
    data_model::{ErrorKind, ErrorRecord, InvokeResponse},
    protocol::{self, CallReply, CallRequest, CallService, Method, PORT_ENV},
};

struct HandlerService<H> {
    handler: H,
}

#[async_trait]
impl<H, Fut> CallService for HandlerService<H>
where
    H: Fn(Vec<u8>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<u8>>> + Send,
{
    async fn call(&self, request: CallRequest) -> CallReply {
        match request.method {
            Method::Ping => Ok(InvokeResponse::default()),
            Method::Invoke => match (self.handler)(request.request.payload).await {
                Ok(payload) => Ok(InvokeResponse {
                    payload,
                    error: None,
                }),
                // A handler failure is an application-level error record,
                // not a call failure.
                Err(err) => Ok(InvokeResponse {
                    payload: Vec::new(),
                    error: Some(ErrorRecord {
                        kind: ErrorKind::Invocation,
                        message: format!("{err:#}"),
                    }),
                }),
            },
        }
    }
}

/// Serves the handler on the runtime-assigned port until the process is
/// killed. Never returns under normal operation.
pub async fn run<H, Fut>(handler: H) -> Result<()>
where
    H: Fn(Vec<u8>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<u8>>> + Send + 'static,
{
    let port = env::var(PORT_ENV)
        .with_context(|| format!("{PORT_ENV} must be set by the runtime"))?
        .parse::<u16>()
        .with_context(|| format!("{PORT_ENV} is not a valid port"))?;

    let listener = TcpListener::bind(("127.0.0.1", port))
        .await
        .with_context(|| format!("failed to bind function listener on port {port}"))?;

    let service: Arc<dyn CallService> = Arc::new(HandlerService { handler });
    protocol::serve_listener(listener, service)
        .await
        .context("function listener failed")
}
