//! The runtime's own call-protocol listener: exposes the dispatcher's invoke
//! to out-of-process callers (the `invoke` CLI, tests, other tooling) over
//! the same protocol the function processes speak.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::{net::TcpListener, sync::watch};
use tracing::{error, info};

use crate::{
    data_model::{ErrorKind, ErrorRecord, InvokeResponse},
    dispatcher::{DispatchError, Invoker},
    protocol::{self, CallReply, CallRequest, CallService, Method},
    supervisor::InvokeError,
};

struct InvokerService {
    invoker: Arc<dyn Invoker>,
}

#[async_trait]
impl CallService for InvokerService {
    async fn call(&self, request: CallRequest) -> CallReply {
        match request.method {
            // A ping against the listener answers for the runtime itself.
            Method::Ping => Ok(InvokeResponse::default()),
            Method::Invoke => match self
                .invoker
                .invoke(&request.function, request.request)
                .await
            {
                Ok(response) => Ok(response),
                Err(err) => Err(error_record(err)),
            },
        }
    }
}

fn error_record(err: DispatchError) -> ErrorRecord {
    let kind = match &err {
        DispatchError::UnknownFunction(_) => ErrorKind::UnknownFunction,
        DispatchError::Invoke(InvokeError::Transport(_)) => ErrorKind::Transport,
        DispatchError::Invoke(InvokeError::Rejected { .. }) => ErrorKind::Internal,
    };
    ErrorRecord {
        kind,
        message: err.to_string(),
    }
}

/// Serves calls until shutdown is signalled.
pub async fn serve(
    listener: TcpListener,
    invoker: Arc<dyn Invoker>,
    mut shutdown: watch::Receiver<()>,
) {
    let service: Arc<dyn CallService> = Arc::new(InvokerService { invoker });
    tokio::select! {
        _ = shutdown.changed() => {
            info!("rpc listener shutting down");
        }
        result = protocol::serve_listener(listener, service) => {
            if let Err(err) = result {
                error!(error = %err, "rpc accept loop failed");
            }
        }
    }
}
