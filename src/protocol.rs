//! The call protocol spoken between the runtime and function processes, and
//! between external tooling and the runtime's own listener: synchronous
//! request/response calls over a persistent TCP connection, one
//! length-delimited frame per message, CBOR-encoded envelopes inside.

use std::{io, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::data_model::{ErrorRecord, InvokeRequest, InvokeResponse};

/// Environment variable through which the runtime tells a function process
/// which TCP port to open its call-protocol listener on. The process must be
/// listening on `127.0.0.1:$TRIVET_SERVER_PORT` before it can become ready.
pub const PORT_ENV: &str = "TRIVET_SERVER_PORT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Method {
    /// No-argument liveness probe.
    Ping,
    /// One invocation round trip.
    Invoke,
}

/// One call: the target function, the method, and the request being carried.
/// Ping calls carry an empty request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRequest {
    pub function: String,
    pub method: Method,
    pub request: InvokeRequest,
}

/// The reply to a call. `Err` is reserved for call-level failures (unknown
/// function, malformed frame); an error reported by the invoked function
/// itself travels inside `InvokeResponse::error`.
pub type CallReply = Result<InvokeResponse, ErrorRecord>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("connection closed before a reply arrived")]
    ConnectionClosed,
    #[error("encode frame: {0}")]
    Encode(String),
    #[error("decode frame: {0}")]
    Decode(String),
}

fn encode<T: Serialize>(value: &T) -> Result<Bytes, TransportError> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf)
        .map_err(|err| TransportError::Encode(err.to_string()))?;
    Ok(Bytes::from(buf))
}

fn decode<T: DeserializeOwned>(frame: &[u8]) -> Result<T, TransportError> {
    ciborium::de::from_reader(frame).map_err(|err| TransportError::Decode(err.to_string()))
}

/// Client side of the protocol. A client owns one connection and performs
/// blocking round trips on it; concurrent callers each open their own client.
pub struct Client {
    framed: Framed<TcpStream, LengthDelimitedCodec>,
}

impl Client {
    pub async fn connect(addr: &str) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| TransportError::Connect {
                addr: addr.to_string(),
                source,
            })?;
        Ok(Self {
            framed: Framed::new(stream, LengthDelimitedCodec::new()),
        })
    }

    pub async fn call(&mut self, request: CallRequest) -> Result<CallReply, TransportError> {
        self.framed.send(encode(&request)?).await?;
        let frame = self
            .framed
            .next()
            .await
            .ok_or(TransportError::ConnectionClosed)??;
        decode(&frame)
    }

    pub async fn ping(&mut self, function: &str) -> Result<CallReply, TransportError> {
        self.call(CallRequest {
            function: function.to_string(),
            method: Method::Ping,
            request: InvokeRequest::default(),
        })
        .await
    }

    pub async fn invoke(
        &mut self,
        function: &str,
        request: InvokeRequest,
    ) -> Result<CallReply, TransportError> {
        self.call(CallRequest {
            function: function.to_string(),
            method: Method::Invoke,
            request,
        })
        .await
    }
}

/// Server side of one call: both the runtime's listener and the function-side
/// harness answer calls through this seam.
#[async_trait]
pub trait CallService: Send + Sync {
    async fn call(&self, request: CallRequest) -> CallReply;
}

/// Serves calls on one accepted connection until the peer hangs up. Calls on
/// a single connection are answered in order; concurrency comes from peers
/// opening separate connections.
pub async fn serve_connection(
    stream: TcpStream,
    service: Arc<dyn CallService>,
) -> Result<(), TransportError> {
    let mut framed = Framed::new(stream, LengthDelimitedCodec::new());
    while let Some(frame) = framed.next().await {
        let frame = frame?;
        let reply = match decode::<CallRequest>(&frame) {
            Ok(request) => service.call(request).await,
            Err(err) => Err(ErrorRecord {
                kind: crate::data_model::ErrorKind::Internal,
                message: format!("malformed call frame: {err}"),
            }),
        };
        framed.send(encode(&reply)?).await?;
    }
    Ok(())
}

/// Accept loop: one task per connection.
pub async fn serve_listener(
    listener: TcpListener,
    service: Arc<dyn CallService>,
) -> io::Result<()> {
    loop {
        let (stream, _peer) = listener.accept().await?;
        let service = service.clone();
        tokio::spawn(async move {
            let _ = serve_connection(stream, service).await;
        });
    }
}
