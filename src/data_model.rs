use std::{collections::HashMap, fmt, path::PathBuf};

use serde::{Deserialize, Serialize};

/// Static declaration of a function: its unique name and the path to its
/// locally built executable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub handler: PathBuf,
}

/// Where an event binding originates. Only `Api` bindings participate in
/// HTTP route matching; unrecognized sources are carried but never matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventSource {
    Api,
    Other,
}

impl From<String> for EventSource {
    fn from(value: String) -> Self {
        if value.eq_ignore_ascii_case("api") {
            EventSource::Api
        } else {
            EventSource::Other
        }
    }
}

impl From<EventSource> for String {
    fn from(value: EventSource) -> String {
        match value {
            EventSource::Api => "api",
            EventSource::Other => "other",
        }
        .to_string()
    }
}

/// A declared mapping from an HTTP path pattern to a target function.
///
/// `route` is a `/`-delimited template; a segment written `{name}` captures
/// any single non-empty request segment under `name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub source: EventSource,
    pub target: String,
    pub route: String,
}

/// One invocation as carried between the gateway, the dispatcher, and a
/// function process. The payload is opaque here; only the gateway assigns it
/// meaning.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvokeRequest {
    pub request_id: String,
    pub payload: Vec<u8>,
}

/// The result of one invocation: an opaque payload, or an application-level
/// error reported by the invoked function itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvokeResponse {
    pub payload: Vec<u8>,
    pub error: Option<ErrorRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    UnknownFunction,
    Invocation,
    Transport,
    Internal,
}

/// An error as carried over the call protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub message: String,
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// A matched route: the target function and the captured path parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch<'a> {
    pub target: &'a str,
    pub path_parameters: HashMap<String, String>,
}
