//! The JSON event shapes the gateway exchanges with functions, mirroring a
//! cloud API gateway's proxy invocation contract.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// What a function receives for one HTTP request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayRequestEvent {
    #[serde(default)]
    pub resource: String,
    pub path: String,
    pub http_method: String,
    /// First value per header name.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Every value per header name.
    #[serde(default)]
    pub multi_value_headers: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub path_parameters: HashMap<String, String>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub is_base64_encoded: bool,
    #[serde(default)]
    pub request_context: RequestContext,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    #[serde(default)]
    pub request_id: String,
}

/// What a function returns; the gateway copies it onto the HTTP response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayResponseEvent {
    #[serde(default)]
    pub status_code: u16,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: String,
}
