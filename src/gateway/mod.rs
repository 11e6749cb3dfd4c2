//! The HTTP gateway: matches inbound requests against the declared route
//! table, wraps them into cloud-gateway-style JSON events, dispatches to the
//! target function, and copies the function's response back onto the wire.

use std::{collections::HashMap, sync::Arc, time::Instant};

use axum::{
    body::Body,
    extract::{Request, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    data_model::{InvokeRequest, Route},
    dispatcher::Invoker,
};

pub mod event;
pub mod router;

use event::{GatewayRequestEvent, GatewayResponseEvent, RequestContext};
use router::match_route;

/// Header a caller may set to supply its own correlation id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Clone)]
pub struct GatewayState {
    pub invoker: Arc<dyn Invoker>,
    pub routes: Arc<Vec<Route>>,
}

/// Builds the gateway router. The runtime reserves no paths of its own:
/// every request, whatever its path or method, goes through route matching.
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .fallback(handle)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn handle(State(state): State<GatewayState>, request: Request) -> Response {
    let started = Instant::now();
    let (parts, body) = request.into_parts();

    let request_id = parts
        .headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let path = parts.uri.path().to_string();

    let response = invoke(&state, parts, body, &request_id, &path).await;

    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
    info!(
        request_id = %request_id,
        path = %path,
        status = response.status().as_u16(),
        elapsed_ms,
        "gateway"
    );
    response
}

async fn invoke(
    state: &GatewayState,
    parts: Parts,
    body: Body,
    request_id: &str,
    path: &str,
) -> Response {
    let Some(matched) = match_route(&state.routes, path) else {
        info!(request_id = %request_id, path = %path, "no matching route");
        return StatusCode::NOT_FOUND.into_response();
    };
    let target = matched.target.to_string();

    let body = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(body) => body,
        Err(err) => {
            error!(request_id = %request_id, error = %err, "failed to read request body");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let mut headers = HashMap::new();
    let mut multi_value_headers: HashMap<String, Vec<String>> = HashMap::new();
    for (name, value) in parts.headers.iter() {
        let Ok(value) = value.to_str() else { continue };
        let name = name.as_str().to_string();
        headers
            .entry(name.clone())
            .or_insert_with(|| value.to_string());
        multi_value_headers.entry(name).or_default().push(value.to_string());
    }

    let gateway_event = GatewayRequestEvent {
        resource: String::new(),
        path: path.to_string(),
        http_method: parts.method.to_string(),
        headers,
        multi_value_headers,
        path_parameters: matched.path_parameters,
        body: String::from_utf8_lossy(&body).into_owned(),
        is_base64_encoded: false,
        request_context: RequestContext {
            request_id: request_id.to_string(),
        },
    };
    let payload = match serde_json::to_vec(&gateway_event) {
        Ok(payload) => payload,
        Err(err) => {
            error!(request_id = %request_id, error = %err, "failed to encode gateway event");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let invoke_request = InvokeRequest {
        request_id: request_id.to_string(),
        payload,
    };
    let response = match state.invoker.invoke(&target, invoke_request).await {
        Ok(response) => response,
        Err(err) => {
            error!(request_id = %request_id, function = %target, error = %err, "dispatch failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    if let Some(record) = response.error {
        error!(
            request_id = %request_id,
            function = %target,
            error = %record,
            "function reported an error"
        );
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    let gateway_response: GatewayResponseEvent = match serde_json::from_slice(&response.payload) {
        Ok(gateway_response) => gateway_response,
        Err(err) => {
            error!(
                request_id = %request_id,
                function = %target,
                error = %err,
                "malformed response payload"
            );
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    write_response(request_id, gateway_response)
}

fn write_response(request_id: &str, gateway_response: GatewayResponseEvent) -> Response {
    let Ok(status) = StatusCode::from_u16(gateway_response.status_code) else {
        error!(
            request_id = %request_id,
            status_code = gateway_response.status_code,
            "invalid status code in response payload"
        );
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };

    let mut builder = Response::builder().status(status);
    for (name, value) in &gateway_response.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    match builder.body(Body::from(gateway_response.body)) {
        Ok(response) => response,
        Err(err) => {
            error!(request_id = %request_id, error = %err, "invalid headers in response payload");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
