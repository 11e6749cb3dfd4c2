//! Echo reflects the gateway event it receives back as the response body.
//! Helpful for debugging route and event translation, and used by the
//! end-to-end tests.

use std::collections::HashMap;

use trivet::gateway::event::{GatewayRequestEvent, GatewayResponseEvent};

async fn echo(payload: Vec<u8>) -> anyhow::Result<Vec<u8>> {
    let event: GatewayRequestEvent = serde_json::from_slice(&payload)?;
    let body = serde_json::to_string(&event)?;
    let response = GatewayResponseEvent {
        status_code: 200,
        headers: HashMap::new(),
        body,
    };
    Ok(serde_json::to_vec(&response)?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    trivet::handler::run(echo).await
}
