//! End-to-end tests that launch real function processes (the `trivet-echo`
//! binary) and exercise the supervisor, dispatcher, rpc listener, and
//! gateway against them.

use std::{path::PathBuf, sync::Arc, time::Duration};

use axum::{body::Body, http::Request as HttpRequest};
use tokio::{
    net::TcpListener,
    sync::{mpsc, watch},
    time::{sleep, timeout},
};
use tower::ServiceExt;
use trivet::{
    data_model::{ErrorKind, EventSource, FunctionDefinition, InvokeRequest, Route},
    dispatcher::{Dispatcher, Invoker},
    gateway::{
        self,
        event::{GatewayRequestEvent, GatewayResponseEvent, RequestContext},
        GatewayState,
    },
    protocol::Client,
    rpc,
    supervisor::{FunctionProcess, InvokeError, StartError},
};

fn echo_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_trivet-echo"))
}

fn echo_definition(name: &str) -> FunctionDefinition {
    FunctionDefinition {
        name: name.to_string(),
        handler: echo_bin(),
    }
}

/// A payload the echo function understands: a gateway event whose body is
/// the given marker.
fn event_payload(body: &str) -> Vec<u8> {
    serde_json::to_vec(&GatewayRequestEvent {
        path: "/echo".to_string(),
        http_method: "POST".to_string(),
        body: body.to_string(),
        request_context: RequestContext {
            request_id: "test-request".to_string(),
        },
        ..Default::default()
    })
    .unwrap()
}

/// Decodes an echo response back to the event the function saw.
fn reflected_event(payload: &[u8]) -> GatewayRequestEvent {
    let response: GatewayResponseEvent = serde_json::from_slice(payload).unwrap();
    serde_json::from_str(&response.body).unwrap()
}

#[tokio::test]
async fn start_then_invoke_echoes_the_payload() {
    let (notifier, _restart_rx) = mpsc::channel(20);
    let instance = FunctionProcess::start(echo_definition("Echo"), notifier)
        .await
        .unwrap();

    let response = instance
        .invoke(InvokeRequest {
            request_id: "r-1".to_string(),
            payload: event_payload("hello"),
        })
        .await
        .unwrap();

    assert!(response.error.is_none());
    assert_eq!(reflected_event(&response.payload).body, "hello");

    instance.stop().await.unwrap();
}

#[tokio::test]
async fn start_with_a_missing_handler_fails_to_launch() {
    let (notifier, _restart_rx) = mpsc::channel(20);
    let definition = FunctionDefinition {
        name: "Missing".to_string(),
        handler: PathBuf::from("/definitely/not-here"),
    };

    let err = FunctionProcess::start(definition, notifier)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StartError::Launch { .. } | StartError::StartupTimeout { .. }
    ));
}

#[tokio::test]
async fn invoke_after_stop_is_a_transport_error() {
    let (notifier, mut restart_rx) = mpsc::channel(20);
    let instance = FunctionProcess::start(echo_definition("Echo"), notifier)
        .await
        .unwrap();

    instance.stop().await.unwrap();
    let notified = timeout(Duration::from_secs(1), restart_rx.recv())
        .await
        .unwrap();
    assert_eq!(notified.as_deref(), Some("Echo"));

    let err = instance
        .invoke(InvokeRequest {
            request_id: "r-2".to_string(),
            payload: event_payload("too late"),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, InvokeError::Transport(_)));

    // Stopping again is a no-op, not an error.
    instance.stop().await.unwrap();
}

#[tokio::test]
async fn handler_rebuild_replaces_the_instance_exactly_once() {
    let scratch = tempfile::tempdir().unwrap();
    let handler = scratch.path().join("Echo");
    std::fs::copy(echo_bin(), &handler).unwrap();

    let dispatcher = Arc::new(Dispatcher::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(());
    tokio::spawn(dispatcher.clone().run_restart_loop(shutdown_rx));

    let definition = FunctionDefinition {
        name: "Echo".to_string(),
        handler: handler.clone(),
    };
    let instance = FunctionProcess::start(definition, dispatcher.notifier())
        .await
        .unwrap();
    let old_port = instance.port();
    dispatcher.install(instance).await;

    // Simulate a rebuild: a new executable appears under the handler path.
    // Rename over the old file, as a build tool would.
    sleep(Duration::from_millis(1100)).await;
    let staged = scratch.path().join("Echo.new");
    std::fs::copy(echo_bin(), &staged).unwrap();
    std::fs::rename(&staged, &handler).unwrap();

    // The watcher polls every second; give the swap time to land.
    let mut new_port = old_port;
    for _ in 0..150 {
        sleep(Duration::from_millis(100)).await;
        if let Some(current) = dispatcher.get("Echo").await {
            if current.port() != old_port {
                new_port = current.port();
                break;
            }
        }
    }
    assert_ne!(new_port, old_port, "instance was never replaced");

    // The replacement serves invokes.
    let response = dispatcher
        .invoke(
            "Echo",
            InvokeRequest {
                request_id: "r-3".to_string(),
                payload: event_payload("after reload"),
            },
        )
        .await
        .unwrap();
    assert_eq!(reflected_event(&response.payload).body, "after reload");

    // Exactly one restart: the replacement must stay put.
    sleep(Duration::from_millis(2500)).await;
    assert_eq!(dispatcher.get("Echo").await.unwrap().port(), new_port);

    shutdown_tx.send(()).unwrap();
    dispatcher.stop_all().await;
}

#[tokio::test]
async fn concurrent_dispatches_do_not_cross_contaminate() {
    let dispatcher = Arc::new(Dispatcher::new());
    for name in ["Alpha", "Bravo", "Charlie"] {
        let instance = FunctionProcess::start(echo_definition(name), dispatcher.notifier())
            .await
            .unwrap();
        dispatcher.install(instance).await;
    }

    let mut calls = Vec::new();
    for round in 0..4 {
        for name in ["Alpha", "Bravo", "Charlie"] {
            let dispatcher = dispatcher.clone();
            let marker = format!("{name}-{round}");
            calls.push(tokio::spawn(async move {
                let response = dispatcher
                    .invoke(
                        name,
                        InvokeRequest {
                            request_id: marker.clone(),
                            payload: event_payload(&marker),
                        },
                    )
                    .await
                    .unwrap();
                (marker, response)
            }));
        }
    }

    for call in calls {
        let (marker, response) = call.await.unwrap();
        assert_eq!(reflected_event(&response.payload).body, marker);
    }

    dispatcher.stop_all().await;
}

#[tokio::test]
async fn gateway_round_trip_reflects_the_request() {
    let dispatcher = Arc::new(Dispatcher::new());
    let instance = FunctionProcess::start(echo_definition("Echo"), dispatcher.notifier())
        .await
        .unwrap();
    dispatcher.install(instance).await;

    let app = gateway::router(GatewayState {
        invoker: dispatcher.clone(),
        routes: Arc::new(vec![Route {
            source: EventSource::Api,
            target: "Echo".to_string(),
            route: "/echo".to_string(),
        }]),
    });

    let response = app
        .oneshot(
            HttpRequest::builder()
                .method("POST")
                .uri("/echo")
                .header("x-test-header", "yes")
                .body(Body::from("hello"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let event: GatewayRequestEvent = serde_json::from_slice(&body).unwrap();
    assert_eq!(event.body, "hello");
    assert_eq!(event.http_method, "POST");
    assert_eq!(event.path, "/echo");
    assert_eq!(event.headers["x-test-header"], "yes");
    assert!(!event.request_context.request_id.is_empty());

    dispatcher.stop_all().await;
}

#[tokio::test]
async fn rpc_listener_serves_dispatches_and_reports_unknown_functions() {
    let dispatcher = Arc::new(Dispatcher::new());
    let instance = FunctionProcess::start(echo_definition("Echo"), dispatcher.notifier())
        .await
        .unwrap();
    dispatcher.install(instance).await;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let (_shutdown_tx, shutdown_rx) = watch::channel(());
    let invoker: Arc<dyn Invoker> = dispatcher.clone();
    tokio::spawn(rpc::serve(listener, invoker, shutdown_rx));

    let mut client = Client::connect(&addr).await.unwrap();
    let response = client
        .invoke(
            "Echo",
            InvokeRequest {
                request_id: "r-4".to_string(),
                payload: event_payload("over rpc"),
            },
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reflected_event(&response.payload).body, "over rpc");

    let record = client
        .invoke("Ghost", InvokeRequest::default())
        .await
        .unwrap()
        .unwrap_err();
    assert_eq!(record.kind, ErrorKind::UnknownFunction);

    dispatcher.stop_all().await;
}
