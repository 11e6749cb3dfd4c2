//! trivet serves locally built function executables the way a cloud
//! function-as-a-service platform would: each declared function runs as its
//! own child process speaking a small call protocol, an HTTP gateway
//! translates requests into cloud-gateway-style JSON events, and rebuilt
//! handlers are detected and reloaded automatically.

pub mod config;
pub mod data_model;
pub mod dispatcher;
pub mod gateway;
pub mod handler;
pub mod protocol;
pub mod rpc;
pub mod service;
pub mod supervisor;
pub mod tracing;
