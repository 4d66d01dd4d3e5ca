//! codexrpc - drive `codex app-server` over JSON-RPC
//!
//! This is the convenience crate that re-exports the codexrpc sub-crates.
//!
//! # Architecture
//!
//! - **codexrpc-core**: wire types, line codec, errors, observability
//! - **codexrpc-client**: subprocess transport, request correlation,
//!   server-request dispatch and notification streaming
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use codexrpc::{AppServerClient, ClientOptions};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = AppServerClient::connect(ClientOptions::new()).await?;
//!
//!     let thread = client.thread_start(json!({})).await?;
//!     println!("thread: {}", thread);
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```

pub use codexrpc_client as client;
pub use codexrpc_core as core;

pub use codexrpc_client::{AppServerClient, ClientBuilder, ClientOptions, ServerRequestHandlers};
pub use codexrpc_core::{Error, Result};
