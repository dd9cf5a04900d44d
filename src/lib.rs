//! fast-ts Runtime
//!
//! WinterTC-compatible runtime for servers generated by fast-ts.
//!
//! # Overview
//!
//! Generated code is written against the Web Platform APIs. This crate gives
//! it native equivalents:
//!
//! - **Handler lifecycle**: a compiled `fetch` handler becomes a [`Handler`]
//!   served by [`serve`] / [`serve_port`], with graceful shutdown on
//!   SIGINT/SIGTERM
//! - **Web API adapters** (re-exported from `web-bridge`): `URLSearchParams`,
//!   `console`, `TextEncoder` / `TextDecoder`
//!
//! # Architecture
//!
//! ```text
//! HTTP Request
//!      │
//!      ▼
//! ┌──────────────┐
//! │ Accept loop  │──► hyper http1, header-read timeout, graceful watch
//! └──────┬───────┘
//!        │
//!        ▼
//! ┌──────────────┐
//! │  Dispatcher  │──► buffer body, build Request, spawn_blocking
//! └──────┬───────┘
//!        │
//!        ▼
//! ┌──────────────┐
//! │   Handler    │──► UrlSearchParams, Console, TextEncoder/TextDecoder
//! └──────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use fast_ts_runtime::{handler_fn, serve_port, text, Request, ResponseWriter};
//!
//! #[tokio::main]
//! async fn main() {
//!     let handler = handler_fn(|w: &mut ResponseWriter, r: &Request| {
//!         let name = r.search_params().get("name");
//!         text(w, 200, &format!("hello {}", name));
//!     });
//!
//!     serve_port(3000, handler).await.unwrap();
//! }
//! ```

pub mod error;
pub mod handler;
pub mod server;
pub mod shutdown;

// Re-exports for convenience
pub use error::{HttpError, RuntimeError, RuntimeResult};
pub use handler::{
    CONTENT_TYPE_JSON, CONTENT_TYPE_TEXT, Handler, Request, ResponseWriter, handler_fn, json,
    redirect, status, text, write_json,
};
pub use server::{
    LifecycleState, Server, ServerConfig, serve, serve_blocking, serve_blocking_with_config,
    serve_port, serve_with_config,
};
pub use shutdown::{ShutdownHandle, TerminationSignals};

// Re-export the Web API adapters so generated code needs a single dependency
pub use web_bridge::{
    Console, LogSink, MemorySink, Severity, StderrSink, TextDecoder, TextEncoder, TracingSink,
    UrlSearchParams, stringify, text_decode, text_encode,
};

/// Runtime version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Runtime name
pub const NAME: &str = "fast-ts runtime";
