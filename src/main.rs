//! fast-ts-serve CLI
//!
//! Runs the built-in echo handler on top of the runtime. Useful for checking a
//! deployment target before wiring in generated code.
//!
//! # Usage
//!
//! ```bash
//! # Serve on the default port (3000)
//! fast-ts-serve
//!
//! # Custom port and drain deadline
//! fast-ts-serve --port 8080 --shutdown-timeout 10
//!
//! # Verbose logging
//! fast-ts-serve --verbose
//! ```
//!
//! Every option falls back to the matching `FAST_TS_*` environment variable,
//! then to the built-in default.

use clap::Parser;
use fast_ts_runtime::{
    Console, Handler, Request, ResponseWriter, ServerConfig, TracingSink, handler_fn,
    serve_with_config, write_json,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// fast-ts-serve - WinterTC runtime smoke-test server
#[derive(Parser, Debug)]
#[command(name = "fast-ts-serve")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Serve the fast-ts echo handler with graceful shutdown", long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Host address to bind to (all interfaces when omitted)
    #[arg(long)]
    host: Option<String>,

    /// Seconds to wait for in-flight requests on shutdown
    #[arg(long, value_name = "SECS")]
    shutdown_timeout: Option<u64>,

    /// Seconds a client has to send request headers
    #[arg(long, value_name = "SECS")]
    header_read_timeout: Option<u64>,

    /// Request body size limit in MB
    #[arg(long, value_name = "MB")]
    body_limit: Option<usize>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    /// Apply command-line overrides on top of `config`
    fn apply(&self, mut config: ServerConfig) -> ServerConfig {
        match (&self.host, self.port) {
            (Some(host), Some(port)) => config = config.with_address(format!("{}:{}", host, port)),
            (None, Some(port)) => config = config.with_port(port),
            (Some(host), None) => {
                let port = config.address.rsplit(':').next().unwrap_or("3000").to_string();
                config = config.with_address(format!("{}:{}", host, port));
            }
            (None, None) => {}
        }
        if let Some(secs) = self.shutdown_timeout {
            config = config.with_shutdown_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = self.header_read_timeout {
            config = config.with_header_read_timeout(Duration::from_secs(secs));
        }
        if let Some(mb) = self.body_limit {
            config = config.with_body_limit(mb * 1024 * 1024);
        }
        config
    }
}

/// Echo method, path, query and body back as JSON
fn echo_handler(console: Console) -> impl Handler {
    handler_fn(move |w: &mut ResponseWriter, r: &Request| {
        let params = r.search_params();
        console.info(&[r.method(), &r.path(), &params.size()]);

        let body = serde_json::json!({
            "method": r.method().as_str(),
            "path": r.path(),
            "query": params.to_string(),
            "params": params.entries(),
            "body": r.text(),
        });
        write_json(w, 200, &body);
    })
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let config = match ServerConfig::from_env() {
        Ok(config) => args.apply(config),
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    info!("Configuration:");
    info!("  Listen: {}", config.address);
    info!("  Header read timeout: {:?}", config.header_read_timeout);
    info!("  Shutdown timeout: {:?}", config.shutdown_timeout);
    info!("  Body limit: {} bytes", config.body_limit);

    let console = Console::new(Arc::new(TracingSink));

    match serve_with_config(config, echo_handler(console)).await {
        Ok(()) => {}
        Err(e) if !e.is_fatal() => {
            warn!("{}", e);
            // Exit now: dropping the runtime would wait on abandoned handlers
            std::process::exit(0);
        }
        Err(e) => {
            error!("Server error: {}", e);
            std::process::exit(1);
        }
    }
}
