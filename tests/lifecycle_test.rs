//! Integration tests for the handler lifecycle
//!
//! Every test binds an ephemeral port on 127.0.0.1, talks to the server over
//! real sockets with reqwest, and stops it through its `ShutdownHandle`.
//! Signal delivery is covered separately in `signal_shutdown_test.rs`.

use fast_ts_runtime::{
    Handler, LifecycleState, Request, ResponseWriter, RuntimeError, RuntimeResult, Server,
    ServerConfig, ShutdownHandle, handler_fn, json, redirect, status, text,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Handle to a server running on a background task
struct TestServer {
    addr: SocketAddr,
    shutdown: ShutdownHandle,
    state: watch::Receiver<LifecycleState>,
    task: JoinHandle<RuntimeResult<()>>,
}

impl TestServer {
    async fn start<H: Handler>(handler: H) -> Self {
        Self::start_with(test_config(), handler).await
    }

    async fn start_with<H: Handler>(config: ServerConfig, handler: H) -> Self {
        let server = Server::bind(config, handler).await.expect("bind");
        let addr = server.local_addr();
        let shutdown = server.shutdown_handle();
        let state = server.state_watch();
        let task = tokio::spawn(server.run());

        Self {
            addr,
            shutdown,
            state,
            task,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Trigger shutdown and wait for `run` to return
    async fn stop(self) -> (RuntimeResult<()>, LifecycleState) {
        self.shutdown.trigger();
        let result = tokio::time::timeout(Duration::from_secs(10), self.task)
            .await
            .expect("server should stop")
            .expect("run task panicked");
        let state = *self.state.borrow();
        (result, state)
    }
}

fn test_config() -> ServerConfig {
    ServerConfig::new("127.0.0.1:0").with_signal_handling(false)
}

fn ok_handler() -> impl Handler {
    handler_fn(|w: &mut ResponseWriter, _r: &Request| text(w, 200, "ok"))
}

async fn wait_until(flag: &AtomicBool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !flag.load(Ordering::SeqCst) {
        assert!(Instant::now() < deadline, "condition never became true");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_serves_request_then_stops_cleanly() {
    let server = TestServer::start(ok_handler()).await;
    assert_eq!(*server.state.borrow(), LifecycleState::Listening);

    let response = reqwest::get(server.url("/")).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers()["content-type"],
        "text/plain; charset=utf-8"
    );
    assert_eq!(response.text().await.unwrap(), "ok");

    let started = Instant::now();
    let (result, state) = server.stop().await;
    assert!(result.is_ok(), "unexpected error: {:?}", result);
    assert_eq!(state, LifecycleState::Stopped);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_every_path_reaches_handler() {
    let server = TestServer::start(handler_fn(|w: &mut ResponseWriter, r: &Request| {
        text(w, 200, &format!("{} {}", r.method(), r.path()))
    }))
    .await;

    let client = reqwest::Client::new();
    let body = client
        .delete(server.url("/a/b/c"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "DELETE /a/b/c");

    server.stop().await.0.unwrap();
}

#[tokio::test]
async fn test_query_params_and_body() {
    let server = TestServer::start(handler_fn(|w: &mut ResponseWriter, r: &Request| {
        let params = r.search_params();
        let reply = format!(
            "tags={:?} q={} sorted={} body={}",
            params.get_all("tag"),
            params.get("q"),
            params,
            r.text()
        );
        text(w, 200, &reply);
    }))
    .await;

    let client = reqwest::Client::new();
    let body = client
        .post(server.url("/search?tag=b&q=hello%20world&tag=a"))
        .body("payload")
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    assert_eq!(
        body,
        r#"tags=["b", "a"] q=hello world sorted=q=hello+world&tag=b&tag=a body=payload"#
    );

    server.stop().await.0.unwrap();
}

#[tokio::test]
async fn test_response_helpers() {
    let server = TestServer::start(handler_fn(|w: &mut ResponseWriter, r: &Request| {
        match r.path() {
            "/json" => json(w, 201, br#"{"ok":true}"#),
            "/empty" => status(w, 204),
            "/moved" => redirect(w, "/json", 302),
            _ => text(w, 404, "not found"),
        }
    }))
    .await;

    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap();

    let response = client.get(server.url("/json")).send().await.unwrap();
    assert_eq!(response.status(), 201);
    assert_eq!(response.headers()["content-type"], "application/json");
    let value: serde_json::Value = response.json().await.unwrap();
    assert_eq!(value["ok"], true);

    let response = client.get(server.url("/empty")).send().await.unwrap();
    assert_eq!(response.status(), 204);
    assert!(response.bytes().await.unwrap().is_empty());

    let response = client.get(server.url("/moved")).send().await.unwrap();
    assert_eq!(response.status(), 302);
    assert_eq!(response.headers()["location"], "/json");

    let response = client.get(server.url("/other")).send().await.unwrap();
    assert_eq!(response.status(), 404);

    server.stop().await.0.unwrap();
}

#[tokio::test]
async fn test_body_limit() {
    let config = test_config().with_body_limit(16);
    let server = TestServer::start_with(config, ok_handler()).await;

    let client = reqwest::Client::new();
    let response = client
        .post(server.url("/"))
        .body(vec![b'x'; 64])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 413);
    let value: serde_json::Value = response.json().await.unwrap();
    assert_eq!(value["ok"], false);
    assert_eq!(value["error"]["code"], 413);
    assert_eq!(value["error"]["details"]["limit"], 16);

    let response = client.post(server.url("/")).body("small").send().await.unwrap();
    assert_eq!(response.status(), 200);

    server.stop().await.0.unwrap();
}

#[tokio::test]
async fn test_slow_headers_are_cut_off() {
    let timeout = Duration::from_secs(1);
    let config = test_config().with_header_read_timeout(timeout);
    let server = TestServer::start_with(config, ok_handler()).await;

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    // Request head without the terminating blank line
    stream.write_all(b"GET / HTTP/1.1\r\nHost: x\r\n").await.unwrap();

    let started = Instant::now();
    let mut received = Vec::new();
    let read = tokio::time::timeout(timeout * 2, stream.read_to_end(&mut received)).await;
    assert!(read.is_ok(), "connection still open after {:?}", started.elapsed());
    assert!(started.elapsed() >= timeout - Duration::from_millis(100));
    assert!(!String::from_utf8_lossy(&received).contains("200 OK"));

    server.stop().await.0.unwrap();
}

#[tokio::test]
async fn test_handler_panic_is_contained() {
    let server = TestServer::start(handler_fn(|w: &mut ResponseWriter, r: &Request| {
        if r.path() == "/boom" {
            panic!("handler bug");
        }
        text(w, 200, "still up");
    }))
    .await;

    let response = reqwest::get(server.url("/boom")).await.unwrap();
    assert_eq!(response.status(), 500);

    let response = reqwest::get(server.url("/")).await.unwrap();
    assert_eq!(response.text().await.unwrap(), "still up");

    server.stop().await.0.unwrap();
}

#[tokio::test]
async fn test_in_flight_request_completes_during_shutdown() {
    let entered = Arc::new(AtomicBool::new(false));
    let handler = {
        let entered = Arc::clone(&entered);
        handler_fn(move |w: &mut ResponseWriter, _r: &Request| {
            entered.store(true, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(300));
            text(w, 200, "done");
        })
    };
    let server = TestServer::start(handler).await;

    let request = tokio::spawn(reqwest::get(server.url("/slow")));
    wait_until(&entered).await;

    let (result, state) = server.stop().await;
    assert!(result.is_ok(), "unexpected error: {:?}", result);
    assert_eq!(state, LifecycleState::Stopped);

    let response = request.await.unwrap().unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "done");
}

#[tokio::test]
async fn test_shutdown_deadline_forces_close() {
    let entered = Arc::new(AtomicBool::new(false));
    let handler = {
        let entered = Arc::clone(&entered);
        handler_fn(move |w: &mut ResponseWriter, _r: &Request| {
            entered.store(true, Ordering::SeqCst);
            std::thread::sleep(Duration::from_secs(3));
            text(w, 200, "too late");
        })
    };
    let config = test_config().with_shutdown_timeout(Duration::from_millis(200));
    let server = TestServer::start_with(config, handler).await;

    let request = tokio::spawn(reqwest::get(server.url("/stuck")));
    wait_until(&entered).await;

    let started = Instant::now();
    let (result, state) = server.stop().await;
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(matches!(result, Err(RuntimeError::ShutdownTimeout { .. })));
    assert_eq!(state, LifecycleState::Stopped);

    // The abandoned request sees its connection closed
    assert!(request.await.unwrap().is_err());
}

#[tokio::test]
async fn test_no_new_connections_after_shutdown() {
    let server = TestServer::start(ok_handler()).await;
    let url = server.url("/");

    server.stop().await.0.unwrap();

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()
        .unwrap();
    assert!(client.get(url).send().await.is_err());
}

#[tokio::test]
async fn test_second_bind_on_same_address_fails() {
    let server = TestServer::start(ok_handler()).await;

    let config = ServerConfig::new(server.addr.to_string()).with_signal_handling(false);
    let err = Server::bind(config, ok_handler()).await.unwrap_err();
    assert!(matches!(err, RuntimeError::Bind { .. }));
    assert!(err.is_fatal());

    server.stop().await.0.unwrap();
}

#[tokio::test]
async fn test_malformed_address_is_bind_error() {
    let config = ServerConfig::new("not an address").with_signal_handling(false);
    let err = Server::bind(config, ok_handler()).await.unwrap_err();
    assert!(matches!(err, RuntimeError::Bind { .. }));
    assert!(err.to_string().contains("not an address"));
}

#[tokio::test]
async fn test_port_only_address_binds_all_interfaces() {
    let config = ServerConfig::new(":0").with_signal_handling(false);
    let server = Server::bind(config, ok_handler()).await.unwrap();
    assert!(server.local_addr().ip().is_unspecified());
    assert_ne!(server.local_addr().port(), 0);
    assert_eq!(server.state(), LifecycleState::Listening);

    let port = server.local_addr().port();
    let shutdown = server.shutdown_handle();
    let task = tokio::spawn(server.run());

    let body = reqwest::get(format!("http://127.0.0.1:{}/", port))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "ok");

    shutdown.trigger();
    task.await.unwrap().unwrap();
}
