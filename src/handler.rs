//! Request Handler Interface
//!
//! A compiled WinterTC `fetch` handler becomes a single synchronous function
//! that receives a [`Request`] and writes through a [`ResponseWriter`]:
//!
//! ```rust
//! use fast_ts_runtime::handler::{handler_fn, text, Request, ResponseWriter};
//!
//! let handler = handler_fn(|w: &mut ResponseWriter, r: &Request| {
//!     let name = r.search_params().get("name");
//!     text(w, 200, &format!("hello {}", name));
//! });
//! # let _ = handler;
//! ```
//!
//! The helpers at the bottom of this module cover the response shapes
//! generated code produces: JSON, plain text, bare status and redirects.

use crate::error::HttpError;
use axum::body::Body;
use axum::response::Response;
use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, header};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::net::SocketAddr;
use tracing::warn;
use web_bridge::{UrlSearchParams, text_decode};

/// Content type written by [`json`]
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Content type written by [`text`]
pub const CONTENT_TYPE_TEXT: &str = "text/plain; charset=utf-8";

/// A request-handling function.
///
/// Implemented for every `Fn(&mut ResponseWriter, &Request)` closure; see
/// [`handler_fn`] for a helper that pins the closure signature.
pub trait Handler: Send + Sync + 'static {
    fn serve_http(&self, w: &mut ResponseWriter, r: &Request);
}

impl<F> Handler for F
where
    F: Fn(&mut ResponseWriter, &Request) + Send + Sync + 'static,
{
    fn serve_http(&self, w: &mut ResponseWriter, r: &Request) {
        self(w, r)
    }
}

/// Identity function that lets closures infer the handler signature
pub fn handler_fn<F>(f: F) -> F
where
    F: Fn(&mut ResponseWriter, &Request) + Send + Sync + 'static,
{
    f
}

/// Fully buffered incoming request
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
    remote_addr: Option<SocketAddr>,
}

impl Request {
    pub fn new(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            method,
            uri,
            headers,
            body,
            remote_addr: None,
        }
    }

    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Raw query string without the leading `?`
    pub fn query_string(&self) -> &str {
        self.uri.query().unwrap_or("")
    }

    /// Parse the query string into a fresh multimap owned by the caller
    pub fn search_params(&self) -> UrlSearchParams {
        UrlSearchParams::new(self.query_string())
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Header value as text; non-visible-ASCII values read as absent
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Body decoded as UTF-8, lossily
    pub fn text(&self) -> String {
        text_decode(&self.body)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }
}

/// Response-writing capability handed to handlers.
///
/// Headers are frozen once the status is written; writing body bytes before
/// any status implies `200 OK`.
#[derive(Debug, Default)]
pub struct ResponseWriter {
    headers: HeaderMap,
    status: Option<StatusCode>,
    sent_headers: Option<HeaderMap>,
    body: Vec<u8>,
}

impl ResponseWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Headers that will be sent with the status line
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Write the status line. Only the first call has any effect.
    pub fn write_header(&mut self, code: u16) {
        if let Some(current) = self.status {
            warn!(
                current = current.as_u16(),
                ignored = code,
                "superfluous write_header call"
            );
            return;
        }

        let status = StatusCode::from_u16(code).unwrap_or_else(|_| {
            warn!(code, "invalid status code, sending 500");
            StatusCode::INTERNAL_SERVER_ERROR
        });
        self.status = Some(status);
        self.sent_headers = Some(self.headers.clone());
    }

    /// Append body bytes
    pub fn write(&mut self, bytes: &[u8]) {
        if self.status.is_none() {
            self.write_header(StatusCode::OK.as_u16());
        }
        self.body.extend_from_slice(bytes);
    }

    pub fn is_header_written(&self) -> bool {
        self.status.is_some()
    }

    /// Status that will be sent
    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::OK)
    }

    /// Headers that will be sent
    pub fn sent_headers(&self) -> &HeaderMap {
        self.sent_headers.as_ref().unwrap_or(&self.headers)
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub(crate) fn into_response(self) -> Response {
        let status = self.status();
        let headers = self.sent_headers.unwrap_or(self.headers);

        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        response
    }
}

/// Write a JSON body: content type, then status, then bytes
pub fn json(w: &mut ResponseWriter, status: u16, data: &[u8]) {
    w.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(CONTENT_TYPE_JSON),
    );
    w.write_header(status);
    w.write(data);
}

/// Write a plain-text body: content type, then status, then bytes
pub fn text(w: &mut ResponseWriter, status: u16, body: &str) {
    w.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(CONTENT_TYPE_TEXT),
    );
    w.write_header(status);
    w.write(body.as_bytes());
}

/// Write only a status line
pub fn status(w: &mut ResponseWriter, code: u16) {
    w.write_header(code);
}

/// Set `Location` and the redirect status in one call
pub fn redirect(w: &mut ResponseWriter, location: &str, code: u16) {
    match HeaderValue::from_str(location) {
        Ok(value) => {
            w.headers_mut().insert(header::LOCATION, value);
        }
        Err(e) => warn!(location, error = %e, "invalid redirect location"),
    }
    w.write_header(code);
}

/// Serialize `value` and write it with [`json`]
pub fn write_json<T: Serialize + ?Sized>(w: &mut ResponseWriter, status: u16, value: &T) {
    match serde_json::to_vec(value) {
        Ok(bytes) => json(w, status, &bytes),
        Err(e) => {
            let err = HttpError::internal_error(format!("Failed to serialize response: {}", e));
            json(w, err.status, err.to_json().to_string().as_bytes());
        }
    }
}
