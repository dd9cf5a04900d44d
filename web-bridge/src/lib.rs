//! Web Bridge
//!
//! Web Platform API adapters used by fast-ts generated code. Each adapter is
//! usable on its own; none of them depend on the HTTP server.
//!
//! | Web API           | Adapter                          |
//! |-------------------|----------------------------------|
//! | `URLSearchParams` | [`UrlSearchParams`]              |
//! | `console`         | [`Console`]                      |
//! | `TextEncoder`     | [`TextEncoder`], [`text_encode`] |
//! | `TextDecoder`     | [`TextDecoder`], [`text_decode`] |

pub mod console;
pub mod encoding;
pub mod error;
pub mod urlparams;

pub use console::{stringify, Console, LogSink, MemorySink, Severity, StderrSink, TracingSink};
pub use encoding::{text_decode, text_encode, TextDecoder, TextEncoder, UTF8};
pub use error::{BridgeError, BridgeResult};
pub use urlparams::UrlSearchParams;
