//! Console
//!
//! Web `console` methods routed to an injected line sink:
//!
//! - `console.log(...)`   → `console.log(&[...])`
//! - `console.error(...)` → `console.error(&[...])`, prefixed `ERROR:`
//! - `console.warn(...)`  → `console.warn(&[...])`, prefixed `WARN:`
//! - `console.info(...)`  → `console.info(&[...])`, prefixed `INFO:`
//! - `console.debug(...)` → `console.debug(&[...])`, prefixed `DEBUG:`
//!
//! A `Console` is created once at startup and shared by clone. Every call
//! produces exactly one line on the sink.

use chrono::Local;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt::{self, Debug, Display};
use std::io::Write;
use std::sync::Arc;

/// Timestamp layout used by [`StderrSink`]
const TIMESTAMP_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

/// Message used by `assert` when no arguments are given
const DEFAULT_ASSERT_MESSAGE: &str = "Assertion failed";

/// Severity of a console line
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
	Debug,
	Log,
	Info,
	Warn,
	Error,
}

impl Severity {
	/// Tag token prepended to the line, if any
	pub fn tag(&self) -> Option<&'static str> {
		match self {
			Severity::Debug => Some("DEBUG:"),
			Severity::Log => None,
			Severity::Info => Some("INFO:"),
			Severity::Warn => Some("WARN:"),
			Severity::Error => Some("ERROR:"),
		}
	}

	/// Convert to string representation
	pub fn as_str(&self) -> &'static str {
		match self {
			Severity::Debug => "DEBUG",
			Severity::Log => "LOG",
			Severity::Info => "INFO",
			Severity::Warn => "WARN",
			Severity::Error => "ERROR",
		}
	}
}

/// Destination for formatted console lines.
///
/// Implementations must write each line atomically with respect to other
/// callers.
pub trait LogSink: Send + Sync {
	fn write_line(&self, severity: Severity, line: &str);
}

/// Writes timestamp-prefixed lines to stderr
#[derive(Debug, Clone)]
pub struct StderrSink {
	include_timestamp: bool,
}

impl StderrSink {
	pub fn new() -> Self {
		Self {
			include_timestamp: true,
		}
	}

	/// Plain lines, for when the surrounding log collector adds its own timestamps
	pub fn without_timestamp() -> Self {
		Self {
			include_timestamp: false,
		}
	}

	/// The exact text written for `line`, without the trailing newline
	pub fn format_line(&self, line: &str) -> String {
		if self.include_timestamp {
			format!("{} {}", Local::now().format(TIMESTAMP_FORMAT), line)
		} else {
			line.to_string()
		}
	}
}

impl Default for StderrSink {
	fn default() -> Self {
		Self::new()
	}
}

impl LogSink for StderrSink {
	fn write_line(&self, _severity: Severity, line: &str) {
		// Holding the lock for the whole write keeps lines from interleaving
		let formatted = self.format_line(line);
		let mut stderr = std::io::stderr().lock();
		let _ = writeln!(stderr, "{}", formatted);
	}
}

/// Forwards lines to `tracing` at the matching level
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
	fn write_line(&self, severity: Severity, line: &str) {
		match severity {
			Severity::Debug => tracing::debug!(target: "console", "{}", line),
			Severity::Log | Severity::Info => tracing::info!(target: "console", "{}", line),
			Severity::Warn => tracing::warn!(target: "console", "{}", line),
			Severity::Error => tracing::error!(target: "console", "{}", line),
		}
	}
}

/// Keeps every line in memory
#[derive(Debug, Default)]
pub struct MemorySink {
	lines: Mutex<Vec<(Severity, String)>>,
}

impl MemorySink {
	pub fn new() -> Self {
		Self::default()
	}

	/// Captured lines without their severity
	pub fn lines(&self) -> Vec<String> {
		self.lines.lock().iter().map(|(_, line)| line.clone()).collect()
	}

	/// Captured lines with their severity
	pub fn records(&self) -> Vec<(Severity, String)> {
		self.lines.lock().clone()
	}

	pub fn clear(&self) {
		self.lines.lock().clear();
	}
}

impl LogSink for MemorySink {
	fn write_line(&self, severity: Severity, line: &str) {
		self.lines.lock().push((severity, line.to_string()));
	}
}

/// Join the `Display` form of every argument with single spaces
pub fn stringify(args: &[&dyn Display]) -> String {
	args.iter()
		.map(|arg| arg.to_string())
		.collect::<Vec<_>>()
		.join(" ")
}

/// Web `console` bound to a sink
#[derive(Clone)]
pub struct Console {
	sink: Arc<dyn LogSink>,
}

impl Console {
	pub fn new(sink: Arc<dyn LogSink>) -> Self {
		Self { sink }
	}

	pub fn log(&self, args: &[&dyn Display]) {
		self.emit(Severity::Log, args);
	}

	pub fn error(&self, args: &[&dyn Display]) {
		self.emit(Severity::Error, args);
	}

	pub fn warn(&self, args: &[&dyn Display]) {
		self.emit(Severity::Warn, args);
	}

	pub fn info(&self, args: &[&dyn Display]) {
		self.emit(Severity::Info, args);
	}

	pub fn debug(&self, args: &[&dyn Display]) {
		self.emit(Severity::Debug, args);
	}

	/// Write an `ASSERT:` line when `condition` is false
	pub fn assert(&self, condition: bool, args: &[&dyn Display]) {
		if condition {
			return;
		}
		let message = if args.is_empty() {
			DEFAULT_ASSERT_MESSAGE.to_string()
		} else {
			stringify(args)
		};
		self.sink.write_line(Severity::Error, &format!("ASSERT: {}", message));
	}

	pub fn group(&self, label: &str) {
		self.sink.write_line(Severity::Log, &format!("▸ {}", label));
	}

	/// Grouping is cosmetic only
	pub fn group_end(&self) {}

	/// Best-effort structural print as compact JSON
	pub fn table<T: Serialize + ?Sized>(&self, data: &T) {
		let line = match serde_json::to_string(data) {
			Ok(json) => format!("TABLE: {}", json),
			Err(e) => format!("TABLE: <unserializable: {}>", e),
		};
		self.sink.write_line(Severity::Log, &line);
	}

	pub fn dir<T: Debug + ?Sized>(&self, obj: &T) {
		self.sink.write_line(Severity::Log, &format!("DIR: {:?}", obj));
	}

	fn emit(&self, severity: Severity, args: &[&dyn Display]) {
		let body = stringify(args);
		let line = match severity.tag() {
			Some(tag) if body.is_empty() => tag.to_string(),
			Some(tag) => format!("{} {}", tag, body),
			None => body,
		};
		self.sink.write_line(severity, &line);
	}
}

impl Default for Console {
	fn default() -> Self {
		Self::new(Arc::new(StderrSink::new()))
	}
}

impl fmt::Debug for Console {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Console").finish_non_exhaustive()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::BTreeMap;
	use std::thread;

	fn capture() -> (Console, Arc<MemorySink>) {
		let sink = Arc::new(MemorySink::new());
		(Console::new(sink.clone()), sink)
	}

	#[test]
	fn test_severity_ordering() {
		assert!(Severity::Debug < Severity::Log);
		assert!(Severity::Info < Severity::Warn);
		assert!(Severity::Warn < Severity::Error);
	}

	#[test]
	fn test_stderr_line_has_timestamp_prefix() {
		let line = StderrSink::new().format_line("ERROR: boom");
		// "YYYY/MM/DD HH:MM:SS" is 19 characters
		let (stamp, rest) = line.split_at(19);
		assert!(chrono::NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).is_ok());
		assert_eq!(&stamp[4..5], "/");
		assert_eq!(&stamp[7..8], "/");
		assert_eq!(rest, " ERROR: boom");
	}

	#[test]
	fn test_stderr_line_without_timestamp() {
		let sink = StderrSink::without_timestamp();
		assert_eq!(sink.format_line("plain"), "plain");
		// Writing must not panic even when stderr is captured
		sink.write_line(Severity::Log, "plain");
	}

	#[test]
	fn test_default_console_writes_to_stderr() {
		let console = Console::default();
		console.info(&[&"stderr", &"sink"]);
		assert_eq!(StderrSink::default().format_line("x").len(), 21);
	}

	#[test]
	fn test_log_has_no_tag() {
		let (console, sink) = capture();
		console.log(&[&"hello", &42]);
		assert_eq!(sink.lines(), vec!["hello 42"]);
	}

	#[test]
	fn test_severity_tags() {
		let (console, sink) = capture();
		console.error(&[&"e"]);
		console.warn(&[&"w"]);
		console.info(&[&"i"]);
		console.debug(&[&"d"]);
		assert_eq!(sink.lines(), vec!["ERROR: e", "WARN: w", "INFO: i", "DEBUG: d"]);
		let severities: Vec<_> = sink.records().into_iter().map(|(s, _)| s).collect();
		assert_eq!(
			severities,
			vec![Severity::Error, Severity::Warn, Severity::Info, Severity::Debug]
		);
	}

	#[test]
	fn test_tag_without_args() {
		let (console, sink) = capture();
		console.error(&[]);
		assert_eq!(sink.lines(), vec!["ERROR:"]);
	}

	#[test]
	fn test_assert_false_logs() {
		let (console, sink) = capture();
		console.assert(false, &[&"x", &"y"]);
		let lines = sink.lines();
		assert_eq!(lines.len(), 1);
		assert!(lines[0].contains("ASSERT:"));
		assert!(lines[0].contains("x y"));
	}

	#[test]
	fn test_assert_true_is_silent() {
		let (console, sink) = capture();
		console.assert(true, &[&"x"]);
		assert!(sink.lines().is_empty());
	}

	#[test]
	fn test_assert_default_message() {
		let (console, sink) = capture();
		console.assert(false, &[]);
		assert_eq!(sink.lines(), vec!["ASSERT: Assertion failed"]);
	}

	#[test]
	fn test_stringify_is_pure() {
		let (_console, sink) = capture();
		assert_eq!(stringify(&[&"a", &1, &true]), "a 1 true");
		assert!(sink.lines().is_empty());
	}

	#[test]
	fn test_group() {
		let (console, sink) = capture();
		console.group("setup");
		console.group_end();
		assert_eq!(sink.lines(), vec!["▸ setup"]);
	}

	#[test]
	fn test_table_json() {
		let (console, sink) = capture();
		let mut row = BTreeMap::new();
		row.insert("a", 1);
		row.insert("b", 2);
		console.table(&vec![row]);
		assert_eq!(sink.lines(), vec![r#"TABLE: [{"a":1,"b":2}]"#]);
	}

	#[test]
	fn test_dir_debug() {
		let (console, sink) = capture();
		console.dir(&Some(3));
		assert_eq!(sink.lines(), vec!["DIR: Some(3)"]);
	}

	#[test]
	fn test_unicode_messages() {
		let (console, sink) = capture();
		console.log(&[&"こんにちは", &"🚀"]);
		assert_eq!(sink.lines(), vec!["こんにちは 🚀"]);
	}

	#[test]
	fn test_concurrent_logging() {
		let (console, sink) = capture();
		let handles: Vec<_> = (0..8)
			.map(|t| {
				let console = console.clone();
				thread::spawn(move || {
					for i in 0..50 {
						console.info(&[&"thread", &t, &"line", &i]);
					}
				})
			})
			.collect();
		for handle in handles {
			handle.join().unwrap();
		}

		let lines = sink.lines();
		assert_eq!(lines.len(), 400);
		assert!(lines.iter().all(|l| l.starts_with("INFO: thread ")));
	}
}
