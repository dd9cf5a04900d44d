//! URLSearchParams
//!
//! An ordered multimap over a URL query string, with the observable behavior of
//! the Web `URLSearchParams` object:
//!
//! - `new URLSearchParams("a=1")` → `UrlSearchParams::new("a=1")`
//! - `params.get("a")`            → `params.get("a")`
//! - `params.getAll("a")`         → `params.get_all("a")`
//! - `params.toString()`          → `params.to_string()`
//!
//! Keys enumerate in insertion order, values in insertion order within a key.
//! Serialization is canonical: keys are emitted in lexicographic order so the
//! same parameters always produce the same string.

use std::fmt;

use url::form_urlencoded;

use crate::error::{BridgeError, BridgeResult};

/// Ordered, multi-valued query parameters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UrlSearchParams {
	/// One slot per distinct key; the value list is never empty
	entries: Vec<(String, Vec<String>)>,
}

impl UrlSearchParams {
	/// Parse a raw query string, with or without the leading `?`.
	///
	/// Segments that cannot be decoded are dropped and the rest of the query is
	/// still parsed. Use [`UrlSearchParams::parse`] to see what was dropped.
	pub fn new(query: &str) -> Self {
		let (params, dropped) = Self::parse(query);
		for warning in &dropped {
			tracing::debug!(%warning, "dropped query fragment");
		}
		params
	}

	/// Parse a raw query string and report every dropped segment.
	///
	/// The accepted set is identical to [`UrlSearchParams::new`].
	pub fn parse(query: &str) -> (Self, Vec<BridgeError>) {
		let query = query.strip_prefix('?').unwrap_or(query);
		let mut params = Self::default();
		let mut dropped = Vec::new();

		for segment in query.split('&') {
			if segment.is_empty() {
				continue;
			}
			match decode_segment(segment) {
				Ok((key, value)) => params.append(key, value),
				Err(err) => dropped.push(err),
			}
		}

		(params, dropped)
	}

	/// First value for `key`, or an empty string when absent
	pub fn get(&self, key: &str) -> String {
		self.get_opt(key).unwrap_or_default().to_string()
	}

	/// First value for `key`, keeping absence distinguishable from `""`
	pub fn get_opt(&self, key: &str) -> Option<&str> {
		self.slot(key)
			.and_then(|values| values.first())
			.map(String::as_str)
	}

	/// All values for `key` in insertion order
	pub fn get_all(&self, key: &str) -> Vec<String> {
		self.slot(key).cloned().unwrap_or_default()
	}

	/// Replace every value of `key` with `value`.
	///
	/// An existing key keeps its enumeration position.
	pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
		let key = key.into();
		let value = value.into();
		match self.entries.iter_mut().find(|(k, _)| *k == key) {
			Some((_, values)) => *values = vec![value],
			None => self.entries.push((key, vec![value])),
		}
	}

	/// Add `value` to `key` without touching existing values
	pub fn append(&mut self, key: impl Into<String>, value: impl Into<String>) {
		let key = key.into();
		let value = value.into();
		match self.entries.iter_mut().find(|(k, _)| *k == key) {
			Some((_, values)) => values.push(value),
			None => self.entries.push((key, vec![value])),
		}
	}

	pub fn has(&self, key: &str) -> bool {
		self.slot(key).is_some()
	}

	/// Remove all values of `key`. Absent keys are ignored.
	pub fn delete(&mut self, key: &str) {
		self.entries.retain(|(k, _)| k != key);
	}

	/// All pairs, keys in insertion order
	pub fn entries(&self) -> Vec<(String, String)> {
		self.iter()
			.map(|(k, v)| (k.to_string(), v.to_string()))
			.collect()
	}

	/// Distinct keys in insertion order
	pub fn keys(&self) -> Vec<String> {
		self.entries.iter().map(|(k, _)| k.clone()).collect()
	}

	/// Every value, flattened in enumeration order
	pub fn values(&self) -> Vec<String> {
		self.iter().map(|(_, v)| v.to_string()).collect()
	}

	/// Call `callback(value, key)` for every pair (value first, as the Web API does)
	pub fn for_each<F>(&self, mut callback: F)
	where
		F: FnMut(&str, &str),
	{
		for (key, value) in self.iter() {
			callback(value, key);
		}
	}

	/// Borrowing iterator over `(key, value)` pairs
	pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
		self.entries
			.iter()
			.flat_map(|(k, values)| values.iter().map(move |v| (k.as_str(), v.as_str())))
	}

	/// Total number of pairs, not distinct keys
	pub fn size(&self) -> usize {
		self.entries.iter().map(|(_, values)| values.len()).sum()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// Reorder keys lexicographically. Stable: values keep their order.
	pub fn sort(&mut self) {
		self.entries.sort_by(|a, b| a.0.cmp(&b.0));
	}

	fn slot(&self, key: &str) -> Option<&Vec<String>> {
		self.entries
			.iter()
			.find(|(k, _)| k == key)
			.map(|(_, values)| values)
	}
}

impl fmt::Display for UrlSearchParams {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let mut sorted: Vec<&(String, Vec<String>)> = self.entries.iter().collect();
		sorted.sort_by(|a, b| a.0.cmp(&b.0));

		let mut serializer = form_urlencoded::Serializer::new(String::new());
		for (key, values) in sorted {
			for value in values {
				serializer.append_pair(key, value);
			}
		}
		f.write_str(&serializer.finish())
	}
}

impl<K, V> FromIterator<(K, V)> for UrlSearchParams
where
	K: Into<String>,
	V: Into<String>,
{
	fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
		let mut params = Self::default();
		params.extend(iter);
		params
	}
}

impl<K, V> Extend<(K, V)> for UrlSearchParams
where
	K: Into<String>,
	V: Into<String>,
{
	fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
		for (key, value) in iter {
			self.append(key, value);
		}
	}
}

impl<'a> IntoIterator for &'a UrlSearchParams {
	type Item = (&'a str, &'a str);
	type IntoIter = Box<dyn Iterator<Item = (&'a str, &'a str)> + 'a>;

	fn into_iter(self) -> Self::IntoIter {
		Box::new(self.iter())
	}
}

/// Decode one `key=value` segment. Missing `=` means an empty value.
fn decode_segment(segment: &str) -> BridgeResult<(String, String)> {
	if segment.contains(';') {
		return Err(BridgeError::malformed_query(
			segment,
			"semicolon separator is not allowed",
		));
	}
	check_escapes(segment)?;

	// The segment holds no '&', so it decodes to exactly one pair
	Ok(form_urlencoded::parse(segment.as_bytes())
		.next()
		.map(|(k, v)| (k.into_owned(), v.into_owned()))
		.unwrap_or_default())
}

/// Every '%' must start a two-digit hex escape
fn check_escapes(segment: &str) -> BridgeResult<()> {
	let bytes = segment.as_bytes();
	let mut i = 0;
	while i < bytes.len() {
		if bytes[i] == b'%' {
			let valid = bytes.len() > i + 2
				&& bytes[i + 1].is_ascii_hexdigit()
				&& bytes[i + 2].is_ascii_hexdigit();
			if !valid {
				return Err(BridgeError::malformed_query(
					segment,
					format!("invalid percent escape at byte {}", i),
				));
			}
			i += 3;
		} else {
			i += 1;
		}
	}
	Ok(())
}
