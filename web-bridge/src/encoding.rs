//! TextEncoder / TextDecoder
//!
//! - `new TextEncoder().encode(s)` → `TextEncoder::new().encode(s)` or `text_encode(s)`
//! - `new TextDecoder().decode(b)` → `TextDecoder::new().decode(b)` or `text_decode(b)`

/// The only encoding the codec implements
pub const UTF8: &str = "utf-8";

/// Encode a string as UTF-8 bytes
pub fn text_encode(text: &str) -> Vec<u8> {
	text.as_bytes().to_vec()
}

/// Decode UTF-8 bytes. Invalid sequences become U+FFFD.
pub fn text_decode(bytes: &[u8]) -> String {
	String::from_utf8_lossy(bytes).into_owned()
}

/// Stateless encoder kept for parity with `new TextEncoder()`
#[derive(Debug, Clone, Copy, Default)]
pub struct TextEncoder;

impl TextEncoder {
	pub fn new() -> Self {
		Self
	}

	pub fn encoding(&self) -> &'static str {
		UTF8
	}

	pub fn encode(&self, text: &str) -> Vec<u8> {
		text_encode(text)
	}
}

/// Decoder carrying the encoding label it was constructed with.
///
/// Any label is accepted; decoding is always UTF-8.
#[derive(Debug, Clone)]
pub struct TextDecoder {
	encoding: String,
}

impl TextDecoder {
	pub fn new() -> Self {
		Self {
			encoding: UTF8.to_string(),
		}
	}

	pub fn with_label(label: impl Into<String>) -> Self {
		let encoding = label.into();
		if !encoding.trim().eq_ignore_ascii_case(UTF8) {
			tracing::debug!(label = %encoding, "unsupported encoding label, decoding as utf-8");
		}
		Self { encoding }
	}

	/// The label this decoder was created with
	pub fn encoding(&self) -> &str {
		&self.encoding
	}

	pub fn decode(&self, bytes: &[u8]) -> String {
		text_decode(bytes)
	}
}

impl Default for TextDecoder {
	fn default() -> Self {
		Self::new()
	}
}
