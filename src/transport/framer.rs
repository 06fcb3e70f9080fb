//! Reassembles JSON objects from the CLI's stdout lines.
//!
//! A line may hold several objects separated by embedded newlines, and one
//! object may span several lines. Fragments are raw bytes and accumulate until
//! they parse, so a multibyte character cut by a newline is rejoined.

use serde_json::Value;

use crate::error::{JsonDecodeError, SdkError};

pub const DEFAULT_MAX_BUFFER_SIZE: usize = 1024 * 1024;

#[derive(Debug)]
pub struct JsonFramer {
    buffer: Vec<u8>,
    max_buffer_size: usize,
}

impl Default for JsonFramer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BUFFER_SIZE)
    }
}

impl JsonFramer {
    pub fn new(max_buffer_size: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_buffer_size,
        }
    }

    /// Feed one stdout line, returning every object it completed.
    ///
    /// An oversized accumulator or a complete non-object document yields a
    /// decode error and resets the accumulator; framing continues afterwards.
    pub fn push_line(&mut self, line: impl AsRef<[u8]>) -> Vec<Result<Value, SdkError>> {
        let mut out = Vec::new();

        for fragment in line.as_ref().split(|byte| *byte == b'\n') {
            let fragment = trim_ascii(fragment);
            if fragment.is_empty() {
                continue;
            }

            self.buffer.extend_from_slice(fragment);

            if self.buffer.len() > self.max_buffer_size {
                let snippet = self.take_snippet();
                out.push(Err(JsonDecodeError::new(format!(
                    "JSON message exceeded maximum buffer size of {} bytes",
                    self.max_buffer_size
                ))
                .with_line(snippet)
                .into()));
                continue;
            }

            match serde_json::from_slice::<Value>(&self.buffer) {
                Ok(value @ Value::Object(_)) => {
                    self.buffer.clear();
                    out.push(Ok(value));
                }
                Ok(other) => {
                    let snippet = self.take_snippet();
                    out.push(Err(JsonDecodeError::new(format!(
                        "expected a JSON object, got {}",
                        json_kind(&other)
                    ))
                    .with_line(snippet)
                    .into()));
                }
                Err(_) => {}
            }
        }

        out
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    fn take_snippet(&mut self) -> String {
        let bytes = std::mem::take(&mut self.buffer);
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

fn trim_ascii(mut bytes: &[u8]) -> &[u8] {
    while let [first, rest @ ..] = bytes {
        if !first.is_ascii_whitespace() {
            break;
        }
        bytes = rest;
    }
    while let [rest @ .., last] = bytes {
        if !last.is_ascii_whitespace() {
            break;
        }
        bytes = rest;
    }
    bytes
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
