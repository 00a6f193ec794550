//! Line-oriented JSON messaging over pipes.
//!
//! Every message is one line prefixed with `JSON:`. Readers skip any other
//! line, so a child process may print freely to stdout without corrupting
//! the stream.

use std::io::{BufRead, Write};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{HarnessError, Result};

pub const PREFIX: &str = "JSON:";

pub fn write_message<W: Write, T: Serialize>(writer: &mut W, message: &T) -> Result<()> {
    let json = serde_json::to_string(message)?;
    writer.write_all(PREFIX.as_bytes())?;
    writer.write_all(json.as_bytes())?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

/// Next message from `reader`, or `None` at end of stream.
pub fn read_message<R: BufRead, T: DeserializeOwned>(reader: &mut R) -> Result<Option<T>> {
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        if let Some(json) = line.trim().strip_prefix(PREFIX) {
            let message = serde_json::from_str(json).map_err(|e| {
                HarnessError::Protocol(format!("failed to parse message {:?}: {}", json, e))
            })?;
            return Ok(Some(message));
        }
    }
}
