//! `X-Stream` header parsing.

use crate::error::{Error, Result};

/// Parse a `stream/group` pair. Empty input means "no stream requested".
pub fn parse_stream(value: &str) -> Result<Option<(String, String)>> {
    if value.is_empty() {
        return Ok(None);
    }

    match value.split_once('/') {
        Some((stream, group)) => {
            let stream = stream.trim();
            let group = group.trim();
            if stream.is_empty() || group.is_empty() {
                Err(Error::InvalidStream(
                    "stream must be in format 'stream/group'".to_string(),
                ))
            } else {
                Ok(Some((stream.to_string(), group.to_string())))
            }
        }
        None => Err(Error::InvalidStream(
            "stream must be in format 'stream/group'".to_string(),
        )),
    }
}
