//! Human-readable byte size parsing for `storage.max_upload_size`.

use crate::error::{Error, Result};

/// Parse sizes like `10MB`, `1 GB`, `512B` into bytes.
/// Units are powers of 1024; the unit is required.
pub fn parse_bytes(input: &str) -> Result<u64> {
    let s = input.trim().to_ascii_uppercase();

    let digits_end = s
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| Error::InvalidSize(format!("missing unit in {input:?}")))?;
    let (value, unit) = s.split_at(digits_end);

    let value: u64 = value
        .parse()
        .map_err(|_| Error::InvalidSize(format!("invalid size format: {input}")))?;

    let multiplier: u64 = match unit.trim() {
        "B" => 1,
        "KB" => 1024,
        "MB" => 1024 * 1024,
        "GB" => 1024 * 1024 * 1024,
        "TB" => 1024 * 1024 * 1024 * 1024,
        _ => return Err(Error::InvalidSize(format!("invalid size format: {input}"))),
    };

    value
        .checked_mul(multiplier)
        .ok_or_else(|| Error::InvalidSize(format!("size overflows: {input}")))
}
