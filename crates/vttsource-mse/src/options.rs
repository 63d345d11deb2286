//! Per-buffer settings.

use serde::{Deserialize, Serialize};
use vttsource_common::{Error, Result};

/// Settings applied to every source buffer of a media source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceBufferOptions {
    /// Decoded-media quota in bytes. Exceeding it sets `buffer_full`.
    pub capacity_bytes: Option<u64>,
    /// Initial append window start, in seconds.
    pub append_window_start: f64,
    /// Initial append window end, in seconds. `inf` for unbounded.
    pub append_window_end: f64,
}

impl Default for SourceBufferOptions {
    fn default() -> Self {
        Self {
            capacity_bytes: None,
            append_window_start: 0.0,
            append_window_end: f64::INFINITY,
        }
    }
}

impl SourceBufferOptions {
    pub fn validate(&self) -> Result<()> {
        validate_append_window(self.append_window_start, self.append_window_end)?;
        if self.capacity_bytes == Some(0) {
            return Err(Error::parameter("capacity_bytes must be greater than zero"));
        }
        Ok(())
    }
}

/// Window start must be finite and non-negative, and end must be above start.
pub(crate) fn validate_append_window(start: f64, end: f64) -> Result<()> {
    if !start.is_finite() || start < 0.0 {
        return Err(Error::parameter(format!(
            "append window start {} must be a non-negative number",
            start
        )));
    }
    if end.is_nan() || end <= start {
        return Err(Error::parameter(format!(
            "append window end {} must be greater than start {}",
            end, start
        )));
    }
    Ok(())
}
