//! Timestamp parsing for segment maps.
//!
//! Supports `H:MM:SS[.frac]`, `MM:SS[.frac]` and plain seconds.

use thiserror::Error;

/// Timestamp parsing/validation error.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TimestampError {
    #[error("Timestamp cannot be empty")]
    Empty,

    #[error("Timestamp cannot be negative")]
    Negative,

    #[error("Invalid {0} value: {1}")]
    InvalidValue(&'static str, String),

    #[error("Invalid timestamp format '{0}'. Use H:MM:SS, H:MM:SS.mmm, MM:SS or SS")]
    InvalidFormat(String),

    #[error("Start time ({start:.3}s) must be before end time ({end:.3}s)")]
    StartNotBeforeEnd { start: f64, end: f64 },
}

/// Parse a timestamp string to total seconds.
///
/// # Examples
/// ```
/// use redub_models::timestamp::parse_timestamp;
/// assert_eq!(parse_timestamp("1:30:00").unwrap(), 5400.0);
/// assert_eq!(parse_timestamp("05:30").unwrap(), 330.0);
/// assert_eq!(parse_timestamp("90").unwrap(), 90.0);
/// ```
pub fn parse_timestamp(ts: &str) -> Result<f64, TimestampError> {
    let ts = ts.trim();
    if ts.is_empty() {
        return Err(TimestampError::Empty);
    }

    let parts: Vec<&str> = ts.split(':').collect();
    let (hours, minutes, seconds) = match parts.as_slice() {
        [s] => ("0", "0", *s),
        [m, s] => ("0", *m, *s),
        [h, m, s] => (*h, *m, *s),
        _ => return Err(TimestampError::InvalidFormat(ts.to_string())),
    };

    let hours = component(hours, "hours")?;
    let minutes = component(minutes, "minutes")?;
    let seconds = component(seconds, "seconds")?;

    Ok(hours * 3600.0 + minutes * 60.0 + seconds)
}

fn component(value: &str, name: &'static str) -> Result<f64, TimestampError> {
    let parsed: f64 = value
        .trim()
        .parse()
        .map_err(|_| TimestampError::InvalidValue(name, value.to_string()))?;
    if !parsed.is_finite() {
        return Err(TimestampError::InvalidValue(name, value.to_string()));
    }
    if parsed < 0.0 {
        return Err(TimestampError::Negative);
    }
    Ok(parsed)
}

/// Parse a start/end pair and require `end > start`.
pub fn parse_range(start: &str, end: &str) -> Result<(f64, f64), TimestampError> {
    let start = parse_timestamp(start)?;
    let end = parse_timestamp(end)?;
    if end <= start {
        return Err(TimestampError::StartNotBeforeEnd { start, end });
    }
    Ok((start, end))
}

/// Format seconds as `HH:MM:SS` or `HH:MM:SS.mmm`.
pub fn format_seconds(total_secs: f64) -> String {
    let hours = (total_secs / 3600.0).floor() as u32;
    let mins = ((total_secs % 3600.0) / 60.0).floor() as u32;
    let secs = total_secs % 60.0;

    if (secs - secs.floor()).abs() > 0.0001 {
        format!("{:02}:{:02}:{:06.3}", hours, mins, secs)
    } else {
        format!("{:02}:{:02}:{:02}", hours, mins, secs.floor() as u32)
    }
}
