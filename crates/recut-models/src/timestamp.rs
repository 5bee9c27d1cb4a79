//! Timestamp parsing and formatting.
//!
//! Classifier output may carry positions as plain seconds or as clock strings
//! (`HH:MM:SS`, `HH:MM:SS.mmm`, `MM:SS`). Everything downstream works in
//! floating-point seconds.

use thiserror::Error;

/// Longest source the engine will accept (24 hours in seconds).
pub const MAX_SOURCE_DURATION_SECS: f64 = 86_400.0;

/// Timestamp parsing error.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TimestampError {
    #[error("timestamp cannot be empty")]
    Empty,

    #[error("timestamp cannot be negative")]
    Negative,

    #[error("invalid {0} value: {1}")]
    InvalidValue(&'static str, String),

    #[error("invalid timestamp format '{0}', expected HH:MM:SS[.mmm], MM:SS[.mmm] or seconds")]
    InvalidFormat(String),

    #[error("timestamp {0:.3}s exceeds the maximum source duration")]
    TooLarge(f64),
}

fn component(name: &'static str, raw: &str) -> Result<f64, TimestampError> {
    let value: f64 = raw
        .trim()
        .parse()
        .map_err(|_| TimestampError::InvalidValue(name, raw.to_string()))?;
    if !value.is_finite() {
        return Err(TimestampError::InvalidValue(name, raw.to_string()));
    }
    if value < 0.0 {
        return Err(TimestampError::Negative);
    }
    Ok(value)
}

/// Parse a timestamp string to total seconds.
///
/// ```
/// use recut_models::timestamp::parse_timestamp;
/// assert_eq!(parse_timestamp("01:30:00").unwrap(), 5400.0);
/// assert_eq!(parse_timestamp("05:30").unwrap(), 330.0);
/// assert_eq!(parse_timestamp("12.5").unwrap(), 12.5);
/// ```
pub fn parse_timestamp(ts: &str) -> Result<f64, TimestampError> {
    let ts = ts.trim();
    if ts.is_empty() {
        return Err(TimestampError::Empty);
    }

    let parts: Vec<&str> = ts.split(':').collect();
    let total = match parts.as_slice() {
        [secs] => component("seconds", secs)?,
        [mins, secs] => component("minutes", mins)? * 60.0 + component("seconds", secs)?,
        [hours, mins, secs] => {
            component("hours", hours)? * 3600.0
                + component("minutes", mins)? * 60.0
                + component("seconds", secs)?
        }
        _ => return Err(TimestampError::InvalidFormat(ts.to_string())),
    };

    if total > MAX_SOURCE_DURATION_SECS {
        return Err(TimestampError::TooLarge(total));
    }
    Ok(total)
}

/// Format seconds as `HH:MM:SS`, or `HH:MM:SS.mmm` when there is a fractional part.
pub fn format_seconds(total_secs: f64) -> String {
    let total_secs = total_secs.max(0.0);
    let hours = (total_secs / 3600.0).floor() as u32;
    let mins = ((total_secs % 3600.0) / 60.0).floor() as u32;
    let secs = total_secs % 60.0;

    if (secs - secs.floor()).abs() > 0.0005 {
        format!("{:02}:{:02}:{:06.3}", hours, mins, secs)
    } else {
        format!("{:02}:{:02}:{:02}", hours, mins, secs.floor() as u32)
    }
}

/// Seconds with millisecond precision, the form passed to `-ss`/`-t`.
pub fn ffmpeg_seconds(secs: f64) -> String {
    format!("{:.3}", secs.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_clock_formats() {
        assert_eq!(parse_timestamp("00:00:00").unwrap(), 0.0);
        assert_eq!(parse_timestamp("01:30:45").unwrap(), 5445.0);
        assert_eq!(parse_timestamp("53:53").unwrap(), 3233.0);
        assert_eq!(parse_timestamp("90").unwrap(), 90.0);
    }

    #[test]
    fn test_parse_with_milliseconds() {
        let result = parse_timestamp("00:00:30.500").unwrap();
        assert!((result - 30.5).abs() < 0.001);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(parse_timestamp(""), Err(TimestampError::Empty)));
        assert!(matches!(parse_timestamp("  "), Err(TimestampError::Empty)));
        assert!(matches!(parse_timestamp("abc"), Err(TimestampError::InvalidValue(_, _))));
        assert!(matches!(parse_timestamp("-3"), Err(TimestampError::Negative)));
        assert!(matches!(parse_timestamp("1:2:3:4"), Err(TimestampError::InvalidFormat(_))));
        assert!(matches!(parse_timestamp("NaN"), Err(TimestampError::InvalidValue(_, _))));
        assert!(matches!(parse_timestamp("25:00:00"), Err(TimestampError::TooLarge(_))));
    }

    #[test]
    fn test_format_seconds() {
        assert_eq!(format_seconds(0.0), "00:00:00");
        assert_eq!(format_seconds(90.0), "00:01:30");
        assert_eq!(format_seconds(3661.0), "01:01:01");
        assert_eq!(format_seconds(12.25), "00:00:12.250");
    }

    #[test]
    fn test_ffmpeg_seconds() {
        assert_eq!(ffmpeg_seconds(1.5), "1.500");
        assert_eq!(ffmpeg_seconds(-0.1), "0.000");
    }
}
