//! Human-readable time helpers
//!
//! Source platforms report track lengths as clock text ("3:45", "1:02:03");
//! log lines and user-facing confirmations want the same shape back.

use crate::{Error, Result};

/// Parse clock text into seconds.
///
/// Accepts `mm:ss` and `hh:mm:ss`. Anything else is rejected.
pub fn parse_clock_text(text: &str) -> Result<u64> {
    let parts: Vec<&str> = text.trim().split(':').collect();

    let as_num = |s: &str| -> Result<u64> {
        s.parse::<u64>()
            .map_err(|_| Error::InvalidTimeFormat(text.to_string()))
    };

    match parts.as_slice() {
        [m, s] => Ok(as_num(m)? * 60 + as_num(s)?),
        [h, m, s] => Ok(as_num(h)? * 3600 + as_num(m)? * 60 + as_num(s)?),
        _ => Err(Error::InvalidTimeFormat(text.to_string())),
    }
}

/// Format seconds as clock text.
///
/// Durations under an hour render as `m:ss`, longer ones as `h:mm:ss`.
pub fn format_seconds(total_secs: u64) -> String {
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minutes_seconds() {
        assert_eq!(parse_clock_text("3:45").unwrap(), 225);
        assert_eq!(parse_clock_text("0:07").unwrap(), 7);
    }

    #[test]
    fn test_parse_hours_minutes_seconds() {
        assert_eq!(parse_clock_text("1:02:03").unwrap(), 3723);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_clock_text("345").is_err());
        assert!(parse_clock_text("1:2:3:4").is_err());
        assert!(parse_clock_text("a:bc").is_err());
    }

    #[test]
    fn test_format_round_trip() {
        assert_eq!(format_seconds(225), "3:45");
        assert_eq!(format_seconds(3723), "1:02:03");
        assert_eq!(format_seconds(0), "0:00");
        assert_eq!(parse_clock_text(&format_seconds(3723)).unwrap(), 3723);
    }
}
