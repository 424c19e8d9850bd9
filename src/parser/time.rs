//! Timestamp and duration parsing for result documents.

use std::sync::LazyLock;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;

/// `[d.]hh:mm[:ss[.fffffff]]`, the time-span format used by TRX files.
static TIME_SPAN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(\d+)\.)?(\d{1,2}):(\d{1,2})(?::(\d{1,2})(?:\.(\d{1,9}))?)?$")
        .expect("time span pattern is valid")
});

/// Parses a timestamp; values without an offset are taken as UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Parses a non-negative time span such as `00:00:02.5000000`.
///
/// Returns `None` for negative, out-of-range or unrecognized input.
pub fn parse_duration(value: &str) -> Option<Duration> {
    let caps = TIME_SPAN_RE.captures(value.trim())?;
    let number = |index: usize| -> Option<u64> {
        caps.get(index)
            .map_or(Some(0), |m| m.as_str().parse::<u64>().ok())
    };

    let days = number(1)?;
    let hours = number(2)?;
    let minutes = number(3)?;
    let seconds = number(4)?;
    if hours > 23 || minutes > 59 || seconds > 59 {
        return None;
    }

    let nanos = match caps.get(5) {
        Some(fraction) => {
            let digits = fraction.as_str();
            let scale = 10u32.pow(9 - digits.len() as u32);
            digits.parse::<u32>().ok()? * scale
        }
        None => 0,
    };

    let total_secs = days
        .checked_mul(86_400)?
        .checked_add(hours * 3_600 + minutes * 60 + seconds)?;
    Some(Duration::new(total_secs, nanos))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_timestamp_with_offset() {
        let ts = parse_timestamp("2017-06-29T12:09:21.3540000+05:30").unwrap();
        assert_eq!(
            ts,
            Utc.with_ymd_and_hms(2017, 6, 29, 6, 39, 21).unwrap()
                + chrono::Duration::milliseconds(354)
        );
    }

    #[test]
    fn test_parse_timestamp_without_offset_is_utc() {
        let ts = parse_timestamp("2017-06-29T12:09:21").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2017, 6, 29, 12, 9, 21).unwrap());
        assert!(parse_timestamp("2017-06-29").is_some());
    }

    #[test]
    fn test_parse_timestamp_rejects_garbage() {
        assert!(parse_timestamp("yesterday").is_none());
        assert!(parse_timestamp("").is_none());
    }

    #[test]
    fn test_parse_duration_forms() {
        assert_eq!(parse_duration("00:00:02"), Some(Duration::from_secs(2)));
        assert_eq!(
            parse_duration("00:00:01.5000000"),
            Some(Duration::from_millis(1500))
        );
        assert_eq!(
            parse_duration("1.02:03:04"),
            Some(Duration::from_secs(86_400 + 2 * 3600 + 3 * 60 + 4))
        );
        assert_eq!(parse_duration("01:30"), Some(Duration::from_secs(5400)));
    }

    #[test]
    fn test_parse_duration_rejects_invalid() {
        assert_eq!(parse_duration("-00:00:01"), None);
        assert_eq!(parse_duration("00:61:00"), None);
        assert_eq!(parse_duration("two seconds"), None);
    }
}
