//! Recording duration reconciliation
//!
//! Elapsed recording time can come from a start/end timestamp pair or from the
//! counter the recorder keeps in the encounter state. These helpers pick one
//! source with a fixed precedence and render the result identically on every
//! path (live status, pause/resume, report drafts).

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

/// Placeholder rendered when no duration is known (U+2014).
pub const UNKNOWN_DURATION: &str = "\u{2014}";

/// Largest epoch offset (in ms) that still denotes a valid date.
const MAX_EPOCH_MILLIS: f64 = 8.64e15;

/// Naive layouts accepted for textual timestamps, interpreted as UTC.
const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// A point in time as callers hand it over.
#[derive(Debug, Clone, PartialEq)]
pub enum TimeInput {
    Timestamp(DateTime<Utc>),
    /// Milliseconds since the Unix epoch
    EpochMillis(f64),
    Text(String),
}

impl TimeInput {
    /// Resolve to a UTC timestamp, or `None` when the value is not a valid date.
    pub fn to_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            TimeInput::Timestamp(ts) => Some(*ts),
            TimeInput::EpochMillis(ms) => from_epoch_millis(*ms),
            TimeInput::Text(text) => parse_text(text),
        }
    }
}

impl From<DateTime<Utc>> for TimeInput {
    fn from(ts: DateTime<Utc>) -> Self {
        TimeInput::Timestamp(ts)
    }
}

impl From<i64> for TimeInput {
    fn from(ms: i64) -> Self {
        TimeInput::EpochMillis(ms as f64)
    }
}

impl From<f64> for TimeInput {
    fn from(ms: f64) -> Self {
        TimeInput::EpochMillis(ms)
    }
}

impl From<&str> for TimeInput {
    fn from(text: &str) -> Self {
        TimeInput::Text(text.to_string())
    }
}

impl From<String> for TimeInput {
    fn from(text: String) -> Self {
        TimeInput::Text(text)
    }
}

fn from_epoch_millis(ms: f64) -> Option<DateTime<Utc>> {
    if !ms.is_finite() {
        return None;
    }
    let whole = ms.trunc();
    if whole.abs() > MAX_EPOCH_MILLIS {
        return None;
    }
    Utc.timestamp_millis_opt(whole as i64).single()
}

fn parse_text(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = DateTime::parse_from_rfc2822(text) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Floor a seconds value and clamp it at zero.
fn whole_seconds(seconds: f64) -> u64 {
    let floored = seconds.floor();
    if floored <= 0.0 {
        0
    } else {
        // saturating cast
        floored as u64
    }
}

/// Compute elapsed recording seconds.
///
/// A valid `start`/`end` pair wins and yields `floor((end - start) / 1000)` in
/// seconds, never negative. Otherwise a finite `explicit_seconds` is floored
/// and clamped at zero. With neither, the result is `None`: the duration is
/// unknown, which is not the same as a measured zero.
pub fn compute_duration_seconds(
    start: Option<TimeInput>,
    end: Option<TimeInput>,
    explicit_seconds: Option<f64>,
) -> Option<u64> {
    let start = start.as_ref().and_then(TimeInput::to_timestamp);
    let end = end.as_ref().and_then(TimeInput::to_timestamp);

    if let (Some(start), Some(end)) = (start, end) {
        let elapsed_ms = end.signed_duration_since(start).num_milliseconds();
        return Some(u64::try_from(elapsed_ms / 1000).unwrap_or(0));
    }

    explicit_seconds
        .filter(|seconds| seconds.is_finite())
        .map(whole_seconds)
}

/// Render whole seconds as `M:SS`, or `H:MM:SS` from one hour upwards.
pub fn format_seconds(total: u64) -> String {
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

/// Render an optional seconds value for display.
///
/// `None` (and NaN) render as [`UNKNOWN_DURATION`] so an unknown length is
/// never mistaken for `0:00`.
pub fn format_duration(seconds: Option<f64>) -> String {
    match seconds {
        Some(seconds) if !seconds.is_nan() => format_seconds(whole_seconds(seconds)),
        _ => UNKNOWN_DURATION.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn text(value: &str) -> Option<TimeInput> {
        Some(TimeInput::from(value))
    }

    /// Inverse of `format_seconds`, for round-trip checks
    fn reparse(rendered: &str) -> u64 {
        rendered
            .split(':')
            .map(|part| part.parse::<u64>().unwrap())
            .fold(0, |acc, part| acc * 60 + part)
    }

    #[test]
    fn test_timestamp_pair_wins() {
        let seconds = compute_duration_seconds(
            text("2024-01-01T10:00:00Z"),
            text("2024-01-01T10:05:10Z"),
            Some(9999.0),
        );
        assert_eq!(seconds, Some(310));
    }

    #[test]
    fn test_end_before_start_is_zero() {
        let seconds = compute_duration_seconds(
            text("2024-01-01T10:05:10Z"),
            text("2024-01-01T10:00:00Z"),
            None,
        );
        assert_eq!(seconds, Some(0));
    }

    #[test]
    fn test_sub_second_difference_floors() {
        let seconds = compute_duration_seconds(
            text("2024-01-01T10:00:00.000Z"),
            text("2024-01-01T10:00:01.999Z"),
            None,
        );
        assert_eq!(seconds, Some(1));
    }

    #[test]
    fn test_explicit_fallback() {
        assert_eq!(compute_duration_seconds(None, None, Some(125.0)), Some(125));
        assert_eq!(compute_duration_seconds(None, None, Some(125.9)), Some(125));
        assert_eq!(compute_duration_seconds(None, None, Some(-5.0)), Some(0));
    }

    #[test]
    fn test_single_timestamp_falls_back_to_explicit() {
        let seconds = compute_duration_seconds(text("2024-01-01T10:00:00Z"), None, Some(42.0));
        assert_eq!(seconds, Some(42));
    }

    #[test]
    fn test_unusable_inputs_are_unknown() {
        assert_eq!(
            compute_duration_seconds(text("not a date"), text("also not"), None),
            None
        );
        assert_eq!(compute_duration_seconds(None, None, None), None);
        assert_eq!(compute_duration_seconds(None, None, Some(f64::NAN)), None);
        assert_eq!(compute_duration_seconds(text(""), text("   "), None), None);
    }

    #[test]
    fn test_epoch_millis_and_mixed_inputs() {
        let start = TimeInput::from(1_704_103_200_000_i64); // 2024-01-01T10:00:00Z
        let seconds = compute_duration_seconds(Some(start), text("2024-01-01T10:01:00Z"), None);
        assert_eq!(seconds, Some(60));

        let invalid = TimeInput::EpochMillis(f64::INFINITY);
        assert_eq!(invalid.to_timestamp(), None);
        assert_eq!(TimeInput::EpochMillis(9.0e15).to_timestamp(), None);
    }

    #[test]
    fn test_textual_layouts() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        for value in [
            "2024-01-01T10:00:00Z",
            "2024-01-01T12:00:00+02:00",
            "2024-01-01T10:00:00",
            "2024-01-01 10:00:00",
            "2024-01-01T10:00",
            "Mon, 01 Jan 2024 10:00:00 +0000",
        ] {
            assert_eq!(TimeInput::from(value).to_timestamp(), Some(expected), "{}", value);
        }

        let midnight = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(TimeInput::from("2024-01-01").to_timestamp(), Some(midnight));
    }

    #[test]
    fn test_format_duration_cases() {
        assert_eq!(format_duration(Some(65.0)), "1:05");
        assert_eq!(format_duration(Some(3661.0)), "1:01:01");
        assert_eq!(format_duration(Some(0.0)), "0:00");
        assert_eq!(format_duration(Some(-30.0)), "0:00");
        assert_eq!(format_duration(Some(59.99)), "0:59");
        assert_eq!(format_duration(Some(360_000.0)), "100:00:00");
    }

    #[test]
    fn test_format_duration_unknown() {
        assert_eq!(format_duration(None), "\u{2014}");
        assert_eq!(format_duration(Some(f64::NAN)), UNKNOWN_DURATION);
        assert_ne!(format_duration(None), format_duration(Some(0.0)));
    }

    // Property-based tests
    proptest! {
        #[test]
        fn prop_format_round_trips(seconds in 0u64..10_000_000) {
            let rendered = format_seconds(seconds);
            let parts: Vec<&str> = rendered.split(':').collect();

            if seconds >= 3600 {
                prop_assert_eq!(parts.len(), 3);
                prop_assert_eq!(parts[1].len(), 2);
                prop_assert_eq!(parts[2].len(), 2);
            } else {
                prop_assert_eq!(parts.len(), 2);
                prop_assert_eq!(parts[1].len(), 2);
            }
            prop_assert_eq!(reparse(&rendered), seconds);
        }

        #[test]
        fn prop_duration_never_negative(start in -1_000_000_000i64..1_000_000_000, end in -1_000_000_000i64..1_000_000_000) {
            let seconds = compute_duration_seconds(
                Some(TimeInput::from(start)),
                Some(TimeInput::from(end)),
                None,
            );
            let expected = if end >= start { ((end - start) / 1000) as u64 } else { 0 };
            prop_assert_eq!(seconds, Some(expected));
        }

        #[test]
        fn prop_explicit_seconds_clamped(value in -1.0e9f64..1.0e9) {
            let seconds = compute_duration_seconds(None, None, Some(value)).unwrap();
            prop_assert_eq!(seconds, value.floor().max(0.0) as u64);
        }
    }
}
