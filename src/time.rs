//! Time types
//!
//! All timestamps in Taskolib are UTC. `TimePoint` is used for step/sequence
//! last-modification and last-execution stamps as well as for `Message` timestamps.

use chrono::{DateTime, Utc};

/// A point in time, always UTC.
pub type TimePoint = DateTime<Utc>;

/// Return the current time.
pub fn now() -> TimePoint {
    Utc::now()
}

/// Render a timestamp the way the persistence format and console output expect it:
/// `YYYY-MM-DD HH:MM:SS UTC`.
pub fn to_string(t: TimePoint) -> String {
    t.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// Parse a timestamp rendered by [`to_string`].
pub fn parse(s: &str) -> Option<TimePoint> {
    let s = s.trim().trim_end_matches("UTC").trim();
    let naive = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").ok()?;
    Some(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_string_form() {
        let t = now();
        let rendered = to_string(t);
        let parsed = parse(&rendered).expect("parseable");
        // Sub-second precision is dropped by the render format, so compare at second
        // granularity.
        assert_eq!(t.format("%Y-%m-%d %H:%M:%S").to_string(),
                   parsed.format("%Y-%m-%d %H:%M:%S").to_string());
    }

    #[test]
    fn parse_accepts_the_exact_format_produced_by_to_string() {
        let s = "2022-06-13 16:30:32 UTC";
        let t = parse(s).expect("parseable");
        assert_eq!(to_string(t), s);
    }
}
