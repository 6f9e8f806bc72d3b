use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};

use crate::error::TypeError;

/// UTC capture time. Thread files keep whole seconds.
pub type Timestamp = DateTime<Utc>;

/// Current time truncated to whole seconds, so values survive a file round trip.
pub fn now() -> Timestamp {
    Utc::now().trunc_subsecs(0)
}

/// Render as RFC 3339 with a `Z` suffix, e.g. `2026-10-17T09:30:00Z`.
pub fn format_timestamp(ts: &Timestamp) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse any RFC 3339 timestamp and normalize it to UTC.
pub fn parse_timestamp(raw: &str) -> Result<Timestamp, TypeError> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| TypeError::InvalidTimestamp {
            value: raw.to_string(),
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn format_uses_z_suffix() {
        let ts = Utc.with_ymd_and_hms(2026, 10, 17, 9, 30, 0).unwrap();
        assert_eq!(format_timestamp(&ts), "2026-10-17T09:30:00Z");
    }

    #[test]
    fn parse_normalizes_offsets() {
        let ts = parse_timestamp("2026-10-17T11:30:00+02:00").unwrap();
        assert_eq!(format_timestamp(&ts), "2026-10-17T09:30:00Z");
    }

    #[test]
    fn now_has_no_subseconds() {
        let ts = now();
        assert_eq!(parse_timestamp(&format_timestamp(&ts)).unwrap(), ts);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse_timestamp("yesterday").is_err());
    }
}
