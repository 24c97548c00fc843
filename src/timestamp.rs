use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Australia::Melbourne;

/// Upstream update timestamp. Offsets are kept; naive values are UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<FixedOffset>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt);
    }
    for fmt in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Some(Utc.from_utc_datetime(&naive).fixed_offset());
        }
    }
    None
}

/// RFC 3339 in Melbourne local time, whatever offset the provider used.
pub fn render_timestamp(ts: &DateTime<FixedOffset>) -> String {
    ts.with_timezone(&Melbourne).fixed_offset().to_rfc3339()
}

pub fn parse_meeting_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.len() != 10 {
        return None;
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::{parse_meeting_date, parse_timestamp, render_timestamp};

    #[test]
    fn offsets_compare_as_instants() {
        let a = parse_timestamp("2024-05-01T10:00:00+10:00").expect("offset form");
        let b = parse_timestamp("2024-05-01T00:30:00Z").expect("zulu form");
        let c = parse_timestamp("2024-05-01 00:15:00").expect("naive form");
        assert!(b > a);
        assert!(c > a);
        assert!(b > c);
    }

    #[test]
    fn rendering_converts_to_melbourne_time() {
        let render = |raw: &str| render_timestamp(&parse_timestamp(raw).expect("parses"));
        assert_eq!(render("2024-05-01T00:30:00Z"), "2024-05-01T10:30:00+10:00");
        assert_eq!(render("2024-05-01 00:15:00"), "2024-05-01T10:15:00+10:00");
        assert_eq!(render("2024-05-01T10:30:00+10:00"), "2024-05-01T10:30:00+10:00");
        assert_eq!(render("2024-01-15T00:00:00Z"), "2024-01-15T11:00:00+11:00");
    }

    #[test]
    fn junk_timestamps_are_none() {
        assert!(parse_timestamp("yesterday").is_none());
        assert!(parse_timestamp("  ").is_none());
    }

    #[test]
    fn meeting_dates_are_strict() {
        assert!(parse_meeting_date("2024-05-01").is_some());
        assert!(parse_meeting_date("2024-05-01T00:00:00").is_none());
        assert!(parse_meeting_date("01/05/2024").is_none());
    }
}
