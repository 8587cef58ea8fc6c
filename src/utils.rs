use chrono::{DateTime, Duration, Utc};

/// A device is online when it was heard from strictly within `liveness` of `now`.
pub fn is_online(last_seen_at: Option<DateTime<Utc>>, liveness: Duration, now: DateTime<Utc>) -> bool {
    last_seen_at.is_some_and(|seen| now - seen < liveness)
}

/// Trimmed copy of `raw`, or `None` when nothing but whitespace remains.
pub fn non_blank(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn liveness_boundary() {
        let now = Utc.with_ymd_and_hms(2025, 3, 5, 12, 0, 0).unwrap();
        let window = Duration::minutes(30);
        assert!(is_online(Some(now - Duration::minutes(29)), window, now));
        assert!(!is_online(Some(now - Duration::minutes(31)), window, now));
        assert!(!is_online(Some(now - Duration::minutes(30)), window, now));
        assert!(!is_online(None, window, now));
    }

    #[test]
    fn blank_strings_are_none() {
        assert_eq!(non_blank(Some("  Kitchen ")), Some("Kitchen".to_string()));
        assert_eq!(non_blank(Some("   ")), None);
        assert_eq!(non_blank(None), None);
    }
}
