//! Date parsing for request bodies and relative-time labels for responses.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer};

/// Accepts RFC 3339 timestamps or plain `YYYY-MM-DD` dates (midnight UTC).
pub fn parse_flexible(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

pub fn deserialize_ts<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => parse_flexible(&raw)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid date '{}'", raw))),
    }
}

/// Distinguishes an absent field (`None`) from an explicit null (`Some(None)`).
/// Use with `#[serde(default)]`.
pub fn deserialize_patch<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Patch variant of [`deserialize_ts`].
pub fn deserialize_patch_ts<'de, D>(
    deserializer: D,
) -> Result<Option<Option<DateTime<Utc>>>, D::Error>
where
    D: Deserializer<'de>,
{
    deserialize_ts(deserializer).map(Some)
}

/// "Just now", "5 minutes ago", "1 hour ago", "3 days ago".
pub fn time_ago(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - then).num_seconds().max(0);
    let days = secs / 86_400;
    let hours = secs / 3_600;
    let minutes = secs / 60;

    let (n, unit) = if days > 0 {
        (days, "day")
    } else if hours > 0 {
        (hours, "hour")
    } else if minutes > 0 {
        (minutes, "minute")
    } else {
        return "Just now".to_string();
    };
    format!("{} {}{} ago", n, unit, if n == 1 { "" } else { "s" })
}

/// Compact form used by activity feeds: "Just now", "5m ago", "2h ago", "3d ago".
pub fn time_ago_short(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - then).num_seconds().max(0);
    if secs >= 86_400 {
        format!("{}d ago", secs / 86_400)
    } else if secs >= 3_600 {
        format!("{}h ago", secs / 3_600)
    } else if secs >= 60 {
        format!("{}m ago", secs / 60)
    } else {
        "Just now".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_parse_flexible() {
        let midnight = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        assert_eq!(parse_flexible("2025-03-01"), Some(midnight));
        assert_eq!(parse_flexible("2025-03-01T00:00:00Z"), Some(midnight));
        assert_eq!(
            parse_flexible("2025-03-01T02:00:00+02:00"),
            Some(midnight)
        );
        assert_eq!(parse_flexible("March 1st"), None);
    }

    #[test]
    fn test_time_ago_forms() {
        let now = Utc::now();
        assert_eq!(time_ago(now - Duration::seconds(30), now), "Just now");
        assert_eq!(time_ago(now - Duration::minutes(1), now), "1 minute ago");
        assert_eq!(time_ago(now - Duration::minutes(5), now), "5 minutes ago");
        assert_eq!(time_ago(now - Duration::hours(1), now), "1 hour ago");
        assert_eq!(time_ago(now - Duration::days(3), now), "3 days ago");
        // Clock skew never yields a negative label.
        assert_eq!(time_ago(now + Duration::minutes(2), now), "Just now");
    }

    #[test]
    fn test_time_ago_short_forms() {
        let now = Utc::now();
        assert_eq!(time_ago_short(now - Duration::seconds(59), now), "Just now");
        assert_eq!(time_ago_short(now - Duration::minutes(12), now), "12m ago");
        assert_eq!(time_ago_short(now - Duration::hours(2), now), "2h ago");
        assert_eq!(time_ago_short(now - Duration::days(4), now), "4d ago");
    }

    #[derive(Deserialize)]
    struct Patch {
        #[serde(default, deserialize_with = "deserialize_patch")]
        note: Option<Option<String>>,
        #[serde(default, deserialize_with = "deserialize_patch_ts")]
        due: Option<Option<DateTime<Utc>>>,
    }

    #[test]
    fn test_patch_distinguishes_null_from_absent() {
        let absent: Patch = serde_json::from_str("{}").unwrap();
        assert!(absent.note.is_none() && absent.due.is_none());

        let cleared: Patch = serde_json::from_str(r#"{"note": null, "due": null}"#).unwrap();
        assert_eq!(cleared.note, Some(None));
        assert_eq!(cleared.due, Some(None));

        let set: Patch = serde_json::from_str(r#"{"note": "hi", "due": "2025-01-02"}"#).unwrap();
        assert_eq!(set.note, Some(Some("hi".to_string())));
        assert!(matches!(set.due, Some(Some(_))));
    }
}
