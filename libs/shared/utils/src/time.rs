// Timezone helpers shared across booking channels. All customer-facing
// datetimes are rendered in the spa's local timezone.
use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::America::New_York;
use chrono_tz::Tz;
use uuid::Uuid;

pub const SPA_TZ: Tz = New_York;

/// Generate an opaque identifier for a new entity.
pub fn new_id() -> Uuid {
    Uuid::new_v4()
}

/// Parse ISO 8601 datetime strings, handling trailing 'Z' and naive values.
///
/// Naive values (no offset) are interpreted as spa-local wall time.
pub fn parse_iso_datetime(value: &str) -> Result<DateTime<Utc>> {
    let normalized = value.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(normalized) {
        return Ok(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(normalized, format) {
            return SPA_TZ
                .from_local_datetime(&naive)
                .single()
                .map(|dt| dt.with_timezone(&Utc))
                .ok_or_else(|| anyhow!("Ambiguous local datetime: {}", value));
        }
    }

    Err(anyhow!("Invalid ISO 8601 datetime: {}", value))
}

/// Wall-clock view of a datetime string as written, without zone conversion.
///
/// Used for slot matching: "2 PM Eastern" and "2 PM with no zone" should
/// compare equal on the naive wall time even when offsets differ.
pub fn naive_wall_time(value: &str) -> Result<NaiveDateTime> {
    let normalized = value.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(normalized) {
        return Ok(dt.naive_local());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(normalized, format) {
            return Ok(naive);
        }
    }

    Err(anyhow!("Invalid ISO 8601 datetime: {}", value))
}

pub fn to_spa_tz(dt: DateTime<Utc>) -> DateTime<Tz> {
    dt.with_timezone(&SPA_TZ)
}

/// YYYY-MM-DD in spa-local time.
pub fn spa_date_string(dt: DateTime<Utc>) -> String {
    to_spa_tz(dt).format("%Y-%m-%d").to_string()
}

pub fn spa_date(dt: DateTime<Utc>) -> NaiveDate {
    to_spa_tz(dt).date_naive()
}

/// Human-friendly datetime string tuned per channel.
///
/// Voice leads with the time ("2:00 PM on November 20, 2025"); text channels
/// lead with the date.
pub fn format_for_display(dt: DateTime<Utc>, channel: &str) -> String {
    let localized = to_spa_tz(dt);
    let date_part = localized.format("%B %d, %Y").to_string().replace(" 0", " ");
    let time_part = localized
        .format("%I:%M %p")
        .to_string()
        .trim_start_matches('0')
        .to_string();

    if channel == "voice" {
        format!("{} on {}", time_part, date_part)
    } else {
        format!("{} at {}", date_part, time_part)
    }
}

/// 12-hour clock label for a slot, e.g. "02:00 PM".
pub fn clock_label(dt: DateTime<Utc>) -> String {
    to_spa_tz(dt).format("%I:%M %p").to_string()
}
