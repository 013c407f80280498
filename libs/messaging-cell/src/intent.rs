//! Lexical booking-intent and date heuristics for the preemptive
//! availability check. Deliberately cheap: the model remains the authority
//! on ambiguous requests; these triggers only decide whether to prefetch.

use std::sync::OnceLock;

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use regex::Regex;

const BOOKING_TRIGGERS: [&str; 7] = [
    "book",
    "schedule",
    "appointment",
    "availability",
    "opening",
    "slot",
    "reschedule",
];

fn date_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})\b").expect("valid date regex"))
}

fn clock_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b\d{1,2}(:\d{2})?\s*(am|pm|a\.m|p\.m)\b").expect("valid clock regex")
    })
}

pub fn detect_booking_intent(text: &str) -> bool {
    let lowered = text.to_lowercase();
    BOOKING_TRIGGERS
        .iter()
        .any(|trigger| lowered.contains(trigger))
}

pub fn has_clock_phrase(text: &str) -> bool {
    clock_regex().is_match(&text.to_lowercase())
}

/// Resolve a date mention to YYYY-MM-DD relative to `today` (spa-local).
///
/// Understands explicit ISO dates, today/tomorrow, and weekday names (next
/// occurrence, one week out when the name is today's weekday).
pub fn extract_date(text: &str, today: NaiveDate) -> Option<String> {
    let lowered = text.to_lowercase();

    if let Some(captures) = date_regex().captures(&lowered) {
        let year: i32 = captures[1].parse().ok()?;
        let month: u32 = captures[2].parse().ok()?;
        let day: u32 = captures[3].parse().ok()?;
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
            return Some(date.format("%Y-%m-%d").to_string());
        }
    }

    if lowered.contains("tomorrow") {
        return Some((today + Duration::days(1)).format("%Y-%m-%d").to_string());
    }
    if lowered.contains("today") || lowered.contains("tonight") {
        return Some(today.format("%Y-%m-%d").to_string());
    }

    let weekdays = [
        ("monday", Weekday::Mon),
        ("tuesday", Weekday::Tue),
        ("wednesday", Weekday::Wed),
        ("thursday", Weekday::Thu),
        ("friday", Weekday::Fri),
        ("saturday", Weekday::Sat),
        ("sunday", Weekday::Sun),
    ];
    for (name, weekday) in weekdays {
        if lowered.contains(name) {
            let today_num = today.weekday().num_days_from_monday() as i64;
            let target_num = weekday.num_days_from_monday() as i64;
            let mut ahead = (target_num - today_num).rem_euclid(7);
            if ahead == 0 {
                ahead = 7;
            }
            return Some((today + Duration::days(ahead)).format("%Y-%m-%d").to_string());
        }
    }

    None
}
