//! Relative time phrases ("5 minutes ago").
//!
//! Thresholds and rounding follow moment.js `fromNow`, which is what people
//! reading the channel were used to.
use chrono::{DateTime, Utc};

const MS_PER_DAY: f64 = 86_400_000.0;

/// Describe how long ago `then` was relative to `now`. Instants after `now`
/// read as "a few seconds ago".
pub fn time_ago(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let ms = (now - then).num_milliseconds().max(0) as f64;

    let seconds = (ms / 1_000.0).round();
    let minutes = (ms / 60_000.0).round();
    let hours = (ms / 3_600_000.0).round();
    let days = (ms / MS_PER_DAY).round();
    // 400 years have 146097 days and 4800 months.
    let months_exact = ms / MS_PER_DAY * 4_800.0 / 146_097.0;
    let months = months_exact.round();
    let years = (months_exact / 12.0).round();

    let phrase = if seconds < 45.0 {
        "a few seconds".to_string()
    } else if minutes <= 1.0 {
        "a minute".to_string()
    } else if minutes < 45.0 {
        format!("{minutes} minutes")
    } else if hours <= 1.0 {
        "an hour".to_string()
    } else if hours < 22.0 {
        format!("{hours} hours")
    } else if days <= 1.0 {
        "a day".to_string()
    } else if days < 26.0 {
        format!("{days} days")
    } else if months <= 1.0 {
        "a month".to_string()
    } else if months < 11.0 {
        format!("{months} months")
    } else if years <= 1.0 {
        "a year".to_string()
    } else {
        format!("{years} years")
    };
    format!("{phrase} ago")
}
