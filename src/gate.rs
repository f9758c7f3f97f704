//! Debounce decision for room-supply notifications.
//!
//! The gate is evaluated on every observed mutation, including the one caused
//! by our own `notified` write. Because it always compares the record's
//! current `requested` against its current `notified`, that echo evaluates to
//! "not due" without any extra bookkeeping.
use chrono::{DateTime, Duration, Utc};

/// Whether a notification is due for a record.
///
/// - no `requested`: nothing outstanding, never due;
/// - no `notified`: never notified, always due;
/// - otherwise due once `requested - notified >= cooldown`.
///
/// `now` does not take part in the decision: a request is judged against
/// the last notification, not against the wall clock.
pub fn is_due(
    requested: Option<DateTime<Utc>>,
    notified: Option<DateTime<Utc>>,
    cooldown: Duration,
    _now: DateTime<Utc>,
) -> bool {
    let Some(requested) = requested else {
        return false;
    };
    match notified {
        None => true,
        Some(notified) => requested - notified >= cooldown,
    }
}

/// Timestamp shown in the message: never later than `now`, so a request
/// stamped by a fast clock still reads as past.
pub fn display_time(requested: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    requested.min(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ms(value: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(value).unwrap()
    }

    fn now() -> DateTime<Utc> {
        ms(20_000_000)
    }

    #[test]
    fn nothing_requested_is_never_due() {
        let cooldown = Duration::minutes(5);
        assert!(!is_due(None, None, cooldown, now()));
        assert!(!is_due(None, Some(ms(0)), cooldown, now()));
        assert!(!is_due(None, Some(ms(10_000_000)), Duration::zero(), now()));
    }

    #[test]
    fn first_request_is_always_due() {
        for cooldown in [Duration::zero(), Duration::minutes(5), Duration::days(365)] {
            assert!(is_due(Some(ms(0)), None, cooldown, now()));
            assert!(is_due(Some(ms(1_000_000)), None, cooldown, now()));
        }
    }

    #[test]
    fn request_inside_cooldown_is_suppressed() {
        let t = 5_000_000;
        let minute = Duration::milliseconds(60_000);
        assert!(!is_due(Some(ms(t)), Some(ms(t - 1)), minute, now()));
        assert!(!is_due(Some(ms(1_000_000)), Some(ms(990_000)), Duration::minutes(5), now()));
    }

    #[test]
    fn request_after_cooldown_is_due() {
        let t = 5_000_000;
        let minute = Duration::milliseconds(60_000);
        assert!(is_due(Some(ms(t)), Some(ms(t - 120_000)), minute, now()));
        assert!(is_due(Some(ms(t)), Some(ms(t - 60_000)), minute, now()));
    }

    #[test]
    fn acknowledgement_echo_is_not_due() {
        // notified is written after delivery, so it lands at or after requested.
        let requested = ms(1_000_000);
        let notified = ms(1_000_250);
        assert!(!is_due(Some(requested), Some(notified), Duration::minutes(5), now()));
    }

    #[test]
    fn zero_cooldown_compares_against_notified() {
        assert!(!is_due(Some(ms(1_000)), Some(ms(1_001)), Duration::zero(), now()));
        assert!(is_due(Some(ms(1_000)), Some(ms(1_000)), Duration::zero(), now()));
    }

    #[test]
    fn display_time_never_exceeds_now() {
        let now = ms(10_000_000);
        let future = now + Duration::minutes(10);
        assert_eq!(display_time(future, now), now);
        let past = now - Duration::minutes(10);
        assert_eq!(display_time(past, now), past);
    }

    #[test]
    fn wall_clock_does_not_change_the_decision() {
        let requested = Some(ms(1_000_000));
        let notified = Some(ms(990_000));
        let cooldown = Duration::minutes(5);
        for now in [ms(0), ms(1_000_000), ms(1_000_000) + Duration::days(30)] {
            assert!(!is_due(requested, notified, cooldown, now));
            assert!(is_due(requested, None, cooldown, now));
        }
    }
}
