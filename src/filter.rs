//! Age filter.

use chrono::{DateTime, Duration, Utc};

use crate::source::Item;

/// Whether `item` is recent enough to relay.
///
/// Posts stamped in the future (clock skew between us and the platform) count
/// as fresh so near-real-time posts are never dropped.
pub fn is_fresh(item: &Item, max_age: Duration, now: DateTime<Utc>) -> bool {
    now.signed_duration_since(item.created_at) <= max_age
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::make_item;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn within_max_age_is_fresh() {
        let max_age = Duration::minutes(30);
        for minutes in [0, 1, 15, 29] {
            let item = make_item("a", "x", now() - Duration::minutes(minutes));
            assert!(is_fresh(&item, max_age, now()), "{minutes} minutes old");
        }
    }

    #[test]
    fn exactly_max_age_is_fresh() {
        let item = make_item("a", "x", now() - Duration::minutes(30));
        assert!(is_fresh(&item, Duration::minutes(30), now()));
    }

    #[test]
    fn strictly_older_is_stale() {
        let max_age = Duration::minutes(30);
        let just_over = make_item("a", "x", now() - Duration::minutes(30) - Duration::seconds(1));
        let ancient = make_item("b", "x", now() - Duration::days(400));
        assert!(!is_fresh(&just_over, max_age, now()));
        assert!(!is_fresh(&ancient, max_age, now()));
    }

    #[test]
    fn future_timestamps_are_fresh() {
        let item = make_item("a", "x", now() + Duration::minutes(5));
        assert!(is_fresh(&item, Duration::minutes(1), now()));
    }
}
