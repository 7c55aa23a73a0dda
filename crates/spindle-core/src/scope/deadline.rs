//! Deadline resolution: relative timeout + absolute deadline -> one deadline.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Effective deadline for an attempt starting at `now`.
///
/// The tighter bound wins when both are set. `None` means the attempt is only
/// bounded by explicit cancellation.
pub fn resolve(
    timeout: Option<Duration>,
    deadline: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let by_timeout = timeout.filter(|t| !t.is_zero()).map(|t| add_saturating(now, t));
    match (by_timeout, deadline) {
        (None, None) => None,
        (Some(at), None) | (None, Some(at)) => Some(at),
        (Some(a), Some(b)) => Some(a.min(b)),
    }
}

fn add_saturating(now: DateTime<Utc>, timeout: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(timeout)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn secs(n: i64) -> chrono::Duration {
        chrono::Duration::seconds(n)
    }

    #[test]
    fn no_timeout_and_no_deadline_is_unbounded() {
        assert_eq!(resolve(None, None, t0()), None);
        assert_eq!(resolve(Some(Duration::ZERO), None, t0()), None);
    }

    #[rstest]
    #[case::only_timeout(Some(10), None, t0() + secs(10))]
    #[case::only_deadline(None, Some(t0() + secs(3_600)), t0() + secs(3_600))]
    #[case::timeout_tighter(Some(10), Some(t0() + secs(3_600)), t0() + secs(10))]
    #[case::deadline_tighter(Some(600), Some(t0() + secs(30)), t0() + secs(30))]
    #[case::zero_timeout_ignored(Some(0), Some(t0() + secs(5)), t0() + secs(5))]
    #[case::deadline_in_past(Some(10), Some(t0() - secs(5)), t0() - secs(5))]
    fn picks_the_tighter_bound(
        #[case] timeout_secs: Option<u64>,
        #[case] deadline: Option<DateTime<Utc>>,
        #[case] want: DateTime<Utc>,
    ) {
        let got = resolve(timeout_secs.map(Duration::from_secs), deadline, t0());
        assert_eq!(got, Some(want));
    }

    #[test]
    fn huge_timeout_saturates() {
        let got = resolve(Some(Duration::MAX), None, t0());
        assert_eq!(got, Some(DateTime::<Utc>::MAX_UTC));
    }
}
