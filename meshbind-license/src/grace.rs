//! Offline grace-period policy.
//!
//! A license stays usable for a bounded window after its last successful
//! online validation. The window has two thresholds: past the warning
//! threshold the host shows a reconnect nag, past the block threshold a
//! blocking online revalidation is required.

use chrono::{DateTime, Utc};

/// Days offline before the host starts warning.
pub const WARNING_PERIOD_DAYS: i64 = 3;

/// Days offline before usage is blocked pending an online check.
pub const GRACE_PERIOD_DAYS: i64 = 7;

const SECS_PER_DAY: i64 = 24 * 60 * 60;

/// Outcome of the grace-period check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraceState {
    /// Within the quiet window; no user-visible effect.
    Allow,
    /// Past the warning threshold; still usable.
    Warn {
        /// Whole days since the last successful validation.
        days_offline: i64,
    },
    /// Past the grace window; an online revalidation is required.
    Block {
        /// Whole days since the last successful validation.
        days_offline: i64,
    },
}

/// Pure grace-period computation from the last validation time.
///
/// Boundary behavior is inclusive on the allow/warn side: exactly 3 days
/// offline still allows quietly, exactly 7 days still warns.
#[must_use]
pub fn check_grace_period(last_validation_at: DateTime<Utc>, now: DateTime<Utc>) -> GraceState {
    let elapsed_secs = (now - last_validation_at).num_seconds().max(0);
    let days_offline = elapsed_secs / SECS_PER_DAY;

    if elapsed_secs <= WARNING_PERIOD_DAYS * SECS_PER_DAY {
        GraceState::Allow
    } else if elapsed_secs <= GRACE_PERIOD_DAYS * SECS_PER_DAY {
        GraceState::Warn { days_offline }
    } else {
        GraceState::Block { days_offline }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn state_at(secs_ago: i64) -> GraceState {
        let now = Utc::now();
        check_grace_period(now - Duration::seconds(secs_ago), now)
    }

    #[test]
    fn fresh_validation_allows() {
        assert_eq!(state_at(0), GraceState::Allow);
        assert_eq!(state_at(SECS_PER_DAY), GraceState::Allow);
    }

    #[test]
    fn warning_boundary_is_exclusive_below() {
        // 3 days minus a second: still quiet.
        assert_eq!(state_at(3 * SECS_PER_DAY - 1), GraceState::Allow);
        // Exactly 3 days: still quiet (inclusive).
        assert_eq!(state_at(3 * SECS_PER_DAY), GraceState::Allow);
        // 3 days plus a second: warn.
        assert_eq!(
            state_at(3 * SECS_PER_DAY + 1),
            GraceState::Warn { days_offline: 3 }
        );
    }

    #[test]
    fn block_boundary() {
        assert_eq!(
            state_at(7 * SECS_PER_DAY),
            GraceState::Warn { days_offline: 7 }
        );
        assert_eq!(
            state_at(7 * SECS_PER_DAY + 1),
            GraceState::Block { days_offline: 7 }
        );
        assert_eq!(
            state_at(10 * SECS_PER_DAY),
            GraceState::Block { days_offline: 10 }
        );
    }

    #[test]
    fn clock_skew_backwards_allows() {
        // last_validation_at in the future clamps to zero elapsed.
        let now = Utc::now();
        assert_eq!(
            check_grace_period(now + Duration::seconds(3600), now),
            GraceState::Allow
        );
    }
}
