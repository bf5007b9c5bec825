// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Brute-force lockout decisions.
//!
//! Pure functions over the failed-attempt counter. Persisting the result is
//! the credential store's job (see `CredentialStore::record_failed_attempt`),
//! which applies [`LockoutPolicy::on_failure`] inside one write transaction.

use chrono::{DateTime, Duration, Utc};

/// Counter and lock timestamp as stored on the user row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutState {
    pub failed_attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
}

impl LockoutState {
    pub fn is_locked_at(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| now < until)
    }
}

/// Thresholds taken from the security configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutPolicy {
    pub max_attempts: u32,
    pub lockout_duration: Duration,
}

impl LockoutPolicy {
    pub fn new(max_attempts: u32, lockout_duration: Duration) -> Self {
        Self {
            max_attempts,
            lockout_duration,
        }
    }

    /// Count one more failure. Reaching `max_attempts` locks the account for
    /// `lockout_duration` from `now`.
    ///
    /// The counter is not reset when a lock elapses, so a failure after an
    /// expired lock locks again immediately. Only a success clears it.
    pub fn on_failure(&self, failed_attempts: u32, now: DateTime<Utc>) -> LockoutState {
        let failed_attempts = failed_attempts.saturating_add(1);
        let locked_until = (failed_attempts >= self.max_attempts).then(|| now + self.lockout_duration);
        LockoutState {
            failed_attempts,
            locked_until,
        }
    }

    pub fn on_success(&self) -> LockoutState {
        LockoutState {
            failed_attempts: 0,
            locked_until: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> LockoutPolicy {
        LockoutPolicy::new(5, Duration::minutes(15))
    }

    #[test]
    fn four_failures_leave_the_account_unlocked() {
        let now = Utc::now();
        let mut state = LockoutState {
            failed_attempts: 0,
            locked_until: None,
        };
        for _ in 0..4 {
            state = policy().on_failure(state.failed_attempts, now);
        }
        assert_eq!(state.failed_attempts, 4);
        assert_eq!(state.locked_until, None);
    }

    #[test]
    fn fifth_failure_locks_for_the_configured_duration() {
        let now = Utc::now();
        let state = policy().on_failure(4, now);
        assert_eq!(state.failed_attempts, 5);
        assert_eq!(state.locked_until, Some(now + Duration::minutes(15)));
        assert!(state.is_locked_at(now + Duration::minutes(14)));
        assert!(!state.is_locked_at(now + Duration::minutes(15)));
    }

    #[test]
    fn failure_after_an_elapsed_lock_relocks() {
        let now = Utc::now();
        let state = policy().on_failure(5, now);
        assert_eq!(state.failed_attempts, 6);
        assert!(state.is_locked_at(now));
    }

    #[test]
    fn success_clears_everything() {
        assert_eq!(
            policy().on_success(),
            LockoutState {
                failed_attempts: 0,
                locked_until: None
            }
        );
    }

    #[test]
    fn counter_saturates() {
        let state = policy().on_failure(u32::MAX, Utc::now());
        assert_eq!(state.failed_attempts, u32::MAX);
    }
}
