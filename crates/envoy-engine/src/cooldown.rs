use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use envoy_core::ids::UserId;
use envoy_store::{CooldownRepo, Database, StoreError};

/// Per-user gate on inbound negotiation messages.
pub struct CooldownLimiter {
    repo: CooldownRepo,
    window: Duration,
}

impl CooldownLimiter {
    pub fn new(db: Database, window: Duration) -> Self {
        Self {
            repo: CooldownRepo::new(db),
            window,
        }
    }

    /// Record `now` and allow, or deny leaving state untouched.
    pub fn allow(&self, user: &UserId, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let now_secs = now.timestamp_micros() as f64 / 1_000_000.0;
        let allowed = self
            .repo
            .check_and_set(user, now_secs, self.window.as_secs_f64())?;
        if !allowed {
            debug!(user_id = %user, "message dropped by cooldown");
        }
        Ok(allowed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn limiter() -> CooldownLimiter {
        CooldownLimiter::new(Database::in_memory().unwrap(), Duration::from_secs(30))
    }

    #[test]
    fn boundary_of_the_window() {
        let limiter = limiter();
        let user = UserId::from_raw("1");
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();

        assert!(limiter.allow(&user, t).unwrap());
        assert!(!limiter
            .allow(&user, t + chrono::Duration::milliseconds(29_990))
            .unwrap());
        assert!(limiter
            .allow(&user, t + chrono::Duration::milliseconds(30_010))
            .unwrap());
    }

    #[test]
    fn denied_attempts_do_not_extend_the_window() {
        let limiter = limiter();
        let user = UserId::from_raw("1");
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();

        assert!(limiter.allow(&user, t).unwrap());
        assert!(!limiter.allow(&user, t + chrono::Duration::seconds(20)).unwrap());
        assert!(limiter.allow(&user, t + chrono::Duration::seconds(31)).unwrap());
    }

    #[test]
    fn users_are_independent() {
        let limiter = limiter();
        let t = Utc::now();
        assert!(limiter.allow(&UserId::from_raw("1"), t).unwrap());
        assert!(limiter.allow(&UserId::from_raw("2"), t).unwrap());
    }
}
