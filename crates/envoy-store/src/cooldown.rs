use rusqlite::OptionalExtension;
use tracing::instrument;

use envoy_core::ids::UserId;

use crate::database::Database;
use crate::error::StoreError;

pub struct CooldownRepo {
    db: Database,
}

impl CooldownRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Allow and record `now_secs` when the user has no previous message or
    /// the window has elapsed; otherwise deny without touching state.
    #[instrument(skip(self), fields(user_id = %user))]
    pub fn check_and_set(
        &self,
        user: &UserId,
        now_secs: f64,
        window_secs: f64,
    ) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let last: Option<f64> = conn
                .query_row(
                    "SELECT last_message_at FROM cooldown WHERE user_id = ?1",
                    [user.as_str()],
                    |row| row.get(0),
                )
                .optional()?;

            if last.is_some_and(|last| now_secs - last < window_secs) {
                return Ok(false);
            }

            conn.execute(
                "INSERT INTO cooldown (user_id, last_message_at) VALUES (?1, ?2)
                 ON CONFLICT(user_id) DO UPDATE SET last_message_at = excluded.last_message_at",
                rusqlite::params![user.as_str(), now_secs],
            )?;
            Ok(true)
        })
    }

    pub fn last_message_at(&self, user: &UserId) -> Result<Option<f64>, StoreError> {
        self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT last_message_at FROM cooldown WHERE user_id = ?1",
                    [user.as_str()],
                    |row| row.get(0),
                )
                .optional()?)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_boundaries() {
        let repo = CooldownRepo::new(Database::in_memory().unwrap());
        let user = UserId::from_raw("1");

        assert!(repo.check_and_set(&user, 1000.0, 30.0).unwrap());
        assert!(!repo.check_and_set(&user, 1029.9, 30.0).unwrap());
        assert_eq!(repo.last_message_at(&user).unwrap(), Some(1000.0));
        assert!(repo.check_and_set(&user, 1030.0, 30.0).unwrap());
        assert_eq!(repo.last_message_at(&user).unwrap(), Some(1030.0));
    }

    #[test]
    fn users_are_independent() {
        let repo = CooldownRepo::new(Database::in_memory().unwrap());
        assert!(repo.check_and_set(&UserId::from_raw("1"), 5.0, 30.0).unwrap());
        assert!(repo.check_and_set(&UserId::from_raw("2"), 5.0, 30.0).unwrap());
    }
}
