use rusqlite::OptionalExtension;
use tracing::{info, instrument};

use crate::database::Database;
use crate::error::StoreError;

/// The singleton press-lock flag. Unlocked on a fresh database.
pub struct PressLockRepo {
    db: Database,
}

impl PressLockRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn is_locked(&self) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let locked = conn
                .query_row("SELECT locked FROM press_lock WHERE id = 1", [], |row| {
                    row.get::<_, i64>(0)
                })
                .optional()?;
            locked
                .map(|locked| locked != 0)
                .ok_or_else(|| StoreError::NotFound("press_lock row".into()))
        })
    }

    #[instrument(skip(self))]
    pub fn set_locked(&self, locked: bool) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE press_lock SET locked = ?1 WHERE id = 1",
                [i64::from(locked)],
            )?;
            Ok(())
        })?;
        info!(locked, "press lock toggled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggles_and_persists() {
        let db = Database::in_memory().unwrap();
        let repo = PressLockRepo::new(db.clone());
        assert!(!repo.is_locked().unwrap());

        repo.set_locked(true).unwrap();
        assert!(PressLockRepo::new(db).is_locked().unwrap());

        repo.set_locked(false).unwrap();
        assert!(!repo.is_locked().unwrap());
    }

    #[test]
    fn missing_row_is_not_found() {
        let db = Database::in_memory().unwrap();
        db.with_conn(|conn| {
            conn.execute("DELETE FROM press_lock", [])?;
            Ok(())
        })
        .unwrap();
        let err = PressLockRepo::new(db).is_locked().unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn sqlite_failures_surface_as_database_errors() {
        let db = Database::in_memory().unwrap();
        db.with_conn(|conn| {
            conn.execute("DROP TABLE press_lock", [])?;
            Ok(())
        })
        .unwrap();
        let err = PressLockRepo::new(db).is_locked().unwrap_err();
        assert!(matches!(err, StoreError::Database(_)), "got {err:?}");
    }
}
