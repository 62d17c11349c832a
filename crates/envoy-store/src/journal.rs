use tracing::instrument;

use crate::database::Database;
use crate::error::StoreError;

/// The singleton strategy journal. Rewritten wholesale, never appended.
pub struct JournalRepo {
    db: Database,
}

impl JournalRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn get(&self) -> Result<String, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT commitments FROM strategy_journal WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .map_err(|_| StoreError::NotFound("strategy_journal row".into()))
        })
    }

    #[instrument(skip(self, commitments), fields(chars = commitments.chars().count()))]
    pub fn set(&self, commitments: &str) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE strategy_journal SET commitments = ?1 WHERE id = 1",
                [commitments],
            )?;
            Ok(())
        })
    }
}
