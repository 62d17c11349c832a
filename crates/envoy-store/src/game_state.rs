use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::database::Database;
use crate::error::StoreError;

/// The moderator-published phase and board state. Empty strings mean unset.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameState {
    pub phase: String,
    pub state_text: String,
    pub updated_at: String,
}

impl GameState {
    /// Both phase and state are required before orders or outreach.
    pub fn is_complete(&self) -> bool {
        !self.phase.trim().is_empty() && !self.state_text.trim().is_empty()
    }
}

pub struct GameStateRepo {
    db: Database,
}

impl GameStateRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn get(&self) -> Result<GameState, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT phase, state_text, updated_at FROM game_state WHERE id = 1",
                [],
                |row| {
                    Ok(GameState {
                        phase: row.get(0)?,
                        state_text: row.get(1)?,
                        updated_at: row.get(2)?,
                    })
                },
            )
            .map_err(|_| StoreError::NotFound("game_state row".into()))
        })
    }

    #[instrument(skip(self))]
    pub fn set_phase(&self, phase: &str) -> Result<(), StoreError> {
        let now = self.db.stamp();
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE game_state SET phase = ?1, updated_at = ?2 WHERE id = 1",
                rusqlite::params![phase, now],
            )?;
            Ok(())
        })?;
        info!("phase updated");
        Ok(())
    }

    #[instrument(skip(self, state_text), fields(chars = state_text.len()))]
    pub fn set_state(&self, state_text: &str) -> Result<(), StoreError> {
        let now = self.db.stamp();
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE game_state SET state_text = ?1, updated_at = ?2 WHERE id = 1",
                rusqlite::params![state_text, now],
            )?;
            Ok(())
        })?;
        info!("game state updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_unset() {
        let repo = GameStateRepo::new(Database::in_memory().unwrap());
        let state = repo.get().unwrap();
        assert_eq!(state, GameState::default());
        assert!(!state.is_complete());
    }

    #[test]
    fn phase_and_state_update_independently() {
        let repo = GameStateRepo::new(Database::in_memory().unwrap());
        repo.set_phase("Spring 1901 Movement").unwrap();
        let after_phase = repo.get().unwrap();
        assert_eq!(after_phase.phase, "Spring 1901 Movement");
        assert!(!after_phase.is_complete());

        repo.set_state("Austria: A Vie, A Bud, F Tri").unwrap();
        let full = repo.get().unwrap();
        assert_eq!(full.phase, "Spring 1901 Movement");
        assert_eq!(full.state_text, "Austria: A Vie, A Bud, F Tri");
        assert!(full.updated_at > after_phase.updated_at);
        assert!(full.is_complete());
    }

    #[test]
    fn whitespace_state_is_incomplete() {
        let repo = GameStateRepo::new(Database::in_memory().unwrap());
        repo.set_phase("Fall 1901").unwrap();
        repo.set_state("   \n").unwrap();
        assert!(!repo.get().unwrap().is_complete());
    }
}
