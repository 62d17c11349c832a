pub mod claims;
pub mod cooldown;
pub mod database;
pub mod error;
pub mod game_state;
pub mod journal;
pub mod press_lock;
pub mod row_helpers;
pub mod schema;
pub mod threads;

pub use claims::{ClaimOutcome, ClaimRepo, ClaimRow};
pub use cooldown::CooldownRepo;
pub use database::Database;
pub use error::StoreError;
pub use game_state::{GameState, GameStateRepo};
pub use journal::JournalRepo;
pub use press_lock::PressLockRepo;
pub use threads::{RefreshUpdate, StaleThread, Thread, ThreadFold, ThreadRepo};
