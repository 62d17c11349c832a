pub mod adjudication;
pub mod claims;
pub mod compactor;
pub mod config;
pub mod coordinator;
pub mod cooldown;
pub mod error;
pub mod journal;
pub mod orders;
pub mod outreach;
pub mod press_lock;
pub mod prompts;
pub mod truncate;

pub use config::EngineConfig;
pub use coordinator::{Coordinator, DmOutcome, OrdersOutcome, OutreachOutcome};
pub use error::EngineError;
