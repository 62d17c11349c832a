use std::fmt;

use tracing::info;

use envoy_store::{Database, PressLockRepo, StoreError};

pub const PRESS_LOCKED_NOTICE: &str = "⚠️ The AI's press is currently locked. No negotiations are being accepted until adjudication and outreach.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PressLockState {
    Unlocked,
    Locked,
}

impl fmt::Display for PressLockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unlocked => "unlocked",
            Self::Locked => "locked",
        })
    }
}

/// Gate on negotiation DMs. Locked after orders, unlocked after outreach.
pub struct PressLock {
    repo: PressLockRepo,
}

impl PressLock {
    pub fn new(db: Database) -> Self {
        Self {
            repo: PressLockRepo::new(db),
        }
    }

    pub fn state(&self) -> Result<PressLockState, StoreError> {
        Ok(if self.repo.is_locked()? {
            PressLockState::Locked
        } else {
            PressLockState::Unlocked
        })
    }

    pub fn is_locked(&self) -> Result<bool, StoreError> {
        self.repo.is_locked()
    }

    pub fn lock(&self) -> Result<(), StoreError> {
        self.repo.set_locked(true)?;
        info!("press locked");
        Ok(())
    }

    pub fn unlock(&self) -> Result<(), StoreError> {
        self.repo.set_locked(false)?;
        info!("press unlocked");
        Ok(())
    }
}
