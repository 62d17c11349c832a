//! Settings type definitions.
//!
//! All types use camelCase JSON field names and `#[serde(default)]`, so a
//! settings file only needs the keys it overrides.

use std::path::PathBuf;
use std::time::Duration;

use envoy_core::Country;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EnvoySettings {
    /// The power the bot plays.
    pub ai_country: Country,
    /// Id of the moderator's control channel.
    pub control_channel_id: String,
    /// SQLite database holding claims, threads and game state.
    pub db_path: PathBuf,
    pub completion: CompletionSettings,
    pub threads: ThreadSettings,
    pub cooldown: CooldownSettings,
    pub outreach: OutreachSettings,
    pub journal: JournalSettings,
    pub logging: LoggingSettings,
}

impl Default for EnvoySettings {
    fn default() -> Self {
        Self {
            ai_country: Country::Austria,
            control_channel_id: String::new(),
            db_path: PathBuf::from("envoy.sqlite3"),
            completion: CompletionSettings::default(),
            threads: ThreadSettings::default(),
            cooldown: CooldownSettings::default(),
            outreach: OutreachSettings::default(),
            journal: JournalSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl EnvoySettings {
    /// Reject combinations the pipelines cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.threads.raw_turns_to_keep == 0 {
            return Err(SettingsError::InvalidValue(
                "threads.rawTurnsToKeep must be at least 1".into(),
            ));
        }
        if self.threads.max_chars_per_msg == 0 {
            return Err(SettingsError::InvalidValue(
                "threads.maxCharsPerMsg must be at least 1".into(),
            ));
        }
        if self.outreach.default_budget > self.outreach.max_budget {
            return Err(SettingsError::InvalidValue(format!(
                "outreach.defaultBudget ({}) exceeds outreach.maxBudget ({})",
                self.outreach.default_budget, self.outreach.max_budget
            )));
        }
        if self.completion.timeout_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "completion.timeoutSecs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Completion Service (Responses API) settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompletionSettings {
    pub base_url: String,
    pub model: String,
    /// `flex` is cheaper and slower than `default`.
    pub service_tier: String,
    /// Upper bound on a single completion call.
    pub timeout_secs: u64,
    /// Extra attempts for retryable transport errors.
    pub max_retries: u32,
}

impl Default for CompletionSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-5-mini".to_string(),
            service_tier: "flex".to_string(),
            timeout_secs: 200,
            max_retries: 1,
        }
    }
}

impl CompletionSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Rolling-context limits for negotiation threads.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ThreadSettings {
    /// Raw messages kept verbatim before older ones are folded into the summary.
    pub raw_turns_to_keep: usize,
    /// Per-message cap inside the batched summary payload.
    pub max_chars_per_msg: usize,
    /// Messages left in a ledger after a batched refresh.
    pub keep_after_refresh: usize,
}

impl Default for ThreadSettings {
    fn default() -> Self {
        Self {
            raw_turns_to_keep: 12,
            max_chars_per_msg: 1200,
            keep_after_refresh: 2,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CooldownSettings {
    pub window_secs: f64,
}

impl Default for CooldownSettings {
    fn default() -> Self {
        Self { window_secs: 30.0 }
    }
}

impl CooldownSettings {
    pub fn window(&self) -> Duration {
        Duration::from_secs_f64(self.window_secs.max(0.0))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OutreachSettings {
    pub default_budget: usize,
    pub max_budget: usize,
    /// Pause between consecutive deliveries.
    pub send_spacing_ms: u64,
}

impl Default for OutreachSettings {
    fn default() -> Self {
        Self {
            default_budget: 3,
            max_budget: 6,
            send_spacing_ms: 600,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JournalSettings {
    pub max_chars: usize,
}

impl Default for JournalSettings {
    fn default() -> Self {
        Self { max_chars: 1500 }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level; `RUST_LOG` wins when set.
    pub level: String,
    /// Persist WARN and above to `logDbPath`.
    pub log_to_sqlite: bool,
    pub log_db_path: PathBuf,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_to_sqlite: true,
            log_db_path: PathBuf::from("envoy-logs.sqlite3"),
        }
    }
}
