use std::time::Duration;

use envoy_core::Country;
use envoy_settings::EnvoySettings;

/// Tunables for the negotiation pipelines.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub ai_country: Country,
    pub raw_turns_to_keep: usize,
    pub max_chars_per_msg: usize,
    pub keep_after_refresh: usize,
    pub cooldown_window: Duration,
    pub outreach_default_budget: usize,
    pub outreach_max_budget: usize,
    pub outreach_spacing: Duration,
    pub journal_max_chars: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_settings(&EnvoySettings::default())
    }
}

impl EngineConfig {
    pub fn from_settings(settings: &EnvoySettings) -> Self {
        Self {
            ai_country: settings.ai_country,
            raw_turns_to_keep: settings.threads.raw_turns_to_keep,
            max_chars_per_msg: settings.threads.max_chars_per_msg,
            keep_after_refresh: settings.threads.keep_after_refresh,
            cooldown_window: settings.cooldown.window(),
            outreach_default_budget: settings.outreach.default_budget,
            outreach_max_budget: settings.outreach.max_budget,
            outreach_spacing: Duration::from_millis(settings.outreach.send_spacing_ms),
            journal_max_chars: settings.journal.max_chars,
        }
    }

    /// Resolve a requested outreach budget: default when absent, clamped to the max.
    pub fn outreach_budget(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.outreach_default_budget)
            .min(self.outreach_max_budget)
    }
}
