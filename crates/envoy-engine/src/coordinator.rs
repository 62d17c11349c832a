//! Coordinator: the DM pipeline and the control-channel pipelines.
//!
//! DM: press lock → cooldown → claim command → claim check → append →
//! inline fold → reply → merge into the live thread.
//! Orders: batched refresh → order generation → lock → journal.
//! Outreach: journal → proposals → dispatch → unlock.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use envoy_core::completion::CompletionService;
use envoy_core::events::Author;
use envoy_core::gateway::MessagingGateway;
use envoy_core::ids::UserId;
use envoy_core::messages::ThreadMessage;
use envoy_core::Country;
use envoy_store::{
    ClaimRow, Database, GameState, GameStateRepo, JournalRepo, ThreadFold, ThreadRepo,
};

use crate::claims::{ClaimError, ClaimRegistry};
use crate::compactor::{maybe_summarize_thread, refresh_stale_threads};
use crate::config::EngineConfig;
use crate::cooldown::CooldownLimiter;
use crate::error::EngineError;
use crate::journal::StrategyJournal;
use crate::orders::{generate_orders, render_orders, OrderLine, ORDER_RETRY_STEPS};
use crate::outreach::{dispatch_proposals, parse_proposals, OutreachReport};
use crate::press_lock::{PressLock, PressLockState, PRESS_LOCKED_NOTICE};
use crate::prompts;

pub const CLAIM_USAGE: &str = "Usage: `claim <Country>` (e.g., `claim England`).";

pub const CLAIM_FIRST_NOTICE: &str = "⚠️ You need to `claim <Country>` first before negotiating. Your messages will be ignored until then.";

/// What to do with an inbound DM.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DmOutcome {
    Reply(String),
    /// Dropped without a reply (cooldown, empty text).
    Ignored,
}

#[derive(Clone, Debug)]
pub struct OrdersOutcome {
    pub orders: Vec<OrderLine>,
    pub refreshed_threads: usize,
    pub journal_refreshed: bool,
}

impl OrdersOutcome {
    pub fn render(&self) -> String {
        render_orders(&self.orders)
    }
}

#[derive(Clone, Debug)]
pub struct OutreachOutcome {
    pub budget: usize,
    pub proposals: usize,
    pub report: OutreachReport,
}

#[derive(Clone, Debug)]
pub struct StatusReport {
    pub ai_country: Country,
    pub phase: String,
    pub state_updated_at: String,
    pub press_lock: PressLockState,
    pub claims: Vec<ClaimRow>,
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn or_unset(s: &str) -> &str {
            if s.trim().is_empty() {
                "(unset)"
            } else {
                s
            }
        }
        writeln!(f, "🧭 AI power: {}", self.ai_country)?;
        writeln!(f, "Phase: {}", or_unset(&self.phase))?;
        writeln!(f, "State updated: {}", or_unset(&self.state_updated_at))?;
        writeln!(f, "Press: {}", self.press_lock)?;
        write!(f, "\n👥 Claims:")?;
        if self.claims.is_empty() {
            return write!(f, "\n(none)");
        }
        for claim in &self.claims {
            write!(
                f,
                "\n- {}: {} (<@{}>)",
                claim.country, claim.display_name, claim.user_id
            )?;
        }
        Ok(())
    }
}

pub struct Coordinator {
    completion: Arc<dyn CompletionService>,
    gateway: Arc<dyn MessagingGateway>,
    config: EngineConfig,
    persona: String,
    db: Database,
    claims: ClaimRegistry,
    cooldown: CooldownLimiter,
    press_lock: PressLock,
    threads: ThreadRepo,
    game_state: GameStateRepo,
    journal: StrategyJournal,
}

impl Coordinator {
    pub fn new(
        db: Database,
        completion: Arc<dyn CompletionService>,
        gateway: Arc<dyn MessagingGateway>,
        config: EngineConfig,
    ) -> Self {
        Self {
            persona: prompts::persona_system_prompt(config.ai_country),
            claims: ClaimRegistry::new(db.clone()),
            cooldown: CooldownLimiter::new(db.clone(), config.cooldown_window),
            press_lock: PressLock::new(db.clone()),
            threads: ThreadRepo::new(db.clone()),
            game_state: GameStateRepo::new(db.clone()),
            journal: StrategyJournal::new(JournalRepo::new(db.clone()), config.journal_max_chars),
            db,
            completion,
            gateway,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Handle one DM. Errors leave no partial thread state behind.
    #[instrument(skip_all, fields(user_id = %author.id))]
    pub async fn handle_direct_message(
        &self,
        author: &Author,
        content: &str,
        now: DateTime<Utc>,
    ) -> Result<DmOutcome, EngineError> {
        let text = content.trim();
        if text.is_empty() {
            return Ok(DmOutcome::Ignored);
        }

        // 1. Press lock: no cooldown, no thread, no completion
        if self.press_lock.is_locked()? {
            debug!("dm rejected by press lock");
            return Ok(DmOutcome::Reply(PRESS_LOCKED_NOTICE.to_string()));
        }

        // 2. Cooldown: silent drop
        if !self.cooldown.allow(&author.id, now)? {
            return Ok(DmOutcome::Ignored);
        }

        // 3. Claim command
        if let Some(arg) = claim_argument(text) {
            return self.handle_claim(author, arg);
        }

        // 4. Negotiation requires a claim
        let Some(country) = self.claims.country_of(&author.id)? else {
            return Ok(DmOutcome::Reply(CLAIM_FIRST_NOTICE.to_string()));
        };
        self.claims
            .refresh_display_name(&author.id, &author.display_name)?;

        self.negotiate(&author.id, country, text).await
    }

    fn handle_claim(&self, author: &Author, arg: &str) -> Result<DmOutcome, EngineError> {
        if arg.is_empty() {
            return Ok(DmOutcome::Reply(CLAIM_USAGE.to_string()));
        }
        match self.claims.claim(&author.id, &author.display_name, arg) {
            Ok(country) => Ok(DmOutcome::Reply(format!(
                "✅ Registered you as **{country}**."
            ))),
            Err(ClaimError::Store(e)) => Err(e.into()),
            Err(e) => Ok(DmOutcome::Reply(e.user_message().unwrap_or_default())),
        }
    }

    async fn negotiate(
        &self,
        user: &UserId,
        country: Country,
        text: &str,
    ) -> Result<DmOutcome, EngineError> {
        let base = self.threads.load(user)?;
        let mut messages = base.messages.clone();
        messages.push(ThreadMessage::user(text));
        let ledger_len = messages.len();

        // Stamp before the reply so the commit below stays newer than it
        let fold_stamp = self.db.stamp();
        let compaction = maybe_summarize_thread(
            self.completion.as_ref(),
            country,
            base.summary.clone(),
            messages,
            self.config.raw_turns_to_keep,
        )
        .await?;

        let state = self.game_state.get()?;
        let journal = self.journal.current()?;
        let prompt = prompts::dm_prompt(&prompts::DmContext {
            phase: &state.phase,
            state_text: &state.state_text,
            counterpart: country,
            summary: &compaction.summary,
            messages: &compaction.messages,
            journal: &journal,
        });
        let reply = self.completion.complete(&self.persona, &prompt).await?;
        let reply = reply.trim();
        if reply.is_empty() {
            return Err(EngineError::EmptyReply);
        }

        // Merge into the live thread; outreach may have written meanwhile
        let fold = compaction.refreshed.then(|| ThreadFold {
            dropped: ledger_len - compaction.messages.len(),
            summary: compaction.summary.clone(),
            stamp: fold_stamp,
        });
        self.threads.commit_exchange(
            user,
            &base,
            fold.as_ref(),
            &[ThreadMessage::user(text), ThreadMessage::assistant(reply)],
        )?;
        info!(
            country = %country,
            folded = compaction.refreshed,
            "dm answered"
        );
        Ok(DmOutcome::Reply(reply.to_string()))
    }

    pub fn set_phase(&self, phase: &str) -> Result<(), EngineError> {
        Ok(self.game_state.set_phase(phase)?)
    }

    pub fn set_state(&self, state_text: &str) -> Result<(), EngineError> {
        Ok(self.game_state.set_state(state_text)?)
    }

    pub fn status(&self) -> Result<StatusReport, EngineError> {
        let state = self.game_state.get()?;
        Ok(StatusReport {
            ai_country: self.config.ai_country,
            phase: state.phase,
            state_updated_at: state.updated_at,
            press_lock: self.press_lock.state()?,
            claims: self.claims.list_claims()?,
        })
    }

    fn complete_game_state(&self) -> Result<GameState, EngineError> {
        let state = self.game_state.get()?;
        if !state.is_complete() {
            return Err(EngineError::MissingGameState);
        }
        Ok(state)
    }

    /// Journal refresh, proposals, dispatch, then unlock.
    ///
    /// A failure before dispatch completes leaves the press lock untouched.
    #[instrument(skip(self))]
    pub async fn run_outreach(
        &self,
        requested_budget: Option<usize>,
    ) -> Result<OutreachOutcome, EngineError> {
        let state = self.complete_game_state()?;
        let ai_country = self.config.ai_country;

        // 1. Journal after adjudication
        let summaries = self.threads.summaries_for_claimed()?;
        let prompt = prompts::journal_after_adjudication_prompt(
            &state.phase,
            &state.state_text,
            &self.journal.current()?,
            &summaries,
            self.config.journal_max_chars,
        );
        let journal = self
            .journal
            .refresh(self.completion.as_ref(), "adjudication", &prompt)
            .await?;

        // 2. Proposals for the allowed recipients
        let budget = self.config.outreach_budget(requested_budget);
        let recipients: BTreeMap<Country, UserId> = self
            .claims
            .list_claims()?
            .into_iter()
            .filter(|c| c.country != ai_country)
            .map(|c| (c.country, c.user_id))
            .collect();

        let proposals = if budget == 0 || recipients.is_empty() {
            Vec::new()
        } else {
            let allowed: Vec<Country> = recipients.keys().copied().collect();
            let prompt = prompts::outreach_prompt(&prompts::OutreachContext {
                phase: &state.phase,
                state_text: &state.state_text,
                summaries: &summaries,
                journal: &journal,
                allowed: &allowed,
                max_messages: budget,
            });
            let raw = self.completion.complete(&self.persona, &prompt).await?;
            let proposals = parse_proposals(&raw);
            if proposals.is_empty() {
                warn!("no usable outreach proposals");
            }
            proposals
        };

        // 3. Dispatch
        let report = dispatch_proposals(
            self.gateway.as_ref(),
            &self.threads,
            &recipients,
            &proposals,
            budget,
            self.config.outreach_spacing,
        )
        .await?;

        // 4. Unlock regardless of how many were sent
        self.press_lock.unlock()?;
        info!(
            delivered = report.delivered_count(),
            proposals = proposals.len(),
            "outreach complete"
        );
        Ok(OutreachOutcome {
            budget,
            proposals: proposals.len(),
            report,
        })
    }

    /// Batched refresh, orders with retry, lock, then journal.
    ///
    /// Malformed summaries or a grammar rejection abort before the lock.
    /// A failed journal refresh after locking is logged, not returned.
    #[instrument(skip(self))]
    pub async fn run_orders(&self) -> Result<OrdersOutcome, EngineError> {
        let state = self.complete_game_state()?;
        let ai_country = self.config.ai_country;

        // 1. Batched summary refresh
        let refreshed_threads = refresh_stale_threads(
            self.completion.as_ref(),
            &self.threads,
            ai_country,
            self.config.raw_turns_to_keep,
            self.config.max_chars_per_msg,
            self.config.keep_after_refresh,
        )
        .await?;

        // 2. Orders; every attempt re-reads summaries and journal
        let orders = generate_orders(
            self.completion.as_ref(),
            &self.persona,
            &ORDER_RETRY_STEPS,
            || {
                Ok(prompts::orders_prompt(
                    ai_country,
                    &state.phase,
                    &state.state_text,
                    &self.threads.summaries_for_claimed()?,
                    &self.journal.current()?,
                ))
            },
        )
        .await?;

        // 3. Lock
        self.press_lock.lock()?;

        // 4. Journal after orders
        let rendered = render_orders(&orders);
        let prompt = prompts::journal_after_orders_prompt(
            &state.phase,
            &state.state_text,
            &self.journal.current()?,
            &self.threads.summaries_for_claimed()?,
            &rendered,
            self.config.journal_max_chars,
        );
        let journal_refreshed = match self
            .journal
            .refresh(self.completion.as_ref(), "orders", &prompt)
            .await
        {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, kind = e.error_kind(), "journal refresh after orders failed");
                false
            }
        };

        info!(orders = orders.len(), refreshed_threads, "orders produced");
        Ok(OrdersOutcome {
            orders,
            refreshed_threads,
            journal_refreshed,
        })
    }
}

/// `Some(arg)` when the first word is `claim` in any case.
fn claim_argument(text: &str) -> Option<&str> {
    let mut parts = text.splitn(2, char::is_whitespace);
    let command = parts.next()?;
    command
        .eq_ignore_ascii_case("claim")
        .then(|| parts.next().unwrap_or("").trim())
}
