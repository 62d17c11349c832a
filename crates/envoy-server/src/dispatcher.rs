//! Lane dispatcher.
//!
//! Events arrive in order on one channel. Each DM author gets a lane and the
//! control channel gets one; a lane handles its events one at a time while
//! lanes run concurrently. Lanes with nothing queued or in flight are
//! dropped after `LANE_IDLE` and respawned on the author's next event.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};

use envoy_core::events::{InboundEvent, Origin, ReplyTarget};
use envoy_core::gateway::MessagingGateway;
use envoy_core::ids::{ChannelId, UserId};
use envoy_engine::truncate::split_chunks;
use envoy_engine::{Coordinator, DmOutcome, EngineError};

use crate::commands::{parse_control, ControlCommand};

const LANE_CAPACITY: usize = 64;
const LANE_IDLE: Duration = Duration::from_secs(600);
const LANE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum LaneKey {
    Control,
    Direct(UserId),
}

struct Lane {
    tx: mpsc::Sender<InboundEvent>,
    /// Events sent to the worker and not yet processed.
    pending: Arc<AtomicUsize>,
    idle_since: Instant,
}

impl Lane {
    fn is_idle(&self, now: Instant) -> bool {
        self.pending.load(Ordering::Acquire) == 0
            && now.saturating_duration_since(self.idle_since) >= LANE_IDLE
    }
}

/// Drop idle lanes; their workers exit once the sender is gone.
fn prune_idle_lanes(lanes: &mut HashMap<LaneKey, Lane>, now: Instant) -> usize {
    let before = lanes.len();
    lanes.retain(|_, lane| !lane.is_idle(now));
    before - lanes.len()
}

struct Shared {
    coordinator: Arc<Coordinator>,
    gateway: Arc<dyn MessagingGateway>,
}

pub struct Dispatcher {
    shared: Arc<Shared>,
    control_channel: ChannelId,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl Dispatcher {
    pub fn new(
        coordinator: Arc<Coordinator>,
        gateway: Arc<dyn MessagingGateway>,
        control_channel: ChannelId,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                coordinator,
                gateway,
            }),
            control_channel,
            cancel,
            tracker: TaskTracker::new(),
        }
    }

    /// Route events until the input closes or the token is cancelled.
    ///
    /// When the input closes, lanes finish what they already hold before
    /// this returns. Cancellation stops lanes after their current event.
    pub async fn run(self, mut events: mpsc::Receiver<InboundEvent>) {
        info!(control_channel = %self.control_channel, "dispatcher running");
        let mut lanes: HashMap<LaneKey, Lane> = HashMap::new();
        let mut sweep = tokio::time::interval(LANE_SWEEP_INTERVAL);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let event = tokio::select! {
                () = self.cancel.cancelled() => {
                    info!("dispatcher cancelled");
                    break;
                }
                _ = sweep.tick() => {
                    let pruned = prune_idle_lanes(&mut lanes, Instant::now());
                    if pruned > 0 {
                        debug!(pruned, remaining = lanes.len(), "idle lanes pruned");
                    }
                    continue;
                }
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            let Some(key) = self.lane_for(&event) else {
                continue;
            };
            let lane = lanes
                .entry(key.clone())
                .or_insert_with(|| self.spawn_lane(key.clone()));
            if let Err(event) = lane.deliver(event).await {
                // Lane stopped (cancellation race); start a fresh one.
                let mut fresh = self.spawn_lane(key.clone());
                if fresh.deliver(event).await.is_err() {
                    warn!(?key, "lane unavailable, event dropped");
                }
                lanes.insert(key, fresh);
            }
        }

        drop(lanes);
        self.tracker.close();
        self.tracker.wait().await;
        info!("dispatcher stopped");
    }

    fn lane_for(&self, event: &InboundEvent) -> Option<LaneKey> {
        if event.author.is_bot {
            return None;
        }
        match &event.origin {
            Origin::Control { channel_id } if *channel_id == self.control_channel => {
                Some(LaneKey::Control)
            }
            Origin::Direct => Some(LaneKey::Direct(event.author.id.clone())),
            Origin::Control { .. } | Origin::OtherChannel { .. } => None,
        }
    }

    fn spawn_lane(&self, key: LaneKey) -> Lane {
        let (tx, mut rx) = mpsc::channel::<InboundEvent>(LANE_CAPACITY);
        let pending = Arc::new(AtomicUsize::new(0));
        let in_flight = pending.clone();
        let shared = self.shared.clone();
        let cancel = self.cancel.clone();
        debug!(?key, "lane started");
        self.tracker.spawn(async move {
            loop {
                let event = tokio::select! {
                    () = cancel.cancelled() => break,
                    event = rx.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                };
                shared.process(event).await;
                in_flight.fetch_sub(1, Ordering::AcqRel);
            }
            debug!(?key, "lane stopped");
        });
        Lane {
            tx,
            pending,
            idle_since: Instant::now(),
        }
    }
}

impl Lane {
    /// Queue an event, handing it back if the worker is gone.
    async fn deliver(&mut self, event: InboundEvent) -> Result<(), InboundEvent> {
        self.pending.fetch_add(1, Ordering::AcqRel);
        self.idle_since = Instant::now();
        self.tx.send(event).await.map_err(|mpsc::error::SendError(event)| {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            event
        })
    }
}

impl Shared {
    #[instrument(skip_all, fields(event_id = %event.id, user_id = %event.author.id))]
    async fn process(&self, event: InboundEvent) {
        let target = event.reply_target();
        let reply = match event.origin {
            Origin::Direct => self.handle_dm(&event).await,
            _ => self.handle_control(&event.content).await,
        };
        if let Some(text) = reply {
            self.send_chunked(&target, &text).await;
        }
    }

    async fn handle_dm(&self, event: &InboundEvent) -> Option<String> {
        let window = self.coordinator.config().cooldown_window;
        match self
            .coordinator
            .handle_direct_message(&event.author, &event.content, Utc::now())
            .await
        {
            Ok(DmOutcome::Reply(text)) => Some(text),
            Ok(DmOutcome::Ignored) => None,
            Err(e) => {
                error!(error = %e, kind = e.error_kind(), "dm handling failed");
                Some(dm_failure_notice(window))
            }
        }
    }

    async fn handle_control(&self, content: &str) -> Option<String> {
        let command = parse_control(content)?;
        info!(?command, "control command");
        let coordinator = &self.coordinator;

        let reply = match command {
            ControlCommand::Phase(phase) => match coordinator.set_phase(&phase) {
                Ok(()) => format!("✅ Phase set to: {phase}"),
                Err(e) => failure("Phase update", &e),
            },
            ControlCommand::State(state) => match coordinator.set_state(&state) {
                Ok(()) => "✅ Game state updated.".to_string(),
                Err(e) => failure("State update", &e),
            },
            ControlCommand::Status => match coordinator.status() {
                Ok(report) => report.to_string(),
                Err(e) => failure("Status", &e),
            },
            ControlCommand::Outreach(budget) => match coordinator.run_outreach(budget).await {
                Ok(outcome) => format!(
                    "📨 Outreach complete. DMs sent: {}",
                    outcome.report.delivered_count()
                ),
                Err(EngineError::MissingGameState) => {
                    "I need both PHASE and STATE before outreach.".to_string()
                }
                Err(e) => failure("Outreach", &e),
            },
            ControlCommand::Orders => match coordinator.run_orders().await {
                Ok(outcome) => outcome.render(),
                Err(EngineError::MissingGameState) => {
                    "I need both PHASE and STATE to generate orders.".to_string()
                }
                Err(EngineError::MalformedSummaries(_)) => {
                    "⚠️ Failed to parse updated summaries from AI. Aborting orders generation."
                        .to_string()
                }
                Err(EngineError::GrammarRejection { .. }) => {
                    "⚠️ I couldn't produce valid orders from the current input. Check phase/state formatting."
                        .to_string()
                }
                Err(e) => failure("Orders", &e),
            },
        };
        Some(reply)
    }

    async fn send_chunked(&self, target: &ReplyTarget, text: &str) {
        for chunk in split_chunks(text, self.gateway.max_message_chars()) {
            if let Err(e) = self.gateway.reply(target, &chunk).await {
                warn!(error = %e, "reply delivery failed");
                return;
            }
        }
    }
}

/// The cooldown was stamped before the failed call, so name the wait.
fn dm_failure_notice(window: Duration) -> String {
    if window.is_zero() {
        return "⚠️ I could not answer just now. Please try again.".to_string();
    }
    format!(
        "⚠️ I could not answer just now. Please try again in {}s.",
        window.as_secs().max(1)
    )
}

fn failure(what: &str, e: &EngineError) -> String {
    error!(error = %e, kind = e.error_kind(), "{what} failed");
    format!("⚠️ {what} failed: {e}")
}
