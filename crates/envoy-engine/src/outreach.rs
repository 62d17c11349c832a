//! Budget-capped fan-out of proactively generated messages.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use serde_json::Value;
use tracing::{info, instrument, warn};

use envoy_core::errors::DeliveryError;
use envoy_core::gateway::MessagingGateway;
use envoy_core::ids::UserId;
use envoy_core::messages::ThreadMessage;
use envoy_core::Country;
use envoy_store::{StoreError, ThreadRepo};

use crate::truncate::{truncate_chars, ELLIPSIS};

/// One message the model wants sent. `to` is unvalidated model output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutreachProposal {
    pub to: String,
    pub message: String,
}

/// Parse the model's JSON array of `{to, message}` objects.
///
/// Anything that is not a JSON array yields no proposals. Elements that are
/// not objects with string `to` and `message` fields are dropped.
pub fn parse_proposals(raw: &str) -> Vec<OutreachProposal> {
    let Ok(Value::Array(items)) = serde_json::from_str::<Value>(raw.trim()) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let to = item.get("to")?.as_str()?;
            let message = item.get("message")?.as_str()?;
            Some(OutreachProposal {
                to: to.trim().to_string(),
                message: message.trim().to_string(),
            })
        })
        .collect()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    BudgetReached,
    RecipientNotAllowed,
    DuplicateRecipient,
    EmptyMessage,
}

/// What happened to one proposal, in proposal order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchResult {
    Delivered { to: Country, truncated: bool },
    Skipped { to: String, reason: SkipReason },
    Failed { to: Country, error: DeliveryError },
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OutreachReport {
    pub results: Vec<DispatchResult>,
}

impl OutreachReport {
    pub fn delivered_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r, DispatchResult::Delivered { .. }))
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r, DispatchResult::Failed { .. }))
            .count()
    }
}

/// Deliver proposals in order until `budget` deliveries succeed.
///
/// Only countries in `recipients` are eligible and each at most once per
/// call. A recipient counts as used only after a successful delivery, so a
/// failed send can be retried by a later proposal. Delivered text is
/// appended to the recipient's thread as an assistant turn.
#[instrument(skip_all, fields(proposals = proposals.len(), budget = budget))]
pub async fn dispatch_proposals(
    gateway: &dyn MessagingGateway,
    threads: &ThreadRepo,
    recipients: &BTreeMap<Country, UserId>,
    proposals: &[OutreachProposal],
    budget: usize,
    spacing: Duration,
) -> Result<OutreachReport, StoreError> {
    let max_chars = gateway.max_message_chars();
    let mut used: HashSet<Country> = HashSet::new();
    let mut report = OutreachReport::default();

    for proposal in proposals {
        let skip = |reason| DispatchResult::Skipped {
            to: proposal.to.clone(),
            reason,
        };

        if report.delivered_count() >= budget {
            report.results.push(skip(SkipReason::BudgetReached));
            continue;
        }
        let Some((country, user)) = proposal
            .to
            .parse::<Country>()
            .ok()
            .and_then(|c| recipients.get_key_value(&c))
        else {
            report.results.push(skip(SkipReason::RecipientNotAllowed));
            continue;
        };
        if used.contains(country) {
            report.results.push(skip(SkipReason::DuplicateRecipient));
            continue;
        }
        if proposal.message.is_empty() {
            report.results.push(skip(SkipReason::EmptyMessage));
            continue;
        }

        let text = truncate_chars(&proposal.message, max_chars, ELLIPSIS);
        let truncated = text != proposal.message;

        match gateway.send_direct(user, &text).await {
            Ok(()) => {
                used.insert(*country);
                threads.append(user, ThreadMessage::assistant(text))?;
                info!(country = %country, truncated, "outreach delivered");
                report.results.push(DispatchResult::Delivered {
                    to: *country,
                    truncated,
                });
                if !spacing.is_zero() {
                    tokio::time::sleep(spacing).await;
                }
            }
            Err(error) => {
                warn!(country = %country, error = %error, "outreach delivery failed");
                report.results.push(DispatchResult::Failed {
                    to: *country,
                    error,
                });
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use envoy_core::gateway::RecordingGateway;
    use envoy_store::Database;

    fn recipients(countries: &[Country]) -> BTreeMap<Country, UserId> {
        countries
            .iter()
            .enumerate()
            .map(|(i, c)| (*c, UserId::from_raw(format!("u{i}"))))
            .collect()
    }

    fn proposal(to: &str, message: &str) -> OutreachProposal {
        OutreachProposal {
            to: to.into(),
            message: message.into(),
        }
    }

    fn threads() -> ThreadRepo {
        ThreadRepo::new(Database::in_memory().unwrap())
    }

    #[test]
    fn parse_skips_malformed_items() {
        assert!(parse_proposals("not json").is_empty());
        assert!(parse_proposals(r#"{"to": "England", "message": "hi"}"#).is_empty());
        let parsed = parse_proposals(
            r#"[{"to": " England ", "message": " hi "}, 7, {"to": "France"}, {"to": 1, "message": "x"}]"#,
        );
        assert_eq!(parsed, vec![proposal("England", "hi")]);
    }

    #[tokio::test]
    async fn budget_caps_deliveries_and_recipients_stay_in_set() {
        let gw = RecordingGateway::new();
        let threads = threads();
        let allowed = recipients(&[
            Country::England,
            Country::France,
            Country::Germany,
            Country::Italy,
            Country::Russia,
        ]);
        let proposals = vec![
            proposal("Turkey", "not allowed"),
            proposal("England", "one"),
            proposal("England", "again"),
            proposal("France", "two"),
            proposal("Germany", "three"),
        ];

        let report = dispatch_proposals(&gw, &threads, &allowed, &proposals, 2, Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(report.delivered_count(), 2);
        assert_eq!(
            report.results,
            vec![
                DispatchResult::Skipped {
                    to: "Turkey".into(),
                    reason: SkipReason::RecipientNotAllowed
                },
                DispatchResult::Delivered {
                    to: Country::England,
                    truncated: false
                },
                DispatchResult::Skipped {
                    to: "England".into(),
                    reason: SkipReason::DuplicateRecipient
                },
                DispatchResult::Delivered {
                    to: Country::France,
                    truncated: false
                },
                DispatchResult::Skipped {
                    to: "Germany".into(),
                    reason: SkipReason::BudgetReached
                },
            ]
        );
        let directs = gw.directs();
        assert_eq!(directs.len(), 2);
        assert_eq!(directs[0], (allowed[&Country::England].clone(), "one".to_string()));
    }

    #[tokio::test]
    async fn delivered_messages_join_the_thread() {
        let gw = RecordingGateway::new();
        let threads = threads();
        let allowed = recipients(&[Country::Italy]);

        dispatch_proposals(
            &gw,
            &threads,
            &allowed,
            &[proposal("Italy", "Greetings, cousin.")],
            3,
            Duration::ZERO,
        )
        .await
        .unwrap();

        let thread = threads.load(&allowed[&Country::Italy]).unwrap();
        assert_eq!(thread.messages, vec![ThreadMessage::assistant("Greetings, cousin.")]);
        assert!(thread.is_stale());
    }

    #[tokio::test]
    async fn failures_are_isolated_and_do_not_consume_the_recipient() {
        let gw = RecordingGateway::new();
        let threads = threads();
        let allowed = recipients(&[Country::England, Country::France]);
        gw.fail_deliveries_to(allowed[&Country::England].clone());

        let report = dispatch_proposals(
            &gw,
            &threads,
            &allowed,
            &[
                proposal("England", "lost"),
                proposal("France", "ok"),
                proposal("England", "retry"),
            ],
            3,
            Duration::ZERO,
        )
        .await
        .unwrap();

        assert_eq!(report.delivered_count(), 1);
        assert_eq!(report.failed_count(), 2);
        assert!(threads.load(&allowed[&Country::England]).unwrap().messages.is_empty());
    }

    #[tokio::test]
    async fn empty_messages_are_skipped_and_long_ones_truncated() {
        let gw = RecordingGateway::new();
        let threads = threads();
        let allowed = recipients(&[Country::England, Country::France]);
        let long = "é".repeat(2100);

        let report = dispatch_proposals(
            &gw,
            &threads,
            &allowed,
            &[proposal("England", ""), proposal("France", &long)],
            3,
            Duration::ZERO,
        )
        .await
        .unwrap();

        assert_eq!(
            report.results[0],
            DispatchResult::Skipped {
                to: "England".into(),
                reason: SkipReason::EmptyMessage
            }
        );
        assert_eq!(
            report.results[1],
            DispatchResult::Delivered {
                to: Country::France,
                truncated: true
            }
        );
        let sent = &gw.directs()[0].1;
        assert_eq!(sent.chars().count(), 2000);
        assert!(sent.ends_with('…'));
    }

    #[tokio::test]
    async fn zero_budget_sends_nothing() {
        let gw = RecordingGateway::new();
        let report = dispatch_proposals(
            &gw,
            &threads(),
            &recipients(&[Country::England]),
            &[proposal("England", "hi")],
            0,
            Duration::ZERO,
        )
        .await
        .unwrap();
        assert_eq!(report.delivered_count(), 0);
        assert!(gw.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn sends_are_spaced() {
        let gw = RecordingGateway::new();
        let allowed = recipients(&[Country::England, Country::France]);
        let start = tokio::time::Instant::now();
        dispatch_proposals(
            &gw,
            &threads(),
            &allowed,
            &[proposal("England", "a"), proposal("France", "b")],
            3,
            Duration::from_millis(600),
        )
        .await
        .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(1200));
    }
}
