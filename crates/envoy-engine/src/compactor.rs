//! Rolling-context compaction of negotiation threads.
//!
//! Two paths exist. The inline fold runs while answering a DM whose ledger
//! has grown past `raw_turns_to_keep`; it prunes the ledger but leaves the
//! thread stale. The batched refresh runs once per orders cycle over every
//! stale thread and is the only path that clears staleness.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{json, Map, Value};
use tracing::{info, instrument, warn};

use envoy_core::completion::CompletionService;
use envoy_core::messages::{render_transcript, ThreadMessage};
use envoy_core::Country;
use envoy_store::{RefreshUpdate, StaleThread, ThreadRepo};

use crate::error::EngineError;
use crate::prompts;
use crate::truncate::{truncate_chars, PAYLOAD_MARKER};

/// Result of [`maybe_summarize_thread`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Compaction {
    pub summary: String,
    pub messages: Vec<ThreadMessage>,
    /// True when a fold happened and the summary stamp should be recorded.
    pub refreshed: bool,
}

/// Fold everything but the last `keep` messages into `summary`.
///
/// At or under `keep` messages nothing is called and the input comes back
/// unchanged. An empty completion is treated the same way so older turns
/// are never dropped without a summary to show for them.
#[instrument(skip_all, fields(country = %country, messages = messages.len()))]
pub async fn maybe_summarize_thread(
    completion: &dyn CompletionService,
    country: Country,
    summary: String,
    messages: Vec<ThreadMessage>,
    keep: usize,
) -> Result<Compaction, EngineError> {
    if messages.len() <= keep {
        return Ok(Compaction {
            summary,
            messages,
            refreshed: false,
        });
    }

    let split = messages.len() - keep;
    let older = render_transcript(&messages[..split]);
    let folded = completion
        .complete(
            prompts::SUMMARIZER_SYSTEM_PROMPT,
            &prompts::summary_fold_prompt(country, &summary, &older),
        )
        .await?;
    let folded = folded.trim();

    if folded.is_empty() {
        warn!("summary fold returned nothing; ledger kept");
        return Ok(Compaction {
            summary,
            messages,
            refreshed: false,
        });
    }

    info!(folded = split, "thread compacted");
    Ok(Compaction {
        summary: folded.to_string(),
        messages: messages[split..].to_vec(),
        refreshed: true,
    })
}

/// Build the batched refresh payload keyed by country name.
///
/// The AI's own country never appears. Each entry carries the existing
/// summary and the last `recent` messages, every message capped at
/// `max_chars` with a visible marker.
pub fn build_summary_payload(
    threads: &[StaleThread],
    ai_country: Country,
    recent: usize,
    max_chars: usize,
) -> Map<String, Value> {
    threads
        .iter()
        .filter(|t| t.country != ai_country)
        .map(|t| {
            let start = t.messages.len().saturating_sub(recent);
            let messages: Vec<Value> = t.messages[start..]
                .iter()
                .map(|m| {
                    json!({
                        "role": m.role.as_str(),
                        "content": truncate_chars(&m.content, max_chars, PAYLOAD_MARKER),
                    })
                })
                .collect();
            (
                t.country.as_str().to_string(),
                json!({ "summary": t.summary, "recent_messages": messages }),
            )
        })
        .collect()
}

/// Why a batched summary response was rejected.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum SummaryParseError {
    #[error("response is not valid JSON")]
    NotJson,

    #[error("response is not a JSON object")]
    NotObject,

    #[error("key set mismatch (missing: {missing:?}, unexpected: {unexpected:?})")]
    KeyMismatch {
        missing: Vec<String>,
        unexpected: Vec<String>,
    },

    #[error("value for {0} is not a string")]
    NonStringValue(String),
}

/// Strictly validate a batched response: a JSON object whose key set equals
/// `expected` and whose values are all strings.
pub fn parse_summaries(
    raw: &str,
    expected: &BTreeSet<String>,
) -> Result<BTreeMap<String, String>, SummaryParseError> {
    let value: Value = serde_json::from_str(raw.trim()).map_err(|_| SummaryParseError::NotJson)?;
    let Value::Object(object) = value else {
        return Err(SummaryParseError::NotObject);
    };

    let actual: BTreeSet<String> = object.keys().cloned().collect();
    if &actual != expected {
        return Err(SummaryParseError::KeyMismatch {
            missing: expected.difference(&actual).cloned().collect(),
            unexpected: actual.difference(expected).cloned().collect(),
        });
    }

    object
        .into_iter()
        .map(|(key, value)| match value {
            Value::String(summary) => Ok((key, summary)),
            _ => Err(SummaryParseError::NonStringValue(key)),
        })
        .collect()
}

/// Refresh every stale thread with one completion call.
///
/// Summaries cover the ledgers as read before the call; turns that arrive
/// while it runs are kept and leave their thread stale. Returns the number
/// of threads refreshed. Any validation failure applies
/// nothing and surfaces as [`EngineError::MalformedSummaries`].
#[instrument(skip_all, fields(ai_country = %ai_country))]
pub async fn refresh_stale_threads(
    completion: &dyn CompletionService,
    threads: &ThreadRepo,
    ai_country: Country,
    recent: usize,
    max_chars: usize,
    keep_after_refresh: usize,
) -> Result<usize, EngineError> {
    let stale: Vec<StaleThread> = threads
        .stale_threads()?
        .into_iter()
        .filter(|t| t.country != ai_country)
        .collect();
    if stale.is_empty() {
        return Ok(0);
    }

    let payload = build_summary_payload(&stale, ai_country, recent, max_chars);
    let expected: BTreeSet<String> = payload.keys().cloned().collect();
    let raw = completion
        .complete(
            prompts::SUMMARIZER_SYSTEM_PROMPT,
            &prompts::batched_summary_prompt(ai_country, &payload),
        )
        .await?;

    let summaries = parse_summaries(&raw, &expected).inspect_err(|e| {
        warn!(error = %e, "batched summaries rejected");
    })?;

    let updates: Vec<RefreshUpdate> = stale
        .iter()
        .filter_map(|t| {
            summaries
                .get(t.country.as_str())
                .map(|s| RefreshUpdate::from_snapshot(t, s.trim()))
        })
        .collect();
    let applied = threads.apply_refresh(&updates, keep_after_refresh)?;
    info!(refreshed = applied, offered = updates.len(), "stale threads refreshed");
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use envoy_core::ids::UserId;
    use envoy_llm::{MockCompletion, MockResponse};
    use envoy_store::{ClaimRepo, Database};

    fn msgs(n: usize) -> Vec<ThreadMessage> {
        (0..n)
            .map(|i| {
                if i % 2 == 0 {
                    ThreadMessage::user(format!("u{i}"))
                } else {
                    ThreadMessage::assistant(format!("a{i}"))
                }
            })
            .collect()
    }

    fn keys(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn short_threads_are_left_alone() {
        let mock = MockCompletion::default();
        let out = maybe_summarize_thread(&mock, Country::Italy, "s".into(), msgs(12), 12)
            .await
            .unwrap();
        assert!(!out.refreshed);
        assert_eq!(out.messages.len(), 12);
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn long_threads_fold_the_older_turns() {
        let mock = MockCompletion::with_texts(["  merged summary \n"]);
        let out = maybe_summarize_thread(&mock, Country::Italy, "old".into(), msgs(14), 12)
            .await
            .unwrap();

        assert!(out.refreshed);
        assert_eq!(out.summary, "merged summary");
        assert_eq!(out.messages, msgs(14)[2..].to_vec());

        let (system, user) = &mock.calls()[0];
        assert_eq!(system, prompts::SUMMARIZER_SYSTEM_PROMPT);
        assert!(user.contains("USER: u0\nASSISTANT: a1"));
        assert!(!user.contains("u2"));
    }

    #[tokio::test]
    async fn empty_fold_keeps_everything() {
        let mock = MockCompletion::with_texts(["   "]);
        let out = maybe_summarize_thread(&mock, Country::Italy, "old".into(), msgs(13), 12)
            .await
            .unwrap();
        assert!(!out.refreshed);
        assert_eq!(out.summary, "old");
        assert_eq!(out.messages.len(), 13);
    }

    #[test]
    fn payload_excludes_ai_country_and_caps_messages() {
        let threads = vec![
            StaleThread {
                user_id: UserId::from_raw("1"),
                country: Country::Austria,
                summary: String::new(),
                messages: msgs(2),
                last_updated: String::new(),
            },
            StaleThread {
                user_id: UserId::from_raw("2"),
                country: Country::England,
                summary: "prior".into(),
                messages: vec![
                    ThreadMessage::user("dropped"),
                    ThreadMessage::user("x".repeat(50)),
                    ThreadMessage::assistant("short"),
                ],
                last_updated: String::new(),
            },
        ];
        let payload = build_summary_payload(&threads, Country::Austria, 2, 20);

        assert_eq!(payload.keys().collect::<Vec<_>>(), vec!["England"]);
        let entry = &payload["England"];
        assert_eq!(entry["summary"], "prior");
        let recent = entry["recent_messages"].as_array().unwrap();
        assert_eq!(recent.len(), 2);
        let long = recent[0]["content"].as_str().unwrap();
        assert_eq!(long.chars().count(), 20);
        assert!(long.ends_with(PAYLOAD_MARKER));
        assert_eq!(recent[1]["role"], "assistant");
    }

    #[test]
    fn parse_accepts_exact_key_set() {
        let parsed =
            parse_summaries(r#"{"England": "a", "France": "b"}"#, &keys(&["England", "France"]))
                .unwrap();
        assert_eq!(parsed["France"], "b");
    }

    #[test]
    fn parse_rejections() {
        let expected = keys(&["England", "France"]);
        assert_eq!(parse_summaries("nope", &expected), Err(SummaryParseError::NotJson));
        assert_eq!(
            parse_summaries("```json\n{}\n```", &expected),
            Err(SummaryParseError::NotJson)
        );
        assert_eq!(parse_summaries(r#"["a"]"#, &expected), Err(SummaryParseError::NotObject));
        assert_eq!(
            parse_summaries(r#"{"England": "a", "Italy": "b"}"#, &expected),
            Err(SummaryParseError::KeyMismatch {
                missing: vec!["France".into()],
                unexpected: vec!["Italy".into()],
            })
        );
        assert_eq!(
            parse_summaries(r#"{"England": "a", "France": 3}"#, &expected),
            Err(SummaryParseError::NonStringValue("France".into()))
        );
    }

    fn seeded() -> (Database, ThreadRepo) {
        let db = Database::in_memory().unwrap();
        let claims = ClaimRepo::new(db.clone());
        let threads = ThreadRepo::new(db.clone());
        claims.claim(&UserId::from_raw("1"), "Ed", Country::England).unwrap();
        claims.claim(&UserId::from_raw("2"), "Fran", Country::France).unwrap();
        for user in ["1", "2"] {
            for m in msgs(5) {
                threads.append(&UserId::from_raw(user), m).unwrap();
            }
        }
        (db, threads)
    }

    #[tokio::test]
    async fn refresh_applies_and_clears_staleness() {
        let (_db, threads) = seeded();
        let mock = MockCompletion::with_texts([r#"{"England": " E deal ", "France": "F deal"}"#]);

        let n = refresh_stale_threads(&mock, &threads, Country::Austria, 12, 1200, 2)
            .await
            .unwrap();
        assert_eq!(n, 2);

        for user in ["1", "2"] {
            let id = UserId::from_raw(user);
            assert!(!threads.needs_refresh(&id).unwrap());
            assert_eq!(threads.load(&id).unwrap().messages, msgs(5)[3..].to_vec());
        }
        assert_eq!(threads.load(&UserId::from_raw("1")).unwrap().summary, "E deal");
    }

    #[tokio::test(start_paused = true)]
    async fn turns_arriving_during_the_call_survive_and_stay_stale() {
        let (_db, threads) = seeded();
        let mock = MockCompletion::new(vec![MockResponse::delayed(
            std::time::Duration::from_millis(200),
            MockResponse::text(r#"{"England": "covers u0-u4", "France": "F deal"}"#),
        )]);
        let ed = UserId::from_raw("1");

        let (refreshed, ()) = tokio::join!(
            refresh_stale_threads(&mock, &threads, Country::Austria, 12, 1200, 2),
            async {
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                threads.append(&ed, ThreadMessage::user("late")).unwrap();
                threads.append(&ed, ThreadMessage::assistant("late reply")).unwrap();
            }
        );
        assert_eq!(refreshed.unwrap(), 2);

        let thread = threads.load(&ed).unwrap();
        assert_eq!(thread.summary, "covers u0-u4");
        let mut expected = msgs(5)[3..].to_vec();
        expected.push(ThreadMessage::user("late"));
        expected.push(ThreadMessage::assistant("late reply"));
        assert_eq!(thread.messages, expected);
        assert!(threads.needs_refresh(&ed).unwrap());
        assert!(!threads.needs_refresh(&UserId::from_raw("2")).unwrap());
    }

    #[tokio::test]
    async fn key_mismatch_applies_nothing() {
        let (_db, threads) = seeded();
        let mock = MockCompletion::with_texts([r#"{"England": "E deal"}"#]);

        let err = refresh_stale_threads(&mock, &threads, Country::Austria, 12, 1200, 2)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::MalformedSummaries(SummaryParseError::KeyMismatch { .. })
        ));
        for user in ["1", "2"] {
            let id = UserId::from_raw(user);
            assert!(threads.needs_refresh(&id).unwrap());
            assert_eq!(threads.load(&id).unwrap().messages.len(), 5);
        }
    }

    #[tokio::test]
    async fn nothing_stale_makes_no_call() {
        let db = Database::in_memory().unwrap();
        let threads = ThreadRepo::new(db);
        let mock = MockCompletion::default();
        let n = refresh_stale_threads(&mock, &threads, Country::Austria, 12, 1200, 2)
            .await
            .unwrap();
        assert_eq!(n, 0);
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn completion_failure_propagates_untouched() {
        let (_db, threads) = seeded();
        let mock = MockCompletion::new(vec![MockResponse::Error(
            envoy_core::CompletionError::Timeout(std::time::Duration::from_secs(200)),
        )]);
        let err = refresh_stale_threads(&mock, &threads, Country::Austria, 12, 1200, 2)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Completion(_)));
        assert!(threads.needs_refresh(&UserId::from_raw("1")).unwrap());
    }
}
