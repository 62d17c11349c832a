//! Per-user negotiation threads.
//!
//! A thread is an append-only ledger of messages plus a rolling summary and
//! two stamps. It is stale while `summary_last_updated` is empty or older
//! than `last_updated`; only [`ThreadRepo::apply_refresh`] makes a thread
//! fresh again.
//!
//! Writers that wait on a completion between reading and writing a thread
//! merge into the live row instead of overwriting it: a DM commits through
//! [`ThreadRepo::commit_exchange`] and the batched refresh only claims the
//! snapshot it summarized.

use std::collections::BTreeMap;

use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use envoy_core::ids::UserId;
use envoy_core::messages::ThreadMessage;
use envoy_core::Country;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thread {
    pub messages: Vec<ThreadMessage>,
    pub summary: String,
    pub last_updated: String,
    pub summary_last_updated: String,
}

impl Thread {
    pub fn is_stale(&self) -> bool {
        self.summary_last_updated.is_empty() || self.last_updated > self.summary_last_updated
    }
}

/// A claimed player's thread awaiting the batched summary refresh.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StaleThread {
    pub user_id: UserId,
    pub country: Country,
    pub summary: String,
    pub messages: Vec<ThreadMessage>,
    /// `last_updated` of the row when it was read.
    pub last_updated: String,
}

/// A summary written from a [`StaleThread`] snapshot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefreshUpdate {
    pub user_id: UserId,
    pub summary: String,
    /// The ledger the summary covers.
    pub covered: Vec<ThreadMessage>,
    /// `last_updated` of the row when `covered` was read.
    pub covered_at: String,
}

impl RefreshUpdate {
    pub fn from_snapshot(snapshot: &StaleThread, summary: impl Into<String>) -> Self {
        Self {
            user_id: snapshot.user_id.clone(),
            summary: summary.into(),
            covered: snapshot.messages.clone(),
            covered_at: snapshot.last_updated.clone(),
        }
    }
}

/// An inline fold computed from a base read of the thread.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThreadFold {
    /// Leading messages of the base ledger the new summary absorbed.
    pub dropped: usize,
    pub summary: String,
    /// Recorded as `summary_last_updated`; taken before the commit.
    pub stamp: String,
}

pub struct ThreadRepo {
    db: Database,
}

impl ThreadRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Load a thread; a user without one gets an empty thread.
    #[instrument(skip(self), fields(user_id = %user))]
    pub fn load(&self, user: &UserId) -> Result<Thread, StoreError> {
        self.db
            .with_conn(|conn| Ok(load_row(conn, user)?.unwrap_or_default()))
    }

    /// Replace the ledger and summary, stamping `last_updated` now.
    ///
    /// `summary_refreshed_at` records an inline summary fold; `None` keeps
    /// the stored stamp (empty for a new thread).
    #[instrument(skip(self, messages, summary), fields(user_id = %user, messages = messages.len()))]
    pub fn save(
        &self,
        user: &UserId,
        messages: &[ThreadMessage],
        summary: &str,
        summary_refreshed_at: Option<&str>,
    ) -> Result<(), StoreError> {
        let now = self.db.stamp();
        let messages_json = serde_json::to_string(messages)?;
        self.db.with_conn(|conn| {
            let summary_stamp = match summary_refreshed_at {
                Some(stamp) => stamp.to_string(),
                None => load_row(conn, user)?
                    .map(|t| t.summary_last_updated)
                    .unwrap_or_default(),
            };
            conn.execute(
                "INSERT INTO threads (user_id, messages_json, summary, last_updated, summary_last_updated)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(user_id) DO UPDATE SET
                     messages_json = excluded.messages_json,
                     summary = excluded.summary,
                     last_updated = excluded.last_updated,
                     summary_last_updated = excluded.summary_last_updated",
                rusqlite::params![user.as_str(), messages_json, summary, now, summary_stamp],
            )?;
            Ok(())
        })
    }

    /// Append one message, creating the thread if needed.
    #[instrument(skip(self, message), fields(user_id = %user, role = message.role.as_str()))]
    pub fn append(&self, user: &UserId, message: ThreadMessage) -> Result<(), StoreError> {
        let now = self.db.stamp();
        self.db.with_conn(|conn| {
            let mut thread = load_row(conn, user)?.unwrap_or_default();
            thread.messages.push(message);
            conn.execute(
                "INSERT INTO threads (user_id, messages_json, summary, last_updated, summary_last_updated)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(user_id) DO UPDATE SET
                     messages_json = excluded.messages_json,
                     last_updated = excluded.last_updated",
                rusqlite::params![
                    user.as_str(),
                    serde_json::to_string(&thread.messages)?,
                    thread.summary,
                    now,
                    thread.summary_last_updated,
                ],
            )?;
            Ok(())
        })
    }

    /// Whether the user's thread needs a batched summary refresh.
    /// A user with no thread has nothing to refresh.
    pub fn needs_refresh(&self, user: &UserId) -> Result<bool, StoreError> {
        self.db
            .with_conn(|conn| Ok(load_row(conn, user)?.is_some_and(|t| t.is_stale())))
    }

    /// Stale threads of every claimed player.
    #[instrument(skip(self))]
    pub fn stale_threads(&self) -> Result<Vec<StaleThread>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT t.user_id, p.country, t.summary, t.messages_json, t.last_updated
                 FROM threads t
                 JOIN players p ON p.user_id = t.user_id
                 WHERE p.country IS NOT NULL AND p.country <> ''
                   AND (t.summary_last_updated = '' OR t.last_updated > t.summary_last_updated)
                 ORDER BY lower(p.country)",
            )?;
            let mut rows = stmt.query([])?;
            let mut stale = Vec::new();
            while let Some(row) = rows.next()? {
                let country: String = row_helpers::get(row, 1, "players", "country")?;
                let messages_json: String = row_helpers::get(row, 3, "threads", "messages_json")?;
                stale.push(StaleThread {
                    user_id: UserId::from_raw(row_helpers::get::<String>(
                        row, 0, "threads", "user_id",
                    )?),
                    country: row_helpers::parse_enum(&country, "players", "country")?,
                    summary: row_helpers::get(row, 2, "threads", "summary")?,
                    messages: row_helpers::parse_messages(&messages_json, "threads", "messages_json")?,
                    last_updated: row_helpers::get(row, 4, "threads", "last_updated")?,
                });
            }
            Ok(stale)
        })
    }

    /// Commit one DM exchange on top of the live row.
    ///
    /// `turns` are appended to whatever the ledger holds now, so messages
    /// written since `base` was read survive. `fold` applies only while the
    /// live summary is still the one `base` carried and the ledger still
    /// starts with the folded messages; otherwise it is discarded and the
    /// live summary stays.
    #[instrument(skip_all, fields(user_id = %user, turns = turns.len()))]
    pub fn commit_exchange(
        &self,
        user: &UserId,
        base: &Thread,
        fold: Option<&ThreadFold>,
        turns: &[ThreadMessage],
    ) -> Result<(), StoreError> {
        let now = self.db.stamp();
        self.db.with_conn(|conn| {
            let live = load_row(conn, user)?.unwrap_or_default();
            let requested = fold.is_some();
            let fold = fold.filter(|f| {
                live.summary == base.summary
                    && live.summary_last_updated == base.summary_last_updated
                    && base
                        .messages
                        .get(..f.dropped)
                        .is_some_and(|folded| live.messages.starts_with(folded))
            });

            let (mut messages, summary, summary_stamp) = match fold {
                Some(f) => (
                    live.messages[f.dropped..].to_vec(),
                    f.summary.clone(),
                    f.stamp.clone(),
                ),
                None => (live.messages, live.summary, live.summary_last_updated),
            };
            messages.extend_from_slice(turns);

            conn.execute(
                "INSERT INTO threads (user_id, messages_json, summary, last_updated, summary_last_updated)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(user_id) DO UPDATE SET
                     messages_json = excluded.messages_json,
                     summary = excluded.summary,
                     last_updated = excluded.last_updated,
                     summary_last_updated = excluded.summary_last_updated",
                rusqlite::params![
                    user.as_str(),
                    serde_json::to_string(&messages)?,
                    summary,
                    now,
                    summary_stamp,
                ],
            )?;
            if requested && fold.is_none() {
                debug!("inline fold superseded by a newer summary");
            }
            Ok(())
        })
    }

    /// Apply a batched refresh and return how many threads took it.
    ///
    /// Each summary covers only its snapshot. The ledger keeps the last
    /// `keep_last` covered messages plus everything appended since; a
    /// thread that changed after the snapshot keeps the new summary but
    /// stays stale. A thread whose ledger no longer starts with the
    /// snapshot (folded meanwhile) is left untouched.
    ///
    /// All updates commit together or not at all.
    #[instrument(skip(self, updates), fields(threads = updates.len()))]
    pub fn apply_refresh(
        &self,
        updates: &[RefreshUpdate],
        keep_last: usize,
    ) -> Result<usize, StoreError> {
        let now = self.db.stamp();
        self.db.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let mut applied = 0;
            for update in updates {
                let user = &update.user_id;
                let live = load_row(&tx, user)?
                    .ok_or_else(|| StoreError::NotFound(format!("thread {user}")))?;
                if !live.messages.starts_with(&update.covered) {
                    debug!(user_id = %user, "ledger rewritten since snapshot, refresh skipped");
                    continue;
                }

                let covered = &update.covered;
                let start = covered.len().saturating_sub(keep_last);
                let mut kept = covered[start..].to_vec();
                kept.extend_from_slice(&live.messages[covered.len()..]);
                let stamp = if live.last_updated == update.covered_at {
                    now.as_str()
                } else {
                    update.covered_at.as_str()
                };

                tx.execute(
                    "UPDATE threads
                     SET summary = ?1, messages_json = ?2, summary_last_updated = ?3
                     WHERE user_id = ?4",
                    rusqlite::params![update.summary, serde_json::to_string(&kept)?, stamp, user.as_str()],
                )?;
                applied += 1;
            }
            tx.commit()?;
            debug!(applied, "batched refresh applied");
            Ok(applied)
        })
    }

    /// Trimmed summaries of every claimed player that has a thread.
    #[instrument(skip(self))]
    pub fn summaries_for_claimed(&self) -> Result<BTreeMap<Country, String>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT p.country, t.summary
                 FROM threads t
                 JOIN players p ON p.user_id = t.user_id
                 WHERE p.country IS NOT NULL AND p.country <> ''",
            )?;
            let mut rows = stmt.query([])?;
            let mut summaries = BTreeMap::new();
            while let Some(row) = rows.next()? {
                let country: String = row_helpers::get(row, 0, "players", "country")?;
                let summary: String = row_helpers::get(row, 1, "threads", "summary")?;
                summaries.insert(
                    row_helpers::parse_enum(&country, "players", "country")?,
                    summary.trim().to_string(),
                );
            }
            Ok(summaries)
        })
    }
}

fn load_row(conn: &Connection, user: &UserId) -> Result<Option<Thread>, StoreError> {
    let raw: Option<(String, String, String, String)> = conn
        .query_row(
            "SELECT messages_json, summary, last_updated, summary_last_updated
             FROM threads WHERE user_id = ?1",
            [user.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .optional()?;

    raw.map(|(messages_json, summary, last_updated, summary_last_updated)| {
        Ok(Thread {
            messages: row_helpers::parse_messages(&messages_json, "threads", "messages_json")?,
            summary,
            last_updated,
            summary_last_updated,
        })
    })
    .transpose()
}
