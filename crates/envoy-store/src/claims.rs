use rusqlite::{ErrorCode, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use envoy_core::ids::UserId;
use envoy_core::Country;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRow {
    pub country: Country,
    pub display_name: String,
    pub user_id: UserId,
}

/// Result of a claim attempt that reached the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClaimOutcome {
    Registered,
    /// The user already holds this country; nothing changed.
    AlreadyClaimed(Country),
    /// Another user holds the country.
    CountryTaken,
}

pub struct ClaimRepo {
    db: Database,
}

impl ClaimRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Register `country` for `user`.
    ///
    /// Uniqueness across users comes from the partial unique index on
    /// `lower(country)`; a violation is reported as `CountryTaken`.
    #[instrument(skip(self), fields(user_id = %user, country = %country))]
    pub fn claim(
        &self,
        user: &UserId,
        display_name: &str,
        country: Country,
    ) -> Result<ClaimOutcome, StoreError> {
        self.db.with_conn(|conn| {
            let existing: Option<Option<String>> = conn
                .query_row(
                    "SELECT country FROM players WHERE user_id = ?1",
                    [user.as_str()],
                    |row| row.get(0),
                )
                .optional()?;

            if let Some(held) = existing.flatten().filter(|c| !c.is_empty()) {
                let held = row_helpers::parse_enum(&held, "players", "country")?;
                return Ok(ClaimOutcome::AlreadyClaimed(held));
            }

            let result = conn.execute(
                "INSERT INTO players (user_id, display_name, country) VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_id) DO UPDATE SET
                     display_name = excluded.display_name,
                     country = CASE
                         WHEN players.country IS NULL OR players.country = '' THEN excluded.country
                         ELSE players.country
                     END",
                rusqlite::params![user.as_str(), display_name, country.as_str()],
            );

            match result {
                Ok(_) => {
                    info!("country claimed");
                    Ok(ClaimOutcome::Registered)
                }
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == ErrorCode::ConstraintViolation =>
                {
                    Ok(ClaimOutcome::CountryTaken)
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    /// All non-empty claims ordered by country name.
    #[instrument(skip(self))]
    pub fn list(&self) -> Result<Vec<ClaimRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT country, display_name, user_id FROM players
                 WHERE country IS NOT NULL AND country <> ''
                 ORDER BY lower(country)",
            )?;
            let mut rows = stmt.query([])?;
            let mut claims = Vec::new();
            while let Some(row) = rows.next()? {
                let country: String = row_helpers::get(row, 0, "players", "country")?;
                claims.push(ClaimRow {
                    country: row_helpers::parse_enum(&country, "players", "country")?,
                    display_name: row_helpers::get(row, 1, "players", "display_name")?,
                    user_id: UserId::from_raw(row_helpers::get::<String>(
                        row, 2, "players", "user_id",
                    )?),
                });
            }
            Ok(claims)
        })
    }

    /// The country `user` holds, if any.
    #[instrument(skip(self), fields(user_id = %user))]
    pub fn country_of(&self, user: &UserId) -> Result<Option<Country>, StoreError> {
        self.db.with_conn(|conn| {
            let raw: Option<Option<String>> = conn
                .query_row(
                    "SELECT country FROM players WHERE user_id = ?1",
                    [user.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            raw.flatten()
                .filter(|c| !c.is_empty())
                .map(|c| row_helpers::parse_enum(&c, "players", "country"))
                .transpose()
        })
    }

    /// Update the stored display name of an existing player. Unknown users are ignored.
    #[instrument(skip(self), fields(user_id = %user))]
    pub fn refresh_display_name(&self, user: &UserId, display_name: &str) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE players SET display_name = ?1 WHERE user_id = ?2 AND display_name <> ?1",
                rusqlite::params![display_name, user.as_str()],
            )?;
            Ok(())
        })
    }
}
