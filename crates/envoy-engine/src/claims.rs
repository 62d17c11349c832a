use tracing::{info, instrument};

use envoy_core::country::UnknownCountry;
use envoy_core::ids::UserId;
use envoy_core::Country;
use envoy_store::{ClaimOutcome, ClaimRepo, ClaimRow, Database, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum ClaimError {
    #[error(transparent)]
    UnknownCountry(#[from] UnknownCountry),

    #[error("already claimed {0}")]
    AlreadyClaimed(Country),

    #[error("{0} is held by another player")]
    CountryTaken(Country),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ClaimError {
    /// Reply shown to the player. `None` for storage failures.
    pub fn user_message(&self) -> Option<String> {
        match self {
            Self::UnknownCountry(UnknownCountry(name)) => Some(format!(
                "Unknown country '{name}'. Valid: {}",
                Country::valid_names()
            )),
            Self::AlreadyClaimed(country) => Some(format!(
                "You already claimed **{country}**. Claims for you are locked."
            )),
            Self::CountryTaken(country) => Some(format!(
                "❌ **{country}** is already claimed by another player."
            )),
            Self::Store(_) => None,
        }
    }
}

/// One country per user, one user per country.
pub struct ClaimRegistry {
    repo: ClaimRepo,
}

impl ClaimRegistry {
    pub fn new(db: Database) -> Self {
        Self {
            repo: ClaimRepo::new(db),
        }
    }

    #[instrument(skip(self), fields(user_id = %user))]
    pub fn claim(
        &self,
        user: &UserId,
        display_name: &str,
        requested: &str,
    ) -> Result<Country, ClaimError> {
        let country: Country = requested.parse()?;
        match self.repo.claim(user, display_name, country)? {
            ClaimOutcome::Registered => {
                info!(country = %country, "claim registered");
                Ok(country)
            }
            ClaimOutcome::AlreadyClaimed(held) => Err(ClaimError::AlreadyClaimed(held)),
            ClaimOutcome::CountryTaken => Err(ClaimError::CountryTaken(country)),
        }
    }

    pub fn list_claims(&self) -> Result<Vec<ClaimRow>, StoreError> {
        self.repo.list()
    }

    pub fn country_of(&self, user: &UserId) -> Result<Option<Country>, StoreError> {
        self.repo.country_of(user)
    }

    pub fn refresh_display_name(&self, user: &UserId, display_name: &str) -> Result<(), StoreError> {
        self.repo.refresh_display_name(user, display_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ClaimRegistry {
        ClaimRegistry::new(Database::in_memory().unwrap())
    }

    #[test]
    fn claim_trims_and_registers() {
        let reg = registry();
        let country = reg.claim(&UserId::from_raw("1"), "Alice", "  England ").unwrap();
        assert_eq!(country, Country::England);
        assert_eq!(reg.list_claims().unwrap()[0].display_name, "Alice");
    }

    #[test]
    fn unknown_country_is_rejected_without_mutation() {
        let reg = registry();
        let err = reg.claim(&UserId::from_raw("1"), "Alice", "england").unwrap_err();
        assert!(matches!(err, ClaimError::UnknownCountry(_)));
        assert!(err.user_message().unwrap().contains("Valid: Austria, England"));
        assert!(reg.list_claims().unwrap().is_empty());
    }

    #[test]
    fn second_claim_keeps_the_first() {
        let reg = registry();
        let user = UserId::from_raw("1");
        reg.claim(&user, "Alice", "France").unwrap();
        let err = reg.claim(&user, "Alice", "Germany").unwrap_err();
        assert!(matches!(err, ClaimError::AlreadyClaimed(Country::France)));
        assert_eq!(reg.country_of(&user).unwrap(), Some(Country::France));
    }

    #[test]
    fn taken_country_names_the_country() {
        let reg = registry();
        reg.claim(&UserId::from_raw("1"), "Alice", "Russia").unwrap();
        let err = reg.claim(&UserId::from_raw("2"), "Bob", "Russia").unwrap_err();
        assert!(matches!(err, ClaimError::CountryTaken(Country::Russia)));
        assert_eq!(
            err.user_message().unwrap(),
            "❌ **Russia** is already claimed by another player."
        );
    }
}
