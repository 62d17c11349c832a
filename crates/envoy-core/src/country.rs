use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The seven great powers. Claims, summaries and outreach recipients are all
/// keyed by these names.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Country {
    Austria,
    England,
    France,
    Germany,
    Italy,
    Russia,
    Turkey,
}

impl Country {
    /// All powers in alphabetical order.
    pub const ALL: [Country; 7] = [
        Country::Austria,
        Country::England,
        Country::France,
        Country::Germany,
        Country::Italy,
        Country::Russia,
        Country::Turkey,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Austria => "Austria",
            Self::England => "England",
            Self::France => "France",
            Self::Germany => "Germany",
            Self::Italy => "Italy",
            Self::Russia => "Russia",
            Self::Turkey => "Turkey",
        }
    }

    /// Comma-separated list used in corrective replies.
    pub fn valid_names() -> String {
        Self::ALL.map(|c| c.as_str()).join(", ")
    }
}

impl fmt::Display for Country {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown country '{0}'")]
pub struct UnknownCountry(pub String);

impl FromStr for Country {
    type Err = UnknownCountry;

    /// Exact, case-sensitive match after trimming surrounding whitespace.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == name)
            .ok_or_else(|| UnknownCountry(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_power() {
        for country in Country::ALL {
            assert_eq!(country.as_str().parse::<Country>().unwrap(), country);
        }
    }

    #[test]
    fn trims_whitespace() {
        assert_eq!("  France \n".parse::<Country>().unwrap(), Country::France);
    }

    #[test]
    fn match_is_case_sensitive() {
        let err = "france".parse::<Country>().unwrap_err();
        assert_eq!(err, UnknownCountry("france".into()));
    }

    #[test]
    fn rejects_unknown_names() {
        assert!("Prussia".parse::<Country>().is_err());
        assert!("".parse::<Country>().is_err());
    }

    #[test]
    fn valid_names_sorted() {
        assert_eq!(
            Country::valid_names(),
            "Austria, England, France, Germany, Italy, Russia, Turkey"
        );
    }
}
