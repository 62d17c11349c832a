use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identifiers issued by the messaging platform. Envoy never mints these,
/// it only carries them around as opaque strings.
macro_rules! platform_id {
    ($name:ident) => {
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

platform_id!(UserId);
platform_id!(ChannelId);

/// Locally generated id used to correlate the log lines of one inbound event.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    pub fn new() -> Self {
        Self(format!("evt_{}", Uuid::now_v7()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_raw_preserves_value() {
        let id = UserId::from_raw("123456789012345678");
        assert_eq!(id.as_str(), "123456789012345678");
        assert_eq!(id.to_string(), "123456789012345678");
    }

    #[test]
    fn serde_is_transparent() {
        let id = ChannelId::from_raw("42");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"42\"");
        let parsed: ChannelId = serde_json::from_str("\"42\"").unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn event_ids_have_prefix_and_are_unique() {
        let a = EventId::new();
        let b = EventId::new();
        assert!(a.as_str().starts_with("evt_"), "got: {a}");
        assert_ne!(a, b);
    }
}
