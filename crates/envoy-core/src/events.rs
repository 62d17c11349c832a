use serde::{Deserialize, Serialize};

use crate::ids::{ChannelId, EventId, UserId};

/// Where an inbound message was posted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Origin {
    /// The moderator's control channel.
    Control { channel_id: ChannelId },
    /// A private message to the bot.
    Direct,
    /// Any other guild channel; never processed.
    OtherChannel { channel_id: ChannelId },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub id: UserId,
    pub display_name: String,
    #[serde(default)]
    pub is_bot: bool,
}

/// One message received from the messaging gateway.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InboundEvent {
    pub id: EventId,
    pub origin: Origin,
    pub author: Author,
    pub content: String,
}

/// Destination of a reply to an inbound event.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ReplyTarget {
    Channel(ChannelId),
    User(UserId),
}

impl InboundEvent {
    pub fn control(channel_id: ChannelId, author: Author, content: impl Into<String>) -> Self {
        Self {
            id: EventId::new(),
            origin: Origin::Control { channel_id },
            author,
            content: content.into(),
        }
    }

    pub fn direct(author: Author, content: impl Into<String>) -> Self {
        Self {
            id: EventId::new(),
            origin: Origin::Direct,
            author,
            content: content.into(),
        }
    }

    pub fn reply_target(&self) -> ReplyTarget {
        match &self.origin {
            Origin::Control { channel_id } | Origin::OtherChannel { channel_id } => {
                ReplyTarget::Channel(channel_id.clone())
            }
            Origin::Direct => ReplyTarget::User(self.author.id.clone()),
        }
    }
}

impl Author {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: UserId::from_raw(id),
            display_name: display_name.into(),
            is_bot: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_replies_go_to_author() {
        let event = InboundEvent::direct(Author::new("7", "Kaiser"), "hello");
        assert_eq!(event.reply_target(), ReplyTarget::User(UserId::from_raw("7")));
    }

    #[test]
    fn control_replies_go_to_channel() {
        let event = InboundEvent::control(ChannelId::from_raw("99"), Author::new("1", "GM"), "status");
        assert_eq!(event.reply_target(), ReplyTarget::Channel(ChannelId::from_raw("99")));
    }

    #[test]
    fn origin_serde_is_tagged() {
        let json = serde_json::to_string(&Origin::Direct).unwrap();
        assert_eq!(json, r#"{"kind":"direct"}"#);
    }
}
