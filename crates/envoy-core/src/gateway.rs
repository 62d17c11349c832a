use async_trait::async_trait;
use parking_lot::Mutex;

use crate::errors::DeliveryError;
use crate::events::ReplyTarget;
use crate::ids::UserId;

/// Discord's hard limit on a single message body.
pub const DEFAULT_MAX_MESSAGE_CHARS: usize = 2000;

/// Outbound side of the chat transport.
#[async_trait]
pub trait MessagingGateway: Send + Sync {
    /// Answer an inbound event in the channel or DM it arrived on.
    async fn reply(&self, target: &ReplyTarget, text: &str) -> Result<(), DeliveryError>;

    /// Open (or reuse) a private channel with `user` and post `text`.
    async fn send_direct(&self, user: &UserId, text: &str) -> Result<(), DeliveryError>;

    fn max_message_chars(&self) -> usize {
        DEFAULT_MAX_MESSAGE_CHARS
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Sent {
    Reply { target: ReplyTarget, text: String },
    Direct { user: UserId, text: String },
}

/// In-memory gateway that records everything sent through it.
/// Direct messages to users in `unreachable` fail with a transport error.
#[derive(Default)]
pub struct RecordingGateway {
    sent: Mutex<Vec<Sent>>,
    unreachable: Mutex<Vec<UserId>>,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_deliveries_to(&self, user: UserId) {
        self.unreachable.lock().push(user);
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().clone()
    }

    pub fn directs(&self) -> Vec<(UserId, String)> {
        self.sent
            .lock()
            .iter()
            .filter_map(|s| match s {
                Sent::Direct { user, text } => Some((user.clone(), text.clone())),
                Sent::Reply { .. } => None,
            })
            .collect()
    }

    pub fn replies(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter_map(|s| match s {
                Sent::Reply { text, .. } => Some(text.clone()),
                Sent::Direct { .. } => None,
            })
            .collect()
    }
}

#[async_trait]
impl MessagingGateway for RecordingGateway {
    async fn reply(&self, target: &ReplyTarget, text: &str) -> Result<(), DeliveryError> {
        self.sent.lock().push(Sent::Reply {
            target: target.clone(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn send_direct(&self, user: &UserId, text: &str) -> Result<(), DeliveryError> {
        if self.unreachable.lock().contains(user) {
            return Err(DeliveryError::Transport(format!("cannot reach {user}")));
        }
        self.sent.lock().push(Sent::Direct {
            user: user.clone(),
            text: text.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_replies_and_directs() {
        let gw = RecordingGateway::new();
        gw.reply(&ReplyTarget::User(UserId::from_raw("1")), "hi").await.unwrap();
        gw.send_direct(&UserId::from_raw("2"), "psst").await.unwrap();

        assert_eq!(gw.replies(), vec!["hi".to_string()]);
        assert_eq!(gw.directs(), vec![(UserId::from_raw("2"), "psst".to_string())]);
    }

    #[tokio::test]
    async fn unreachable_users_fail() {
        let gw = RecordingGateway::new();
        gw.fail_deliveries_to(UserId::from_raw("3"));
        let err = gw.send_direct(&UserId::from_raw("3"), "x").await.unwrap_err();
        assert!(matches!(err, DeliveryError::Transport(_)));
        assert!(gw.sent().is_empty());
    }

    #[test]
    fn default_limit_is_discord_limit() {
        assert_eq!(RecordingGateway::new().max_message_chars(), 2000);
    }
}
