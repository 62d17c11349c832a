//! Local stdin/stdout transport.
//!
//! Input lines:
//!
//! ```text
//! ctl <text>                        control channel; "\n" becomes a newline
//! dm <user_id> <display_name> <text>
//! ```

use std::io::Write;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use envoy_core::errors::DeliveryError;
use envoy_core::events::{Author, InboundEvent, ReplyTarget};
use envoy_core::gateway::MessagingGateway;
use envoy_core::ids::{ChannelId, UserId};

/// Prints replies and direct messages to a writer, one block per message.
pub struct ConsoleGateway<W> {
    out: Mutex<W>,
}

impl<W: Write + Send> ConsoleGateway<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    fn emit(&self, header: &str, text: &str) -> Result<(), DeliveryError> {
        let mut out = self.out.lock();
        writeln!(out, "{header}\n{text}\n")
            .and_then(|()| out.flush())
            .map_err(|e| DeliveryError::Transport(e.to_string()))
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

#[async_trait]
impl<W: Write + Send> MessagingGateway for ConsoleGateway<W> {
    async fn reply(&self, target: &ReplyTarget, text: &str) -> Result<(), DeliveryError> {
        let header = match target {
            ReplyTarget::Channel(channel) => format!("[#{channel}]"),
            ReplyTarget::User(user) => format!("[dm -> {user}]"),
        };
        self.emit(&header, text)
    }

    async fn send_direct(&self, user: &UserId, text: &str) -> Result<(), DeliveryError> {
        self.emit(&format!("[dm -> {user}]"), text)
    }
}

/// Turn one console line into an event. Blank or malformed lines yield `None`.
pub fn parse_console_line(line: &str, control_channel: &ChannelId) -> Option<InboundEvent> {
    let line = line.trim();
    let (verb, rest) = line.split_once(char::is_whitespace)?;
    let rest = rest.trim_start();

    match verb {
        "ctl" => Some(InboundEvent::control(
            control_channel.clone(),
            Author::new("console", "Moderator"),
            rest.replace("\\n", "\n"),
        )),
        "dm" => {
            let mut parts = rest.splitn(3, char::is_whitespace);
            let user = parts.next().filter(|s| !s.is_empty())?;
            let name = parts.next().filter(|s| !s.is_empty())?;
            let text = parts.next().unwrap_or("").trim();
            Some(InboundEvent::direct(Author::new(user, name), text))
        }
        _ => None,
    }
}

/// Forward console lines as events until input ends or `cancel` fires.
pub async fn read_console<R>(
    reader: R,
    events: mpsc::Sender<InboundEvent>,
    control_channel: ChannelId,
    cancel: CancellationToken,
) where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    loop {
        let line = tokio::select! {
            () = cancel.cancelled() => break,
            line = lines.next_line() => line,
        };
        match line {
            Ok(Some(line)) => {
                let Some(event) = parse_console_line(&line, &control_channel) else {
                    if !line.trim().is_empty() {
                        warn!("unrecognized console line");
                    }
                    continue;
                };
                debug!(event_id = %event.id, "console event");
                if events.send(event).await.is_err() {
                    break;
                }
            }
            Ok(None) => {
                info!("console input closed");
                break;
            }
            Err(e) => {
                warn!(error = %e, "console read failed");
                break;
            }
        }
    }
}
