use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One turn of a private negotiation thread.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadMessage {
    pub role: Role,
    pub content: String,
}

impl ThreadMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Render messages as `USER: ...` / `ASSISTANT: ...` lines.
pub fn render_transcript(messages: &[ThreadMessage]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", m.role.as_str().to_uppercase(), m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_format_matches_stored_json() {
        let msg = ThreadMessage::user("I propose a DMZ in Tyr");
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"role":"user","content":"I propose a DMZ in Tyr"}"#);
    }

    #[test]
    fn transcript_uppercases_roles() {
        let msgs = vec![
            ThreadMessage::user("Support me into Gal?"),
            ThreadMessage::assistant("Gladly, dear friend."),
        ];
        assert_eq!(
            render_transcript(&msgs),
            "USER: Support me into Gal?\nASSISTANT: Gladly, dear friend."
        );
    }

    #[test]
    fn empty_transcript() {
        assert_eq!(render_transcript(&[]), "");
    }
}
