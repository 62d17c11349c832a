//! Moderator commands posted in the control channel.

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControlCommand {
    Phase(String),
    /// Everything after `state:`, including following lines.
    State(String),
    Status,
    /// Requested budget; `None` uses the configured default.
    Outreach(Option<usize>),
    Orders,
}

fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let head = text.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &text[prefix.len()..])
}

/// Parse a control-channel message. Unrecognized text yields `None`.
pub fn parse_control(content: &str) -> Option<ControlCommand> {
    let trimmed = content.trim();

    if let Some(rest) = strip_prefix_ignore_case(trimmed, "phase:") {
        return Some(ControlCommand::Phase(rest.trim().to_string()));
    }
    if let Some(rest) = strip_prefix_ignore_case(trimmed, "state:") {
        return Some(ControlCommand::State(rest.trim().to_string()));
    }
    if trimmed.eq_ignore_ascii_case("status") {
        return Some(ControlCommand::Status);
    }
    if trimmed.eq_ignore_ascii_case("orders") {
        return Some(ControlCommand::Orders);
    }

    let mut words = trimmed.split_whitespace();
    if !words.next()?.eq_ignore_ascii_case("outreach") {
        return None;
    }
    let budget = match (words.next(), words.next()) {
        (Some(n), None) if n.bytes().all(|b| b.is_ascii_digit()) => {
            Some(n.parse::<usize>().unwrap_or(usize::MAX))
        }
        _ => None,
    };
    Some(ControlCommand::Outreach(budget))
}
