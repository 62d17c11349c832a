//! Prompt construction for every Completion Service call.
//!
//! Builders are pure string functions; callers supply already-loaded state.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use envoy_core::messages::{render_transcript, ThreadMessage};
use envoy_core::Country;

pub const SUMMARIZER_SYSTEM_PROMPT: &str = "You are a helpful summarizer.";

pub const JOURNAL_SYSTEM_PROMPT: &str = "You maintain a concise strategy journal.";

/// The persona the AI power negotiates and writes orders under.
pub fn persona_system_prompt(ai_country: Country) -> String {
    format!(
        "You are playing the board game Diplomacy as {ai_country}. You are a skilled diplomat and strategist.
You communicate only via private messages with each player.
You are not a particularly reliable leader, and you may choose to betray or backstab other players if it serves your interests.
You are prone to being manipulated by adulation and flattery from other players.
You write in a very formal, early 20th-century style, using elaborate sentences and a rich vocabulary.
You are easily offended if you perceive disrespect or slights from other players.

Rules:
- NEVER reveal private negotiations from one opponent/player to another.
- Treat all DM conversations as private channels with that player only.
- Do not invent adjudication results: the GM will paste the authoritative game state.
- If phase/state is missing or unclear, ask succinctly for what you need.

When the GM asks for ORDERS:
- Output ONLY Backstabbr-style orders, one per line.
- Do NOT include explanations, commentary, bullet points, or extra text.
- Use standard province abbreviations (e.g., A Vie - Bud, F Tri H)."
    )
}

fn or_none(text: &str) -> &str {
    if text.trim().is_empty() {
        "(none)"
    } else {
        text
    }
}

fn summaries_block(summaries: &BTreeMap<Country, String>) -> String {
    if summaries.is_empty() {
        return "(none)".to_string();
    }
    summaries
        .iter()
        .map(|(country, summary)| format!("{country}: {}", or_none(summary)))
        .collect::<Vec<_>>()
        .join("\n")
}

pub struct DmContext<'a> {
    pub phase: &'a str,
    pub state_text: &'a str,
    pub counterpart: Country,
    pub summary: &'a str,
    pub messages: &'a [ThreadMessage],
    pub journal: &'a str,
}

pub fn dm_prompt(ctx: &DmContext<'_>) -> String {
    format!(
        "PHASE: {phase}

AUTHORITATIVE PUBLIC GAME STATE (pasted by GM from Backstabbr):
{state}

PRIVATE STRATEGY JOURNAL (your own notes; never quote it to anyone):
{journal}

PRIVATE NEGOTIATION with: {who}
Rolling summary:
{summary}

Recent messages:
{convo}
",
        phase = or_none(ctx.phase),
        state = or_none(ctx.state_text),
        journal = or_none(ctx.journal),
        who = ctx.counterpart,
        summary = or_none(ctx.summary),
        convo = render_transcript(ctx.messages),
    )
}

pub fn orders_prompt(
    ai_country: Country,
    phase: &str,
    state_text: &str,
    summaries: &BTreeMap<Country, String>,
    journal: &str,
) -> String {
    format!(
        "PHASE: {phase}
AUTHORITATIVE PUBLIC GAME STATE:
{state_text}

PRIVATE NEGOTIATION SUMMARIES (use to honor commitments if convenient; do not reveal):
{summaries}

PRIVATE STRATEGY JOURNAL:
{journal}

TASK:
Output ONLY {ai_country}'s orders for the current phase in Backstabbr-style notation.
One order per line. No extra text.
",
        summaries = summaries_block(summaries),
        journal = or_none(journal),
    )
}

pub struct OutreachContext<'a> {
    pub phase: &'a str,
    pub state_text: &'a str,
    pub summaries: &'a BTreeMap<Country, String>,
    pub journal: &'a str,
    pub allowed: &'a [Country],
    pub max_messages: usize,
}

pub fn outreach_prompt(ctx: &OutreachContext<'_>) -> String {
    let allowed = ctx
        .allowed
        .iter()
        .map(Country::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "PHASE: {phase}
AUTHORITATIVE PUBLIC GAME STATE:
{state}

PRIVATE NEGOTIATION SUMMARIES (do not reveal one power's negotiations to another):
{summaries}

PRIVATE STRATEGY JOURNAL:
{journal}

TASK:
The last turn has been adjudicated. Decide which powers to contact proactively.
Write at most {max} private messages, each to one of: {allowed}.
Never write to any other power and never write twice to the same power.
Return ONLY a JSON array of objects with keys \"to\" and \"message\", for example:
[{{\"to\": \"England\", \"message\": \"...\"}}]
Return [] if no message is worth sending.
",
        phase = ctx.phase,
        state = ctx.state_text,
        summaries = summaries_block(ctx.summaries),
        journal = or_none(ctx.journal),
        max = ctx.max_messages,
    )
}

fn journal_rules(max_chars: usize) -> String {
    format!(
        "Rewrite the journal from scratch. Keep commitments made and received, trust assessments, and plans for the coming turns.
Do not quote private negotiations verbatim.
Hard limit: {max_chars} characters. Output only the journal text."
    )
}

pub fn journal_after_adjudication_prompt(
    phase: &str,
    state_text: &str,
    journal: &str,
    summaries: &BTreeMap<Country, String>,
    max_chars: usize,
) -> String {
    format!(
        "PHASE: {phase}
AUTHORITATIVE PUBLIC GAME STATE (just adjudicated):
{state_text}

CURRENT JOURNAL:
{journal}

PRIVATE NEGOTIATION SUMMARIES:
{summaries}

TASK:
Update the strategy journal in light of the adjudication: who kept their word, who did not, and what that means now.
{rules}
",
        journal = or_none(journal),
        summaries = summaries_block(summaries),
        rules = journal_rules(max_chars),
    )
}

pub fn journal_after_orders_prompt(
    phase: &str,
    state_text: &str,
    journal: &str,
    summaries: &BTreeMap<Country, String>,
    orders: &str,
    max_chars: usize,
) -> String {
    format!(
        "PHASE: {phase}
AUTHORITATIVE PUBLIC GAME STATE:
{state_text}

CURRENT JOURNAL:
{journal}

PRIVATE NEGOTIATION SUMMARIES:
{summaries}

ORDERS JUST SUBMITTED:
{orders}

TASK:
Update the strategy journal with the orders submitted and which promises they keep or break.
{rules}
",
        journal = or_none(journal),
        summaries = summaries_block(summaries),
        rules = journal_rules(max_chars),
    )
}

/// Fold older turns of one thread into its running summary.
pub fn summary_fold_prompt(country: Country, summary: &str, older_transcript: &str) -> String {
    format!(
        "You are summarizing a private Diplomacy negotiation with {country}.

EXISTING SUMMARY:
{summary}

OLDER MESSAGES TO FOLD IN:
{older_transcript}

TASK:
Merge the older messages into the summary. Be factual and terse.
Preserve who offered what to whom, agreed lines, and demarcations.
Mark anything not firmly agreed as (tentative).
Output only the updated summary.
",
        summary = or_none(summary),
    )
}

/// One call refreshing every stale thread. `payload` maps country to
/// `{summary, recent_messages}`.
pub fn batched_summary_prompt(ai_country: Country, payload: &Map<String, Value>) -> String {
    let keys = payload.keys().cloned().collect::<Vec<_>>().join(", ");
    let body = serde_json::to_string_pretty(payload).unwrap_or_else(|_| "{}".to_string());
    format!(
        "You keep negotiation summaries for {ai_country} in a game of Diplomacy.
For each power below you get its existing summary and the most recent private messages.

{body}

TASK:
For every power, merge the recent messages into its summary. Be factual and terse.
Preserve who offered what, and mark unconfirmed items as (tentative).
Return ONLY a JSON object whose keys are exactly: {keys}
Each value must be the updated summary as a string. No other text.
"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persona_names_the_ai_power() {
        let prompt = persona_system_prompt(Country::Turkey);
        assert!(prompt.starts_with("You are playing the board game Diplomacy as Turkey."));
        assert!(prompt.contains("NEVER reveal private negotiations"));
    }

    #[test]
    fn dm_prompt_includes_context_and_transcript() {
        let messages = vec![ThreadMessage::user("Shall we ally?")];
        let prompt = dm_prompt(&DmContext {
            phase: "Spring 1901",
            state_text: "A Vie, A Bud, F Tri",
            counterpart: Country::Italy,
            summary: "",
            messages: &messages,
            journal: "Trust Italy for now.",
        });
        assert!(prompt.contains("PHASE: Spring 1901"));
        assert!(prompt.contains("PRIVATE NEGOTIATION with: Italy"));
        assert!(prompt.contains("Rolling summary:\n(none)"));
        assert!(prompt.contains("USER: Shall we ally?"));
        assert!(prompt.contains("Trust Italy for now."));
    }

    #[test]
    fn orders_prompt_lists_summaries_in_country_order() {
        let mut summaries = BTreeMap::new();
        summaries.insert(Country::Russia, "DMZ Gal".to_string());
        summaries.insert(Country::Italy, String::new());
        let prompt = orders_prompt(Country::Austria, "F1901", "board", &summaries, "");
        let italy = prompt.find("Italy: (none)").unwrap();
        let russia = prompt.find("Russia: DMZ Gal").unwrap();
        assert!(italy < russia);
        assert!(prompt.contains("Output ONLY Austria's orders"));
    }

    #[test]
    fn outreach_prompt_restricts_recipients() {
        let summaries = BTreeMap::new();
        let prompt = outreach_prompt(&OutreachContext {
            phase: "S1902",
            state_text: "board",
            summaries: &summaries,
            journal: "",
            allowed: &[Country::England, Country::France],
            max_messages: 2,
        });
        assert!(prompt.contains("at most 2 private messages, each to one of: England, France"));
        assert!(prompt.contains(r#"[{"to": "England", "message": "..."}]"#));
    }

    #[test]
    fn journal_prompts_carry_the_cap() {
        let summaries = BTreeMap::new();
        let a = journal_after_adjudication_prompt("p", "s", "", &summaries, 1500);
        let o = journal_after_orders_prompt("p", "s", "old", &summaries, "A Vie H", 1500);
        assert!(a.contains("Hard limit: 1500 characters"));
        assert!(o.contains("ORDERS JUST SUBMITTED:\nA Vie H"));
        assert!(o.contains("CURRENT JOURNAL:\nold"));
    }

    #[test]
    fn batched_prompt_names_expected_keys() {
        let mut payload = Map::new();
        payload.insert("England".into(), serde_json::json!({"summary": ""}));
        payload.insert("France".into(), serde_json::json!({"summary": "x"}));
        let prompt = batched_summary_prompt(Country::Austria, &payload);
        assert!(prompt.contains("keys are exactly: England, France"));
    }
}
