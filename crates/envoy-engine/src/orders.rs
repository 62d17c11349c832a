//! Order-line grammar and the bounded retry used to obtain valid orders.
//!
//! Accepted forms (whitespace runs are free, everything else is exact):
//!
//! | form         | shape                 |
//! |--------------|-----------------------|
//! | hold         | `U PPP H`             |
//! | move         | `U PPP - PPP`         |
//! | support-hold | `U PPP S U PPP H`     |
//! | support-move | `U PPP S U PPP - PPP` |
//! | convoy       | `U PPP C U PPP - PPP` |
//! | retreat      | `U PPP R PPP`         |
//! | disband      | `U PPP D`             |
//! | build        | `A PPP B` / `F PPP B` |
//!
//! `U` is `A` or `F`; `PPP` is three ASCII letters in any case.

use std::fmt;

use tracing::{info, instrument, warn};

use envoy_core::completion::CompletionService;

use crate::error::EngineError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Unit {
    Army,
    Fleet,
}

impl Unit {
    fn parse(token: &str) -> Option<Self> {
        match token {
            "A" => Some(Self::Army),
            "F" => Some(Self::Fleet),
            _ => None,
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Army => "A",
            Self::Fleet => "F",
        })
    }
}

/// Three-letter province abbreviation, case preserved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Province(String);

impl Province {
    fn parse(token: &str) -> Option<Self> {
        (token.len() == 3 && token.bytes().all(|b| b.is_ascii_alphabetic()))
            .then(|| Self(token.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Province {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One well-formed order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OrderLine {
    Hold { unit: Unit, at: Province },
    Move { unit: Unit, from: Province, to: Province },
    SupportHold { unit: Unit, at: Province, supported: Unit, target: Province },
    SupportMove { unit: Unit, at: Province, supported: Unit, from: Province, to: Province },
    Convoy { unit: Unit, at: Province, convoyed: Unit, from: Province, to: Province },
    Retreat { unit: Unit, from: Province, to: Province },
    Disband { unit: Unit, at: Province },
    Build { unit: Unit, at: Province },
}

impl OrderLine {
    /// Parse a single line. `None` for anything outside the grammar.
    pub fn parse(line: &str) -> Option<Self> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let unit = Unit::parse(tokens.first()?)?;
        let at = Province::parse(tokens.get(1)?)?;

        let order = match tokens[2..] {
            ["H"] => Self::Hold { unit, at },
            ["D"] => Self::Disband { unit, at },
            ["B"] => Self::Build { unit, at },
            ["-", to] => Self::Move {
                unit,
                from: at,
                to: Province::parse(to)?,
            },
            ["R", to] => Self::Retreat {
                unit,
                from: at,
                to: Province::parse(to)?,
            },
            ["S", other, target, "H"] => Self::SupportHold {
                unit,
                at,
                supported: Unit::parse(other)?,
                target: Province::parse(target)?,
            },
            ["S", other, from, "-", to] => Self::SupportMove {
                unit,
                at,
                supported: Unit::parse(other)?,
                from: Province::parse(from)?,
                to: Province::parse(to)?,
            },
            ["C", other, from, "-", to] => Self::Convoy {
                unit,
                at,
                convoyed: Unit::parse(other)?,
                from: Province::parse(from)?,
                to: Province::parse(to)?,
            },
            _ => return None,
        };
        Some(order)
    }
}

impl fmt::Display for OrderLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hold { unit, at } => write!(f, "{unit} {at} H"),
            Self::Move { unit, from, to } => write!(f, "{unit} {from} - {to}"),
            Self::SupportHold { unit, at, supported, target } => {
                write!(f, "{unit} {at} S {supported} {target} H")
            }
            Self::SupportMove { unit, at, supported, from, to } => {
                write!(f, "{unit} {at} S {supported} {from} - {to}")
            }
            Self::Convoy { unit, at, convoyed, from, to } => {
                write!(f, "{unit} {at} C {convoyed} {from} - {to}")
            }
            Self::Retreat { unit, from, to } => write!(f, "{unit} {from} R {to}"),
            Self::Disband { unit, at } => write!(f, "{unit} {at} D"),
            Self::Build { unit, at } => write!(f, "{unit} {at} B"),
        }
    }
}

/// Keep only the lines of `text` that parse as orders, in order.
pub fn extract_valid_orders(text: &str) -> Vec<OrderLine> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(OrderLine::parse)
        .collect()
}

/// Render orders one per line.
pub fn render_orders(orders: &[OrderLine]) -> String {
    orders
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

pub const STRICT_ORDERS_SUFFIX: &str =
    "\n\nIMPORTANT: Output must be ONLY valid order lines. No other text.";

/// One escalation step applied to the system prompt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PromptTransform {
    Unchanged,
    AppendSystem(&'static str),
}

impl PromptTransform {
    pub fn apply(&self, system_prompt: &str) -> String {
        match self {
            Self::Unchanged => system_prompt.to_string(),
            Self::AppendSystem(suffix) => format!("{system_prompt}{suffix}"),
        }
    }
}

/// Plain attempt first, then one stricter retry.
pub const ORDER_RETRY_STEPS: [PromptTransform; 2] = [
    PromptTransform::Unchanged,
    PromptTransform::AppendSystem(STRICT_ORDERS_SUFFIX),
];

/// Ask for orders until one attempt yields at least one valid line.
///
/// `user_prompt` is rebuilt for every attempt so each one sees the latest
/// summaries and journal. Raw model text never leaves this function.
#[instrument(skip_all, fields(steps = steps.len()))]
pub async fn generate_orders<F>(
    completion: &dyn CompletionService,
    system_prompt: &str,
    steps: &[PromptTransform],
    mut user_prompt: F,
) -> Result<Vec<OrderLine>, EngineError>
where
    F: FnMut() -> Result<String, EngineError>,
{
    for (attempt, step) in steps.iter().enumerate() {
        let raw = completion
            .complete(&step.apply(system_prompt), &user_prompt()?)
            .await?;
        let orders = extract_valid_orders(&raw);
        if !orders.is_empty() {
            info!(attempt = attempt + 1, orders = orders.len(), "orders accepted");
            return Ok(orders);
        }
        warn!(attempt = attempt + 1, "no valid order lines in completion");
    }
    Err(EngineError::GrammarRejection {
        attempts: steps.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use envoy_llm::MockCompletion;

    fn lines(text: &str) -> Vec<String> {
        extract_valid_orders(text).iter().map(ToString::to_string).collect()
    }

    #[test]
    fn keeps_orders_drops_prose() {
        assert_eq!(lines("A Par - Bur\nI am attacking"), vec!["A Par - Bur"]);
    }

    #[test]
    fn every_form_is_accepted() {
        let text = "\
A Vie H
A Vie - Bud
A Tyr S A Vie H
F Tri S A Vie - Ven
F Ion C A Apu - Tun
A Ser R Alb
F Gre D
A Bud B
F Tri B";
        assert_eq!(lines(text).len(), 9);
    }

    #[test]
    fn whitespace_runs_are_normalized() {
        assert_eq!(lines("  A   Vie \t-   Bud  "), vec!["A Vie - Bud"]);
    }

    #[test]
    fn province_case_is_preserved() {
        assert_eq!(lines("f tri h\nF tri H"), vec!["F tri H"]);
    }

    #[test]
    fn rejects_near_misses() {
        for bad in [
            "A Par-Bur",
            "A Pari - Bur",
            "X Par H",
            "A Par - Bu",
            "A Par H extra",
            "A Par S Par H",
            "A Pa1 H",
            "A Par S A Bur - Mar - Spa",
            "1. A Par - Bur",
            "- A Par - Bur",
            "A Par h",
            "A Par C F Bur H",
        ] {
            assert!(OrderLine::parse(bad).is_none(), "accepted: {bad}");
        }
    }

    #[test]
    fn empty_input_yields_nothing() {
        assert!(extract_valid_orders("").is_empty());
        assert!(extract_valid_orders("\n \n").is_empty());
    }

    #[test]
    fn strict_step_appends_suffix() {
        assert_eq!(ORDER_RETRY_STEPS[0].apply("SYS"), "SYS");
        assert!(ORDER_RETRY_STEPS[1]
            .apply("SYS")
            .ends_with("Output must be ONLY valid order lines. No other text."));
    }

    #[tokio::test]
    async fn first_attempt_success_makes_one_call() {
        let mock = MockCompletion::with_texts(["Here you go:\nA Vie - Gal\nF Tri H"]);
        let orders = generate_orders(&mock, "SYS", &ORDER_RETRY_STEPS, || Ok("prompt".into()))
            .await
            .unwrap();
        assert_eq!(render_orders(&orders), "A Vie - Gal\nF Tri H");
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn retries_once_with_stricter_prompt() {
        let mock = MockCompletion::with_texts(["I refuse", "A Bud - Ser"]);
        let mut builds = 0;
        let orders = generate_orders(&mock, "SYS", &ORDER_RETRY_STEPS, || {
            builds += 1;
            Ok(format!("prompt {builds}"))
        })
        .await
        .unwrap();

        assert_eq!(render_orders(&orders), "A Bud - Ser");
        let calls = mock.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], ("SYS".to_string(), "prompt 1".to_string()));
        assert_eq!(calls[1].0, format!("SYS{STRICT_ORDERS_SUFFIX}"));
        assert_eq!(calls[1].1, "prompt 2");
    }

    #[tokio::test]
    async fn exhaustion_fails_closed() {
        let mock = MockCompletion::with_texts(["nope", "still nope", "A Vie H"]);
        let err = generate_orders(&mock, "SYS", &ORDER_RETRY_STEPS, || Ok("p".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::GrammarRejection { attempts: 2 }));
        assert_eq!(mock.call_count(), 2);
    }
}
