//! Cleanup of a pasted adjudication dump before it becomes the board state.

use envoy_core::Country;

const RULE_WIDTH: usize = 30;

fn collapse_whitespace(line: &str) -> String {
    line.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Group unit lines under power headers.
///
/// Blank lines are dropped and whitespace runs collapsed. A line naming a
/// power opens a block rendered as the name, a dash rule, then its lines.
/// Lines before the first header are discarded. Without any header the
/// cleaned lines are returned as-is.
pub fn format_adjudication(text: &str) -> String {
    let cleaned: Vec<String> = text
        .lines()
        .map(collapse_whitespace)
        .filter(|line| !line.is_empty())
        .collect();

    let mut blocks: Vec<(Country, Vec<&str>)> = Vec::new();
    for line in &cleaned {
        match line.parse::<Country>() {
            Ok(power) => blocks.push((power, Vec::new())),
            Err(_) => {
                if let Some((_, lines)) = blocks.last_mut() {
                    lines.push(line);
                }
            }
        }
    }

    if blocks.is_empty() {
        return cleaned.join("\n");
    }

    let rule = "-".repeat(RULE_WIDTH);
    blocks
        .iter()
        .map(|(power, lines)| {
            let mut block = vec![power.as_str(), rule.as_str()];
            block.extend(lines.iter().copied());
            block.join("\n")
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
