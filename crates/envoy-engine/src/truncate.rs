/// Marker appended to messages cut to the transport limit.
pub const ELLIPSIS: &str = "…";

/// Marker appended to messages cut inside the summary payload.
pub const PAYLOAD_MARKER: &str = "…[truncated]";

/// Cap `text` at `max_chars` characters, ending with `marker` when cut.
///
/// Counts chars, not bytes. The result never exceeds `max_chars` unless the
/// marker alone is longer than the limit.
pub fn truncate_chars(text: &str, max_chars: usize, marker: &str) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(marker.chars().count());
    let mut out: String = text.chars().take(keep).collect();
    out.push_str(marker);
    out
}

/// Split `text` into chunks of at most `max_chars` characters, preferring
/// line breaks. Lines longer than the limit are hard-split.
pub fn split_chunks(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in text.split('\n') {
        let line_len = line.chars().count();
        let sep = usize::from(!current.is_empty());
        if current_len + sep + line_len <= max_chars {
            if sep == 1 {
                current.push('\n');
            }
            current.push_str(line);
            current_len += sep + line_len;
            continue;
        }

        if !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }

        let mut chars = line.chars().peekable();
        while chars.peek().is_some() {
            let piece: String = chars.by_ref().take(max_chars).collect();
            let piece_len = piece.chars().count();
            if piece_len == max_chars {
                chunks.push(piece);
            } else {
                current = piece;
                current_len = piece_len;
            }
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_truncation_when_within_limit() {
        assert_eq!(truncate_chars("hello", 5, ELLIPSIS), "hello");
    }

    #[test]
    fn truncated_result_fits_the_limit() {
        let input = "a".repeat(2500);
        let out = truncate_chars(&input, 2000, ELLIPSIS);
        assert_eq!(out.chars().count(), 2000);
        assert!(out.ends_with('…'));
    }

    #[test]
    fn counts_chars_not_bytes() {
        let input = "🦀".repeat(10);
        let out = truncate_chars(&input, 4, ELLIPSIS);
        assert_eq!(out, "🦀🦀🦀…");
    }

    #[test]
    fn payload_marker_is_visible() {
        let out = truncate_chars("abcdefghijklmnopqrstuvwxyz", 15, PAYLOAD_MARKER);
        assert_eq!(out, "abc…[truncated]");
    }

    #[test]
    fn chunks_prefer_line_breaks() {
        let text = "A Vie - Bud\nA Bud - Ser\nF Tri - Alb";
        assert_eq!(
            split_chunks(text, 24),
            vec!["A Vie - Bud\nA Bud - Ser", "F Tri - Alb"]
        );
    }

    #[test]
    fn long_lines_are_hard_split() {
        let chunks = split_chunks(&"x".repeat(25), 10);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.chars().count() <= 10));
        assert_eq!(chunks.concat(), "x".repeat(25));
    }

    #[test]
    fn short_text_is_one_chunk() {
        assert_eq!(split_chunks("status ok", 2000), vec!["status ok"]);
        assert!(split_chunks("", 2000).is_empty());
    }
}
