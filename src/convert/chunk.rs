//! Splits a span sequence into fragments that each fit a character budget,
//! breaking at the last line break before the budget, then the last
//! whitespace, and only cutting mid-token when a single token is itself
//! longer than the budget. Link and mention spans are never split: a URL or
//! identity always lands whole in one fragment.

use crate::convert::normalize::Span;
use std::collections::VecDeque;

/// One budget-sized slice of the message, ready to become a single embed
/// description (or the whole plain body).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub spans: Vec<Span>,
}

impl Fragment {
    /// The Discord-markdown text this fragment emits.
    pub fn text(&self) -> String {
        self.spans.iter().map(|s| s.markdown()).collect()
    }

    pub fn chars(&self) -> usize {
        self.spans.iter().map(|s| s.markdown_chars()).sum()
    }
}

/// Split `spans` into ordered fragments of at most `budget` characters
/// (measured over the emitted markdown). Order is preserved; every
/// character ends up in exactly one fragment.
pub fn chunk(spans: Vec<Span>, budget: usize) -> Vec<Fragment> {
    assert!(budget > 0, "chunk budget must be positive");

    let mut fragments = Vec::new();
    let mut current: Vec<Span> = Vec::new();
    let mut current_chars = 0usize;
    let mut queue: VecDeque<Span> = spans.into_iter().filter(|s| !s.display.is_empty()).collect();

    let close = |fragments: &mut Vec<Fragment>, current: &mut Vec<Span>, chars: &mut usize| {
        if !current.is_empty() {
            fragments.push(Fragment {
                spans: std::mem::take(current),
            });
            *chars = 0;
        }
    };

    while let Some(span) = queue.pop_front() {
        let span_chars = span.markdown_chars();

        if current_chars + span_chars <= budget {
            current_chars += span_chars;
            current.push(span);
            continue;
        }

        if span.is_atomic() {
            if !current.is_empty() {
                // Move the whole span to the next fragment
                close(&mut fragments, &mut current, &mut current_chars);
                queue.push_front(span);
            } else {
                // Alone and still over budget: the link cannot survive
                // whole, so it degrades to splittable text
                queue.push_front(Span::text(span.markdown()));
            }
            continue;
        }

        // Plain text: fill the remaining room up to a safe boundary
        let room = budget - current_chars;
        let prefix = char_prefix(&span.display, room);
        let cut = prefix
            .rfind('\n')
            .or_else(|| prefix.rfind(char::is_whitespace));

        match cut {
            Some(pos) if pos > 0 => {
                let (head, tail) = span.display.split_at(pos);
                current.push(Span::text(head));
                close(&mut fragments, &mut current, &mut current_chars);
                queue.push_front(Span::text(tail));
            }
            Some(_) if !current.is_empty() => {
                // Boundary right at the span start: the span moves whole
                close(&mut fragments, &mut current, &mut current_chars);
                queue.push_front(span);
            }
            None if !current.is_empty() => {
                // No boundary in reach; try again with a fresh fragment
                close(&mut fragments, &mut current, &mut current_chars);
                queue.push_front(span);
            }
            _ => {
                // A single token longer than the whole budget: hard cut
                let pos = prefix.len().max(first_char_len(&span.display));
                let (head, tail) = span.display.split_at(pos);
                current.push(Span::text(head));
                close(&mut fragments, &mut current, &mut current_chars);
                queue.push_front(Span::text(tail));
            }
        }
    }

    close(&mut fragments, &mut current, &mut current_chars);
    fragments
}

/// Byte-length prefix of `s` holding at most `chars` characters.
fn char_prefix(s: &str, chars: usize) -> &str {
    match s.char_indices().nth(chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn first_char_len(s: &str) -> usize {
    s.chars().next().map_or(0, char::len_utf8)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::normalize::{Span, SpanKind};

    fn link(label: &str, url: &str) -> Span {
        Span {
            kind: SpanKind::Link {
                url: url.to_string(),
            },
            display: label.to_string(),
        }
    }

    fn mention(display: &str) -> Span {
        Span {
            kind: SpanKind::UserMention,
            display: display.to_string(),
        }
    }

    #[test]
    fn test_short_text_single_fragment() {
        let fragments = chunk(vec![Span::text("hello world")], 100);
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].text(), "hello world");
    }

    #[test]
    fn test_split_prefers_line_break() {
        // Budget 20; a newline at 10 and spaces after it
        let fragments = chunk(vec![Span::text("aaaa bbbb\ncccc dddd eeee")], 20);
        assert_eq!(fragments[0].text(), "aaaa bbbb");
        assert_eq!(fragments[1].text(), "\ncccc dddd eeee");
    }

    #[test]
    fn test_split_falls_back_to_whitespace() {
        let fragments = chunk(vec![Span::text("alpha beta gamma delta")], 12);
        // No newline: last whitespace at or before 12 chars
        assert_eq!(fragments[0].text(), "alpha beta");
        assert_eq!(fragments[1].text(), " gamma delta");
        for f in &fragments {
            assert!(f.chars() <= 12);
        }
    }

    #[test]
    fn test_never_splits_inside_word_when_boundary_exists() {
        let text = "word ".repeat(50);
        let fragments = chunk(vec![Span::text(text.clone())], 23);
        let rebuilt: String = fragments.iter().map(|f| f.text()).collect();
        assert_eq!(rebuilt, text);
        for f in &fragments {
            assert!(f.chars() <= 23);
            // Every fragment ends at a word boundary
            assert!(
                f.text().ends_with("word") || f.text().ends_with(' '),
                "bad boundary: {:?}",
                f.text()
            );
        }
    }

    #[test]
    fn test_oversized_token_hard_cut() {
        let token = "x".repeat(25);
        let fragments = chunk(vec![Span::text(token.clone())], 10);
        assert_eq!(fragments.len(), 3);
        assert_eq!(fragments[0].chars(), 10);
        assert_eq!(fragments[1].chars(), 10);
        assert_eq!(fragments[2].chars(), 5);
        let rebuilt: String = fragments.iter().map(|f| f.text()).collect();
        assert_eq!(rebuilt, token);
    }

    #[test]
    fn test_atomic_span_moves_whole() {
        let spans = vec![
            Span::text("intro text "),
            link("docs", "https://example.com/long/path"),
        ];
        // Link markdown is ~40 chars; it cannot share the 50-char budget
        // with the intro without splitting, so it moves whole
        let fragments = chunk(spans, 40);
        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[0].text(), "intro text ");
        assert_eq!(
            fragments[1].text(),
            "[docs](https://example.com/long/path)"
        );
    }

    #[test]
    fn test_mention_never_split() {
        let spans = vec![Span::text("a".repeat(18)), mention("<@123456>")];
        let fragments = chunk(spans, 20);
        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[1].spans.len(), 1);
        assert_eq!(fragments[1].spans[0].display, "<@123456>");
    }

    #[test]
    fn test_fill_maximization() {
        // Units of 10 chars ("123456789 "): budget 35 fits three whole
        // units (30 chars incl. trailing boundary handling)
        let text = "123456789 ".repeat(6).trim_end().to_string();
        let fragments = chunk(vec![Span::text(text)], 35);
        // First fragment must not close before a whole next unit would fit
        assert!(
            fragments[0].chars() >= 29,
            "under-filled first fragment: {}",
            fragments[0].chars()
        );
        for f in &fragments {
            assert!(f.chars() <= 35);
        }
    }

    #[test]
    fn test_order_preserved() {
        let spans = vec![
            Span::text("one two three four "),
            mention("<@1>"),
            Span::text(" five six seven eight nine ten"),
        ];
        let original: String = spans.iter().map(|s| s.markdown()).collect();
        let fragments = chunk(spans, 16);
        let rebuilt: String = fragments.iter().map(|f| f.text()).collect();
        assert_eq!(rebuilt, original);
    }

    #[test]
    fn test_oversized_link_degrades_to_text() {
        let url = format!("https://example.com/{}", "p/".repeat(30));
        let spans = vec![link("label", &url)];
        let fragments = chunk(spans, 30);
        assert!(fragments.len() > 1);
        let rebuilt: String = fragments.iter().map(|f| f.text()).collect();
        assert_eq!(rebuilt, format!("[label]({url})"));
        for f in &fragments {
            assert!(f.chars() <= 30);
        }
    }

    #[test]
    fn test_empty_spans_produce_no_fragments() {
        assert!(chunk(Vec::new(), 10).is_empty());
        assert!(chunk(vec![Span::text("")], 10).is_empty());
    }
}
