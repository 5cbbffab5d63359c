//! Decodes Slack mrkdwn into canonical text with typed inline spans.
//!
//! Slack exports escape literal `&`, `<`, `>` as HTML entities and reserve
//! real angle brackets for constructs: `<@U…>` user mentions, `<#C…|name>`
//! channel mentions, `<!everyone>`-style broadcasts, and `<url|label>`
//! links. Parsing therefore runs on the raw text first; entity decoding is
//! applied exactly once, to the text between constructs and to the pieces
//! extracted from inside them.

use crate::convert::resolve::{Broadcast, Resolver};
use once_cell::sync::Lazy;
use regex::Regex;

static CONSTRUCT_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<([^<>]+)>").expect("valid construct regex"));
static USER_MENTION_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^@([A-Z0-9]+)(?:\|([^>]*))?$").expect("valid user mention regex"));
static CHANNEL_MENTION_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^#([A-Z0-9]+)(?:\|([^>]*))?$").expect("valid channel mention regex"));

// ---------------------------------------------------------------------------
// Spans
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpanKind {
    Text,
    Link { url: String },
    UserMention,
    ChannelMention,
    Broadcast,
}

/// One typed run of canonical text. `display` is the text the span
/// contributes to the canonical form; for mentions that is already the
/// resolved Discord mention or its literal fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    pub kind: SpanKind,
    pub display: String,
}

impl Span {
    pub fn text(display: impl Into<String>) -> Self {
        Self {
            kind: SpanKind::Text,
            display: display.into(),
        }
    }

    /// The Discord-markdown form actually emitted. Labeled links become
    /// `[label](url)`; everything else emits its display text.
    pub fn markdown(&self) -> String {
        match &self.kind {
            SpanKind::Link { url } if *url != self.display => {
                format!("[{}]({})", self.display, url)
            }
            _ => self.display.clone(),
        }
    }

    pub fn markdown_chars(&self) -> usize {
        match &self.kind {
            SpanKind::Link { url } if *url != self.display => {
                // "[label](url)"
                self.display.chars().count() + url.chars().count() + 4
            }
            _ => self.display.chars().count(),
        }
    }

    /// Splitting this span would sever a URL or a mention identity.
    pub fn is_atomic(&self) -> bool {
        !matches!(self.kind, SpanKind::Text)
    }
}

/// Concatenation of span display texts: the canonical text with mentions
/// substituted by their resolved form.
pub fn canonical_text(spans: &[Span]) -> String {
    spans.iter().map(|s| s.display.as_str()).collect()
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Decode one raw message text into ordered spans, resolving mention
/// targets through `resolver`. Deterministic for a fixed directory state.
pub fn normalize(raw: &str, resolver: &mut Resolver) -> Vec<Span> {
    let mut spans: Vec<Span> = Vec::new();
    let mut push_text = |spans: &mut Vec<Span>, text: String| {
        if text.is_empty() {
            return;
        }
        // Adjacent literal runs collapse into one span
        if let Some(last) = spans.last_mut() {
            if last.kind == SpanKind::Text {
                last.display.push_str(&text);
                return;
            }
        }
        spans.push(Span::text(text));
    };

    let mut cursor = 0;
    for construct in CONSTRUCT_REGEX.find_iter(raw) {
        push_text(&mut spans, decode_entities(&raw[cursor..construct.start()]));
        cursor = construct.end();

        let inner = &raw[construct.start() + 1..construct.end() - 1];
        match classify(inner, resolver) {
            Some(span) if span.kind == SpanKind::Text => push_text(&mut spans, span.display),
            Some(span) => spans.push(span),
            // Not a recognized construct: the brackets were literal
            None => push_text(&mut spans, decode_entities(construct.as_str())),
        }
    }
    push_text(&mut spans, decode_entities(&raw[cursor..]));

    spans
}

fn classify(inner: &str, resolver: &mut Resolver) -> Option<Span> {
    if let Some(caps) = USER_MENTION_REGEX.captures(inner) {
        return Some(Span {
            kind: SpanKind::UserMention,
            display: resolver.user(&caps[1]),
        });
    }

    if let Some(caps) = CHANNEL_MENTION_REGEX.captures(inner) {
        let label = caps.get(2).map(|m| decode_entities(m.as_str()));
        return Some(Span {
            kind: SpanKind::ChannelMention,
            display: resolver.channel(&caps[1], label.as_deref()),
        });
    }

    if let Some(rest) = inner.strip_prefix('!') {
        let kind = match rest {
            "everyone" => Broadcast::Everyone,
            "here" | "channel" => Broadcast::Here,
            // <!date…>, <!subteam…> and friends degrade to their label
            _ => {
                let label = rest.rsplit_once('|').map(|(_, l)| l).unwrap_or(rest);
                return Some(Span::text(decode_entities(label)));
            }
        };
        return Some(Span {
            kind: SpanKind::Broadcast,
            display: resolver.broadcast(kind),
        });
    }

    if inner.starts_with("http://") || inner.starts_with("https://") || inner.starts_with("mailto:")
    {
        let (url, label) = match inner.split_once('|') {
            Some((url, label)) => (url, Some(label)),
            None => (inner, None),
        };
        let url = decode_entities(url);
        let display = label.map(decode_entities).unwrap_or_else(|| url.clone());
        return Some(Span {
            kind: SpanKind::Link { url },
            display,
        });
    }

    None
}

// ---------------------------------------------------------------------------
// Entity decoding
// ---------------------------------------------------------------------------

/// Longest named entity we bother scanning for.
const MAX_ENTITY_LEN: usize = 10;

/// Decode HTML character entities in a single left-to-right pass, so that
/// already-decoded output can never be decoded again (`&amp;lt;` yields the
/// literal `&lt;`, not `<`).
pub fn decode_entities(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];
        match decode_one(rest) {
            Some((decoded, consumed)) => {
                out.push(decoded);
                rest = &rest[consumed..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// `s` starts with `&`. Returns the decoded character and the byte length
/// of the entity, or None when no entity starts here.
fn decode_one(s: &str) -> Option<(char, usize)> {
    let semi = s[1..].find(';')?;
    if semi == 0 || semi > MAX_ENTITY_LEN {
        return None;
    }
    let body = &s[1..1 + semi];
    let consumed = semi + 2;

    let decoded = match body {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => '\u{a0}',
        _ => {
            let code = if let Some(hex) = body.strip_prefix("#x").or_else(|| body.strip_prefix("#X"))
            {
                u32::from_str_radix(hex, 16).ok()?
            } else if let Some(dec) = body.strip_prefix('#') {
                dec.parse::<u32>().ok()?
            } else {
                return None;
            };
            char::from_u32(code)?
        }
    };
    Some((decoded, consumed))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::resolve::Resolver;
    use crate::transport::Directory;
    use std::collections::HashMap;

    struct TestDirectory {
        broadcast: bool,
    }

    impl Directory for TestDirectory {
        fn lookup_user(&self, name: &str) -> Option<u64> {
            (name == "rocky").then_some(42)
        }
        fn lookup_channel(&self, name: &str) -> Option<u64> {
            (name == "general").then_some(99)
        }
        fn can_broadcast(&self) -> bool {
            self.broadcast
        }
    }

    struct Fixture {
        users: HashMap<String, String>,
        channels: HashMap<String, String>,
        user_map: HashMap<String, String>,
        dir: TestDirectory,
        cache: HashMap<String, String>,
    }

    impl Fixture {
        fn new(broadcast: bool) -> Self {
            Self {
                users: HashMap::from([("U111".to_string(), "rocky".to_string())]),
                channels: HashMap::from([("CHANNEL1".to_string(), "general".to_string())]),
                user_map: HashMap::new(),
                dir: TestDirectory { broadcast },
                cache: HashMap::new(),
            }
        }

        fn normalize(&mut self, raw: &str) -> Vec<Span> {
            let mut resolver = Resolver::new(
                &self.users,
                &self.channels,
                &self.user_map,
                &self.dir,
                &mut self.cache,
            );
            normalize(raw, &mut resolver)
        }
    }

    #[test]
    fn test_decode_entities_once() {
        assert_eq!(decode_entities("fish &amp; chips"), "fish & chips");
        assert_eq!(decode_entities("a &lt; b &gt; c"), "a < b > c");
        // The escaped escape stays escaped after one decode
        assert_eq!(decode_entities("&amp;lt;"), "&lt;");
        assert_eq!(decode_entities("&amp;amp;"), "&amp;");
    }

    #[test]
    fn test_decode_numeric_and_named() {
        assert_eq!(decode_entities("&#65;&#x42;&#x63;"), "ABc");
        assert_eq!(decode_entities("&quot;hi&quot; &apos;there&apos;"), "\"hi\" 'there'");
        assert_eq!(decode_entities("a&nbsp;b"), "a\u{a0}b");
    }

    #[test]
    fn test_decode_leaves_non_entities() {
        assert_eq!(decode_entities("AT&T and R&D"), "AT&T and R&D");
        assert_eq!(decode_entities("50% & rising;"), "50% & rising;");
        assert_eq!(decode_entities("&bogusname;"), "&bogusname;");
        assert_eq!(decode_entities("trailing &"), "trailing &");
    }

    #[test]
    fn test_labeled_link_keeps_label() {
        let mut fx = Fixture::new(false);
        let spans = fx.normalize("see <https://example.com/a?x=1&amp;y=2|the docs> please");
        assert_eq!(spans.len(), 3);
        assert_eq!(spans[0], Span::text("see "));
        assert_eq!(
            spans[1],
            Span {
                kind: SpanKind::Link {
                    url: "https://example.com/a?x=1&y=2".to_string()
                },
                display: "the docs".to_string(),
            }
        );
        assert_eq!(spans[1].markdown(), "[the docs](https://example.com/a?x=1&y=2)");
        assert_eq!(spans[2], Span::text(" please"));
    }

    #[test]
    fn test_bare_link() {
        let mut fx = Fixture::new(false);
        let spans = fx.normalize("<https://example.com>");
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].display, "https://example.com");
        // No label: emitted as the bare URL, not [url](url)
        assert_eq!(spans[0].markdown(), "https://example.com");
    }

    #[test]
    fn test_user_and_channel_mentions() {
        let mut fx = Fixture::new(false);
        let spans = fx.normalize("hey <@U111>, check <#CHANNEL1|general>");
        assert_eq!(spans.len(), 4);
        assert_eq!(spans[1].kind, SpanKind::UserMention);
        assert_eq!(spans[1].display, "<@42>");
        assert_eq!(spans[3].kind, SpanKind::ChannelMention);
        assert_eq!(spans[3].display, "<#99>");
    }

    #[test]
    fn test_broadcast_forms() {
        let mut fx = Fixture::new(true);
        let spans = fx.normalize("<!everyone> <!here> <!channel>");
        assert_eq!(spans[0].display, "@everyone");
        assert_eq!(spans[2].display, "@here");
        assert_eq!(spans[4].display, "@here");
    }

    #[test]
    fn test_special_construct_degrades_to_label() {
        let mut fx = Fixture::new(false);
        let spans = fx.normalize("due <!date^1609459200^{date}|Jan 1 2021>");
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0], Span::text("due Jan 1 2021"));
    }

    #[test]
    fn test_unrecognized_brackets_stay_literal() {
        let mut fx = Fixture::new(false);
        let spans = fx.normalize("tuple &lt;a, b&gt; and <x*y>");
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0], Span::text("tuple <a, b> and <x*y>"));
    }

    #[test]
    fn test_span_coverage() {
        let mut fx = Fixture::new(false);
        let raw = "start <@U111> mid <https://e.com|label> &amp; end";
        let spans = fx.normalize(raw);
        assert_eq!(canonical_text(&spans), "start <@42> mid label & end");
    }

    #[test]
    fn test_concrete_scenario() {
        // "Hello &amp; welcome <#CHANNEL1>! @everyone" with the channel
        // resolvable and broadcast disallowed
        let mut fx = Fixture::new(false);
        let spans = fx.normalize("Hello &amp; welcome <#CHANNEL1>! <!everyone>");
        assert_eq!(
            spans,
            vec![
                Span::text("Hello & welcome "),
                Span {
                    kind: SpanKind::ChannelMention,
                    display: "<#99>".to_string()
                },
                Span::text("! "),
                Span {
                    kind: SpanKind::Broadcast,
                    display: "everyone".to_string()
                },
            ]
        );
        assert_eq!(canonical_text(&spans), "Hello & welcome <#99>! everyone");
    }

    #[test]
    fn test_deterministic() {
        let mut fx = Fixture::new(false);
        let raw = "loop <@U111> &lt;x&gt; <https://e.com|l>";
        let first = fx.normalize(raw);
        let second = fx.normalize(raw);
        assert_eq!(first, second);
    }
}
