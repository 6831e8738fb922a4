//! Slack message markup to plain IRC text.
//!
//! Slack escapes `&`, `<` and `>` and wraps links and mentions in angle
//! brackets (`<https://x.org|x.org>`, `<#C024BE7LR|general>`, `<!here>`).

use fancy_regex::{Captures, Regex};

/// Converts Slack's wire markup into text suitable for the relay.
#[derive(Debug, Clone)]
pub struct MarkupResolver {
    /// `<target>` or `<target|label>`.
    link_pattern: Regex,
}

impl Default for MarkupResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl MarkupResolver {
    pub fn new() -> Self {
        Self {
            link_pattern: Regex::new(r"<([^<>|]+)(?:\|([^<>]*))?>").expect("static pattern"),
        }
    }

    /// Unescape a Slack message body.
    pub fn unescape(&self, text: &str) -> String {
        let linked = self
            .link_pattern
            .replace_all(text, |caps: &Captures| -> String {
                let target = caps.get(1).map_or("", |m| m.as_str());
                let label = caps.get(2).map(|m| m.as_str()).filter(|l| !l.is_empty());
                resolve_link(target, label)
            });

        // `&amp;` last so `&amp;lt;` stays `&lt;`.
        linked
            .replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&amp;", "&")
    }
}

/// Escape text for posting; Slack treats `&`, `<` and `>` as control characters.
pub fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn resolve_link(target: &str, label: Option<&str>) -> String {
    match target.chars().next() {
        // Channel reference.
        Some('#') => format!("#{}", label.unwrap_or(&target[1..])),
        // User mention.
        Some('@') => format!("@{}", label.unwrap_or(&target[1..])),
        // Special mention (`!here`, `!channel`, `!subteam^ID`).
        Some('!') => {
            let name = target[1..].split('^').next().unwrap_or_default();
            format!("@{}", label.unwrap_or(name).trim_start_matches('@'))
        }
        _ => match label {
            // Auto-linked text, e.g. `<http://x.org|x.org>`.
            Some(label) if target.ends_with(label) => label.to_string(),
            Some(label) => format!("{} ({})", label, target),
            None => target.strip_prefix("mailto:").unwrap_or(target).to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unescape(text: &str) -> String {
        MarkupResolver::new().unescape(text)
    }

    #[test]
    fn test_plain_text_unchanged() {
        assert_eq!(unescape("hello world"), "hello world");
        assert_eq!(unescape(""), "");
    }

    #[test]
    fn test_entities() {
        assert_eq!(unescape("a &lt;b&gt; &amp; c"), "a <b> & c");
        assert_eq!(unescape("&amp;lt;"), "&lt;");
    }

    #[test]
    fn test_links() {
        assert_eq!(unescape("see <https://example.org>"), "see https://example.org");
        assert_eq!(unescape("<http://example.org|example.org>"), "example.org");
        assert_eq!(
            unescape("<https://example.org/a|the docs>"),
            "the docs (https://example.org/a)"
        );
        assert_eq!(unescape("<mailto:a@b.c|a@b.c>"), "a@b.c");
        assert_eq!(
            unescape("<https://x.org/?a=1&amp;b=2>"),
            "https://x.org/?a=1&b=2"
        );
    }

    #[test]
    fn test_mentions() {
        assert_eq!(unescape("join <#C024BE7LR|general>"), "join #general");
        assert_eq!(unescape("hi <@U024BE7LH|bob>"), "hi @bob");
        assert_eq!(unescape("<!here> ping"), "@here ping");
        assert_eq!(unescape("<!subteam^S123|@ops>"), "@ops");
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape("a <b> & c"), "a &lt;b&gt; &amp; c");
        assert_eq!(unescape(&escape("x <y> & &amp;")), "x <y> & &amp;");
    }

    #[test]
    fn test_unbalanced_brackets_left_alone() {
        assert_eq!(unescape("a <b c"), "a <b c");
    }
}
