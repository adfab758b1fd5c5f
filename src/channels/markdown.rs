//! Markdown-to-platform-dialect conversion and message chunking. A
//! line-oriented transformer carrying a single `in_code_block` state bit
//! across lines; everything else is a per-line, regex-driven token
//! substitution.

use std::sync::LazyLock;

use regex::Regex;

static HEADING_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^#{1,6}\s+(.*)$").unwrap());
static BLOCKQUOTE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^>\s?(.*)$").unwrap());
static BULLET_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[-*]\s+(.*)$").unwrap());

static CODE_SPAN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"`([^`]+)`").unwrap());
static LINK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\(([^)]+)\)").unwrap());
static BOLD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*\*([^*]+)\*\*").unwrap());
static STRIKE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"~~([^~]+)~~").unwrap());
static ITALIC_STAR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*([^*]+)\*").unwrap());
static ITALIC_US_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"_([^_]+)_").unwrap());

/// Slack's bold sentinel: a byte the rest of a message can't otherwise
/// contain, used to shield `**bold**` output from the italic pass (Slack's
/// bold syntax is a single asterisk, the same character markdown uses for
/// italic).
const SLACK_BOLD_SENTINEL: char = '\u{0}';

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn apply_inline_telegram(escaped: &str) -> String {
    let s = CODE_SPAN_RE.replace_all(escaped, "<code>$1</code>");
    let s = LINK_RE.replace_all(&s, "<a href=\"$2\">$1</a>");
    let s = BOLD_RE.replace_all(&s, "<b>$1</b>");
    let s = STRIKE_RE.replace_all(&s, "<s>$1</s>");
    let s = ITALIC_STAR_RE.replace_all(&s, "<i>$1</i>");
    let s = ITALIC_US_RE.replace_all(&s, "<i>$1</i>");
    s.into_owned()
}

fn apply_inline_slack(escaped: &str) -> String {
    let s = LINK_RE.replace_all(escaped, "<$2|$1>");
    let s = BOLD_RE.replace_all(&s, |caps: &regex::Captures| {
        format!("{SLACK_BOLD_SENTINEL}{}{SLACK_BOLD_SENTINEL}", &caps[1])
    });
    let s = STRIKE_RE.replace_all(&s, "~$1~");
    let s = ITALIC_STAR_RE.replace_all(&s, "_$1_");
    let s = ITALIC_US_RE.replace_all(&s, "_$1_");
    s.replace(SLACK_BOLD_SENTINEL, "*")
}

fn transform_line_telegram(line: &str) -> String {
    if let Some(caps) = HEADING_RE.captures(line) {
        return format!("<b>{}</b>", apply_inline_telegram(&escape_html(&caps[1])));
    }
    if let Some(caps) = BLOCKQUOTE_RE.captures(line) {
        return format!("<blockquote>{}</blockquote>", apply_inline_telegram(&escape_html(&caps[1])));
    }
    if let Some(caps) = BULLET_RE.captures(line) {
        return format!("• {}", apply_inline_telegram(&escape_html(&caps[1])));
    }
    apply_inline_telegram(&escape_html(line))
}

fn transform_line_slack(line: &str) -> String {
    if let Some(caps) = HEADING_RE.captures(line) {
        return format!("*{}*", apply_inline_slack(&escape_html(&caps[1])));
    }
    if let Some(caps) = BLOCKQUOTE_RE.captures(line) {
        return format!("> {}", apply_inline_slack(&escape_html(&caps[1])));
    }
    if let Some(caps) = BULLET_RE.captures(line) {
        return format!("• {}", apply_inline_slack(&escape_html(&caps[1])));
    }
    apply_inline_slack(&escape_html(line))
}

/// Converts markdown to the HTML subset Telegram's `parse_mode=HTML`
/// accepts.
pub fn to_telegram_html(input: &str) -> String {
    let mut out = Vec::new();
    let mut in_code_block = false;
    for line in input.lines() {
        if line.trim_start().starts_with("```") {
            if in_code_block {
                out.push("</code></pre>".to_string());
            } else {
                out.push("<pre><code>".to_string());
            }
            in_code_block = !in_code_block;
            continue;
        }
        if in_code_block {
            out.push(escape_html(line));
        } else {
            out.push(transform_line_telegram(line));
        }
    }
    out.join("\n")
}

/// Converts markdown to Slack's mrkdwn dialect.
pub fn to_slack_mrkdwn(input: &str) -> String {
    let mut out = Vec::new();
    let mut in_code_block = false;
    for line in input.lines() {
        if line.trim_start().starts_with("```") {
            out.push(line.to_string());
            in_code_block = !in_code_block;
            continue;
        }
        if in_code_block {
            out.push(line.to_string());
        } else {
            out.push(transform_line_slack(line));
        }
    }
    out.join("\n")
}

/// Splits `text` into chunks of at most `limit` characters, preferring a
/// paragraph break, then a line break, then a hard cut.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= limit {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0;
    while chars.len() - start > limit {
        let window_end = start + limit;
        let boundary = find_boundary(&chars, start, window_end);
        chunks.push(chars[start..boundary].iter().collect::<String>());
        start = boundary;
        while start < chars.len() && chars[start] == '\n' {
            start += 1;
        }
    }
    if start < chars.len() {
        chunks.push(chars[start..].iter().collect());
    }
    chunks
}

fn find_boundary(chars: &[char], start: usize, window_end: usize) -> usize {
    let mut i = window_end;
    while i > start + 1 {
        if chars[i - 2] == '\n' && chars[i - 1] == '\n' {
            return i;
        }
        i -= 1;
    }
    let mut i = window_end;
    while i > start {
        if chars[i - 1] == '\n' {
            return i;
        }
        i -= 1;
    }
    window_end
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn telegram_converts_bold_italic_and_code() {
        let out = to_telegram_html("**bold** and *italic* and `code`");
        assert_eq!(out, "<b>bold</b> and <i>italic</i> and <code>code</code>");
    }

    #[test]
    fn telegram_wraps_fenced_blocks_and_escapes_contents() {
        let out = to_telegram_html("```\nlet x = a < b;\n```");
        assert_eq!(out, "<pre><code>\nlet x = a &lt; b;\n</code></pre>");
    }

    #[test]
    fn telegram_converts_heading_blockquote_and_bullet() {
        assert_eq!(to_telegram_html("# Title"), "<b>Title</b>");
        assert_eq!(to_telegram_html("> quoted"), "<blockquote>quoted</blockquote>");
        assert_eq!(to_telegram_html("- item"), "• item");
    }

    #[test]
    fn telegram_converts_link() {
        let out = to_telegram_html("[docs](https://example.com)");
        assert_eq!(out, "<a href=\"https://example.com\">docs</a>");
    }

    #[test]
    fn slack_converts_double_star_bold_without_corrupting_single_star_italic() {
        let out = to_slack_mrkdwn("**bold** and *italic*");
        assert_eq!(out, "*bold* and _italic_");
    }

    #[test]
    fn slack_converts_link_and_strikethrough() {
        let out = to_slack_mrkdwn("[docs](https://example.com) and ~~gone~~");
        assert_eq!(out, "<https://example.com|docs> and ~gone~");
    }

    #[test]
    fn slack_preserves_fenced_code_blocks_byte_for_byte() {
        let out = to_slack_mrkdwn("```\nraw & text\n```");
        assert_eq!(out, "```\nraw & text\n```");
    }

    #[test]
    fn split_prefers_paragraph_boundary() {
        let text = format!("{}\n\n{}", "a".repeat(10), "b".repeat(10));
        let chunks = split_message(&text, 15);
        assert_eq!(chunks[0], "a".repeat(10));
        assert_eq!(chunks[1], "b".repeat(10));
    }

    #[test]
    fn split_hard_cuts_when_no_boundary_exists() {
        let text = "x".repeat(30);
        let chunks = split_message(&text, 10);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 10);
    }

    #[test]
    fn split_returns_single_chunk_under_limit() {
        let chunks = split_message("short", 4000);
        assert_eq!(chunks, vec!["short".to_string()]);
    }
}
