//! ANSI color codes in agent log lines to HTML spans

use std::sync::OnceLock;

use regex_lite::Regex;

/// Applied in order; the reset code must come last
const COLOR_TABLE: [(&str, &str); 8] = [
    ("[32m", "<span class=\"text-green-400\">"),
    ("[31m", "<span class=\"text-red-400\">"),
    ("[33m", "<span class=\"text-yellow-400\">"),
    ("[34m", "<span class=\"text-blue-400\">"),
    ("[35m", "<span class=\"text-purple-400\">"),
    ("[36m", "<span class=\"text-cyan-400\">"),
    ("[37m", "<span class=\"text-gray-400\">"),
    ("[0m", "</span>"),
];

fn timestamp_prefix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\d{4}-\d{2}-\d{2}\s\d{2}:\d{2}:\d{2}\.\d{3}\s")
            .expect("timestamp pattern is a valid literal")
    })
}

/// Render one raw log line as HTML
///
/// Strips a leading `YYYY-MM-DD HH:MM:SS.mmm ` timestamp and ESC bytes,
/// escapes HTML metacharacters, maps color codes to spans and closes any
/// span left open.
pub fn to_html(text: &str) -> String {
    let text = timestamp_prefix().replace(text, "");
    let mut html = text
        .replace('\u{1b}', "")
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;");

    for (code, replacement) in COLOR_TABLE {
        html = html.replace(code, replacement);
    }

    let opened = html.matches("<span").count();
    let closed = html.matches("</span>").count();
    if opened > closed {
        html.push_str(&"</span>".repeat(opened - closed));
    }
    html
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_colors_become_spans() {
        assert_eq!(
            to_html("\u{1b}[32mINFO\u{1b}[0m ready"),
            "<span class=\"text-green-400\">INFO</span> ready"
        );
    }

    #[test]
    fn test_timestamp_prefix_is_stripped() {
        assert_eq!(
            to_html("2025-06-01 10:00:00.123 \u{1b}[31mERROR\u{1b}[0m dial failed"),
            "<span class=\"text-red-400\">ERROR</span> dial failed"
        );
    }

    #[test]
    fn test_unclosed_span_is_balanced() {
        assert_eq!(
            to_html("\u{1b}[33mWARN slow"),
            "<span class=\"text-yellow-400\">WARN slow</span>"
        );
    }

    #[test]
    fn test_markup_in_log_text_is_escaped() {
        assert_eq!(to_html("<b>&</b>"), "&lt;b&gt;&amp;&lt;/b&gt;");
    }

    #[test]
    fn test_plain_text_unchanged() {
        assert_eq!(to_html("listening on :8080"), "listening on :8080");
    }
}
