use std::sync::LazyLock;

use html2text::render::text_renderer::TrivialDecorator;
use regex::{Captures, Regex};

/// Wide enough that html2text never re-wraps paragraphs.
const HTML_RENDER_WIDTH: usize = 1_000;
/// Byte ceiling for one name token; file systems count bytes, not chars.
const NAME_TOKEN_MAX_BYTES: usize = 200;

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"</?[A-Za-z][A-Za-z0-9]*(?:\s[^<>]*)?/?>").expect("valid tag regex")
});
static ENTITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(#[0-9]{1,7}|#[xX][0-9A-Fa-f]{1,6}|[A-Za-z][A-Za-z0-9]{1,15});")
        .expect("valid entity regex")
});
static INLINE_SPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t\u{a0}\u{200b}]+").expect("valid whitespace regex"));
static BLANK_RUN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid newline regex"));
static UNSAFE_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[<>:"/\\|?*\x00-\x1f]"#).expect("valid name regex"));
static UNDERSCORE_RUN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_+").expect("valid underscore regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Html,
    Text,
}

/// Turn a backend body into clean plain text.
///
/// HTML goes through html2text first. Both kinds then get a second pass:
/// entities are decoded, then leftover tags are stripped and whitespace
/// normalized.
pub fn extract_body_text(content: &str, kind: BodyKind) -> String {
    let converted = match kind {
        BodyKind::Html => html_to_text(content),
        BodyKind::Text => content.to_string(),
    };
    clean_text(&converted)
}

fn html_to_text(html: &str) -> String {
    // html2text can panic on pathological markup; fall back to the raw
    // input and let the regex pass handle it.
    std::panic::catch_unwind(|| {
        html2text::from_read_with_decorator(
            html.as_bytes(),
            HTML_RENDER_WIDTH,
            TrivialDecorator::new(),
        )
    })
    .unwrap_or_else(|_| html.to_string())
}

pub fn clean_text(text: &str) -> String {
    let decoded = decode_entities(text);
    let without_tags = TAG_RE.replace_all(&decoded, "");
    normalize_whitespace(&without_tags)
}

pub fn normalize_whitespace(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    let lines = unified
        .lines()
        .map(|line| INLINE_SPACE_RE.replace_all(line, " ").trim().to_string())
        .collect::<Vec<_>>()
        .join("\n");
    BLANK_RUN_RE.replace_all(&lines, "\n\n").trim().to_string()
}

pub fn decode_entities(text: &str) -> String {
    ENTITY_RE
        .replace_all(text, |caps: &Captures<'_>| {
            let entity = &caps[1];
            decode_entity(entity).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

fn decode_entity(entity: &str) -> Option<String> {
    if let Some(numeric) = entity.strip_prefix('#') {
        let code = match numeric.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => numeric.parse::<u32>().ok()?,
        };
        return char::from_u32(code).map(String::from);
    }

    let decoded = match entity {
        "amp" => "&",
        "lt" => "<",
        "gt" => ">",
        "quot" => "\"",
        "apos" => "'",
        "nbsp" => " ",
        "ndash" => "\u{2013}",
        "mdash" => "\u{2014}",
        "hellip" => "\u{2026}",
        "lsquo" => "\u{2018}",
        "rsquo" => "\u{2019}",
        "ldquo" => "\u{201c}",
        "rdquo" => "\u{201d}",
        "bull" => "\u{2022}",
        "copy" => "\u{a9}",
        "reg" => "\u{ae}",
        "trade" => "\u{2122}",
        "euro" => "\u{20ac}",
        "pound" => "\u{a3}",
        "sect" => "\u{a7}",
        "deg" => "\u{b0}",
        "auml" => "\u{e4}",
        "ouml" => "\u{f6}",
        "uuml" => "\u{fc}",
        "Auml" => "\u{c4}",
        "Ouml" => "\u{d6}",
        "Uuml" => "\u{dc}",
        "szlig" => "\u{df}",
        "eacute" => "\u{e9}",
        "egrave" => "\u{e8}",
        "agrave" => "\u{e0}",
        "ccedil" => "\u{e7}",
        _ => return None,
    };
    Some(decoded.to_string())
}

/// Filesystem-safe token: reserved characters become `_` and runs of `_`
/// collapse. The result is capped at `max_chars` characters and never
/// exceeds 200 bytes.
pub fn sanitize_filename(value: &str, max_chars: usize) -> String {
    let replaced = UNSAFE_NAME_RE.replace_all(value.trim(), "_");
    let collapsed = UNDERSCORE_RUN_RE.replace_all(&replaced, "_");
    let trimmed = collapsed.trim();
    let capped: String = trimmed.chars().take(max_chars).collect();
    let capped = truncate_to_bytes(&capped, NAME_TOKEN_MAX_BYTES)
        .trim_end_matches([' ', '.'])
        .to_string();
    if capped.is_empty() {
        "_".to_string()
    } else {
        capped
    }
}

/// Longest prefix of `value` that fits in `max_bytes`, cut on a char boundary.
pub fn truncate_to_bytes(value: &str, max_bytes: usize) -> &str {
    if value.len() <= max_bytes {
        return value;
    }
    let mut cut = max_bytes;
    while !value.is_char_boundary(cut) {
        cut -= 1;
    }
    &value[..cut]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_body_becomes_plain_text() {
        let text = extract_body_text("<p>Hello&nbsp;<b>World</b></p>", BodyKind::Html);
        assert_eq!(text, "Hello World");
    }

    #[test]
    fn html_output_has_no_markup_left() {
        let html = r#"<html><body><h1>Quarterly</h1><p>Numbers &amp; notes</p>
            <table><tr><td>a</td><td>b</td></tr></table></body></html>"#;
        let text = extract_body_text(html, BodyKind::Html);
        assert!(!text.contains('<'), "{text}");
        assert!(text.contains("Quarterly"));
        assert!(text.contains("Numbers & notes"));
    }

    #[test]
    fn plain_text_gets_safety_pass() {
        let text = extract_body_text(
            "Line one  <br/>\r\n\r\n\r\n\r\n   Line&#32;two &lt;ok&gt;\t\t",
            BodyKind::Text,
        );
        assert_eq!(text, "Line one\n\nLine two");
    }

    #[test]
    fn escaped_markup_is_stripped_after_decoding() {
        let text = extract_body_text("&lt;b&gt;bold&lt;/b&gt; and a &lt; b", BodyKind::Text);
        assert_eq!(text, "bold and a < b");
    }

    #[test]
    fn email_addresses_in_angle_brackets_survive() {
        let text = extract_body_text("From: Ann <ann@example.com>", BodyKind::Text);
        assert_eq!(text, "From: Ann <ann@example.com>");
    }

    #[test]
    fn unknown_entities_are_kept() {
        assert_eq!(decode_entities("a &bogus; b &#x41;"), "a &bogus; b A");
    }

    #[test]
    fn sanitize_replaces_reserved_characters() {
        assert_eq!(sanitize_filename("Re: a/b <c>?", 100), "Re_ a_b _c_");
        assert_eq!(sanitize_filename("x::||y", 100), "x_y");
    }

    #[test]
    fn sanitize_caps_by_characters() {
        let long = "ä".repeat(80);
        assert_eq!(sanitize_filename(&long, 50).chars().count(), 50);
        assert_eq!(sanitize_filename("   ", 50), "_");
    }

    #[test]
    fn sanitize_caps_multibyte_tokens_by_bytes() {
        let subject = "会議".repeat(50);
        let token = sanitize_filename(&subject, 100);
        assert!(token.len() <= 200, "{} bytes", token.len());
        assert!(subject.starts_with(&token));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_to_bytes("aé", 2), "a");
        assert_eq!(truncate_to_bytes("short", 200), "short");
    }
}
