//! Anchor extraction from page markup.
//!
//! Markup is scanned with regexes rather than parsed into a tree. Opening
//! `<a>` tags are found on their own; an anchor's text runs to the next
//! anchor, its closing tag, or the end of the enclosing block, so a missing
//! `</a>` never hides a neighbouring link.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use url::Url;

/// Compiles a regex at static init; panics on invalid pattern.
fn compile_static_regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid static regex '{pattern}': {e}"))
}

static ANCHOR_OPEN_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?is)<a(\s[^>]*)?>"));

static ANCHOR_END_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(
        r"(?i)<a[\s>]|</(?:a|p|div|li|td|th|tr|table|ul|ol|body|html)\s*>",
    )
});

static HREF_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r#"(?is)(?:^|\s)href\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#)
});

static DOWNLOAD_ATTR_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?i)(?:^|\s)download(?:\s*=|\s|/|$)"));

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| compile_static_regex(r"(?s)<[^>]*>"));

static ENTITY_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[a-zA-Z]+);"));

static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| compile_static_regex(r"\s+"));

/// href schemes that never point at a file.
const IGNORED_SCHEMES: &[&str] = &["javascript:", "mailto:", "tel:", "data:"];

/// One `<a>` element as found in markup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAnchor {
    /// href value with entities decoded, untrimmed of query/fragment.
    pub href: String,
    /// Visible text: inner tags stripped, entities decoded, whitespace collapsed.
    pub text: String,
    /// Whether the element carries a `download` attribute.
    pub download: bool,
}

/// Extracts every anchor that has an `href` attribute.
#[must_use]
pub fn extract_anchors(markup: &str) -> Vec<RawAnchor> {
    ANCHOR_OPEN_RE
        .captures_iter(markup)
        .filter_map(|caps| {
            let open = caps.get(0)?;
            let attrs = caps.get(1).map_or("", |m| m.as_str());
            let href = extract_href(attrs)?;
            let rest = &markup[open.end()..];
            let inner = ANCHOR_END_RE
                .find(rest)
                .map_or(rest, |end| &rest[..end.start()]);
            Some(RawAnchor {
                href,
                text: visible_text(inner),
                download: DOWNLOAD_ATTR_RE.is_match(attrs),
            })
        })
        .collect()
}

fn extract_href(attrs: &str) -> Option<String> {
    let caps = HREF_RE.captures(attrs)?;
    let raw = caps
        .get(1)
        .or_else(|| caps.get(2))
        .or_else(|| caps.get(3))
        .map(|m| m.as_str())?;
    Some(decode_entities(raw.trim()))
}

/// Strips tags, decodes entities, and collapses whitespace.
#[must_use]
pub fn visible_text(inner: &str) -> String {
    let without_tags = TAG_RE.replace_all(inner, " ");
    let decoded = decode_entities(&without_tags);
    WHITESPACE_RE.replace_all(decoded.trim(), " ").into_owned()
}

/// Decodes named and numeric character references. Unknown names are kept verbatim.
#[must_use]
pub fn decode_entities(value: &str) -> String {
    ENTITY_RE
        .replace_all(value, |caps: &Captures<'_>| {
            let entity = &caps[1];
            decode_entity(entity).map_or_else(|| caps[0].to_string(), String::from)
        })
        .into_owned()
}

fn decode_entity(entity: &str) -> Option<char> {
    if let Some(hex) = entity
        .strip_prefix("#x")
        .or_else(|| entity.strip_prefix("#X"))
    {
        return u32::from_str_radix(hex, 16).ok().and_then(char::from_u32);
    }
    if let Some(dec) = entity.strip_prefix('#') {
        return dec.parse::<u32>().ok().and_then(char::from_u32);
    }
    match entity {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some(' '),
        _ => None,
    }
}

/// Resolves an href against the page URL.
///
/// Returns `None` for empty hrefs, same-page fragments, non-file schemes, and
/// anything that does not resolve to http(s).
#[must_use]
pub fn resolve_href(href: &str, base: &Url) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }
    let lowered = href.to_ascii_lowercase();
    if IGNORED_SCHEMES.iter().any(|scheme| lowered.starts_with(scheme)) {
        return None;
    }
    let resolved = base.join(href).ok()?;
    matches!(resolved.scheme(), "http" | "https").then_some(resolved)
}

/// Last path segment of `url` when it looks like a file name (contains a dot).
#[must_use]
pub fn file_name_from_url(url: &Url) -> Option<String> {
    let last = url.path_segments()?.next_back()?;
    let decoded = urlencoding::decode(last).map_or_else(|_| last.to_string(), |d| d.into_owned());
    let decoded = decoded.trim();
    (!decoded.is_empty() && decoded.contains('.')).then(|| decoded.to_string())
}
