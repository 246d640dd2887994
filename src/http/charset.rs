//! Page body decoding.
//!
//! Many of the sites this tool visits serve GBK or Big5 pages without a
//! charset in the Content-Type header, so the declared charset is looked up
//! in the markup and, failing that, guessed from the bytes.

use std::sync::LazyLock;

use chardetng::EncodingDetector;
use encoding_rs::{BIG5, Encoding, GB18030, GBK, UTF_8};
use regex::bytes::Regex;
use tracing::debug;

/// Only the head of the document is searched for a `<meta>` declaration.
const META_SNIFF_BYTES: usize = 4096;

static META_CHARSET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i-u)<meta[^>]*?charset\s*=\s*["']?\s*([a-z0-9_:.\-]+)"#)
        .unwrap_or_else(|e| panic!("invalid static regex: {e}"))
});

/// Decodes `bytes` to text.
///
/// Order: Content-Type charset, byte order mark, `<meta>` charset, strict
/// UTF-8, statistical detection, then GBK / GB18030 / Big5. The first
/// encoding that decodes without errors wins; if none does, the body is
/// decoded as lossy UTF-8.
#[must_use]
pub fn decode_body(bytes: &[u8], content_type: Option<&str>) -> (String, &'static Encoding) {
    let declared = content_type
        .and_then(charset_from_content_type)
        .into_iter()
        .chain(Encoding::for_bom(bytes).map(|(encoding, _)| encoding))
        .chain(charset_from_meta(bytes))
        .chain(std::iter::once(UTF_8))
        .chain(std::iter::once_with(|| detect(bytes)))
        .chain(fallback_encodings());

    for encoding in declared {
        if let Some(text) = strict_decode(encoding, bytes) {
            debug!(encoding = encoding.name(), "decoded page body");
            return (text, encoding);
        }
    }

    debug!("no clean decoding found, using lossy UTF-8");
    (String::from_utf8_lossy(bytes).into_owned(), UTF_8)
}

/// Tried in order when nothing declared or detected decodes cleanly.
fn fallback_encodings() -> [&'static Encoding; 3] {
    [GBK, GB18030, BIG5]
}

fn strict_decode(encoding: &'static Encoding, bytes: &[u8]) -> Option<String> {
    let bom_len = match Encoding::for_bom(bytes) {
        Some((bom_encoding, len)) if bom_encoding == encoding => len,
        _ => 0,
    };
    encoding
        .decode_without_bom_handling_and_without_replacement(&bytes[bom_len..])
        .map(std::borrow::Cow::into_owned)
}

/// Charset parameter of a Content-Type header value.
#[must_use]
pub fn charset_from_content_type(value: &str) -> Option<&'static Encoding> {
    value.split(';').skip(1).find_map(|param| {
        let (name, label) = param.split_once('=')?;
        if !name.trim().eq_ignore_ascii_case("charset") {
            return None;
        }
        Encoding::for_label(label.trim().trim_matches(['"', '\'']).as_bytes())
    })
}

/// Charset declared by a `<meta charset>` or `<meta http-equiv>` tag.
#[must_use]
pub fn charset_from_meta(bytes: &[u8]) -> Option<&'static Encoding> {
    let head = &bytes[..bytes.len().min(META_SNIFF_BYTES)];
    let caps = META_CHARSET_RE.captures(head)?;
    Encoding::for_label(caps.get(1)?.as_bytes())
}

fn detect(bytes: &[u8]) -> &'static Encoding {
    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    detector.guess(None, true)
}
