//! Filename derivation: context text first, then the server's own name for
//! the file, then the URL.

use crate::domain::{Extension, split_extension, url_last_segment};

pub const DEFAULT_MAX_STEM_LEN: usize = 200;
pub const PLACEHOLDER_STEM: &str = "download";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilenameBuilder {
    max_stem_len: usize,
}

impl Default for FilenameBuilder {
    fn default() -> Self {
        Self {
            max_stem_len: DEFAULT_MAX_STEM_LEN,
        }
    }
}

impl FilenameBuilder {
    pub fn new(max_stem_len: usize) -> Self {
        Self {
            max_stem_len: max_stem_len.max(1),
        }
    }

    pub fn max_stem_len(&self) -> usize {
        self.max_stem_len
    }

    /// The result is never empty and never contains a path separator.
    pub fn build(
        &self,
        context_text: Option<&str>,
        extension: &Extension,
        fallback_basename: &str,
    ) -> String {
        format!("{}{extension}", self.stem(context_text, fallback_basename))
    }

    /// Stem part of [`FilenameBuilder::build`], without the extension.
    pub fn stem(&self, context_text: Option<&str>, fallback_basename: &str) -> String {
        context_text
            .map(|text| self.sanitize_stem(text))
            .filter(|stem| !stem.is_empty())
            .or_else(|| Some(self.sanitize_stem(fallback_basename)))
            .filter(|stem| !stem.is_empty())
            .unwrap_or_else(|| PLACEHOLDER_STEM.to_string())
    }

    /// Whitespace and underscore runs become one `_`; anything outside
    /// letters, digits, `_` and `-` is dropped.
    pub fn sanitize_stem(&self, raw: &str) -> String {
        let mut out = String::with_capacity(raw.len());
        let mut pending_separator = false;

        for ch in raw.trim().chars() {
            if ch.is_whitespace() || ch == '_' {
                pending_separator = !out.is_empty();
                continue;
            }
            if ch.is_alphanumeric() || ch == '-' {
                if pending_separator {
                    out.push('_');
                    pending_separator = false;
                }
                out.push(ch);
            }
        }

        let mut take = out.len().min(self.max_stem_len);
        while take > 0 && !out.is_char_boundary(take) {
            take -= 1;
        }
        out[..take]
            .trim_matches(|c| c == '_' || c == '-')
            .to_string()
    }
}

/// Stem used when no context text is usable: the server's
/// Content-Disposition name if any, otherwise the last URL path segment.
pub fn fallback_basename(url: &str, content_disposition: Option<&str>) -> String {
    content_disposition
        .and_then(parse_content_disposition_filename)
        .or_else(|| url_last_segment(url))
        .map(|name| {
            let (stem, _) = split_extension(&name);
            stem.to_string()
        })
        .unwrap_or_default()
}

/// Extracts the filename from a raw Content-Disposition header value.
///
/// Supports quoted and token `filename=` values and RFC 5987
/// `filename*=UTF-8''…`, which takes precedence. Directory components are
/// dropped.
pub fn parse_content_disposition_filename(header_value: &str) -> Option<String> {
    let mut from_token: Option<String> = None;

    for param in header_value.trim().split(';') {
        let Some((name, value)) = param.trim().split_once('=') else {
            continue;
        };
        let name = name.trim().to_ascii_lowercase();
        let value = value.trim();

        if name == "filename*" {
            let encoded = value
                .get(..7)
                .filter(|charset| charset.eq_ignore_ascii_case("utf-8''"))
                .map(|_| &value[7..]);
            if let Some(rest) = encoded {
                let decoded = unquote(&percent_decode(rest.trim_matches('"')));
                if let Some(name) = last_component(&decoded) {
                    return Some(name);
                }
            }
        }

        if name == "filename" {
            let unquoted = if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
                unquote(&value[1..value.len() - 1])
            } else {
                value.to_string()
            };
            if let Some(name) = last_component(&unquoted) {
                from_token = Some(name);
            }
        }
    }

    from_token
}

fn last_component(value: &str) -> Option<String> {
    value
        .rsplit(['/', '\\'])
        .next()
        .map(str::trim)
        .filter(|name| !name.is_empty() && *name != "." && *name != "..")
        .map(str::to_string)
}

fn unquote(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(&next) = chars.peek() {
                if next == '"' || next == '\\' {
                    out.push(next);
                    chars.next();
                    continue;
                }
            }
        }
        out.push(c);
    }
    out
}

/// Lossy percent-decoding; malformed escapes are kept verbatim.
pub fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(high), Some(low)) = (hex_digit(bytes[i + 1]), hex_digit(bytes[i + 2])) {
                out.push(high << 4 | low);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}
