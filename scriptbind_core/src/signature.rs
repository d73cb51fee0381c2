//! Extraction of function-shaped contracts from script text
//!
//! Two contract shapes are recognized:
//!
//! - a bare arrow form: `(String, Int) -> Boolean`
//! - an annotated export: `@Export val run : (String) -> Unit`
//!
//! Parameter lists are split on commas only at bracket depth zero, so a
//! nested generic such as `Map<String, List<Int>>` stays one parameter.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Marker introducing an exported declaration
pub const DEFAULT_EXPORT_MARKER: &str = "@Export";

/// Arrow glyphs accepted between the parameter list and the return type
pub(crate) const ARROWS: [&str; 4] = ["->", "=>", "→", "⇒"];

/// Ordered parameter types plus a return type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub params: Vec<String>,
    pub return_type: String,
}

impl Signature {
    pub fn new<P: Into<String>>(
        params: impl IntoIterator<Item = P>,
        return_type: impl Into<String>,
    ) -> Self {
        Self {
            params: params.into_iter().map(Into::into).collect(),
            return_type: return_type.into(),
        }
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}) -> {}", self.params.join(", "), self.return_type)
    }
}

/// One exported declaration found in script text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportDeclaration {
    pub name: String,
    pub signature: Signature,
}

/// Raw script source together with its declared contract
#[derive(Debug, Clone)]
pub struct ScriptContract {
    pub source: String,
    /// Name of the exported symbol, when the contract came from an export
    pub symbol: Option<String>,
    pub signature: Option<Signature>,
}

/// Parses contract text into [`Signature`]s
#[derive(Debug, Clone)]
pub struct SignatureExtractor {
    marker: String,
}

impl SignatureExtractor {
    /// Create an extractor using the default `@Export` marker
    pub fn new() -> Self {
        Self::with_marker(DEFAULT_EXPORT_MARKER)
    }

    /// Create an extractor recognizing a custom export marker
    pub fn with_marker(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }

    /// Extract the first contract in `text`
    ///
    /// Annotated exports take precedence over a bare arrow form.
    pub fn extract(&self, text: &str) -> Option<Signature> {
        if let Some(export) = self.extract_exports(text).into_iter().next() {
            return Some(export.signature);
        }
        parse_arrow_form(text.trim_start())
    }

    /// Extract every annotated export, in source order
    pub fn extract_exports(&self, text: &str) -> Vec<ExportDeclaration> {
        if self.marker.is_empty() {
            return Vec::new();
        }

        let mut exports = Vec::new();
        for (idx, _) in text.match_indices(&self.marker) {
            if in_comment(text, idx) {
                continue;
            }
            let rest = &text[idx + self.marker.len()..];
            let Some(colon) = rest.find(':') else {
                continue;
            };

            // Header is e.g. `val run`; the declared name is its last word
            let header = &rest[..colon];
            if header.contains(['(', '=', '{', ';']) {
                continue;
            }
            let Some(name) = header.split_whitespace().last() else {
                continue;
            };
            if !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
                continue;
            }

            match parse_arrow_form(rest[colon + 1..].trim_start()) {
                Some(signature) => exports.push(ExportDeclaration {
                    name: name.to_string(),
                    signature,
                }),
                None => tracing::debug!("Export `{}` has no function-shaped type", name),
            }
        }
        exports
    }

    /// Build a [`ScriptContract`] for `source`
    pub fn contract(&self, source: &str) -> ScriptContract {
        let export = self.extract_exports(source).into_iter().next();
        let (symbol, signature) = match export {
            Some(export) => (Some(export.name), Some(export.signature)),
            None => (None, parse_arrow_form(source.trim_start())),
        };
        ScriptContract {
            source: source.to_string(),
            symbol,
            signature,
        }
    }
}

impl Default for SignatureExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract a signature using the default export marker
pub fn extract_signature(text: &str) -> Option<Signature> {
    SignatureExtractor::new().extract(text)
}

/// Whether byte `idx` of `text` sits inside a `//` or `/* */` comment
fn in_comment(text: &str, idx: usize) -> bool {
    let before = &text[..idx];
    let line = &before[before.rfind('\n').map_or(0, |nl| nl + 1)..];
    if line.contains("//") {
        return true;
    }
    match (before.rfind("/*"), before.rfind("*/")) {
        (Some(open), Some(close)) => open > close,
        (Some(_), None) => true,
        _ => false,
    }
}

/// Parse `(<params>) -> <return>` at the start of `text`
///
/// The return type ends at a line break or at a top-level `=`, `{` or `;`
/// so that an initializer following the type is ignored.
fn parse_arrow_form(text: &str) -> Option<Signature> {
    if !text.starts_with('(') {
        return None;
    }

    let mut depth = 0usize;
    let mut close = None;
    for (i, c) in text.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    close = Some(i);
                    break;
                }
            }
            _ => {}
        }
    }
    let close = close?;

    let params = split_top_level(&text[1..close]);

    let after = text[close + 1..].trim_start();
    let arrow = ARROWS.iter().find(|arrow| after.starts_with(*arrow))?;
    let ret_text = &after[arrow.len()..];

    let return_type = ret_text[..return_type_end(ret_text)].trim();
    if return_type.is_empty() {
        return None;
    }

    Some(Signature {
        params,
        return_type: return_type.to_string(),
    })
}

/// Byte offset where a return type ends
fn return_type_end(text: &str) -> usize {
    let mut depth = Depth::default();
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        let next = chars.peek().map(|(_, n)| *n);
        if depth.is_zero() {
            match c {
                '\n' | '{' | ';' => return i,
                '=' if next != Some('>') => return i,
                _ => {}
            }
        }
        depth.track(c);
    }
    text.len()
}

/// Split a comma-separated list on top-level commas
///
/// Angle, round and square brackets are counted independently. A `>` that
/// closes an arrow (`->`, `=>`) is not a closing angle bracket. Parts are
/// trimmed and empty parts dropped.
pub(crate) fn split_top_level(text: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = Depth::default();
    let mut start = 0;

    for (i, c) in text.char_indices() {
        if c == ',' && depth.is_zero() {
            parts.push(&text[start..i]);
            start = i + c.len_utf8();
        }
        depth.track(c);
    }
    parts.push(&text[start..]);

    parts
        .into_iter()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(String::from)
        .collect()
}

/// Independent bracket-depth counters
#[derive(Debug, Default)]
struct Depth {
    angle: usize,
    paren: usize,
    square: usize,
    prev: Option<char>,
}

impl Depth {
    fn is_zero(&self) -> bool {
        self.angle == 0 && self.paren == 0 && self.square == 0
    }

    fn track(&mut self, c: char) {
        match c {
            '<' => self.angle += 1,
            // `->` and `=>` are arrows, not closing brackets
            '>' if matches!(self.prev, Some('-') | Some('=')) => {}
            '>' => self.angle = self.angle.saturating_sub(1),
            '(' => self.paren += 1,
            ')' => self.paren = self.paren.saturating_sub(1),
            '[' => self.square += 1,
            ']' => self.square = self.square.saturating_sub(1),
            _ => {}
        }
        self.prev = Some(c);
    }
}
