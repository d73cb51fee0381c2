//! Signature normalization and comparison

use crate::error::{Result, ScriptbindError};
use crate::signature::ARROWS;
use serde::{Deserialize, Serialize};

/// Namespace prefixes of built-in types, stripped during normalization
pub const DEFAULT_BUILTIN_PREFIXES: [&str; 4] =
    ["kotlin.collections.", "kotlin.", "java.lang.", "core."];

/// Canonical arrow token
const ARROW: &str = "->";

/// What to do when a declared contract disagrees with the reflected one
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MismatchPolicy {
    /// Log the mismatch and carry on
    #[default]
    Warn,
    /// Fail with [`ScriptbindError::SignatureMismatch`]
    Enforce,
}

/// Outcome of comparing two signatures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureCheck {
    pub declared: String,
    pub actual: String,
    pub matches: bool,
}

/// Normalizes and compares signatures
#[derive(Debug, Clone)]
pub struct SignatureMatcher {
    /// Longest first, so nested namespaces win over their parents
    prefixes: Vec<String>,
    policy: MismatchPolicy,
}

impl SignatureMatcher {
    /// Create an advisory matcher with the default built-in prefixes
    pub fn new() -> Self {
        Self::with_prefixes(DEFAULT_BUILTIN_PREFIXES)
    }

    /// Create a matcher stripping a custom set of prefixes
    pub fn with_prefixes<S: Into<String>>(prefixes: impl IntoIterator<Item = S>) -> Self {
        let mut prefixes: Vec<String> = prefixes
            .into_iter()
            .map(Into::into)
            .filter(|p| !p.is_empty())
            .collect();
        prefixes.sort_by(|a, b| b.len().cmp(&a.len()));
        Self {
            prefixes,
            policy: MismatchPolicy::Warn,
        }
    }

    /// Set the mismatch policy
    pub fn with_policy(mut self, policy: MismatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> MismatchPolicy {
        self.policy
    }

    /// Canonicalize a signature string
    ///
    /// Whitespace is removed, arrow glyphs become `->`, and built-in
    /// namespace prefixes are stripped at the start of each type name.
    /// Nullability markers are left untouched.
    ///
    /// Stripping a prefix can join the characters around it into a new
    /// arrow or a new prefix, so the passes repeat until nothing changes.
    /// Every pass that changes the text either shortens it or removes an
    /// `=`, which bounds the loop.
    pub fn normalize(&self, text: &str) -> String {
        let mut current: String = text.chars().filter(|c| !c.is_whitespace()).collect();
        loop {
            let next = self.strip_prefixes(&unify_arrows(&current));
            if next == current {
                return next;
            }
            current = next;
        }
    }

    fn strip_prefixes(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;

        while let Some(c) = rest.chars().next() {
            let at_name_start = out
                .chars()
                .next_back()
                .map_or(true, |p| !(p.is_alphanumeric() || p == '_' || p == '.'));

            if at_name_start {
                if let Some(prefix) = self.prefixes.iter().find(|p| rest.starts_with(p.as_str())) {
                    rest = &rest[prefix.len()..];
                    continue;
                }
            }

            out.push(c);
            rest = &rest[c.len_utf8()..];
        }
        out
    }

    /// True iff both signatures normalize to the same string
    pub fn matches(&self, a: &str, b: &str) -> bool {
        self.normalize(a) == self.normalize(b)
    }

    /// Compare a declared contract against a reflected signature
    pub fn compare(&self, declared: &str, actual: &str) -> SignatureCheck {
        let declared = self.normalize(declared);
        let actual = self.normalize(actual);
        SignatureCheck {
            matches: declared == actual,
            declared,
            actual,
        }
    }

    /// Compare and apply the mismatch policy
    ///
    /// Returns whether the signatures matched. Under [`MismatchPolicy::Enforce`]
    /// a mismatch is an error instead.
    pub fn check(&self, symbol: &str, declared: &str, actual: &str) -> Result<bool> {
        let check = self.compare(declared, actual);
        if check.matches {
            return Ok(true);
        }

        match self.policy {
            MismatchPolicy::Enforce => Err(ScriptbindError::SignatureMismatch {
                symbol: symbol.to_string(),
                expected: check.declared,
                actual: check.actual,
            }),
            MismatchPolicy::Warn => {
                tracing::warn!(
                    "Signature mismatch for `{}`: declared {}, found {}",
                    symbol,
                    check.declared,
                    check.actual
                );
                Ok(false)
            }
        }
    }
}

impl Default for SignatureMatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn unify_arrows(text: &str) -> String {
    let mut out = text.to_string();
    for arrow in ARROWS.iter().filter(|a| **a != ARROW) {
        out = out.replace(arrow, ARROW);
    }
    out
}

/// Normalize with the default built-in prefixes
pub fn normalize_signature(text: &str) -> String {
    SignatureMatcher::new().normalize(text)
}

/// Compare two signatures with the default built-in prefixes
pub fn signatures_match(a: &str, b: &str) -> bool {
    SignatureMatcher::new().matches(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_whitespace_and_namespace_insensitive() {
        assert!(signatures_match(
            "(String, Int) -> Boolean",
            "(core.String,core.Int)->core.Boolean"
        ));
    }

    #[test]
    fn test_nullability_sensitive() {
        assert!(!signatures_match("(String) -> String", "(String) -> String?"));
    }

    #[test]
    fn test_arrow_glyphs_unified() {
        assert_eq!(normalize_signature("(A) => B"), "(A)->B");
        assert_eq!(normalize_signature("(A) → B"), "(A)->B");
        assert_eq!(normalize_signature("(A) - > B"), "(A)->B");
    }

    #[test]
    fn test_prefix_only_stripped_at_name_start() {
        assert_eq!(normalize_signature("(mycore.String) -> Unit"), "(mycore.String)->Unit");
        assert_eq!(
            normalize_signature("(kotlin.collections.List<kotlin.String>) -> Unit"),
            "(List<String>)->Unit"
        );
    }

    #[test]
    fn test_normalize_is_idempotent() {
        for input in [
            "(String, Int) -> Boolean",
            "( core.core.Map < core.String , List<Int>? > ) => kotlin.Unit",
            "(x) ⇒ y?",
            "",
            "   ",
            "core.",
            "(Array<[Int]>)->(String)->Int",
            "(=core.>x)",
            "=kotlin.collections.core.>",
        ] {
            let once = normalize_signature(input);
            assert_eq!(normalize_signature(&once), once, "input: {:?}", input);
        }
    }

    #[test]
    fn test_prefix_removal_forming_arrow() {
        assert_eq!(normalize_signature("(=core.>x)"), "(->x)");
        assert!(signatures_match("(=core.>x)", "(->x)"));
    }

    proptest! {
        #[test]
        fn prop_normalize_is_idempotent(input in ".{0,48}") {
            let once = normalize_signature(&input);
            prop_assert_eq!(normalize_signature(&once), once);
        }

        #[test]
        fn prop_normalize_is_idempotent_on_signature_text(
            input in "[ (),<>?=\\-→⇒.a-z]{0,48}|(core\\.|kotlin\\.|=|>|-|\\(|\\)| ){0,16}"
        ) {
            let once = normalize_signature(&input);
            prop_assert_eq!(normalize_signature(&once), once);
        }
    }

    #[test]
    fn test_check_policies() {
        let advisory = SignatureMatcher::new();
        assert!(!advisory.check("run", "(String) -> Unit", "(Int) -> Unit").unwrap());
        assert!(advisory.check("run", "(String) -> Unit", "(core.String)->Unit").unwrap());

        let strict = SignatureMatcher::new().with_policy(MismatchPolicy::Enforce);
        let err = strict
            .check("run", "(String) -> Unit", "(Int) -> Unit")
            .unwrap_err();
        assert!(matches!(err, ScriptbindError::SignatureMismatch { .. }));
    }

    #[test]
    fn test_custom_prefixes() {
        let matcher = SignatureMatcher::with_prefixes(["std::"]);
        assert!(matcher.matches("(std::String) -> u32", "(String)->u32"));
        assert!(!matcher.matches("(core.String) -> u32", "(String)->u32"));
    }
}
