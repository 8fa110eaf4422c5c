#![forbid(unsafe_code)]

//! Message signatures for fuzzy deduplication.
//!
//! Two log lines merge into one tail entry when their signatures are equal.
//! A signature is the decoded text with volatile substrings removed: hex
//! addresses, digit runs and `<id@host>` style tokens. The strip rules are a
//! [`SignaturePolicy`], kept separate from the merge algorithm so alternative
//! policies can be swapped in and tested on their own.
//!
//! ```
//! use tailmon_core::normalize::{Normalize, SignaturePolicy};
//!
//! let policy = SignaturePolicy::default();
//! assert_eq!(
//!     policy.normalize("Error 0x1a2b at line 42"),
//!     policy.normalize("Error 0x9f00 at line 7"),
//! );
//! ```

use std::borrow::Cow;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

static HEX_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)0x[0-9a-f]{2,8}").expect("hex token pattern"));
static DIGIT_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[0-9]+").expect("digit run pattern"));
static ADDRESS_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^<>]*@[^<>]*>").expect("address token pattern"));

/// Normalized form of a message, used as the dedup merge key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Signature(String);

impl Signature {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Maps decoded message text to its signature.
///
/// Implementations must be pure: the same text always yields the same
/// signature.
pub trait Normalize {
    fn normalize(&self, text: &str) -> Signature;
}

/// Adapter turning any `Fn(&str) -> String` into a [`Normalize`].
pub struct FnNormalizer<F>(pub F);

impl<F> Normalize for FnNormalizer<F>
where
    F: Fn(&str) -> String,
{
    fn normalize(&self, text: &str) -> Signature {
        Signature((self.0)(text))
    }
}

/// How many matches of a rule are removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StripScope {
    /// Only the leftmost match.
    First,
    /// Every non-overlapping match.
    All,
}

/// One removal step of a [`SignaturePolicy`].
#[derive(Debug, Clone)]
pub struct StripRule {
    pattern: Regex,
    scope: StripScope,
}

impl StripRule {
    /// Compile a rule from a regular expression.
    pub fn new(pattern: &str, scope: StripScope) -> Result<Self, regex::Error> {
        Ok(Self::from_regex(Regex::new(pattern)?, scope))
    }

    #[must_use]
    pub fn from_regex(pattern: Regex, scope: StripScope) -> Self {
        Self { pattern, scope }
    }

    #[must_use]
    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    #[must_use]
    pub fn scope(&self) -> StripScope {
        self.scope
    }

    fn apply<'a>(&self, text: &'a str) -> Cow<'a, str> {
        match self.scope {
            StripScope::First => self.pattern.replace(text, ""),
            StripScope::All => self.pattern.replace_all(text, ""),
        }
    }
}

/// Ordered list of strip rules. Rules run in sequence, each on the output of
/// the previous one.
#[derive(Debug, Clone)]
pub struct SignaturePolicy {
    rules: Vec<StripRule>,
}

impl SignaturePolicy {
    /// A policy that keeps text unchanged.
    #[must_use]
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Append a rule.
    #[must_use]
    pub fn with_rule(mut self, rule: StripRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Build a policy from `(pattern, scope)` pairs.
    pub fn from_patterns<'a, I>(patterns: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = (&'a str, StripScope)>,
    {
        let rules = patterns
            .into_iter()
            .map(|(pattern, scope)| StripRule::new(pattern, scope))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    #[must_use]
    pub fn rules(&self) -> &[StripRule] {
        &self.rules
    }

    /// Apply every rule and return the stripped text.
    #[must_use]
    pub fn strip(&self, text: &str) -> String {
        let mut current = text.to_owned();
        for rule in &self.rules {
            let next = match rule.apply(&current) {
                Cow::Borrowed(_) => continue,
                Cow::Owned(next) => next,
            };
            current = next;
        }
        current
    }
}

impl Default for SignaturePolicy {
    /// Hex tokens first so their digits do not leave a dangling `0x`, then
    /// digit runs, then address-like tokens.
    fn default() -> Self {
        Self {
            rules: vec![
                StripRule::from_regex(HEX_TOKEN.clone(), StripScope::All),
                StripRule::from_regex(DIGIT_RUN.clone(), StripScope::All),
                StripRule::from_regex(ADDRESS_TOKEN.clone(), StripScope::All),
            ],
        }
    }
}

impl Normalize for SignaturePolicy {
    fn normalize(&self, text: &str) -> Signature {
        Signature(self.strip(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(text: &str) -> Signature {
        SignaturePolicy::default().normalize(text)
    }

    #[test]
    fn hex_tokens_are_stripped_case_insensitively() {
        assert_eq!(sig("fault at 0xDEADbeef"), sig("fault at 0x1f"));
        assert_eq!(sig("fault at 0xDEADbeef").as_str(), "fault at ");
    }

    #[test]
    fn digit_runs_are_stripped() {
        assert_eq!(sig("took 15ms on cpu 3"), sig("took 7ms on cpu 11"));
        assert_eq!(sig("took 15ms on cpu 3").as_str(), "took ms on cpu ");
    }

    #[test]
    fn address_tokens_are_stripped() {
        assert_eq!(
            sig("queued <abc.def@mx.example.org> ok"),
            sig("queued <zz@other.example> ok")
        );
        assert_eq!(sig("a <x@y> b <p@q> c").as_str(), "a  b  c");
    }

    #[test]
    fn only_ascii_digits_are_stripped() {
        assert_eq!(sig("slot \u{0663} of 12").as_str(), "slot \u{0663} of ");
    }

    #[test]
    fn address_tokens_stay_inside_one_bracket_pair() {
        assert_eq!(sig("<id> from a@b <z>").as_str(), "<id> from a@b <z>");
        assert_eq!(sig("<id> from <a@b> <z>").as_str(), "<id> from  <z>");
    }

    #[test]
    fn angle_brackets_without_at_are_kept() {
        assert_eq!(sig("<html> tag").as_str(), "<html> tag");
    }

    #[test]
    fn different_words_do_not_merge() {
        assert_ne!(sig("disk full"), sig("disk empty"));
    }

    #[test]
    fn error_variants_share_signature() {
        assert_eq!(sig("Error 0x1a2b at line 42"), sig("Error 0x9f00 at line 7"));
    }

    #[test]
    fn empty_policy_is_identity() {
        let policy = SignaturePolicy::empty();
        assert_eq!(policy.normalize("pid 42").as_str(), "pid 42");
    }

    #[test]
    fn first_scope_removes_leftmost_only() {
        let policy = SignaturePolicy::from_patterns([(r"\d+", StripScope::First)]).unwrap();
        assert_eq!(policy.strip("1 2 3"), " 2 3");
    }

    #[test]
    fn rules_run_in_order() {
        let policy = SignaturePolicy::empty()
            .with_rule(StripRule::new("ab", StripScope::All).unwrap())
            .with_rule(StripRule::new("c", StripScope::All).unwrap());
        assert_eq!(policy.strip("aabcc"), "a");
        assert_eq!(policy.rules().len(), 2);
        assert_eq!(policy.rules()[0].pattern(), "ab");
    }

    #[test]
    fn invalid_pattern_is_reported() {
        assert!(SignaturePolicy::from_patterns([("(", StripScope::All)]).is_err());
    }

    #[test]
    fn closure_normalizer() {
        let lower = FnNormalizer(|text: &str| text.to_lowercase());
        assert_eq!(lower.normalize("ABC"), Signature::new("abc"));
    }
}
