//! Label matcher DSL.
//!
//! Parses `key=value`, `key!=value`, `key=~regex`, `key!~regex` and a bare
//! `key` (existence) into a [`LabelMatcher`]. Negative matchers follow
//! Prometheus semantics: an absent label satisfies them. Regexes are
//! anchored on both ends. An invalid regex degrades to a literal
//! (non-)equality match so one bad expression cannot abort a filter chain.

use std::fmt;

use regex::Regex;
use thiserror::Error;
use tracing::debug;

use alertstore_core::Labels;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MatcherError {
    #[error("empty label matcher")]
    Empty,

    #[error("invalid label matcher '{0}': missing label name")]
    MissingKey(String),
}

/// Operators in scan order; the first one found in the input wins.
const OPERATORS: [(&str, bool, bool); 4] = [
    // (token, is_equal, is_regex)
    ("=~", true, true),
    ("!~", false, true),
    ("!=", false, false),
    ("=", true, false),
];

/// A parsed label predicate.
#[derive(Debug, Clone)]
pub struct LabelMatcher {
    pub key: String,
    pub value: String,
    pub is_equal: bool,
    pub is_regex: bool,
    /// Anchored regex; `None` for plain (or degraded) equality matchers.
    pub compiled: Option<Regex>,
}

impl PartialEq for LabelMatcher {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
            && self.value == other.value
            && self.is_equal == other.is_equal
            && self.is_regex == other.is_regex
            && self.compiled.as_ref().map(Regex::as_str) == other.compiled.as_ref().map(Regex::as_str)
    }
}

impl LabelMatcher {
    pub fn parse(text: &str) -> Result<Self, MatcherError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(MatcherError::Empty);
        }

        for (token, is_equal, is_regex) in OPERATORS {
            if let Some((key, value)) = text.split_once(token) {
                let key = key.trim();
                if key.is_empty() {
                    return Err(MatcherError::MissingKey(text.to_string()));
                }
                return Ok(Self::new(key, value.trim(), is_equal, is_regex));
            }
        }

        // Bare key: existence check expressed as a match-anything regex.
        Ok(Self {
            key: text.to_string(),
            value: String::new(),
            is_equal: true,
            is_regex: true,
            compiled: anchored(MATCH_ALL).ok(),
        })
    }

    fn new(key: &str, value: &str, is_equal: bool, is_regex: bool) -> Self {
        let mut matcher = Self {
            key: key.to_string(),
            value: value.to_string(),
            is_equal,
            is_regex,
            compiled: None,
        };
        if is_regex {
            match anchored(value) {
                Ok(re) => matcher.compiled = Some(re),
                Err(e) => {
                    debug!(key = %key, pattern = %value, error = %e, "invalid regex, falling back to literal match");
                    matcher.is_regex = false;
                }
            }
        }
        matcher
    }

    /// True when this matcher only checks that the label exists.
    pub fn is_existence(&self) -> bool {
        self.is_equal
            && self.value.is_empty()
            && self
                .compiled
                .as_ref()
                .is_some_and(|re| re.as_str() == anchored_pattern(MATCH_ALL))
    }

    pub fn matches(&self, labels: &Labels) -> bool {
        let value = labels.get(&self.key);

        if self.is_existence() {
            return value.is_some();
        }

        match (self.is_equal, value) {
            // negative matchers are satisfied by an absent label
            (false, None) => true,
            (false, Some(v)) => !self.value_matches(v),
            (true, None) => !self.is_regex && self.value.is_empty(),
            (true, Some(v)) => self.value_matches(v),
        }
    }

    fn value_matches(&self, v: &str) -> bool {
        match &self.compiled {
            Some(re) if self.is_regex => re.is_match(v),
            _ => v == self.value,
        }
    }
}

impl fmt::Display for LabelMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_existence() {
            return f.write_str(&self.key);
        }
        let op = match (self.is_equal, self.is_regex) {
            (true, true) => "=~",
            (false, true) => "!~",
            (false, false) => "!=",
            (true, false) => "=",
        };
        write!(f, "{}{}{}", self.key, op, self.value)
    }
}

const MATCH_ALL: &str = ".*";

fn anchored_pattern(pattern: &str) -> String {
    format!("^(?:{pattern})$")
}

fn anchored(pattern: &str) -> Result<Regex, regex::Error> {
    Regex::new(&anchored_pattern(pattern))
}

/// Parse every matcher, skipping (and reporting) the ones that fail.
pub fn parse_matchers<'a, I>(texts: I) -> (Vec<LabelMatcher>, Vec<MatcherError>)
where
    I: IntoIterator<Item = &'a String>,
{
    let mut ok = Vec::new();
    let mut failed = Vec::new();
    for text in texts {
        match LabelMatcher::parse(text) {
            Ok(m) => ok.push(m),
            Err(e) => failed.push(e),
        }
    }
    (ok, failed)
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn parses_each_operator() {
        let m = LabelMatcher::parse("severity=critical").unwrap();
        assert_eq!((m.key.as_str(), m.value.as_str(), m.is_equal, m.is_regex), ("severity", "critical", true, false));
        assert!(m.compiled.is_none());

        let m = LabelMatcher::parse("severity!=critical").unwrap();
        assert_eq!((m.is_equal, m.is_regex), (false, false));

        let m = LabelMatcher::parse("env=~prod.*").unwrap();
        assert_eq!((m.is_equal, m.is_regex), (true, true));
        assert!(m.compiled.is_some());

        let m = LabelMatcher::parse("env!~dev|test").unwrap();
        assert_eq!((m.key.as_str(), m.value.as_str(), m.is_equal, m.is_regex), ("env", "dev|test", false, true));
    }

    #[test]
    fn trims_whitespace() {
        let m = LabelMatcher::parse("  severity = critical  ").unwrap();
        assert_eq!(m.key, "severity");
        assert_eq!(m.value, "critical");
    }

    #[test]
    fn regex_operator_wins_over_equality() {
        // "a=~b" contains "=" too; the scan order must pick "=~"
        let m = LabelMatcher::parse("a=~b").unwrap();
        assert!(m.is_regex);
        assert_eq!(m.value, "b");
    }

    #[test]
    fn rejects_empty_and_keyless_input() {
        assert_eq!(LabelMatcher::parse("   "), Err(MatcherError::Empty));
        assert!(matches!(LabelMatcher::parse("=critical"), Err(MatcherError::MissingKey(_))));
    }

    #[test]
    fn bare_key_checks_existence() {
        let m = LabelMatcher::parse("severity").unwrap();
        assert!(m.is_existence());
        assert!(m.compiled.is_some());
        assert!(m.matches(&labels(&[("severity", "info")])));
        assert!(m.matches(&labels(&[("severity", "")])));
        assert!(!m.matches(&labels(&[("team", "ops")])));
        assert!(!m.matches(&Labels::new()));
    }

    #[test]
    fn not_equal_is_satisfied_by_absent_label() {
        let m = LabelMatcher::parse("severity!=critical").unwrap();
        assert!(m.matches(&labels(&[("severity", "warning")])));
        assert!(m.matches(&Labels::new()));
        assert!(!m.matches(&labels(&[("severity", "critical")])));
    }

    #[test]
    fn empty_equality_matches_absent_label() {
        let m = LabelMatcher::parse("team=").unwrap();
        assert!(m.matches(&Labels::new()));
        assert!(m.matches(&labels(&[("team", "")])));
        assert!(!m.matches(&labels(&[("team", "ops")])));
    }

    #[test]
    fn regex_is_anchored() {
        let m = LabelMatcher::parse("env=~^prod.*").unwrap();
        assert!(m.matches(&labels(&[("env", "production")])));
        assert!(!m.matches(&labels(&[("env", "staging")])));
        assert!(!m.matches(&Labels::new()));

        let m = LabelMatcher::parse("severity=~crit").unwrap();
        assert!(!m.matches(&labels(&[("severity", "critical")])));

        let m = LabelMatcher::parse("severity=~critical|warning|info").unwrap();
        assert!(m.matches(&labels(&[("severity", "warning")])));
    }

    #[test]
    fn negative_regex() {
        let m = LabelMatcher::parse("env!~dev|test").unwrap();
        assert!(m.matches(&labels(&[("env", "prod")])));
        assert!(m.matches(&Labels::new()));
        assert!(!m.matches(&labels(&[("env", "dev")])));
    }

    #[test]
    fn invalid_regex_degrades_to_literal() {
        let m = LabelMatcher::parse("name=~[unclosed").unwrap();
        assert!(!m.is_regex);
        assert!(m.compiled.is_none());
        assert!(m.matches(&labels(&[("name", "[unclosed")])));
        assert!(!m.matches(&labels(&[("name", "unclosed")])));

        let m = LabelMatcher::parse("name!~[unclosed").unwrap();
        assert!(!m.matches(&labels(&[("name", "[unclosed")])));
        assert!(m.matches(&labels(&[("name", "other")])));
    }

    #[test]
    fn empty_regex_is_not_existence() {
        let m = LabelMatcher::parse("team=~").unwrap();
        assert!(!m.is_existence());
        assert!(m.matches(&labels(&[("team", "")])));
        assert!(!m.matches(&labels(&[("team", "ops")])));
    }

    #[test]
    fn display_round_trips() {
        for text in ["severity=critical", "severity!=info", "env=~prod.*", "env!~dev", "team"] {
            assert_eq!(LabelMatcher::parse(text).unwrap().to_string(), text);
        }
    }

    #[test]
    fn parse_matchers_splits_failures() {
        let texts = vec!["a=b".to_string(), "=x".to_string(), "c".to_string()];
        let (ok, failed) = parse_matchers(&texts);
        assert_eq!(ok.len(), 2);
        assert_eq!(failed.len(), 1);
    }
}
