//! Pattern & Config Resolver (spec §3.5, §4.6, §6.4): the translator-wide,
//! per-instance configuration surface. Built once at init time and
//! consulted only at file-create time thereafter — never reconsidered for
//! an existing file (spec §3.5 "never consulted after creation").

use crate::error::{Result, StripeError};
use crate::geometry::MIN_STRIPE_SIZE;

/// One `glob:size` entry from the `block-size` configuration value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PatternRule {
    pub glob: String,
    pub block_size: u64,
}

/// `PatternRules` is the ordered glob→size list plus a default, matched
/// against a new file's logical path at create time (spec §3.5, §4.6).
#[derive(Clone, Debug)]
pub struct PatternRules {
    rules: Vec<PatternRule>,
    default_block_size: u64,
}

impl PatternRules {
    /// Builds the rule list from the parsed entries, validating every
    /// size against the multiple-of-512/minimum-size constraints spec
    /// §4.6 requires.
    ///
    /// # Errors
    /// Returns [`StripeError::InvalidConfig`] if any entry's `block_size`
    /// (or `default_block_size`) is below [`MIN_STRIPE_SIZE`] or not a
    /// multiple of 512.
    pub fn new(rules: Vec<PatternRule>, default_block_size: u64) -> Result<Self> {
        for rule in &rules {
            validate_block_size(rule.block_size)?;
        }
        validate_block_size(default_block_size)?;
        Ok(Self {
            rules,
            default_block_size,
        })
    }

    /// Parses the `"<glob>:<size>[,...]"` configuration string (spec
    /// §6.4 `block-size`) into an ordered rule list, falling back to
    /// `default_block_size` for any path matching nothing.
    ///
    /// # Errors
    /// Returns [`StripeError::InvalidConfig`] on a malformed entry (no
    /// `:`, an unparsable size) or a size failing validation.
    pub fn parse(spec: &str, default_block_size: u64) -> Result<Self> {
        let mut rules = Vec::new();
        for entry in spec.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (glob, size) = entry.rsplit_once(':').ok_or_else(|| {
                StripeError::InvalidConfig(format!("malformed block-size entry {entry:?}"))
            })?;
            let block_size: u64 = size.parse().map_err(|_| {
                StripeError::InvalidConfig(format!("invalid block size in entry {entry:?}"))
            })?;
            rules.push(PatternRule {
                glob: glob.to_string(),
                block_size,
            });
        }
        Self::new(rules, default_block_size)
    }

    /// Walks the rule list in order and returns the first matching
    /// entry's `block_size`, falling back to the default (spec §4.6).
    #[must_use]
    pub fn resolve(&self, path: &str) -> u64 {
        self.rules
            .iter()
            .find(|rule| glob_match(&rule.glob, path))
            .map_or(self.default_block_size, |rule| rule.block_size)
    }

    #[must_use]
    pub const fn default_block_size(&self) -> u64 {
        self.default_block_size
    }
}

fn validate_block_size(size: u64) -> Result<()> {
    if size < MIN_STRIPE_SIZE || size % 512 != 0 {
        return Err(StripeError::InvalidConfig(format!(
            "block size {size} must be a multiple of 512 and at least {MIN_STRIPE_SIZE}"
        )));
    }
    Ok(())
}

/// Minimal shell-glob matcher supporting `*` (any run of characters) and
/// `?` (single character), sufficient for path patterns like
/// `/data/video/*` (spec §4.6, §6.4). Deliberately small: the engine
/// never needs character classes or brace expansion.
fn glob_match(pattern: &str, text: &str) -> bool {
    fn inner(pattern: &[u8], text: &[u8]) -> bool {
        match pattern.first() {
            None => text.is_empty(),
            Some(b'*') => {
                inner(&pattern[1..], text)
                    || (!text.is_empty() && inner(pattern, &text[1..]))
            }
            Some(b'?') => !text.is_empty() && inner(&pattern[1..], &text[1..]),
            Some(&c) => !text.is_empty() && text[0] == c && inner(&pattern[1..], &text[1..]),
        }
    }
    inner(pattern.as_bytes(), text.as_bytes())
}

/// `Config` is the translator-instance-wide configuration surface (spec
/// §6.4): pattern rules, the xattr-on-create compat flag, and the layout
/// choice for newly created files.
#[derive(Clone, Debug)]
pub struct Config {
    pub patterns: PatternRules,
    /// If `false`, geometry xattrs are not sent on create (spec §6.4
    /// `use-xattr`, a legacy compatibility path).
    pub use_xattr: bool,
    /// Layout choice for newly created files (spec §6.4 `coalesce`).
    pub coalesce: bool,
}

impl Config {
    #[must_use]
    pub const fn new(patterns: PatternRules, use_xattr: bool, coalesce: bool) -> Self {
        Self {
            patterns,
            use_xattr,
            coalesce,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rejects_entry_without_colon() {
        assert!(PatternRules::parse("nope", 65536).is_err());
    }

    #[test]
    fn parse_rejects_size_below_minimum() {
        assert!(PatternRules::parse("/x/*:256", 65536).is_err());
    }

    #[test]
    fn parse_rejects_size_not_multiple_of_512() {
        assert!(PatternRules::parse("/x/*:1000", 65536).is_err());
    }

    #[test]
    fn resolve_returns_first_matching_rule_in_order() {
        let rules = PatternRules::parse("/video/*:1048576,/video/small/*:65536", 131072).unwrap();
        // Both rules match; the earlier one in the list wins.
        assert_eq!(rules.resolve("/video/small/clip.mp4"), 1_048_576);
    }

    #[test]
    fn resolve_falls_back_to_default_when_nothing_matches() {
        let rules = PatternRules::parse("/video/*:1048576", 131072).unwrap();
        assert_eq!(rules.resolve("/docs/readme.txt"), 131072);
    }

    #[test]
    fn glob_question_mark_matches_single_character() {
        let rules = PatternRules::parse("/logs/day?.log:4096", 131072).unwrap();
        assert_eq!(rules.resolve("/logs/day1.log"), 4096);
        assert_eq!(rules.resolve("/logs/day12.log"), 131072);
    }

    #[test]
    fn config_carries_use_xattr_and_coalesce_flags() {
        let rules = PatternRules::new(Vec::new(), 131072).unwrap();
        let config = Config::new(rules, false, true);
        assert!(!config.use_xattr);
        assert!(config.coalesce);
    }
}
