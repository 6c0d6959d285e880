use crate::email::EmailAddress;
use crate::lists::read_list_file;
use anyhow::{Context, Result};
use regex::{Regex, RegexBuilder};
use std::path::Path;

/// Spam keywords compiled once into a single case-insensitive alternation.
#[derive(Debug, Clone)]
pub struct SpamKeywords {
    pattern: Option<Regex>,
    count: usize,
}

impl SpamKeywords {
    pub fn from_file(path: &Path) -> Result<Self> {
        let keywords = read_list_file(path)
            .with_context(|| format!("Failed to read spam keywords: {}", path.display()))?;
        Self::from_keywords(keywords)
    }

    pub fn from_keywords<I, S>(keywords: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut escaped: Vec<String> = keywords
            .into_iter()
            .map(|k| k.as_ref().trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .map(|k| regex::escape(&k))
            .collect();
        escaped.sort();
        escaped.dedup();

        let count = escaped.len();
        if escaped.is_empty() {
            log::warn!("No spam keywords configured, keyword check is disabled");
            return Ok(Self {
                pattern: None,
                count,
            });
        }

        let pattern = RegexBuilder::new(&escaped.join("|"))
            .case_insensitive(true)
            .build()
            .context("Failed to compile spam keyword pattern")?;
        log::info!("Compiled {count} spam keywords");

        Ok(Self {
            pattern: Some(pattern),
            count,
        })
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Matches against the local part only; the domain is never inspected.
    pub fn matches(&self, email: &EmailAddress) -> bool {
        match &self.pattern {
            Some(pattern) => pattern.is_match(&email.local_part.to_lowercase()),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email(raw: &str) -> EmailAddress {
        EmailAddress::parse(raw).unwrap()
    }

    #[test]
    fn test_matches_local_part_case_insensitively() {
        let keywords = SpamKeywords::from_keywords(["casino", "free.money"]).unwrap();

        assert!(keywords.matches(&email("BestCasino2024@example.com")));
        assert!(keywords.matches(&email("free.money@example.com")));
        assert!(!keywords.matches(&email("john@example.com")));
    }

    #[test]
    fn test_keywords_are_literal_not_regex() {
        let keywords = SpamKeywords::from_keywords(["free.money"]).unwrap();
        assert!(!keywords.matches(&email("freexmoney@example.com")));
    }

    #[test]
    fn test_domain_is_ignored() {
        let keywords = SpamKeywords::from_keywords(["casino"]).unwrap();
        assert!(!keywords.matches(&email("alice@casino.com")));
    }

    #[test]
    fn test_empty_set_never_matches() {
        let keywords = SpamKeywords::from_keywords(Vec::<String>::new()).unwrap();
        assert!(keywords.is_empty());
        assert!(!keywords.matches(&email("casino@example.com")));
    }

    #[test]
    fn test_from_missing_file_is_empty() {
        let dir = tempfile::TempDir::new().unwrap();
        let keywords = SpamKeywords::from_file(&dir.path().join("nope.txt")).unwrap();
        assert_eq!(keywords.len(), 0);
    }
}
