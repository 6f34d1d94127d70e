//! Container name matching for reload fan-out

use regex::Regex;

/// Decides which container names must receive the reload signal.
///
/// Docker reports names with a leading `/`; one such prefix is stripped
/// before matching. An empty pattern matches every name.
#[derive(Debug, Clone)]
pub struct NameMatcher {
    pattern: Option<Regex>,
}

impl NameMatcher {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        if pattern.is_empty() {
            return Ok(Self::match_all());
        }
        Ok(Self {
            pattern: Some(Regex::new(pattern)?),
        })
    }

    pub fn match_all() -> Self {
        Self { pattern: None }
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_ref().map(Regex::as_str).unwrap_or("")
    }

    pub fn matches(&self, name: &str) -> bool {
        let name = name.strip_prefix('/').unwrap_or(name);
        match &self.pattern {
            Some(re) => re.is_match(name),
            None => true,
        }
    }
}

impl Default for NameMatcher {
    fn default() -> Self {
        Self::match_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_matches_after_prefix_strip() {
        let matcher = NameMatcher::new("^web-").unwrap();
        assert!(matcher.matches("/web-1"));
        assert!(matcher.matches("web-2"));
        assert!(!matcher.matches("/cache-1"));
    }

    #[test]
    fn test_only_one_prefix_is_stripped() {
        let matcher = NameMatcher::new("^web").unwrap();
        assert!(!matcher.matches("//web"));
    }

    #[test]
    fn test_unanchored_pattern_matches_substring() {
        let matcher = NameMatcher::new("nginx").unwrap();
        assert!(matcher.matches("/edge-nginx-1"));
    }

    #[test]
    fn test_empty_pattern_matches_everything() {
        let matcher = NameMatcher::new("").unwrap();
        assert!(matcher.matches("/anything"));
        assert!(matcher.matches(""));
        assert_eq!(matcher.pattern(), "");
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(NameMatcher::new("web-(").is_err());
    }
}
