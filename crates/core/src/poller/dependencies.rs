//! Declared dependencies between work items.

use once_cell::sync::Lazy;
use regex_lite::Regex;

static DEPENDENCY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:depends\s+on|blocked\s+by|requires):?\s*#(\d+)").unwrap()
});

/// Extract the ids an item body declares it depends on.
///
/// Recognises `Depends on #12`, `Blocked by #12` and `Requires: #12`,
/// case-insensitively. Duplicates are removed, order of first mention kept.
pub fn parse_dependencies(body: &str) -> Vec<String> {
    let mut deps: Vec<String> = Vec::new();
    for caps in DEPENDENCY_RE.captures_iter(body) {
        let id = caps[1].to_string();
        if !deps.contains(&id) {
            deps.push(id);
        }
    }
    deps
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_variants() {
        let body = "Depends on #12\nblocked by #7\nRequires: #3";
        assert_eq!(parse_dependencies(body), vec!["12", "7", "3"]);
    }

    #[test]
    fn test_parse_deduplicates() {
        assert_eq!(parse_dependencies("depends on #4, requires #4"), vec!["4"]);
    }

    #[test]
    fn test_parse_ignores_plain_references() {
        assert!(parse_dependencies("See #12 and fixes #13").is_empty());
        assert!(parse_dependencies("").is_empty());
    }
}
