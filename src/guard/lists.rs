use super::pattern::Pattern;

/// Outcome of applying the allow/deny lists to a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListDecision {
    Allow,
    Deny,
    /// Neither list had anything to say; the caller decides the default.
    NoOpinion,
}

/// Split a multi-line list field into individual pattern strings. Accepts any
/// newline convention and drops blank lines.
pub fn split_patterns(input: &str) -> Vec<String> {
    input
        .split(['\n', '\r'])
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect()
}

/// Apply an ordered allowlist, then denylist, to `route`.
///
/// A non-empty allowlist is exhaustive: the first match allows, no match
/// denies, and the denylist is never consulted. With an empty allowlist the
/// denylist denies on first match and otherwise stays silent.
pub fn evaluate(route: &str, allowlist: &[Pattern], denylist: &[Pattern]) -> ListDecision {
    if !allowlist.is_empty() {
        if allowlist.iter().any(|pattern| pattern.matches(route)) {
            return ListDecision::Allow;
        }
        return ListDecision::Deny;
    }

    if denylist.iter().any(|pattern| pattern.matches(route)) {
        return ListDecision::Deny;
    }

    ListDecision::NoOpinion
}

#[cfg(test)]
mod tests {
    use super::*;

    const PREFIX: &str = "/wp-json";

    fn compile(patterns: &[&str]) -> Vec<Pattern> {
        patterns
            .iter()
            .map(|raw| Pattern::compile(raw, PREFIX))
            .collect()
    }

    #[test]
    fn test_allowlist_first_match_allows() {
        let allowlist = compile(&["/wp/v2/posts/*", "/wp/v2/tags"]);

        assert_eq!(
            evaluate("/wp/v2/posts/42", &allowlist, &[]),
            ListDecision::Allow
        );
        assert_eq!(
            evaluate("/wp/v2/tags", &allowlist, &[]),
            ListDecision::Allow
        );
    }

    #[test]
    fn test_allowlist_is_exhaustive() {
        let allowlist = compile(&["/wp/v2/posts/*", "/wp/v2/tags"]);

        // Anything unmatched by a configured allowlist is blocked.
        assert_eq!(
            evaluate("/wp/v2/categories", &allowlist, &[]),
            ListDecision::Deny
        );
    }

    #[test]
    fn test_allowlist_shadows_denylist() {
        let allowlist = compile(&["/wp/v2/tags"]);
        let denylist = compile(&["/wp/v2/tags"]);

        // The identical deny rule is never consulted.
        assert_eq!(
            evaluate("/wp/v2/tags", &allowlist, &denylist),
            ListDecision::Allow
        );
    }

    #[test]
    fn test_denylist_only() {
        let denylist = compile(&["/wp/v2/tags", "/wp/v2/types"]);

        assert_eq!(evaluate("/wp/v2/tags", &[], &denylist), ListDecision::Deny);
        assert_eq!(evaluate("/wp/v2/types", &[], &denylist), ListDecision::Deny);
        assert_eq!(
            evaluate("/wp/v2/posts", &[], &denylist),
            ListDecision::NoOpinion
        );
    }

    #[test]
    fn test_empty_lists_have_no_opinion() {
        assert_eq!(evaluate("/wp/v2/posts", &[], &[]), ListDecision::NoOpinion);
    }

    #[test]
    fn test_split_patterns_newline_conventions() {
        let unix = "/wp/v2/posts/*\n/wp/v2/tags";
        let windows = "/wp/v2/posts/*\r\n/wp/v2/tags";
        let legacy_mac = "/wp/v2/posts/*\r/wp/v2/tags";

        let expected = vec!["/wp/v2/posts/*".to_string(), "/wp/v2/tags".to_string()];
        assert_eq!(split_patterns(unix), expected);
        assert_eq!(split_patterns(windows), expected);
        assert_eq!(split_patterns(legacy_mac), expected);
    }

    #[test]
    fn test_split_patterns_drops_blank_lines() {
        assert_eq!(
            split_patterns("\n/wp/v2/tags\n\n   \n"),
            vec!["/wp/v2/tags".to_string()]
        );
        assert!(split_patterns("").is_empty());
    }
}
