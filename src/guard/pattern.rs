use regex::Regex;

/// A compiled allow/deny rule. `*` matches any run of characters; everything
/// else is literal, including regex metacharacters.
///
/// Matching is an unanchored search: a pattern matches anywhere inside the
/// route, so `/wp/v2/tags` also matches `/wp/v2/tags/123`. Rules that need an
/// exact boundary must spell it out.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    regex: Option<Regex>,
}

impl Pattern {
    /// Compile a rule string. A leading `route_prefix` (the API mount point)
    /// is stripped first so rules can be authored with or without it.
    pub fn compile(raw: &str, route_prefix: &str) -> Self {
        let trimmed = raw.trim();
        let bare = if !route_prefix.is_empty() {
            trimmed.strip_prefix(route_prefix).unwrap_or(trimmed)
        } else {
            trimmed
        };
        let expression = regex::escape(bare).replace(r"\*", ".*");

        Self {
            source: bare.to_string(),
            regex: Regex::new(&expression).ok(),
        }
    }

    pub fn matches(&self, route: &str) -> bool {
        match &self.regex {
            Some(regex) => regex.is_match(route),
            // Compilation cannot realistically fail after escaping, but a
            // broken rule degrades to a literal substring check rather than
            // silently matching nothing.
            None => route.contains(&self.source),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_pattern() {
        let pattern = Pattern::compile("/wp/v2/tags", "/wp-json");
        assert!(pattern.matches("/wp/v2/tags"));
        assert!(!pattern.matches("/wp/v2/posts"));
    }

    #[test]
    fn test_wildcard_matches_any_run() {
        let pattern = Pattern::compile("/wp/v2/posts/*", "/wp-json");
        assert!(pattern.matches("/wp/v2/posts/42"));
        assert!(pattern.matches("/wp/v2/posts/42/revisions"));
        assert!(!pattern.matches("/wp/v2/tags"));
    }

    #[test]
    fn test_match_is_a_search_not_an_anchor() {
        // Preserved behavior: rules match anywhere within the route.
        let pattern = Pattern::compile("/wp/v2/tags", "/wp-json");
        assert!(pattern.matches("/wp/v2/tags/123"));
        assert!(pattern.matches("/other/wp/v2/tags"));
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        let pattern = Pattern::compile("/wp/v2/posts?page=1", "/wp-json");
        assert!(pattern.matches("/wp/v2/posts?page=1"));
        // `?` must not act as an optional quantifier.
        assert!(!pattern.matches("/wp/v2/post?page=1"));

        let dotted = Pattern::compile("/oembed/1.0", "/wp-json");
        assert!(dotted.matches("/oembed/1.0"));
        assert!(!dotted.matches("/oembed/1x0"));
    }

    #[test]
    fn test_mount_prefix_is_stripped() {
        let with_prefix = Pattern::compile("/wp-json/wp/v2/tags", "/wp-json");
        let without_prefix = Pattern::compile("/wp/v2/tags", "/wp-json");

        assert_eq!(with_prefix.source(), without_prefix.source());
        assert!(with_prefix.matches("/wp/v2/tags"));
    }

    #[test]
    fn test_prefix_only_stripped_at_start() {
        let pattern = Pattern::compile("/reports/wp-json-export", "/wp-json");
        assert!(pattern.matches("/reports/wp-json-export"));
    }

    #[test]
    fn test_surrounding_whitespace_is_trimmed() {
        let pattern = Pattern::compile("  /wp/v2/tags\r", "/wp-json");
        assert_eq!(pattern.source(), "/wp/v2/tags");
    }

    #[test]
    fn test_bare_wildcard_matches_everything() {
        let pattern = Pattern::compile("*", "/wp-json");
        assert!(pattern.matches("/"));
        assert!(pattern.matches("/wp/v2/anything"));
    }
}
