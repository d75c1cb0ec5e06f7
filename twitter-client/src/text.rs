use bluemigrate_core::{Facet, RawPost, UrlEntity};
use regex::Regex;
use std::sync::OnceLock;

/// Longest text kept before the ellipsis is appended.
pub const MAX_TEXT_CHARS: usize = 297;
const ELLIPSIS: &str = "...";

fn url_token() -> &'static Regex {
    static URL_TOKEN: OnceLock<Regex> = OnceLock::new();
    URL_TOKEN.get_or_init(|| Regex::new(r"https?://\S+").expect("static regex is valid"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpandedText {
    pub text: String,
    pub facets: Vec<Facet>,
}

/// Replaces shortened links with their expanded form and records a link facet
/// for each one.
///
/// Tokens already equal to an entity's expanded URL get a facet too, so
/// running this on its own output yields the same text and facets. Links
/// without a matching entity are left untouched.
pub fn expand_links(raw: &str, entities: &[UrlEntity]) -> ExpandedText {
    let mut text = String::with_capacity(raw.len());
    let mut facets = Vec::new();
    let mut last = 0;

    for token in url_token().find_iter(raw) {
        text.push_str(&raw[last..token.start()]);
        match resolve(token.as_str(), entities) {
            Some(expanded) => {
                let byte_start = text.len();
                text.push_str(expanded);
                facets.push(Facet {
                    byte_start,
                    byte_end: text.len(),
                    uri: expanded.to_string(),
                });
            }
            None => text.push_str(token.as_str()),
        }
        last = token.end();
    }
    text.push_str(&raw[last..]);

    ExpandedText { text, facets }
}

fn resolve<'a>(token: &str, entities: &'a [UrlEntity]) -> Option<&'a str> {
    entities.iter().find_map(|entity| {
        let expanded = entity.expanded_url.as_deref()?;
        (entity.url == token || expanded == token).then_some(expanded)
    })
}

/// Cuts text longer than [`MAX_TEXT_CHARS`] and drops facets past the cut.
pub fn truncate(expanded: ExpandedText) -> ExpandedText {
    let ExpandedText { text, mut facets } = expanded;
    match text.char_indices().nth(MAX_TEXT_CHARS) {
        None => ExpandedText { text, facets },
        Some((cut, _)) => {
            let mut truncated = String::with_capacity(cut + ELLIPSIS.len());
            truncated.push_str(&text[..cut]);
            truncated.push_str(ELLIPSIS);
            facets.retain(|f| f.byte_end <= cut);
            ExpandedText {
                text: truncated,
                facets,
            }
        }
    }
}

pub fn format_post_text(post: &RawPost) -> ExpandedText {
    truncate(expand_links(&post.raw_text, &post.url_entities))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(short: &str, expanded: &str) -> UrlEntity {
        UrlEntity {
            url: short.to_string(),
            expanded_url: Some(expanded.to_string()),
            display_url: None,
        }
    }

    #[test]
    fn test_expands_known_links_with_byte_offsets() {
        let entities = vec![entity("https://t.co/abc", "https://example.com/page")];
        let result = expand_links("café https://t.co/abc now", &entities);

        assert_eq!(result.text, "café https://example.com/page now");
        assert_eq!(result.facets.len(), 1);
        let facet = &result.facets[0];
        // "café " is 6 bytes
        assert_eq!(facet.byte_start, 6);
        assert_eq!(
            &result.text[facet.byte_start..facet.byte_end],
            "https://example.com/page"
        );
    }

    #[test]
    fn test_unresolved_links_are_left_alone() {
        let entities = vec![UrlEntity {
            url: "https://t.co/nope".to_string(),
            expanded_url: None,
            display_url: None,
        }];
        let result = expand_links("a https://t.co/nope b https://t.co/other", &entities);
        assert_eq!(result.text, "a https://t.co/nope b https://t.co/other");
        assert!(result.facets.is_empty());
    }

    #[test]
    fn test_expansion_is_idempotent() {
        let entities = vec![
            entity("https://t.co/a", "https://one.example"),
            entity("http://t.co/b", "https://two.example/path?q=1"),
        ];
        let inputs = [
            "",
            "no links at all",
            "https://t.co/a",
            "lead https://t.co/a mid http://t.co/b tail",
            "unknown https://t.co/zzz and https://t.co/a",
            "ünïcödé → https://t.co/a ✓",
        ];

        for input in inputs {
            let once = expand_links(input, &entities);
            let twice = expand_links(&once.text, &entities);
            assert_eq!(once, twice, "not idempotent for {:?}", input);
        }
    }

    #[test]
    fn test_truncates_long_text_and_facets() {
        let long_prefix = "x".repeat(290);
        let entities = vec![entity("https://t.co/a", "https://example.com/long/path")];
        let raw = format!("{} https://t.co/a", long_prefix);

        let result = truncate(expand_links(&raw, &entities));
        assert_eq!(result.text.chars().count(), MAX_TEXT_CHARS + ELLIPSIS.len());
        assert!(result.text.ends_with("..."));
        // The link crossed the cut, so its facet is gone
        assert!(result.facets.is_empty());
    }

    #[test]
    fn test_short_text_untouched() {
        let expanded = ExpandedText {
            text: "ü".repeat(MAX_TEXT_CHARS),
            facets: vec![],
        };
        let result = truncate(expanded.clone());
        assert_eq!(result, expanded);
    }
}
