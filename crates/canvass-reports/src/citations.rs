//! Citation leaderboard: aggregate cited URLs by domain and path prefix.

use reqwest::Url;
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

/// One cited URL with its optional anchor text.
#[derive(Debug, Clone)]
pub struct CitationInput {
    pub url: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CitationCountItem {
    /// `domain` or `domain/path/prefix`.
    pub path: String,
    pub count: usize,
    pub is_domain: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CitationLeaderboard {
    pub items: Vec<CitationCountItem>,
    /// Citations with a parseable absolute URL; malformed ones are dropped.
    pub total_citations: usize,
}

/// Counts citations per domain and per path prefix down to a configurable
/// depth, most-cited first.
#[derive(Debug, Clone, Copy)]
pub struct CitationLeaderboardBuilder {
    max_path_depth: usize,
}

impl Default for CitationLeaderboardBuilder {
    fn default() -> Self {
        Self { max_path_depth: 2 }
    }
}

impl CitationLeaderboardBuilder {
    pub fn new(max_path_depth: usize) -> Self {
        Self { max_path_depth }
    }

    pub fn aggregate(&self, citations: &[CitationInput]) -> CitationLeaderboard {
        let mut domain_counts: HashMap<String, usize> = HashMap::new();
        let mut path_counts: HashMap<String, usize> = HashMap::new();
        let mut total = 0;

        for citation in citations {
            let Ok(url) = Url::parse(&citation.url) else {
                debug!(url = %citation.url, "skipping malformed citation url");
                continue;
            };
            let Some(host) = url.host_str() else {
                continue;
            };
            let domain = host.to_lowercase();
            total += 1;

            *domain_counts.entry(domain.clone()).or_default() += 1;

            let mut prefix = domain;
            for segment in url
                .path()
                .split('/')
                .filter(|segment| !segment.is_empty())
                .take(self.max_path_depth)
            {
                prefix = format!("{prefix}/{segment}");
                *path_counts.entry(prefix.clone()).or_default() += 1;
            }
        }

        let mut items: Vec<CitationCountItem> = domain_counts
            .into_iter()
            .map(|(path, count)| CitationCountItem {
                path,
                count,
                is_domain: true,
            })
            .chain(path_counts.into_iter().map(|(path, count)| {
                CitationCountItem {
                    path,
                    count,
                    is_domain: false,
                }
            }))
            .collect();
        items.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.path.cmp(&b.path)));

        CitationLeaderboard {
            items,
            total_citations: total,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn cite(url: &str) -> CitationInput {
        CitationInput {
            url: url.to_owned(),
            text: String::new(),
        }
    }

    fn count_of(board: &CitationLeaderboard, path: &str) -> usize {
        board
            .items
            .iter()
            .find(|item| item.path == path)
            .map(|item| item.count)
            .unwrap_or(0)
    }

    #[test]
    fn aggregates_domain_and_path_levels() {
        let builder = CitationLeaderboardBuilder::default();
        let board = builder.aggregate(&[
            cite("https://rozetka.com.ua/ua/mobile-phones/xyz"),
            cite("https://rozetka.com.ua/ua/mobile-phones/abc"),
            cite("https://rozetka.com.ua/ua/laptops/def"),
        ]);

        assert_eq!(board.total_citations, 3);
        assert_eq!(count_of(&board, "rozetka.com.ua"), 3);
        assert_eq!(count_of(&board, "rozetka.com.ua/ua"), 3);
        assert_eq!(count_of(&board, "rozetka.com.ua/ua/mobile-phones"), 2);
        assert_eq!(count_of(&board, "rozetka.com.ua/ua/laptops"), 1);
        // Depth 2: the leaf segments never show up.
        assert!(!board.items.iter().any(|i| i.path.contains("xyz")));
    }

    #[test]
    fn multiple_domains_sorted_by_count() {
        let builder = CitationLeaderboardBuilder::default();
        let board = builder.aggregate(&[
            cite("https://a.com/page1"),
            cite("https://b.com/page1"),
            cite("https://b.com/page2"),
            cite("https://c.com/page1"),
            cite("https://c.com/page2"),
            cite("https://c.com/page3"),
        ]);

        let domain_counts: Vec<usize> = board
            .items
            .iter()
            .filter(|item| item.is_domain)
            .map(|item| item.count)
            .collect();
        let mut sorted = domain_counts.clone();
        sorted.sort_unstable_by(|a, b| b.cmp(a));
        assert_eq!(domain_counts, sorted);
        assert_eq!(count_of(&board, "c.com"), 3);
    }

    #[test]
    fn malformed_and_schemeless_urls_are_dropped() {
        let builder = CitationLeaderboardBuilder::default();
        let board = builder.aggregate(&[
            cite("not-a-valid-url"),
            cite("rozetka.com.ua/phones"),
            cite("https://valid.com/page"),
        ]);

        assert_eq!(board.total_citations, 1);
        assert_eq!(board.items.iter().filter(|i| i.is_domain).count(), 1);
    }

    #[test]
    fn empty_input_gives_empty_board() {
        let board = CitationLeaderboardBuilder::default().aggregate(&[]);
        assert_eq!(board.total_citations, 0);
        assert!(board.items.is_empty());
    }

    #[test]
    fn domain_is_case_insensitive_and_queries_are_ignored() {
        let builder = CitationLeaderboardBuilder::default();
        let board = builder.aggregate(&[
            cite("https://ROZETKA.COM.UA/page?foo=bar"),
            cite("https://rozetka.com.ua/page2"),
        ]);

        assert_eq!(count_of(&board, "rozetka.com.ua"), 2);
        assert!(board.items.iter().all(|i| !i.path.contains('?')));
    }

    #[test]
    fn max_path_depth_limits_prefixes() {
        let builder = CitationLeaderboardBuilder::new(1);
        let board = builder.aggregate(&[cite("https://example.com/a/b/c")]);

        assert_eq!(count_of(&board, "example.com"), 1);
        assert_eq!(count_of(&board, "example.com/a"), 1);
        assert!(!board.items.iter().any(|i| i.path == "example.com/a/b"));
    }
}
