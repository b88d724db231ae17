//! Brand and domain mention detection in answer text.
//!
//! Offsets are byte positions into the scanned text. Variations of one brand
//! are scanned independently, so overlapping matches ("Moyo" inside
//! "moyo.ua") are all reported.

use regex::Regex;
use serde::Serialize;
use tracing::warn;

// ---------------------------------------------------------------------------
// Brand mentions
// ---------------------------------------------------------------------------

/// A brand to look for, with its spelling variations.
#[derive(Debug, Clone)]
pub struct BrandInput {
    pub name: String,
    pub variations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MentionPosition {
    pub start: usize,
    pub end: usize,
    pub matched_text: String,
    /// Which variation produced the match.
    pub variation: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BrandMentionResult {
    pub brand_name: String,
    pub mentions: Vec<MentionPosition>,
}

/// Case-insensitive substring detector for brand variations.
#[derive(Debug, Clone, Copy, Default)]
pub struct BrandMentionDetector;

impl BrandMentionDetector {
    pub fn detect(&self, text: &str, brands: &[BrandInput]) -> Vec<BrandMentionResult> {
        if text.is_empty() || brands.is_empty() {
            return Vec::new();
        }

        brands
            .iter()
            .map(|brand| {
                let mut mentions = Vec::new();
                for variation in &brand.variations {
                    if variation.is_empty() {
                        continue;
                    }
                    let Ok(pattern) = Regex::new(&format!("(?i){}", regex::escape(variation)))
                    else {
                        warn!(variation = %variation, "unbuildable variation pattern");
                        continue;
                    };
                    for found in pattern.find_iter(text) {
                        mentions.push(MentionPosition {
                            start: found.start(),
                            end: found.end(),
                            matched_text: found.as_str().to_owned(),
                            variation: variation.clone(),
                        });
                    }
                }
                mentions.sort_by_key(|m| (m.start, m.end));
                BrandMentionResult {
                    brand_name: brand.name.clone(),
                    mentions,
                }
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Domain mentions
// ---------------------------------------------------------------------------

/// A domain to look for (a brand's or a competitor's site).
#[derive(Debug, Clone)]
pub struct DomainInput {
    pub name: String,
    pub domain: String,
    pub is_brand: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DomainMentionPosition {
    pub start: usize,
    pub end: usize,
    pub matched_text: String,
    pub matched_domain: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DomainMentionResult {
    pub name: String,
    pub domain: String,
    pub is_brand: bool,
    pub mentions: Vec<DomainMentionPosition>,
}

/// Detects domain mentions: bare, with protocol, with www or deeper
/// subdomains, with a path. A candidate only counts when it starts the text
/// or follows whitespace, so "notexample.com" never matches "example.com".
#[derive(Debug, Clone, Copy, Default)]
pub struct DomainMentionDetector;

impl DomainMentionDetector {
    pub fn detect(&self, text: &str, domains: &[DomainInput]) -> Vec<DomainMentionResult> {
        if text.is_empty() || domains.is_empty() {
            return Vec::new();
        }

        domains
            .iter()
            .filter(|input| !input.domain.is_empty())
            .map(|input| DomainMentionResult {
                name: input.name.clone(),
                domain: input.domain.clone(),
                is_brand: input.is_brand,
                mentions: find_domain_mentions(text, &input.domain),
            })
            .collect()
    }
}

fn find_domain_mentions(text: &str, domain: &str) -> Vec<DomainMentionPosition> {
    let normalized = domain.to_lowercase();
    let normalized = normalized.strip_prefix("www.").unwrap_or(&normalized);

    // Optional protocol, optional www/subdomains, the domain itself, and an
    // optional path/query tail up to whitespace or a closing delimiter.
    let pattern = format!(
        r#"(?i)(?:https?://)?(?:www\.)?(?:[a-z0-9](?:[a-z0-9-]*[a-z0-9])?\.)*{}(?:/[^\s<>"'\])]*)?"#,
        regex::escape(normalized)
    );
    let Ok(regex) = Regex::new(&pattern) else {
        warn!(domain = %normalized, "unbuildable domain pattern");
        return Vec::new();
    };

    let mut mentions = Vec::new();
    for found in regex.find_iter(text) {
        // The regex engine has no lookbehind; enforce the left boundary by
        // hand. A dot is accepted so stray leading separators do not hide a
        // mention.
        let boundary_ok = text[..found.start()]
            .chars()
            .next_back()
            .is_none_or(|c| c.is_whitespace() || c == '.');
        if !boundary_ok {
            continue;
        }

        mentions.push(DomainMentionPosition {
            start: found.start(),
            end: found.end(),
            matched_text: found.as_str().to_owned(),
            matched_domain: normalized.to_owned(),
        });
    }

    mentions.sort_by_key(|m| m.start);
    mentions
}
