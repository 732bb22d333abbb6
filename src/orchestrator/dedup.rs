//! Paragraph-level deduplication of combined scrape content.

use serde::{Deserialize, Serialize};

/// One source's contribution to a combined `search_and_scrape` result,
/// before deduplication.
#[derive(Debug, Clone)]
pub struct SourceContent {
    /// The originating URL, used for attribution headers.
    pub url: String,
    /// The source's extracted text.
    pub text: String,
}

/// Deduplication statistics, reported alongside the combined text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupStats {
    /// Combined length before deduplication.
    pub original_length: usize,
    /// Combined length after deduplication.
    pub deduplicated_length: usize,
    /// Number of paragraphs dropped as exact or near duplicates.
    pub duplicates_removed: usize,
    /// `100 * (original_length - deduplicated_length) / original_length`.
    pub reduction_percent: f64,
    /// Number of sources contributing to the combined content.
    pub sources_processed: usize,
}

/// The result of combining (and optionally deduplicating) multiple
/// sources' content.
#[derive(Debug, Clone)]
pub struct CombinedContent {
    /// The combined text.
    pub text: String,
    /// Statistics describing what deduplication removed, if it ran.
    pub stats: Option<DedupStats>,
}

fn normalize_whitespace(paragraph: &str) -> String {
    paragraph.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn split_paragraphs(text: &str) -> Vec<String> {
    text.split("\n\n")
        .flat_map(|chunk| chunk.split("\r\n\r\n"))
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// Jaccard similarity over whitespace-tokenized words, a stable and cheap
/// near-duplicate measure.
fn similarity(a: &str, b: &str) -> f64 {
    use std::collections::HashSet;

    let tokens_a: HashSet<&str> = a.split_whitespace().collect();
    let tokens_b: HashSet<&str> = b.split_whitespace().collect();

    if tokens_a.is_empty() && tokens_b.is_empty() {
        return 1.0;
    }

    let intersection = tokens_a.intersection(&tokens_b).count();
    let union = tokens_a.union(&tokens_b).count();

    if union == 0 {
        0.0
    } else {
        #[allow(clippy::cast_precision_loss)]
        let ratio = intersection as f64 / union as f64;
        ratio
    }
}

/// Combine sources' content, optionally deduplicating paragraphs across
/// all of them. When `preserve_structure` is set, each source's
/// paragraphs are preceded by a `### <url>` attribution header.
#[must_use]
pub fn combine(sources: &[SourceContent], deduplicate: bool, preserve_structure: bool, min_paragraph_length: usize, similarity_threshold: f64) -> CombinedContent {
    if !deduplicate {
        let text = if preserve_structure {
            sources.iter().map(|s| format!("### {}\n\n{}", s.url, s.text)).collect::<Vec<_>>().join("\n\n")
        } else {
            sources.iter().map(|s| s.text.as_str()).collect::<Vec<_>>().join("\n\n")
        };
        return CombinedContent { text, stats: None };
    }

    let original: Vec<String> = sources.iter().flat_map(|s| split_paragraphs(&s.text)).collect();
    let original_length: usize = original.iter().map(String::len).sum();

    let mut kept: Vec<String> = Vec::new();
    let mut seen_normalized: std::collections::HashSet<String> = std::collections::HashSet::new();
    let mut duplicates_removed = 0usize;

    for paragraph in &original {
        if paragraph.len() < min_paragraph_length {
            duplicates_removed += 1;
            continue;
        }

        let normalized = normalize_whitespace(paragraph);
        if seen_normalized.contains(&normalized) {
            duplicates_removed += 1;
            continue;
        }

        if kept.iter().any(|existing| similarity(existing, paragraph) >= similarity_threshold) {
            duplicates_removed += 1;
            continue;
        }

        seen_normalized.insert(normalized);
        kept.push(paragraph.clone());
    }

    let text = if preserve_structure { build_structured_output(sources, &kept, min_paragraph_length) } else { kept.join("\n\n") };

    let deduplicated_length = text.len();
    #[allow(clippy::cast_precision_loss)]
    let reduction_percent = if original_length == 0 { 0.0 } else { 100.0 * (original_length.saturating_sub(deduplicated_length)) as f64 / original_length as f64 };

    CombinedContent {
        text,
        stats: Some(DedupStats { original_length, deduplicated_length, duplicates_removed, reduction_percent, sources_processed: sources.len() }),
    }
}

fn build_structured_output(sources: &[SourceContent], kept: &[String], min_paragraph_length: usize) -> String {
    let kept_set: std::collections::HashSet<&str> = kept.iter().map(String::as_str).collect();
    let mut blocks = Vec::new();

    for source in sources {
        let paragraphs = split_paragraphs(&source.text);
        let retained: Vec<&str> = paragraphs.iter().filter(|p| p.len() >= min_paragraph_length).filter_map(|p| kept_set.get(p.as_str()).copied()).collect();
        if !retained.is_empty() {
            blocks.push(format!("### {}\n\n{}", source.url, retained.join("\n\n")));
        }
    }

    blocks.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn source(url: &str, text: &str) -> SourceContent {
        SourceContent { url: url.to_string(), text: text.to_string() }
    }

    #[test]
    fn no_dedup_just_joins_sources() {
        let sources = vec![source("https://a", "Hello world this paragraph is long enough to survive."), source("https://b", "Second source content here that is also long enough.")];
        let combined = combine(&sources, false, false, 50, 0.8);
        assert!(combined.text.contains("Hello world"));
        assert!(combined.text.contains("Second source"));
        assert!(combined.stats.is_none());
    }

    #[test]
    fn drops_paragraphs_below_minimum_length() {
        let sources = vec![source("https://a", "short\n\nThis paragraph is long enough to be kept around for sure.")];
        let combined = combine(&sources, true, false, 50, 0.8);
        assert!(!combined.text.contains("short"));
        assert!(combined.text.contains("long enough to be kept"));
    }

    #[test]
    fn exact_duplicates_across_sources_are_removed() {
        let paragraph = "This exact paragraph appears twice across two different sources in the set.";
        let sources = vec![source("https://a", paragraph), source("https://b", paragraph)];
        let combined = combine(&sources, true, false, 10, 0.8);
        let stats = combined.stats.unwrap();
        assert_eq!(stats.duplicates_removed, 1);
        assert_eq!(stats.sources_processed, 2);
    }

    #[test]
    fn near_duplicates_above_threshold_are_removed() {
        let a = "The quick brown fox jumps over the lazy dog near the river bank today.";
        let b = "The quick brown fox jumps over the lazy dog near the river bank today!!";
        let sources = vec![source("https://a", a), source("https://b", b)];
        let combined = combine(&sources, true, false, 10, 0.8);
        let stats = combined.stats.unwrap();
        assert_eq!(stats.duplicates_removed, 1);
    }

    #[test]
    fn dissimilar_paragraphs_are_both_kept() {
        let a = "Paragraph about gardening techniques and soil composition for home growers.";
        let b = "Paragraph about distributed systems consensus algorithms like Raft and Paxos.";
        let sources = vec![source("https://a", a), source("https://b", b)];
        let combined = combine(&sources, true, false, 10, 0.8);
        assert!(combined.text.contains("gardening"));
        assert!(combined.text.contains("consensus"));
    }

    #[test]
    fn preserve_structure_keeps_per_source_headers() {
        let sources = vec![source("https://a", "A long enough paragraph from source A goes right here.")];
        let combined = combine(&sources, true, true, 10, 0.8);
        assert!(combined.text.starts_with("### https://a"));
    }

    #[test]
    fn reduction_percent_reflects_removed_content() {
        let paragraph = "This exact paragraph appears twice across two different sources in the set.";
        let sources = vec![source("https://a", paragraph), source("https://b", paragraph)];
        let combined = combine(&sources, true, false, 10, 0.8);
        let stats = combined.stats.unwrap();
        assert!(stats.reduction_percent > 0.0);
        assert!(stats.deduplicated_length < stats.original_length);
    }
}
