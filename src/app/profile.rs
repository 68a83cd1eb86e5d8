//! Quality profile application: filtering and best-result selection.
//!
//! A profile narrows a merged result set to acceptable formats and sizes,
//! then orders the survivors by the profile's format preference, quality
//! score, file size and recency. Profiles are ranking hints only; nothing
//! here touches the download queue.

use crate::app::models::{BookSearchResult, QualityProfile};

/// Results that satisfy a profile's hard criteria, in input order
pub fn apply_profile(
    profile: &QualityProfile,
    results: &[BookSearchResult],
) -> Vec<BookSearchResult> {
    results
        .iter()
        .filter(|r| profile.format_rank(&r.format).is_some())
        .filter(|r| r.quality_score >= profile.min_quality_score)
        .filter(|r| match (profile.max_file_size_mb, r.file_size_bytes) {
            (Some(max_mb), Some(size)) => size <= max_mb * 1024 * 1024,
            _ => true,
        })
        .cloned()
        .collect()
}

/// Pick the single best result under a profile, if any qualifies.
///
/// Ordering: preferred format rank, then quality score (descending), then
/// smallest file size, then earliest `found_at` as the final tiebreak.
pub fn select_best(
    profile: &QualityProfile,
    results: &[BookSearchResult],
) -> Option<BookSearchResult> {
    let mut candidates = apply_profile(profile, results);
    candidates.sort_by(|a, b| {
        let rank_a = profile.format_rank(&a.format).unwrap_or(usize::MAX);
        let rank_b = profile.format_rank(&b.format).unwrap_or(usize::MAX);
        rank_a
            .cmp(&rank_b)
            .then_with(|| {
                b.quality_score
                    .partial_cmp(&a.quality_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| {
                a.file_size_bytes
                    .unwrap_or(u64::MAX)
                    .cmp(&b.file_size_bytes.unwrap_or(u64::MAX))
            })
            .then_with(|| a.found_at.cmp(&b.found_at))
    });
    candidates.into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::models::{BookFormat, IndexerId};
    use chrono::Utc;

    fn result(format: BookFormat, quality: f32, size: Option<u64>) -> BookSearchResult {
        BookSearchResult {
            indexer_id: IndexerId(1),
            title: "Book".to_string(),
            author: None,
            format,
            isbn: None,
            file_size_bytes: size,
            quality_score: quality,
            download_url: "https://example.com/dl".to_string(),
            language: None,
            found_at: Utc::now(),
        }
    }

    fn profile() -> QualityProfile {
        QualityProfile {
            name: "test".to_string(),
            preferred_formats: vec![BookFormat::Epub, BookFormat::Mobi],
            min_quality_score: 50.0,
            max_file_size_mb: Some(10),
        }
    }

    #[test]
    fn test_apply_profile_filters() {
        let results = vec![
            result(BookFormat::Epub, 80.0, Some(1024)),
            result(BookFormat::Pdf, 90.0, Some(1024)),
            result(BookFormat::Epub, 40.0, Some(1024)),
            result(BookFormat::Epub, 80.0, Some(100 * 1024 * 1024)),
        ];
        let kept = apply_profile(&profile(), &results);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].format, BookFormat::Epub);
        assert_eq!(kept[0].quality_score, 80.0);
    }

    #[test]
    fn test_select_best_prefers_format_over_quality() {
        let results = vec![
            result(BookFormat::Mobi, 95.0, Some(1024)),
            result(BookFormat::Epub, 60.0, Some(1024)),
        ];
        let best = select_best(&profile(), &results).unwrap();
        assert_eq!(best.format, BookFormat::Epub);
    }

    #[test]
    fn test_select_best_ties_break_on_size() {
        let results = vec![
            result(BookFormat::Epub, 80.0, Some(4096)),
            result(BookFormat::Epub, 80.0, Some(1024)),
        ];
        let best = select_best(&profile(), &results).unwrap();
        assert_eq!(best.file_size_bytes, Some(1024));
    }

    #[test]
    fn test_select_best_none_when_nothing_qualifies() {
        let results = vec![result(BookFormat::Djvu, 99.0, None)];
        assert!(select_best(&profile(), &results).is_none());
    }
}
