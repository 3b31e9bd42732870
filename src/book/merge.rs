// Stage two of the normalizer: merge two NormalizedBook values under
// field-level policies. `base` is what the vault note already says,
// `incoming` is what the device says now.

use super::{NormalizedBook, ReadingStatus};

/// Merge policy summary:
/// - bibliographic fields keep the base value when the incoming side lacks one
/// - monotonic progress fields take the high-water mark
/// - `first_read` never disappears, `last_read` is the max
/// - user-supplied fields (rating) keep the base unless incoming has a value
pub fn merge_books(base: &NormalizedBook, incoming: &NormalizedBook) -> NormalizedBook {
    NormalizedBook {
        title: prefer_nonempty(&incoming.title, &base.title),
        authors: prefer_nonempty_list(&incoming.authors, &base.authors),
        description: incoming.description.clone().or_else(|| base.description.clone()),
        keywords: prefer_nonempty_list(&incoming.keywords, &base.keywords),
        series: incoming.series.clone().or_else(|| base.series.clone()),
        language: incoming.language.clone().or_else(|| base.language.clone()),
        pages: incoming.pages.or(base.pages),
        rating: incoming.rating.or(base.rating),
        reading_status: high_water_status(base.reading_status, incoming.reading_status),
        progress_percent: high_water(base.progress_percent, incoming.progress_percent),
        reading_streak_days: incoming.reading_streak_days.or(base.reading_streak_days),
        first_read: earliest(base.first_read, incoming.first_read),
        last_read: high_water(base.last_read, incoming.last_read),
        total_read_seconds: high_water(base.total_read_seconds, incoming.total_read_seconds),
        average_time_per_page_seconds: incoming
            .average_time_per_page_seconds
            .or(base.average_time_per_page_seconds),
        avg_session_duration_seconds: incoming
            .avg_session_duration_seconds
            .or(base.avg_session_duration_seconds),
        highlight_count: incoming.highlight_count.or(base.highlight_count),
        note_count: incoming.note_count.or(base.note_count),
        session_count: high_water(base.session_count, incoming.session_count),
        md5: incoming.md5.clone().or_else(|| base.md5.clone()),
    }
}

fn prefer_nonempty(incoming: &str, base: &str) -> String {
    if incoming.trim().is_empty() {
        base.to_string()
    } else {
        incoming.to_string()
    }
}

fn prefer_nonempty_list(incoming: &[String], base: &[String]) -> Vec<String> {
    if incoming.is_empty() {
        base.to_vec()
    } else {
        incoming.to_vec()
    }
}

fn high_water<T: Ord + Copy>(base: Option<T>, incoming: Option<T>) -> Option<T> {
    match (base, incoming) {
        (Some(b), Some(i)) => Some(b.max(i)),
        (v, None) | (None, v) => v,
    }
}

fn earliest(base: Option<i64>, incoming: Option<i64>) -> Option<i64> {
    match (base, incoming) {
        (Some(b), Some(i)) => Some(b.min(i)),
        (v, None) | (None, v) => v,
    }
}

fn high_water_status(
    base: Option<ReadingStatus>,
    incoming: Option<ReadingStatus>,
) -> Option<ReadingStatus> {
    high_water(base, incoming)
}
