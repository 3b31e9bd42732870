// Stage one of the normalizer: reduce device metadata plus optional
// statistics to a canonical NormalizedBook.

use once_cell::sync::Lazy;
use regex::Regex;

use super::{NormalizedBook, ReadingStatus};
use crate::device::{DeviceMetadata, ReadingSession, StatisticsLookup};

static LIST_DELIMITERS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[,;&\n\r]+").unwrap());
static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").unwrap());
static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

// Tokens that mean "no value" in device exports.
const PLACEHOLDERS: &[&str] = &["unknown", "n/a", "none"];

const MS_PER_DAY: i64 = 86_400_000;

/// Split an author/keyword field and finalize it: trim, drop empties and
/// placeholders, dedupe case-sensitively preserving the first spelling.
pub fn split_list(input: &str) -> Vec<String> {
    finalize_list(LIST_DELIMITERS.split(input).map(|s| s.to_string()))
}

pub fn finalize_list<I: IntoIterator<Item = String>>(items: I) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    for item in items {
        let trimmed = item.trim();
        if trimmed.is_empty() {
            continue;
        }
        if PLACEHOLDERS.iter().any(|p| trimmed.eq_ignore_ascii_case(p)) {
            continue;
        }
        if !seen.iter().any(|s| s == trimmed) {
            seen.push(trimmed.to_string());
        }
    }
    seen
}

/// Strip HTML tags and decode the entities device exports actually contain.
pub fn strip_html(input: &str) -> String {
    let without_tags = HTML_TAG.replace_all(input, " ");
    without_tags
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&nbsp;", " ")
}

/// Title cleanup: strip HTML, strip wrapping quotes and brackets, collapse
/// internal whitespace.
pub fn clean_title(input: &str) -> String {
    let stripped = strip_html(input);
    let collapsed = WHITESPACE_RUN.replace_all(stripped.trim(), " ");
    collapsed
        .trim_matches(['"', '\'', '\u{201c}', '\u{201d}', '[', ']', '(', ')'])
        .trim()
        .to_string()
}

/// Reduce device metadata plus optional statistics to the canonical record.
///
/// Progress waterfall: the statistics database wins over the declarative
/// record, except an explicit complete status upgrades the book to
/// `completed` at 100%.
pub fn normalize(metadata: &DeviceMetadata, stats: Option<&StatisticsLookup>) -> NormalizedBook {
    let title = clean_title(&metadata.doc_props.title);
    let authors = split_list(&metadata.doc_props.authors);
    let keywords = metadata
        .doc_props
        .keywords
        .as_deref()
        .map(split_list)
        .unwrap_or_default();
    let description = metadata
        .doc_props
        .description
        .as_deref()
        .map(|d| WHITESPACE_RUN.replace_all(strip_html(d).trim(), " ").to_string())
        .filter(|d| !d.is_empty());

    let pages = metadata.pages.or_else(|| stats.and_then(|s| s.row.pages));

    let stats_progress = stats.and_then(|s| {
        let pages = s.row.pages.or(metadata.pages)?;
        if pages == 0 {
            return None;
        }
        let pct = (s.row.total_read_pages as f64 / pages as f64 * 100.0).round();
        Some(pct.clamp(0.0, 100.0) as u8)
    });
    let declared_progress = metadata
        .percent_finished
        .map(|f| (f * 100.0).round().clamp(0.0, 100.0) as u8);
    let mut progress_percent = stats_progress.or(declared_progress);

    let declared_status = metadata.status.as_deref().and_then(ReadingStatus::parse);
    let mut reading_status = declared_status.or(match progress_percent {
        Some(0) | None => Some(ReadingStatus::Unstarted),
        Some(_) => Some(ReadingStatus::Ongoing),
    });

    // The explicit complete flag on the device outranks derived progress.
    if declared_status == Some(ReadingStatus::Completed) {
        reading_status = Some(ReadingStatus::Completed);
        progress_percent = Some(100);
    }

    let sessions = stats.map(|s| s.sessions.as_slice()).unwrap_or(&[]);
    let total_read_seconds = stats.map(|s| s.row.total_read_seconds);
    let session_count = stats.map(|_| sessions.len() as u32);
    let avg_session_duration_seconds = if sessions.is_empty() {
        None
    } else {
        let total: u64 = sessions.iter().map(|s| s.duration_seconds).sum();
        Some(total / sessions.len() as u64)
    };

    let first_session = sessions.first().map(|s| s.start_time);
    let last_session = sessions
        .last()
        .map(|s| s.start_time + (s.duration_seconds as i64) * 1000);
    let first_read = min_opt(stats.and_then(|s| s.row.first_open), first_session);
    let last_read = max_opt(stats.and_then(|s| s.row.last_open), last_session);

    let average_time_per_page_seconds = stats.and_then(|s| {
        if s.row.total_read_pages == 0 {
            None
        } else {
            Some(s.row.total_read_seconds as f64 / s.row.total_read_pages as f64)
        }
    });

    NormalizedBook {
        title,
        authors,
        description,
        keywords,
        series: clean_opt(metadata.doc_props.series.as_deref()),
        language: clean_opt(metadata.doc_props.language.as_deref()),
        pages,
        rating: None,
        reading_status,
        progress_percent,
        reading_streak_days: reading_streak(sessions),
        first_read,
        last_read,
        total_read_seconds,
        average_time_per_page_seconds,
        avg_session_duration_seconds,
        highlight_count: Some(metadata.annotations.len() as u32),
        note_count: Some(
            metadata
                .annotations
                .iter()
                .filter(|a| a.note.as_deref().is_some_and(|n| !n.trim().is_empty()))
                .count() as u32,
        ),
        session_count,
        md5: metadata
            .md5
            .clone()
            .or_else(|| stats.and_then(|s| s.row.md5.clone())),
    }
}

fn clean_opt(value: Option<&str>) -> Option<String> {
    let trimmed = value?.trim();
    if trimmed.is_empty() || PLACEHOLDERS.iter().any(|p| trimmed.eq_ignore_ascii_case(p)) {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn min_opt(a: Option<i64>, b: Option<i64>) -> Option<i64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (v, None) | (None, v) => v,
    }
}

fn max_opt(a: Option<i64>, b: Option<i64>) -> Option<i64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (v, None) | (None, v) => v,
    }
}

/// Consecutive reading days ending at the most recent session.
fn reading_streak(sessions: &[ReadingSession]) -> Option<u32> {
    if sessions.is_empty() {
        return None;
    }
    let mut days: Vec<i64> = sessions.iter().map(|s| s.start_time / MS_PER_DAY).collect();
    days.sort_unstable();
    days.dedup();

    let mut streak = 1u32;
    for pair in days.windows(2).rev() {
        if pair[1] - pair[0] == 1 {
            streak += 1;
        } else {
            break;
        }
    }
    Some(streak)
}
