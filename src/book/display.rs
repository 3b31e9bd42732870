// Stage three of the normalizer: project a NormalizedBook into display
// frontmatter, and read one back out of existing frontmatter. Only the
// frontmatter projection is guaranteed to round-trip.

use chrono::{NaiveDate, TimeZone, Utc};
use serde_json::{json, Value};

use super::{NormalizedBook, ReadingStatus};
use crate::frontmatter::Frontmatter;
use crate::settings::{DurationFormat, FrontmatterSettings};

// Emission order is fixed; disabled fields are dropped, never reordered.
pub const FIELD_ORDER: &[&str] = &[
    "title",
    "authors",
    "description",
    "keywords",
    "series",
    "language",
    "pages",
    "rating",
    "readingStatus",
    "progress",
    "readingStreak",
    "firstRead",
    "lastRead",
    "readTime",
    "averageTimePerPage",
    "avgSessionDuration",
    "highlightCount",
    "noteCount",
    "sessionCount",
];

const UNKNOWN_AUTHOR: &str = "Unknown Author";

/// Project the canonical record into user-facing frontmatter.
pub fn to_frontmatter(book: &NormalizedBook, policy: &FrontmatterSettings) -> Frontmatter {
    let completed = book.reading_status == Some(ReadingStatus::Completed);
    let ongoing = book.reading_status == Some(ReadingStatus::Ongoing);

    let mut fm = Frontmatter::new();
    for &field in FIELD_ORDER {
        if policy.disabled_fields.iter().any(|d| d == field) {
            continue;
        }
        let value = match field {
            "title" => non_empty(&book.title).map(|t| json!(t)),
            "authors" => {
                let mut authors = book.authors.clone();
                if authors.is_empty() && policy.use_unknown_author {
                    authors.push(UNKNOWN_AUTHOR.to_string());
                }
                if authors.is_empty() {
                    None
                } else {
                    Some(json!(authors
                        .iter()
                        .map(|a| format!("[[{}]]", a))
                        .collect::<Vec<_>>()))
                }
            }
            "description" => book.description.as_deref().map(|d| json!(d)),
            "keywords" => {
                if book.keywords.is_empty() {
                    None
                } else if policy.keywords_as_tags {
                    Some(json!(book
                        .keywords
                        .iter()
                        .map(|k| format!("#{}", k.replace(' ', "-")))
                        .collect::<Vec<_>>()))
                } else {
                    Some(json!(book.keywords))
                }
            }
            "series" => book.series.as_deref().map(|s| json!(s)),
            "language" => book.language.as_deref().map(|l| json!(l)),
            "pages" => book.pages.map(|p| json!(p)),
            "rating" => book.rating.map(|r| json!(r)),
            "readingStatus" => book.reading_status.map(|s| json!(s.as_str())),
            // Progress on a finished book is noise.
            "progress" if completed => None,
            "progress" => book.progress_percent.map(|p| json!(format!("{}%", p))),
            "readingStreak" if !ongoing => None,
            "readingStreak" => book.reading_streak_days.map(|d| json!(d)),
            "firstRead" => book.first_read.map(|ms| json!(format_date(ms))),
            "lastRead" => book.last_read.map(|ms| json!(format_date(ms))),
            "readTime" => book
                .total_read_seconds
                .map(|s| json!(format_duration(s, policy.duration_format))),
            "averageTimePerPage" => book
                .average_time_per_page_seconds
                .map(|s| json!(format_duration(s.round() as u64, policy.duration_format))),
            "avgSessionDuration" if !ongoing => None,
            "avgSessionDuration" => book
                .avg_session_duration_seconds
                .map(|s| json!(format_duration(s, policy.duration_format))),
            "highlightCount" => book.highlight_count.map(|c| json!(c)),
            "noteCount" => book.note_count.map(|c| json!(c)),
            // Kept internally for the high-water merge, never displayed.
            "sessionCount" => None,
            _ => None,
        };
        if let Some(value) = value {
            fm.set(field, value);
        }
    }
    fm
}

/// Recover the canonical record from existing note frontmatter. Unknown keys
/// are ignored here; the merge engine handles their passthrough.
pub fn from_frontmatter(fm: &Frontmatter) -> NormalizedBook {
    NormalizedBook {
        title: fm.get_str("title").unwrap_or_default().to_string(),
        authors: string_list(fm.get("authors"))
            .into_iter()
            .map(|a| strip_wikilink(&a))
            .filter(|a| a != UNKNOWN_AUTHOR)
            .collect(),
        description: fm.get_str("description").map(|s| s.to_string()),
        keywords: string_list(fm.get("keywords"))
            .into_iter()
            .map(|k| match k.strip_prefix('#') {
                // Tag form round-trips the space-to-hyphen emission.
                Some(tag) => tag.replace('-', " "),
                None => k,
            })
            .collect(),
        series: fm.get_str("series").map(|s| s.to_string()),
        language: fm.get_str("language").map(|s| s.to_string()),
        pages: number_u32(fm.get("pages")),
        rating: number_u32(fm.get("rating")).map(|r| r.min(u8::MAX as u32) as u8),
        reading_status: fm.get_str("readingStatus").and_then(ReadingStatus::parse),
        progress_percent: fm
            .get_str("progress")
            .and_then(|p| p.trim_end_matches('%').trim().parse::<u8>().ok())
            .map(|p| p.min(100)),
        reading_streak_days: number_u32(fm.get("readingStreak")),
        first_read: fm.get_str("firstRead").and_then(parse_date),
        last_read: fm.get_str("lastRead").and_then(parse_date),
        total_read_seconds: fm.get("readTime").and_then(parse_duration_value),
        average_time_per_page_seconds: fm
            .get("averageTimePerPage")
            .and_then(parse_duration_value)
            .map(|s| s as f64),
        avg_session_duration_seconds: fm.get("avgSessionDuration").and_then(parse_duration_value),
        highlight_count: number_u32(fm.get("highlightCount")),
        note_count: number_u32(fm.get("noteCount")),
        session_count: number_u32(fm.get("sessionCount")),
        md5: None,
    }
}

fn non_empty(s: &str) -> Option<&str> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(|s| s.to_string()))
            .collect(),
        Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
        _ => Vec::new(),
    }
}

fn number_u32(value: Option<&Value>) -> Option<u32> {
    value?.as_u64().map(|n| n.min(u32::MAX as u64) as u32)
}

pub fn strip_wikilink(s: &str) -> String {
    let trimmed = s.trim();
    trimmed
        .strip_prefix("[[")
        .and_then(|rest| rest.strip_suffix("]]"))
        // Aliased links keep the target, not the alias.
        .map(|inner| inner.split('|').next().unwrap_or(inner).trim().to_string())
        .unwrap_or_else(|| trimmed.to_string())
}

pub fn format_date(epoch_ms: i64) -> String {
    match Utc.timestamp_millis_opt(epoch_ms).single() {
        Some(dt) => dt.format("%Y-%m-%d").to_string(),
        None => String::new(),
    }
}

fn parse_date(s: &str) -> Option<i64> {
    let date = NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()?;
    Some(
        Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?)
            .timestamp_millis(),
    )
}

pub fn format_duration(total_seconds: u64, format: DurationFormat) -> String {
    match format {
        DurationFormat::Seconds => total_seconds.to_string(),
        DurationFormat::HoursMinutesSeconds => {
            let hours = total_seconds / 3600;
            let minutes = (total_seconds % 3600) / 60;
            let seconds = total_seconds % 60;
            format!("{}h {}m {}s", hours, minutes, seconds)
        }
    }
}

fn parse_duration_value(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => parse_duration(s),
        _ => None,
    }
}

fn parse_duration(s: &str) -> Option<u64> {
    let trimmed = s.trim();
    if let Ok(plain) = trimmed.parse::<u64>() {
        return Some(plain);
    }
    let mut total = 0u64;
    let mut matched = false;
    for part in trimmed.split_whitespace() {
        let (digits, unit) = part.split_at(part.len().saturating_sub(1));
        let n: u64 = digits.parse().ok()?;
        total += match unit {
            "h" => n * 3600,
            "m" => n * 60,
            "s" => n,
            _ => return None,
        };
        matched = true;
    }
    matched.then_some(total)
}
