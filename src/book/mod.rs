// Canonical book model: the cleanest internal representation of a book's
// bibliographic and progress data, plus the identity key derived from it.

pub mod display;
pub mod merge;
pub mod normalize;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::paths::slug::to_match_key;

/// Reading status, ranked so merges never regress progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadingStatus {
    Unstarted,
    Ongoing,
    Abandoned,
    Completed,
}

impl ReadingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadingStatus::Unstarted => "unstarted",
            ReadingStatus::Ongoing => "ongoing",
            ReadingStatus::Abandoned => "abandoned",
            ReadingStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unstarted" => Some(ReadingStatus::Unstarted),
            "ongoing" | "reading" => Some(ReadingStatus::Ongoing),
            "abandoned" => Some(ReadingStatus::Abandoned),
            "completed" | "complete" => Some(ReadingStatus::Completed),
            _ => None,
        }
    }
}

impl fmt::Display for ReadingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical per-book record. Whitespace trimmed, HTML stripped, list fields
/// deduped with placeholders removed, timestamps in epoch milliseconds,
/// progress an integer 0..=100.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedBook {
    pub title: String,
    pub authors: Vec<String>,
    pub description: Option<String>,
    pub keywords: Vec<String>,
    pub series: Option<String>,
    pub language: Option<String>,
    pub pages: Option<u32>,
    pub rating: Option<u8>,
    pub reading_status: Option<ReadingStatus>,
    pub progress_percent: Option<u8>,
    /// Consecutive reading days ending at the most recent session.
    pub reading_streak_days: Option<u32>,
    /// Epoch milliseconds.
    pub first_read: Option<i64>,
    pub last_read: Option<i64>,
    pub total_read_seconds: Option<u64>,
    pub average_time_per_page_seconds: Option<f64>,
    pub avg_session_duration_seconds: Option<u64>,
    pub highlight_count: Option<u32>,
    pub note_count: Option<u32>,
    pub session_count: Option<u32>,
    pub md5: Option<String>,
}

impl NormalizedBook {
    pub fn book_key(&self) -> BookKey {
        BookKey::from_parts(&self.authors, &self.title)
    }
}

/// Secondary identity: `<authors-match-key>::<title-match-key>`. Used when a
/// UID is unavailable, e.g. duplicate discovery for a fresh import.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookKey(String);

impl BookKey {
    pub fn from_parts(authors: &[String], title: &str) -> Self {
        // Authors that are really URLs carry no identity.
        let authors_part = if authors
            .iter()
            .any(|a| a.starts_with("http://") || a.starts_with("https://"))
        {
            String::new()
        } else {
            to_match_key(&authors.join(" "))
        };
        BookKey(format!("{}::{}", authors_part, to_match_key(title)))
    }

    pub fn from_raw(raw: &str) -> Self {
        BookKey(raw.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BookKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_rank() {
        assert!(ReadingStatus::Unstarted < ReadingStatus::Ongoing);
        assert!(ReadingStatus::Ongoing < ReadingStatus::Abandoned);
        assert!(ReadingStatus::Abandoned < ReadingStatus::Completed);
    }

    #[test]
    fn test_status_parse_aliases() {
        assert_eq!(ReadingStatus::parse("complete"), Some(ReadingStatus::Completed));
        assert_eq!(ReadingStatus::parse("Reading"), Some(ReadingStatus::Ongoing));
        assert_eq!(ReadingStatus::parse("nonsense"), None);
    }

    #[test]
    fn test_book_key_shape() {
        let key = BookKey::from_parts(&["Franz Kafka".to_string()], "The Trial");
        assert_eq!(key.as_str(), "franz kafka::the trial");
    }

    #[test]
    fn test_book_key_url_authors_are_empty() {
        let key = BookKey::from_parts(&["https://example.com/feed".to_string()], "The Trial");
        assert_eq!(key.as_str(), "::the trial");
    }

    #[test]
    fn test_book_key_stable_under_diacritics() {
        let a = BookKey::from_parts(&["Čapek".to_string()], "Válka s mloky");
        let b = BookKey::from_parts(&["Capek".to_string()], "Valka s mloky");
        assert_eq!(a, b);
    }
}
