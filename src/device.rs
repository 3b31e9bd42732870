// Device-side types and collaborator traits. The declarative-metadata parser
// and the statistics-database query layer live outside the core; these are
// the shapes they hand us.

use serde::{Deserialize, Serialize};

use crate::book::NormalizedBook;
use crate::error::Result;

/// Bibliographic properties from the device's per-book metadata file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DocProps {
    pub title: String,
    pub authors: String,
    pub description: Option<String>,
    pub keywords: Option<String>,
    pub series: Option<String>,
    pub language: Option<String>,
}

/// One highlight or note from the device.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Annotation {
    pub page: u32,
    pub pos0: Option<String>,
    pub pos1: Option<String>,
    pub chapter: Option<String>,
    pub datetime: Option<String>,
    pub text: String,
    pub note: Option<String>,
    pub color: Option<String>,
    pub drawer: Option<String>,
}

/// The parsed per-book metadata record.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DeviceMetadata {
    pub doc_props: DocProps,
    pub annotations: Vec<Annotation>,
    pub pages: Option<u32>,
    pub md5: Option<String>,
    pub identifiers: Option<String>,
    /// Declarative reading progress, 0.0..=1.0.
    pub percent_finished: Option<f64>,
    /// Declarative status string (`complete`, `reading`, `abandoned`).
    pub status: Option<String>,
    /// UID a previous export stamped into the device record, when present.
    pub uid_hint: Option<String>,
}

/// A row from the device-wide statistics database.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BookStatistics {
    pub id: i64,
    pub md5: Option<String>,
    pub title: String,
    pub authors: String,
    pub total_read_seconds: u64,
    pub total_read_pages: u32,
    pub pages: Option<u32>,
    pub highlights: Option<u32>,
    pub notes: Option<u32>,
    /// Epoch milliseconds.
    pub first_open: Option<i64>,
    pub last_open: Option<i64>,
}

/// One reading session, ordered by start time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReadingSession {
    /// Epoch milliseconds.
    pub start_time: i64,
    pub duration_seconds: u64,
}

/// Statistics lookup result: the row plus its ordered sessions, and whether
/// the MD5 that found it occurs exactly once in the database. A non-unique
/// MD5 is not a strong identity and callers fall back to title/authors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatisticsLookup {
    pub row: BookStatistics,
    pub sessions: Vec<ReadingSession>,
    pub md5_unique: bool,
}

/// Query layer over the device statistics database.
pub trait StatisticsProvider: Send + Sync {
    fn by_md5(&self, md5: &str) -> Result<Option<StatisticsLookup>>;
    fn by_title_authors(&self, title: &str, authors: &str) -> Result<Option<StatisticsLookup>>;
}

/// Renders annotations into the note body through the user's template, and
/// recovers them from a body it previously rendered (the renderer owns its
/// own format; the core never interprets bodies itself).
pub trait TemplateRenderer: Send + Sync {
    fn render_body(&self, book: &NormalizedBook, annotations: &[Annotation]) -> Result<String>;

    /// Best-effort inverse of `render_body`, used only to classify existing
    /// notes against incoming annotations. An empty list is a valid answer.
    fn extract_annotations(&self, body: &str) -> Vec<Annotation>;
}

/// A provider for vaults without a statistics database.
pub struct NoStatistics;

impl StatisticsProvider for NoStatistics {
    fn by_md5(&self, _md5: &str) -> Result<Option<StatisticsLookup>> {
        Ok(None)
    }

    fn by_title_authors(&self, _title: &str, _authors: &str) -> Result<Option<StatisticsLookup>> {
        Ok(None)
    }
}
