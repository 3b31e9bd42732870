// Settings schema. Loaded from plugin data JSON; every field has a default
// so partial documents from older versions deserialize cleanly.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::paths::VaultPath;

/// Boolean fields accept the legacy coercion set:
/// `{true,false,1,0,"true","false","yes","no","y","n","on","off",""}`
/// case-insensitively, empty string reading as false.
pub fn coerce_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    let value = Value::deserialize(deserializer)?;
    coerce_bool_value(&value).ok_or_else(|| {
        serde::de::Error::custom(format!("cannot read {} as a boolean", value))
    })
}

pub fn coerce_bool_value(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "y" | "on" => Some(true),
            "false" | "0" | "no" | "n" | "off" | "" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum DurationFormat {
    #[default]
    #[serde(rename = "hms")]
    HoursMinutesSeconds,
    #[serde(rename = "seconds")]
    Seconds,
}

/// How the merge engine treats an empty incoming body against a manually
/// expanded note (see the merge engine for the guard itself).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum EmptyIncomingGuard {
    /// Force a conflict when the current body is byte-longer than the base.
    #[default]
    StrictLength,
    /// Force a conflict when the current body has any non-whitespace content
    /// beyond the base.
    NonWhitespace,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FrontmatterSettings {
    pub disabled_fields: Vec<String>,
    pub custom_fields: Vec<String>,
    #[serde(deserialize_with = "coerce_bool")]
    pub use_unknown_author: bool,
    #[serde(deserialize_with = "coerce_bool")]
    pub keywords_as_tags: bool,
    pub duration_format: DurationFormat,
}

impl Default for FrontmatterSettings {
    fn default() -> Self {
        Self {
            disabled_fields: Vec::new(),
            custom_fields: Vec::new(),
            use_unknown_author: true,
            keywords_as_tags: false,
            duration_format: DurationFormat::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TemplateSettings {
    /// Rendering template source handed to the template renderer.
    pub source: Option<String>,
}

impl Default for TemplateSettings {
    fn default() -> Self {
        Self { source: None }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Root folder for generated notes, vault-relative.
    pub highlights_folder: VaultPath,
    /// Path prefixes skipped during device scan, in order.
    pub excluded_folders: Vec<String>,
    /// Lowercased book file extensions that gate scanning.
    pub allowed_file_types: Vec<String>,
    /// 0..=3, mapped to error/warn/info/debug.
    pub log_level: u8,
    pub logs_folder: Option<VaultPath>,
    #[serde(deserialize_with = "coerce_bool")]
    pub log_to_file: bool,
    /// When false, duplicate discovery skips the filename heuristics.
    #[serde(deserialize_with = "coerce_bool")]
    pub enable_full_duplicate_check: bool,
    pub file_name_template: String,
    #[serde(deserialize_with = "coerce_bool")]
    pub use_custom_file_name_template: bool,
    /// Single-candidate conflict-free imports merge without prompting.
    #[serde(deserialize_with = "coerce_bool")]
    pub auto_merge_on_addition: bool,
    pub max_highlight_gap: u32,
    pub max_time_gap_minutes: u32,
    #[serde(deserialize_with = "coerce_bool")]
    pub merge_overlapping_highlights: bool,
    pub comment_style: CommentStyle,
    pub backup_retention_days: u32,
    pub max_backups_per_note: u32,
    pub scan_timeout_seconds: u64,
    pub template: TemplateSettings,
    pub frontmatter: FrontmatterSettings,
    pub empty_incoming_guard: EmptyIncomingGuard,
    pub stats_db_path_override: Option<String>,
    pub koreader_scan_path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CommentStyle {
    #[default]
    Html,
    Md,
    None,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            highlights_folder: VaultPath::new("KOReader Highlights"),
            excluded_folders: Vec::new(),
            allowed_file_types: vec!["epub".into(), "pdf".into(), "mobi".into(), "cbz".into()],
            log_level: 1,
            logs_folder: None,
            log_to_file: false,
            enable_full_duplicate_check: true,
            file_name_template: "{{authors}} - {{title}}".to_string(),
            use_custom_file_name_template: false,
            auto_merge_on_addition: true,
            max_highlight_gap: 5,
            max_time_gap_minutes: 15,
            merge_overlapping_highlights: true,
            comment_style: CommentStyle::default(),
            backup_retention_days: 30,
            max_backups_per_note: 5,
            scan_timeout_seconds: 120,
            template: TemplateSettings::default(),
            frontmatter: FrontmatterSettings::default(),
            empty_incoming_guard: EmptyIncomingGuard::default(),
            stats_db_path_override: None,
            koreader_scan_path: None,
        }
    }
}

impl Settings {
    /// Load from a raw JSON object, applying the legacy-key rewrite.
    /// `koreaderMountPoint` becomes `koreaderScanPath`; any other unknown key
    /// is dropped.
    pub fn from_json(mut value: Value) -> Self {
        if let Value::Object(ref mut map) = value {
            if let Some(mount) = map.remove("koreaderMountPoint") {
                map.entry("koreaderScanPath").or_insert(mount);
            }
        }
        serde_json::from_value(value).unwrap_or_default()
    }

    pub fn tracing_level(&self) -> tracing::Level {
        match self.log_level {
            0 => tracing::Level::ERROR,
            1 => tracing::Level::WARN,
            2 => tracing::Level::INFO,
            _ => tracing::Level::DEBUG,
        }
    }
}
