// Pure string canonicalization: filesystem-safe stems and book-identity
// match keys. Everything here is deterministic and side-effect free.

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use super::VaultPath;

static ILLEGAL_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r#"[<>:"/\\|?*\x00-\x1f]"#).unwrap());
static RUN_OF_SEPARATORS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ _]{2,}").unwrap());
static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

// Windows reserved device names; matching is case-insensitive on the stem.
const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

#[derive(Debug, Clone)]
pub struct FileSafeOpts {
    /// Maximum stem length in characters, enforced after cleaning.
    pub max_length: Option<usize>,
    /// Fallback stem when cleaning leaves nothing.
    pub fallback: String,
}

impl Default for FileSafeOpts {
    fn default() -> Self {
        Self {
            max_length: None,
            fallback: "Untitled".to_string(),
        }
    }
}

/// Canonicalize a user string into a filesystem-safe file stem.
pub fn to_file_safe(input: &str, opts: &FileSafeOpts) -> String {
    let cleaned = ILLEGAL_CHARS.replace_all(input, " ");
    let cleaned = RUN_OF_SEPARATORS.replace_all(&cleaned, " ");
    let mut stem = cleaned.trim().trim_matches('.').trim().to_string();

    if let Some(max) = opts.max_length {
        if stem.chars().count() > max {
            stem = stem.chars().take(max).collect::<String>().trim_end().to_string();
        }
    }

    if stem.is_empty() {
        return opts.fallback.clone();
    }

    if RESERVED_NAMES
        .iter()
        .any(|r| r.eq_ignore_ascii_case(&stem))
    {
        stem.push('_');
    }

    stem
}

/// The book-identity slug: NFKD, strip combining marks, non-alphanumerics to
/// single spaces, lowercase, trimmed.
pub fn to_match_key(input: &str) -> String {
    let stripped: String = input
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    WHITESPACE_RUN
        .replace_all(stripped.trim(), " ")
        .to_lowercase()
}

#[derive(Debug, Clone)]
pub struct UniqueStemOpts {
    pub folder: VaultPath,
    pub extension: String,
    /// Target ceiling for the full vault path length.
    pub target_max_path_len: usize,
    pub max_attempts: usize,
}

impl UniqueStemOpts {
    pub fn new(folder: VaultPath, extension: &str) -> Self {
        Self {
            folder,
            extension: extension.to_string(),
            target_max_path_len: 255,
            max_attempts: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniqueStem {
    pub stem: String,
    pub was_truncated: bool,
}

// Room reserved for " (nn)" style collision suffixes.
const SUFFIX_RESERVE: usize = 6;

/// Find a stem that does not collide with an existing file, appending `(n)`
/// suffixes as needed. The length budget is computed once so every attempt
/// reuses the same base stem; only the suffix varies.
pub fn generate_unique_stem<F>(
    desired_stem: &str,
    mut exists: F,
    opts: &UniqueStemOpts,
) -> UniqueStem
where
    F: FnMut(&VaultPath) -> bool,
{
    let fixed_len = opts.folder.as_str().len()
        + 1 // separator
        + 1 // dot
        + opts.extension.len()
        + SUFFIX_RESERVE;
    let budget = opts.target_max_path_len.saturating_sub(fixed_len).max(16);

    let mut was_truncated = false;
    let base = if desired_stem.chars().count() > budget {
        was_truncated = true;
        truncate_with_hash(desired_stem, budget)
    } else {
        desired_stem.to_string()
    };

    for attempt in 0..opts.max_attempts {
        let candidate = if attempt == 0 {
            base.clone()
        } else {
            format!("{} ({})", base, attempt)
        };
        let path = opts
            .folder
            .join(&format!("{}.{}", candidate, opts.extension));
        if !exists(&path) {
            return UniqueStem {
                stem: candidate,
                was_truncated,
            };
        }
    }

    // Attempts exhausted: fall back to a content-hash suffix, which keeps the
    // stem unique without growing past the budget.
    UniqueStem {
        stem: truncate_with_hash(&format!("{} {}", base, opts.max_attempts), budget),
        was_truncated: true,
    }
}

fn truncate_with_hash(input: &str, budget: usize) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let tag: String = digest.iter().take(4).map(|b| format!("{:02x}", b)).collect();
    let keep = budget.saturating_sub(tag.len() + 1).max(4);
    let head: String = input.chars().take(keep).collect();
    format!("{}-{}", head.trim_end(), tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_safe_strips_illegal_chars() {
        let opts = FileSafeOpts::default();
        assert_eq!(to_file_safe("a/b\\c:d", &opts), "a b c d");
        assert_eq!(to_file_safe("What? \"Why\"*", &opts), "What Why");
    }

    #[test]
    fn test_file_safe_collapses_runs_and_trims_dots() {
        let opts = FileSafeOpts::default();
        assert_eq!(to_file_safe("a   b___c", &opts), "a b c");
        assert_eq!(to_file_safe("..name..", &opts), "name");
    }

    #[test]
    fn test_file_safe_avoids_reserved_names() {
        let opts = FileSafeOpts::default();
        assert_eq!(to_file_safe("CON", &opts), "CON_");
        assert_eq!(to_file_safe("com1", &opts), "com1_");
        assert_eq!(to_file_safe("Console", &opts), "Console");
    }

    #[test]
    fn test_file_safe_empty_falls_back() {
        let opts = FileSafeOpts::default();
        assert_eq!(to_file_safe("???", &opts), "Untitled");
    }

    #[test]
    fn test_file_safe_max_length() {
        let opts = FileSafeOpts {
            max_length: Some(5),
            ..Default::default()
        };
        assert_eq!(to_file_safe("abcdefgh", &opts), "abcde");
    }

    #[test]
    fn test_match_key_strips_diacritics() {
        assert_eq!(to_match_key("Čapek, Karel"), "capek karel");
        assert_eq!(to_match_key("Émile Zola"), "emile zola");
    }

    #[test]
    fn test_match_key_collapses_punctuation() {
        assert_eq!(to_match_key("  The Trial: A Novel!  "), "the trial a novel");
        assert_eq!(to_match_key("a--b__c"), "a b c");
    }

    #[test]
    fn test_match_key_invariant_under_delimiters() {
        assert_eq!(to_match_key("Kafka; Franz"), to_match_key("Kafka, Franz"));
    }

    #[test]
    fn test_unique_stem_no_collision() {
        let opts = UniqueStemOpts::new(VaultPath::new("Books"), "md");
        let result = generate_unique_stem("The Trial", |_| false, &opts);
        assert_eq!(result.stem, "The Trial");
        assert!(!result.was_truncated);
    }

    #[test]
    fn test_unique_stem_appends_counter() {
        let opts = UniqueStemOpts::new(VaultPath::new("Books"), "md");
        let taken = [
            VaultPath::new("Books/The Trial.md"),
            VaultPath::new("Books/The Trial (1).md"),
        ];
        let result = generate_unique_stem("The Trial", |p| taken.contains(p), &opts);
        assert_eq!(result.stem, "The Trial (2)");
    }

    #[test]
    fn test_unique_stem_budget_holds_under_collisions() {
        let mut opts = UniqueStemOpts::new(VaultPath::new("Books"), "md");
        opts.target_max_path_len = 60;
        let long = "A Very Long Title That Keeps Going And Going And Going Forever";
        let result = generate_unique_stem(long, |p| p.as_str().ends_with("Trial.md"), &opts);
        assert!(result.was_truncated);
        let full = opts.folder.join(&format!("{}.md", result.stem));
        assert!(full.as_str().len() <= opts.target_max_path_len);
    }

    #[test]
    fn test_unique_stem_same_base_across_attempts() {
        let opts = UniqueStemOpts::new(VaultPath::new("Books"), "md");
        let mut seen = Vec::new();
        let result = generate_unique_stem(
            "Base",
            |p| {
                seen.push(p.clone());
                seen.len() < 4
            },
            &opts,
        );
        assert_eq!(result.stem, "Base (3)");
        for p in &seen {
            assert!(p.file_stem().starts_with("Base"));
        }
    }
}
