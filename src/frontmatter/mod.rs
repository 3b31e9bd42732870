// YAML frontmatter parsing and ordered emission.
//
// Parsing goes through yaml-rust; emission is a hand-ordered writer because
// byte-stable key order is part of the merge contract and a map-backed
// emitter cannot guarantee it.

use serde_json::Value;
use yaml_rust::{Yaml, YamlLoader};

use crate::error::{CoreError, Result};

/// Reserved key: the note's UID (v4 UUID).
pub const UID_KEY: &str = "kohl-uid";
/// Reserved key: integrity hash, only present in snapshot files.
pub const SHA256_KEY: &str = "sha256";
/// Reserved key: ISO date of the last three-way merge.
pub const LAST_MERGED_KEY: &str = "last-merged";
/// Reserved key: set to `unresolved` when a merge produced conflicts.
pub const CONFLICTS_KEY: &str = "conflicts";

/// An insertion-ordered frontmatter block. Keys the system does not know
/// about are user-owned and pass through untouched, in order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Frontmatter {
    entries: Vec<(String, Value)>,
}

impl Frontmatter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(|v| v.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// Replace a key in place (keeping its position) or append it.
    pub fn set(&mut self, key: &str, value: Value) {
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| k == key) {
            entry.1 = value;
        } else {
            self.entries.push((key.to_string(), value));
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, Value)> for Frontmatter {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Frontmatter {
            entries: iter.into_iter().collect(),
        }
    }
}

/// A parsed note: ordered frontmatter plus verbatim body.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NoteDocument {
    pub frontmatter: Frontmatter,
    pub body: String,
}

impl NoteDocument {
    pub fn parse(content: &str) -> Result<Self> {
        let (frontmatter, body) = FrontmatterParser::parse(content)?;
        Ok(NoteDocument {
            frontmatter: frontmatter.unwrap_or_default(),
            body,
        })
    }

    pub fn compose(&self) -> String {
        FrontmatterWriter::compose(&self.frontmatter, &self.body)
    }
}

pub struct FrontmatterParser;

impl FrontmatterParser {
    /// Split a note into its frontmatter block and body.
    ///
    /// Content without a leading delimiter has no frontmatter. A block that
    /// opens but never closes is treated the same way. A block that closes
    /// but fails YAML parsing is an error: callers must not rewrite a note
    /// whose existing keys they could not read.
    pub fn parse(content: &str) -> Result<(Option<Frontmatter>, String)> {
        let after_open = if let Some(rest) = content.strip_prefix("---\n") {
            rest
        } else if let Some(rest) = content.strip_prefix("---\r\n") {
            rest
        } else {
            return Ok((None, content.to_string()));
        };

        let Some((yaml_text, body)) = split_at_closing_delimiter(after_open) else {
            return Ok((None, content.to_string()));
        };

        let docs = YamlLoader::load_from_str(yaml_text).map_err(|e| CoreError::YamlParse {
            message: e.to_string(),
        })?;

        match docs.first() {
            Some(Yaml::Hash(hash)) => {
                let mut fm = Frontmatter::new();
                for (k, v) in hash {
                    if let Yaml::String(key) = k {
                        fm.set(key, yaml_to_json(v));
                    }
                }
                Ok((Some(fm), body.to_string()))
            }
            Some(_) => Err(CoreError::YamlParse {
                message: "frontmatter is not a mapping".to_string(),
            }),
            None => Ok((Some(Frontmatter::new()), body.to_string())),
        }
    }
}

/// Find the closing `---` line; returns (yaml text, body after the delimiter).
fn split_at_closing_delimiter(after_open: &str) -> Option<(&str, &str)> {
    let mut offset = 0;
    for line in after_open.split_inclusive('\n') {
        if line.trim_end_matches(['\n', '\r']) == "---" {
            let yaml_text = &after_open[..offset];
            let mut body = &after_open[offset + line.len()..];
            // A single blank line after the block is formatting, not body.
            if let Some(rest) = body.strip_prefix("\r\n") {
                body = rest;
            } else if let Some(rest) = body.strip_prefix('\n') {
                body = rest;
            }
            return Some((yaml_text, body));
        }
        offset += line.len();
    }
    None
}

fn yaml_to_json(yaml: &Yaml) -> Value {
    match yaml {
        Yaml::String(s) => Value::String(s.clone()),
        Yaml::Integer(i) => Value::Number((*i).into()),
        Yaml::Real(r) => r
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(r.clone())),
        Yaml::Boolean(b) => Value::Bool(*b),
        Yaml::Array(arr) => Value::Array(arr.iter().map(yaml_to_json).collect()),
        Yaml::Hash(h) => {
            let mut map = serde_json::Map::new();
            for (k, v) in h {
                if let Yaml::String(key) = k {
                    map.insert(key.clone(), yaml_to_json(v));
                }
            }
            Value::Object(map)
        }
        _ => Value::Null,
    }
}

pub struct FrontmatterWriter;

impl FrontmatterWriter {
    /// Emit a note with its frontmatter block. Keys are written in the order
    /// the container holds them; an empty frontmatter emits no block at all.
    pub fn compose(frontmatter: &Frontmatter, body: &str) -> String {
        if frontmatter.is_empty() {
            return body.to_string();
        }

        let mut out = String::from("---\n");
        for (key, value) in frontmatter.iter() {
            out.push_str(key);
            out.push(':');
            write_value(&mut out, value, 0);
            out.push('\n');
        }
        out.push_str("---\n");
        if !body.is_empty() {
            out.push('\n');
            out.push_str(body);
        }
        out
    }
}

fn write_value(out: &mut String, value: &Value, indent: usize) {
    match value {
        Value::Null => out.push_str(" null"),
        Value::Bool(b) => {
            out.push(' ');
            out.push_str(if *b { "true" } else { "false" });
        }
        Value::Number(n) => {
            out.push(' ');
            out.push_str(&n.to_string());
        }
        Value::String(s) => {
            out.push(' ');
            out.push_str(&scalar(s));
        }
        Value::Array(items) => {
            if items.is_empty() {
                out.push_str(" []");
            } else {
                for item in items {
                    out.push('\n');
                    out.push_str(&"  ".repeat(indent + 1));
                    out.push('-');
                    write_value(out, item, indent + 1);
                }
            }
        }
        Value::Object(map) => {
            for (k, v) in map {
                out.push('\n');
                out.push_str(&"  ".repeat(indent + 1));
                out.push_str(k);
                out.push(':');
                write_value(out, v, indent + 1);
            }
        }
    }
}

/// Quote a scalar when bare emission would change its meaning. Wikilink
/// values start with `[`, which YAML reads as a flow sequence, so those are
/// always quoted.
fn scalar(s: &str) -> String {
    let needs_quote = s.is_empty()
        || s.starts_with([
            '[', ']', '{', '}', '*', '&', '!', '>', '|', '%', '@', '`', '\'', '"', '#', ',',
        ])
        || s.starts_with("- ")
        || s.starts_with(' ')
        || s.ends_with(' ')
        || s.contains(": ")
        || s.ends_with(':')
        || s.contains(" #")
        || s.contains('\n')
        || s.contains('\t')
        || looks_like_other_scalar(s);

    if needs_quote {
        format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        s.to_string()
    }
}

/// Bare strings that YAML would read back as a non-string scalar.
fn looks_like_other_scalar(s: &str) -> bool {
    matches!(
        s.to_ascii_lowercase().as_str(),
        "true" | "false" | "null" | "yes" | "no" | "on" | "off" | "~"
    ) || s.parse::<i64>().is_ok()
        || s.parse::<f64>().is_ok()
}

#[cfg(test)]
mod tests;
