// Default template renderer. Each annotation is emitted as a blockquote
// preceded by a metadata comment; the comment is what lets a later import
// recover the annotation list from a body this renderer produced.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::book::NormalizedBook;
use crate::device::{Annotation, TemplateRenderer};
use crate::error::Result;
use crate::settings::CommentStyle;

const HTML_COMMENT_OPEN: &str = "<!-- kohl: ";
const HTML_COMMENT_CLOSE: &str = " -->";
const MD_COMMENT_OPEN: &str = "%% kohl: ";
const MD_COMMENT_CLOSE: &str = " %%";

/// The machine-readable half of one rendered annotation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct AnnotationMeta {
    page: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pos0: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pos1: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    datetime: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    chapter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    drawer: Option<String>,
}

impl AnnotationMeta {
    fn of(a: &Annotation) -> Self {
        Self {
            page: a.page,
            pos0: a.pos0.clone(),
            pos1: a.pos1.clone(),
            datetime: a.datetime.clone(),
            chapter: a.chapter.clone(),
            color: a.color.clone(),
            drawer: a.drawer.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DefaultRenderer {
    comment_style: CommentStyle,
    merge_overlapping: bool,
}

impl DefaultRenderer {
    pub fn new(comment_style: CommentStyle, merge_overlapping: bool) -> Self {
        Self {
            comment_style,
            merge_overlapping,
        }
    }

    fn comment_for(&self, annotation: &Annotation) -> Option<String> {
        let meta = AnnotationMeta::of(annotation);
        let json = serde_json::to_string(&meta).ok()?;
        match self.comment_style {
            CommentStyle::Html => Some(format!("{}{}{}", HTML_COMMENT_OPEN, json, HTML_COMMENT_CLOSE)),
            CommentStyle::Md => Some(format!("{}{}{}", MD_COMMENT_OPEN, json, MD_COMMENT_CLOSE)),
            CommentStyle::None => None,
        }
    }
}

impl Default for DefaultRenderer {
    fn default() -> Self {
        Self::new(CommentStyle::Html, true)
    }
}

impl TemplateRenderer for DefaultRenderer {
    fn render_body(&self, book: &NormalizedBook, annotations: &[Annotation]) -> Result<String> {
        let mut ordered: Vec<&Annotation> = annotations.iter().collect();
        ordered.sort_by(|a, b| {
            (a.page, a.pos0.as_deref().unwrap_or(""))
                .cmp(&(b.page, b.pos0.as_deref().unwrap_or("")))
        });
        if self.merge_overlapping {
            ordered.dedup_by(|a, b| a.page == b.page && a.pos0 == b.pos0 && a.text == b.text);
        }
        trace!(book = %book.title, count = ordered.len(), "rendering annotations");

        let mut out = String::from("## Highlights\n");
        let mut current_chapter: Option<&str> = None;
        for annotation in ordered {
            out.push('\n');
            if let Some(chapter) = annotation.chapter.as_deref() {
                if current_chapter != Some(chapter) {
                    out.push_str(&format!("### {}\n\n", chapter));
                    current_chapter = Some(chapter);
                }
            }
            if let Some(comment) = self.comment_for(annotation) {
                out.push_str(&comment);
                out.push('\n');
            }
            for line in annotation.text.lines() {
                out.push_str("> ");
                out.push_str(line);
                out.push('\n');
            }
            if let Some(note) = annotation.note.as_deref() {
                if !note.trim().is_empty() {
                    out.push('\n');
                    out.push_str(note.trim());
                    out.push('\n');
                }
            }
        }
        Ok(out)
    }

    /// Recover annotations from the metadata comments. Bodies rendered with
    /// `commentStyle: none`, or bodies this renderer never produced, yield
    /// an empty list.
    fn extract_annotations(&self, body: &str) -> Vec<Annotation> {
        let mut annotations = Vec::new();
        let mut lines = body.lines().peekable();
        while let Some(line) = lines.next() {
            let Some(json) = strip_comment(line.trim()) else {
                continue;
            };
            let Ok(meta) = serde_json::from_str::<AnnotationMeta>(json) else {
                continue;
            };

            let mut text_lines = Vec::new();
            while let Some(next) = lines.peek() {
                if let Some(rest) = next.strip_prefix("> ") {
                    text_lines.push(rest.to_string());
                    lines.next();
                } else if *next == ">" {
                    text_lines.push(String::new());
                    lines.next();
                } else {
                    break;
                }
            }

            // An optional free paragraph directly after the quote is the note.
            let mut note_lines = Vec::new();
            if lines.peek().is_some_and(|l| l.trim().is_empty()) {
                let mut look = lines.clone();
                look.next();
                while let Some(next) = look.peek() {
                    let trimmed = next.trim();
                    if trimmed.is_empty()
                        || trimmed.starts_with('>')
                        || trimmed.starts_with('#')
                        || strip_comment(trimmed).is_some()
                    {
                        break;
                    }
                    note_lines.push(trimmed.to_string());
                    look.next();
                }
                if !note_lines.is_empty() {
                    lines = look;
                }
            }

            annotations.push(Annotation {
                page: meta.page,
                pos0: meta.pos0,
                pos1: meta.pos1,
                chapter: meta.chapter,
                datetime: meta.datetime,
                text: text_lines.join("\n"),
                note: if note_lines.is_empty() {
                    None
                } else {
                    Some(note_lines.join("\n"))
                },
                color: meta.color,
                drawer: meta.drawer,
            });
        }
        annotations
    }
}

fn strip_comment(line: &str) -> Option<&str> {
    if let Some(rest) = line.strip_prefix(HTML_COMMENT_OPEN) {
        return rest.strip_suffix(HTML_COMMENT_CLOSE);
    }
    if let Some(rest) = line.strip_prefix(MD_COMMENT_OPEN) {
        return rest.strip_suffix(MD_COMMENT_CLOSE);
    }
    None
}
