use super::*;
use serde_json::json;

#[test]
fn test_parse_no_frontmatter() {
    let (fm, body) = FrontmatterParser::parse("Just a body\n").unwrap();
    assert!(fm.is_none());
    assert_eq!(body, "Just a body\n");
}

#[test]
fn test_parse_basic_frontmatter() {
    let content = "---\ntitle: The Trial\nkohl-uid: 550e8400-e29b-41d4-a716-446655440000\n---\n\nBody text\n";
    let (fm, body) = FrontmatterParser::parse(content).unwrap();
    let fm = fm.unwrap();
    assert_eq!(fm.get_str("title"), Some("The Trial"));
    assert_eq!(
        fm.get_str(UID_KEY),
        Some("550e8400-e29b-41d4-a716-446655440000")
    );
    assert_eq!(body, "Body text\n");
}

#[test]
fn test_parse_preserves_key_order() {
    let content = "---\nzebra: 1\nalpha: 2\nmiddle: 3\n---\n";
    let (fm, _) = FrontmatterParser::parse(content).unwrap();
    let fm = fm.unwrap();
    let keys: Vec<&str> = fm.keys().collect();
    assert_eq!(keys, vec!["zebra", "alpha", "middle"]);
}

#[test]
fn test_parse_unclosed_block_is_body() {
    let content = "---\ntitle: dangling\nno closing";
    let (fm, body) = FrontmatterParser::parse(content).unwrap();
    assert!(fm.is_none());
    assert_eq!(body, content);
}

#[test]
fn test_parse_corrupt_yaml_is_error() {
    let content = "---\ntitle: [unclosed\n---\n";
    let err = FrontmatterParser::parse(content).unwrap_err();
    assert_eq!(err.kind(), "YAML_PARSE_ERROR");
}

#[test]
fn test_parse_crlf() {
    let content = "---\r\ntitle: The Trial\r\n---\r\n\r\nBody\r\n";
    let (fm, body) = FrontmatterParser::parse(content).unwrap();
    assert_eq!(fm.unwrap().get_str("title"), Some("The Trial"));
    assert_eq!(body, "Body\r\n");
}

#[test]
fn test_parse_lists() {
    let content = "---\nkeywords:\n  - fiction\n  - law\n---\n";
    let (fm, _) = FrontmatterParser::parse(content).unwrap();
    assert_eq!(
        fm.unwrap().get("keywords"),
        Some(&json!(["fiction", "law"]))
    );
}

#[test]
fn test_compose_round_trip() {
    let mut fm = Frontmatter::new();
    fm.set("title", json!("The Trial"));
    fm.set("authors", json!(["[[Franz Kafka]]"]));
    fm.set("highlightCount", json!(2));
    fm.set("progress", json!("60%"));
    let composed = FrontmatterWriter::compose(&fm, "Body\n");

    let (parsed, body) = FrontmatterParser::parse(&composed).unwrap();
    let parsed = parsed.unwrap();
    assert_eq!(parsed.get_str("title"), Some("The Trial"));
    assert_eq!(parsed.get("authors"), Some(&json!(["[[Franz Kafka]]"])));
    assert_eq!(parsed.get("highlightCount"), Some(&json!(2)));
    assert_eq!(parsed.get_str("progress"), Some("60%"));
    assert_eq!(body, "Body\n");
}

#[test]
fn test_compose_is_byte_stable() {
    let mut fm = Frontmatter::new();
    fm.set("title", json!("A: B"));
    fm.set("keywords", json!(["x", "y"]));
    let once = FrontmatterWriter::compose(&fm, "Body\n");
    let doc = NoteDocument::parse(&once).unwrap();
    assert_eq!(doc.compose(), once);
}

#[test]
fn test_compose_quotes_ambiguous_scalars() {
    let mut fm = Frontmatter::new();
    fm.set("title", json!("2001"));
    fm.set("status", json!("no"));
    let composed = FrontmatterWriter::compose(&fm, "");
    assert!(composed.contains("title: \"2001\""));
    assert!(composed.contains("status: \"no\""));

    let (parsed, _) = FrontmatterParser::parse(&composed).unwrap();
    assert_eq!(parsed.unwrap().get_str("title"), Some("2001"));
}

#[test]
fn test_compose_empty_frontmatter_emits_no_block() {
    let fm = Frontmatter::new();
    assert_eq!(FrontmatterWriter::compose(&fm, "Body\n"), "Body\n");
}

#[test]
fn test_set_replaces_in_place() {
    let mut fm = Frontmatter::new();
    fm.set("a", json!(1));
    fm.set("b", json!(2));
    fm.set("a", json!(3));
    let keys: Vec<&str> = fm.keys().collect();
    assert_eq!(keys, vec!["a", "b"]);
    assert_eq!(fm.get("a"), Some(&json!(3)));
}

#[test]
fn test_remove() {
    let mut fm = Frontmatter::new();
    fm.set("a", json!(1));
    assert_eq!(fm.remove("a"), Some(json!(1)));
    assert_eq!(fm.remove("a"), None);
    assert!(fm.is_empty());
}

#[test]
fn test_body_with_dashes_not_taken_as_delimiter() {
    let content = "---\ntitle: t\n---\n\nBody\n---\nmore body\n";
    let (_, body) = FrontmatterParser::parse(content).unwrap();
    assert_eq!(body, "Body\n---\nmore body\n");
}
