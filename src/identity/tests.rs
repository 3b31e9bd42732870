use std::sync::Arc;

use tempfile::TempDir;

use super::*;
use crate::paths::SystemPath;

fn store() -> (TempDir, Arc<FilesystemService>, IdentityStore) {
    let dir = TempDir::new().unwrap();
    let vault = dir.path().join("vault");
    std::fs::create_dir_all(&vault).unwrap();
    let fs = Arc::new(
        FilesystemService::new(
            SystemPath::new(&vault),
            SystemPath::new(&dir.path().join("data")),
        )
        .unwrap(),
    );
    let identity = IdentityStore::new(Arc::clone(&fs));
    (dir, fs, identity)
}

#[test]
fn test_uid_parse_rejects_non_v4() {
    assert!(Uid::parse("550e8400-e29b-41d4-a716-446655440000").is_some());
    // v7 layout: version nibble is 7.
    assert!(Uid::parse("01890a5d-ac96-774b-bcce-b302099a8057").is_none());
    assert!(Uid::parse("not-a-uuid").is_none());
    assert!(Uid::parse("").is_none());
}

#[test]
fn test_uid_parse_canonicalizes_case() {
    let uid = Uid::parse("550E8400-E29B-41D4-A716-446655440000").unwrap();
    assert_eq!(uid.as_str(), "550e8400-e29b-41d4-a716-446655440000");
}

#[test]
fn test_try_get_uid_reads_frontmatter() {
    let (_dir, fs, identity) = store();
    let path = VaultPath::new("note.md");
    fs.write_text_atomic(
        &path,
        "---\nkohl-uid: 550e8400-e29b-41d4-a716-446655440000\ntitle: t\n---\n\nBody\n",
    )
    .unwrap();

    let uid = identity.try_get_uid(&path).unwrap().unwrap();
    assert_eq!(uid.as_str(), "550e8400-e29b-41d4-a716-446655440000");
}

#[test]
fn test_try_get_uid_absent_cases() {
    let (_dir, fs, identity) = store();
    assert!(identity
        .try_get_uid(&VaultPath::new("missing.md"))
        .unwrap()
        .is_none());

    let no_fm = VaultPath::new("plain.md");
    fs.write_text_atomic(&no_fm, "Body only\n").unwrap();
    assert!(identity.try_get_uid(&no_fm).unwrap().is_none());

    let bad_uid = VaultPath::new("bad.md");
    fs.write_text_atomic(&bad_uid, "---\nkohl-uid: nonsense\n---\n")
        .unwrap();
    assert!(identity.try_get_uid(&bad_uid).unwrap().is_none());
}

#[test]
fn test_ensure_uid_mints_and_preserves_content() {
    let (_dir, fs, identity) = store();
    let path = VaultPath::new("note.md");
    fs.write_text_atomic(&path, "---\ntitle: The Trial\nrating: 4\n---\n\nUser body text\n")
        .unwrap();

    let uid = identity.ensure_uid(&path).unwrap();

    let content = fs.read_text(&path).unwrap();
    let doc = NoteDocument::parse(&content).unwrap();
    assert_eq!(doc.frontmatter.get_str(UID_KEY), Some(uid.as_str()));
    assert_eq!(doc.frontmatter.get_str("title"), Some("The Trial"));
    // Existing keys keep their order; the minted UID lands after them.
    let keys: Vec<&str> = doc.frontmatter.keys().collect();
    assert_eq!(keys, vec!["title", "rating", UID_KEY]);
    assert_eq!(doc.body, "User body text\n");

    // Idempotent: a second call returns the same UID without rewriting.
    assert_eq!(identity.ensure_uid(&path).unwrap(), uid);
}

#[test]
fn test_ensure_uid_on_file_without_frontmatter() {
    let (_dir, fs, identity) = store();
    let path = VaultPath::new("plain.md");
    fs.write_text_atomic(&path, "Body only\n").unwrap();

    let uid = identity.ensure_uid(&path).unwrap();
    let content = fs.read_text(&path).unwrap();
    assert!(content.starts_with("---\n"));
    let doc = NoteDocument::parse(&content).unwrap();
    assert_eq!(doc.frontmatter.get_str(UID_KEY), Some(uid.as_str()));
    assert_eq!(doc.body, "Body only\n");
}

#[test]
fn test_ensure_uid_missing_file_is_not_found() {
    let (_dir, _fs, identity) = store();
    let err = identity.ensure_uid(&VaultPath::new("absent.md")).unwrap_err();
    assert_eq!(err.kind(), "NOT_FOUND");
}

#[test]
fn test_ensure_uid_corrupt_frontmatter_is_parse_error() {
    let (_dir, fs, identity) = store();
    let path = VaultPath::new("corrupt.md");
    fs.write_text_atomic(&path, "---\ntitle: [unclosed\n---\n")
        .unwrap();
    let err = identity.ensure_uid(&path).unwrap_err();
    assert_eq!(err.kind(), "YAML_PARSE_ERROR");
}

#[test]
fn test_assign_new_id_replaces() {
    let (_dir, fs, identity) = store();
    let path = VaultPath::new("note.md");
    fs.write_text_atomic(&path, "Body\n").unwrap();

    let first = identity.ensure_uid(&path).unwrap();
    let second = identity.assign_new_id(&path).unwrap();
    assert_ne!(first, second);
    assert_eq!(identity.try_get_uid(&path).unwrap(), Some(second));
}

#[test]
fn test_find_file_by_uid() {
    let (_dir, fs, identity) = store();
    let a = VaultPath::new("Books/a.md");
    let b = VaultPath::new("Books/b.md");
    fs.write_text_atomic(&a, "A\n").unwrap();
    fs.write_text_atomic(&b, "B\n").unwrap();
    let uid_a = identity.ensure_uid(&a).unwrap();
    fs.invalidate_scans();

    assert_eq!(
        identity
            .find_file_by_uid(&VaultPath::new("Books"), &uid_a)
            .unwrap(),
        Some(a)
    );
    assert_eq!(
        identity
            .find_file_by_uid(&VaultPath::new("Books"), &Uid::generate())
            .unwrap(),
        None
    );
}

#[test]
fn test_resolve_collisions_keeps_earliest() {
    let (_dir, fs, identity) = store();
    let uid = "550e8400-e29b-41d4-a716-446655440000";
    let older = VaultPath::new("Books/older.md");
    let newer = VaultPath::new("Books/newer.md");
    fs.write_text_atomic(&older, &format!("---\nkohl-uid: {}\n---\n\nOld\n", uid))
        .unwrap();
    std::thread::sleep(std::time::Duration::from_millis(20));
    fs.write_text_atomic(&newer, &format!("---\nkohl-uid: {}\n---\n\nNew\n", uid))
        .unwrap();
    fs.invalidate_scans();

    let report = identity.resolve_collisions(&VaultPath::new("Books")).unwrap();
    assert_eq!(report.files_reassigned, 1);
    assert_eq!(report.collisions.len(), 1);
    assert_eq!(report.collisions[0].kept, older);

    // The kept file still has the original UID; the newer file was reassigned.
    assert_eq!(identity.try_get_uid(&older).unwrap().unwrap().as_str(), uid);
    let new_uid = identity.try_get_uid(&newer).unwrap().unwrap();
    assert_ne!(new_uid.as_str(), uid);
}

#[test]
fn test_resolve_collisions_injective_afterwards() {
    let (_dir, fs, identity) = store();
    let uid = "550e8400-e29b-41d4-a716-446655440000";
    for name in ["a.md", "b.md", "c.md"] {
        fs.write_text_atomic(
            &VaultPath::new(&format!("Books/{}", name)),
            &format!("---\nkohl-uid: {}\n---\n", uid),
        )
        .unwrap();
    }
    fs.invalidate_scans();

    let report = identity.resolve_collisions(&VaultPath::new("Books")).unwrap();
    assert_eq!(report.files_reassigned, 2);

    let mut uids = Vec::new();
    for name in ["a.md", "b.md", "c.md"] {
        let path = VaultPath::new(&format!("Books/{}", name));
        identity.invalidate(&path);
        uids.push(identity.try_get_uid(&path).unwrap().unwrap());
    }
    uids.sort();
    uids.dedup();
    assert_eq!(uids.len(), 3);
}

#[test]
fn test_resolve_collisions_no_collision_is_noop() {
    let (_dir, fs, identity) = store();
    let path = VaultPath::new("Books/solo.md");
    fs.write_text_atomic(&path, "Body\n").unwrap();
    let uid = identity.ensure_uid(&path).unwrap();
    fs.invalidate_scans();

    let report = identity.resolve_collisions(&VaultPath::new("Books")).unwrap();
    assert!(report.collisions.is_empty());
    assert_eq!(identity.try_get_uid(&path).unwrap(), Some(uid));
}
