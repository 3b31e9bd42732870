// End-to-end import scenarios, driven through the composition root exactly
// the way an embedding shell would.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tempfile::TempDir;

use kohl::frontmatter::{NoteDocument, CONFLICTS_KEY, LAST_MERGED_KEY, UID_KEY};
use kohl::index::BookRow;
use kohl::render::DefaultRenderer;
use kohl::snapshot::{canonicalize, sha256_hex};
use kohl::{
    Annotation, BookKey, CancellationToken, CoreServices, DeviceMetadata, DocProps, SourceDescriptor,
    SystemPath, Uid, VaultPath,
};

struct Harness {
    _dir: TempDir,
    services: CoreServices,
    cancel: CancellationToken,
}

async fn harness() -> Result<Harness> {
    let dir = TempDir::new()?;
    let vault = dir.path().join("vault");
    std::fs::create_dir_all(&vault)?;
    let cancel = CancellationToken::new();
    let (services, outcome) = CoreServices::bootstrap(
        SystemPath::new(&vault),
        SystemPath::new(&dir.path().join("plugin-data")),
        &cancel,
    )
    .await?;
    assert!(outcome.failure.is_none());

    let mut settings = services.settings();
    settings.highlights_folder = VaultPath::new("Books");
    services.update_settings(settings).await?;

    Ok(Harness {
        _dir: dir,
        services,
        cancel,
    })
}

fn renderer() -> Arc<DefaultRenderer> {
    Arc::new(DefaultRenderer::default())
}

fn annotation(page: u32, text: &str) -> Annotation {
    Annotation {
        page,
        pos0: Some(format!("p{}s", page)),
        pos1: Some(format!("p{}e", page)),
        datetime: Some(format!("2024-03-{:02} 10:00:00", (page % 27) + 1)),
        text: text.to_string(),
        ..Default::default()
    }
}

fn trial_descriptor(mtime: i64, annotations: Vec<Annotation>, percent: f64) -> SourceDescriptor {
    SourceDescriptor {
        source_path: "/device/the-trial.sdr/metadata.epub.lua".to_string(),
        mtime,
        size: 4096 + annotations.len() as u64,
        metadata: DeviceMetadata {
            doc_props: DocProps {
                title: "The Trial".to_string(),
                authors: "Franz Kafka".to_string(),
                ..Default::default()
            },
            annotations,
            percent_finished: Some(percent),
            ..Default::default()
        },
        statistics: None,
    }
}

fn read_note(harness: &Harness, path: &VaultPath) -> NoteDocument {
    let content = harness.services.fs().read_text(path).unwrap();
    NoteDocument::parse(&content).unwrap()
}

#[tokio::test]
async fn test_create_from_empty_vault() -> Result<()> {
    let harness = harness().await?;
    let source = trial_descriptor(
        1_700_000_000_000,
        vec![annotation(3, "first highlight"), annotation(9, "second highlight")],
        0.25,
    );

    let outcome = harness
        .services
        .import(renderer(), &harness.cancel, vec![source])
        .await?;
    assert_eq!(outcome.created, 1);
    assert_eq!(outcome.failed, 0);

    let path = VaultPath::new("Books/Franz Kafka - The Trial.md");
    let doc = read_note(&harness, &path);
    assert_eq!(doc.frontmatter.get_str("title"), Some("The Trial"));
    assert_eq!(
        doc.frontmatter.get("authors"),
        Some(&serde_json::json!(["[[Franz Kafka]]"]))
    );
    assert_eq!(
        doc.frontmatter.get("highlightCount"),
        Some(&serde_json::json!(2))
    );
    assert_eq!(doc.frontmatter.get_str("progress"), Some("25%"));

    // The snapshot is content-addressed: its hash line matches the body.
    let uid = Uid::parse(doc.frontmatter.get_str(UID_KEY).unwrap()).unwrap();
    let snapshot_path = harness
        .services
        .fs()
        .plugin_data_path(&format!("snapshots/{}.md", uid))
        .to_path_buf();
    let snapshot = std::fs::read_to_string(&snapshot_path)?;
    let expected_hash = sha256_hex(&canonicalize(&doc.body));
    assert!(snapshot.starts_with(&format!("---\nsha256: {}\n---\n\n", expected_hash)));

    // One book row, one instance pointing at the vault path.
    let key = BookKey::from_parts(&["Franz Kafka".to_string()], "The Trial");
    assert_eq!(
        harness
            .services
            .index()
            .find_paths_by_key(&harness.cancel, &key)
            .await?,
        vec![path.clone()]
    );
    assert_eq!(
        harness
            .services
            .index()
            .find_key_by_path(&harness.cancel, &path)
            .await?,
        Some(key)
    );
    Ok(())
}

#[tokio::test]
async fn test_replace_without_user_edits() -> Result<()> {
    let harness = harness().await?;
    let first = vec![annotation(1, "one"), annotation(2, "two")];
    harness
        .services
        .import(renderer(), &harness.cancel, vec![trial_descriptor(1_000, first.clone(), 0.25)])
        .await?;

    let path = VaultPath::new("Books/Franz Kafka - The Trial.md");
    let uid_before = read_note(&harness, &path)
        .frontmatter
        .get_str(UID_KEY)
        .unwrap()
        .to_string();

    let mut five = first;
    five.extend([
        annotation(3, "three"),
        annotation(4, "four"),
        annotation(5, "five"),
    ]);
    let outcome = harness
        .services
        .import(renderer(), &harness.cancel, vec![trial_descriptor(2_000, five, 0.60)])
        .await?;
    assert_eq!(outcome.replaced, 1, "no user edits: plain replace");
    assert_eq!(outcome.merged, 0);

    let doc = read_note(&harness, &path);
    assert_eq!(
        doc.frontmatter.get("highlightCount"),
        Some(&serde_json::json!(5))
    );
    assert_eq!(doc.frontmatter.get_str("progress"), Some("60%"));
    assert_eq!(doc.frontmatter.get_str(UID_KEY), Some(uid_before.as_str()));

    // Snapshot rewritten to the new body.
    let uid = Uid::parse(&uid_before).unwrap();
    assert_eq!(harness.services.snapshots().read(&uid)?, doc.body);
    Ok(())
}

#[tokio::test]
async fn test_merge_preserves_user_edits_with_snapshot() -> Result<()> {
    let harness = harness().await?;
    let first = vec![annotation(1, "one")];
    harness
        .services
        .import(renderer(), &harness.cancel, vec![trial_descriptor(1_000, first.clone(), 0.2)])
        .await?;

    // The user adds a paragraph after the annotations.
    let path = VaultPath::new("Books/Franz Kafka - The Trial.md");
    let content = harness.services.fs().read_text(&path)?;
    harness
        .services
        .fs()
        .write_text_atomic(&path, &format!("{}\nWhat a strange opening chapter.\n", content))?;
    harness.services.fs().invalidate_scans();

    let mut second = first;
    second.push(annotation(7, "seven"));
    let outcome = harness
        .services
        .import(renderer(), &harness.cancel, vec![trial_descriptor(2_000, second, 0.3)])
        .await?;
    assert_eq!(outcome.merged, 1);
    assert!(outcome.conflict_paths.is_empty());

    let doc = read_note(&harness, &path);
    assert!(doc.body.contains("seven"));
    assert!(doc.body.contains("What a strange opening chapter."));
    assert!(!doc.body.contains("Unresolved conflict"));
    assert!(doc.frontmatter.get_str(LAST_MERGED_KEY).is_some());
    assert!(doc.frontmatter.get(CONFLICTS_KEY).is_none());
    Ok(())
}

#[tokio::test]
async fn test_merge_with_missing_snapshot_conflicts() -> Result<()> {
    let harness = harness().await?;
    let anns = vec![annotation(1, "one")];
    harness
        .services
        .import(renderer(), &harness.cancel, vec![trial_descriptor(1_000, anns.clone(), 0.2)])
        .await?;

    let path = VaultPath::new("Books/Franz Kafka - The Trial.md");
    let doc = read_note(&harness, &path);
    let uid = Uid::parse(doc.frontmatter.get_str(UID_KEY).unwrap()).unwrap();

    // User edit plus a lost snapshot: no trustworthy baseline remains.
    harness
        .services
        .fs()
        .write_text_atomic(&path, &format!("{}\nMy marginalia.\n", doc.compose()))?;
    harness.services.fs().invalidate_scans();
    harness.services.snapshots().delete(&uid)?;

    let outcome = harness
        .services
        .import(renderer(), &harness.cancel, vec![trial_descriptor(2_000, anns, 0.2)])
        .await?;
    assert_eq!(outcome.merged, 1);
    assert_eq!(outcome.conflict_paths, vec![path.clone()]);

    let merged = read_note(&harness, &path);
    assert_eq!(merged.frontmatter.get_str(CONFLICTS_KEY), Some("unresolved"));
    assert!(merged.body.contains("Unresolved conflict"));
    assert!(merged.body.contains("My marginalia."));
    Ok(())
}

#[tokio::test]
async fn test_uid_collision_resolution() -> Result<()> {
    let harness = harness().await?;
    let uid = "550e8400-e29b-41d4-a716-446655440000";
    let older = VaultPath::new("Books/older.md");
    let newer = VaultPath::new("Books/newer.md");
    harness
        .services
        .fs()
        .write_text_atomic(&older, &format!("---\nkohl-uid: {}\n---\n\nOld\n", uid))?;
    std::thread::sleep(std::time::Duration::from_millis(20));
    harness
        .services
        .fs()
        .write_text_atomic(&newer, &format!("---\nkohl-uid: {}\n---\n\nNew\n", uid))?;
    harness.services.fs().invalidate_scans();

    let report = harness
        .services
        .identity()
        .resolve_collisions(&VaultPath::new("Books"))?;
    assert_eq!(report.files_reassigned, 1);
    assert_eq!(report.collisions[0].kept, older);

    let kept = read_note(&harness, &older);
    assert_eq!(kept.frontmatter.get_str(UID_KEY), Some(uid));
    let reassigned = read_note(&harness, &newer);
    let new_uid = Uid::parse(reassigned.frontmatter.get_str(UID_KEY).unwrap()).unwrap();
    assert_ne!(new_uid.as_str(), uid);

    // Snapshots for the reassigned UID are never fabricated.
    assert!(harness.services.snapshots().read(&new_uid).is_err());
    Ok(())
}

#[tokio::test]
async fn test_folder_rename_tracking() -> Result<()> {
    let harness = harness().await?;
    let key = BookKey::from_parts(&["Franz Kafka".to_string()], "The Trial");
    harness
        .services
        .index()
        .upsert_book(
            &harness.cancel,
            &BookRow {
                key: key.clone(),
                id: None,
                title: "The Trial".to_string(),
                authors: "Franz Kafka".to_string(),
            },
            Some(&VaultPath::new("Books/Kafka/The Trial.md")),
        )
        .await?;

    let renamed = harness
        .services
        .folder_renamed(
            &harness.cancel,
            &VaultPath::new("Books/Kafka"),
            &VaultPath::new("Books/Franz Kafka"),
        )
        .await?;
    assert_eq!(renamed, 1);
    assert_eq!(
        harness
            .services
            .index()
            .find_paths_by_key(&harness.cancel, &key)
            .await?,
        vec![VaultPath::new("Books/Franz Kafka/The Trial.md")]
    );
    Ok(())
}

#[tokio::test]
async fn test_second_import_skips_unchanged_source() -> Result<()> {
    let harness = harness().await?;
    let descriptor = trial_descriptor(1_000, vec![annotation(1, "one")], 0.2);
    harness
        .services
        .import(renderer(), &harness.cancel, vec![descriptor.clone()])
        .await?;

    let outcome = harness
        .services
        .import(renderer(), &harness.cancel, vec![descriptor])
        .await?;
    assert_eq!(outcome.skipped, 1);
    assert_eq!(outcome.created + outcome.merged + outcome.replaced, 0);
    Ok(())
}

#[tokio::test]
async fn test_settings_survive_restart() -> Result<()> {
    let dir = TempDir::new()?;
    let vault = dir.path().join("vault");
    std::fs::create_dir_all(&vault)?;
    let data_dir = dir.path().join("plugin-data");
    let cancel = CancellationToken::new();

    {
        let (services, _) = CoreServices::bootstrap(
            SystemPath::new(&vault),
            SystemPath::new(&data_dir),
            &cancel,
        )
        .await?;
        let mut settings = services.settings();
        settings.highlights_folder = VaultPath::new("Reading/Highlights");
        settings.log_level = 3;
        services.update_settings(settings).await?;
    }

    let (services, outcome) = CoreServices::bootstrap(
        SystemPath::new(&vault),
        SystemPath::new(&data_dir),
        &cancel,
    )
    .await?;
    // Migrations applied on the first bootstrap stay applied.
    assert!(outcome.newly_applied.is_empty());
    assert_eq!(
        services.settings().highlights_folder,
        VaultPath::new("Reading/Highlights")
    );
    assert_eq!(services.settings().log_level, 3);

    assert!(Path::new(&data_dir).join("data.json").exists());
    Ok(())
}
