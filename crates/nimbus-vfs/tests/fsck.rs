//! Fsck over a hierarchy damaged behind the VFS's back.

use std::sync::Arc;

use nimbus_store::{DocStore, MemoryDocStore, MemoryObjectStore, ObjectStore};
use nimbus_types::ids::doctypes;
use nimbus_types::{FileDoc, IndexDoc};
use nimbus_vfs::{CreateOptions, FsckKind, FsckLog, Instance, NamingScheme, Vfs, VfsConfig};

struct Fixture {
    vfs: Vfs,
    docs: Arc<MemoryDocStore>,
    objects: MemoryObjectStore,
}

async fn fixture() -> Fixture {
    let docs = Arc::new(MemoryDocStore::new());
    let objects = MemoryObjectStore::new();
    let config = VfsConfig {
        naming: NamingScheme::Flat,
        ..Default::default()
    };
    let vfs = Instance::builder("fsck")
        .config(config)
        .doc_store(docs.clone())
        .object_store(Arc::new(objects.clone()))
        .build()
        .vfs()
        .await
        .unwrap();

    vfs.mkdir_all("/a/b").await.unwrap();
    vfs.mkdir("/a/leaf").await.unwrap();
    vfs.write_file("/a/b/one.txt", b"one", CreateOptions::default()).await.unwrap();
    vfs.write_file("/a/two.txt", b"two", CreateOptions::default()).await.unwrap();
    Fixture { vfs, docs, objects }
}

fn kinds(logs: &[FsckLog]) -> Vec<FsckKind> {
    let mut kinds: Vec<FsckKind> = logs.iter().map(|l| l.kind).collect();
    kinds.sort();
    kinds
}

#[tokio::test]
async fn test_healthy_hierarchy_is_clean() {
    let f = fixture().await;
    let report = f.vfs.fsck(false).await.unwrap();
    assert!(report.is_clean(), "{:?}", report.logs);
}

#[tokio::test]
async fn test_bad_directory_path() {
    let f = fixture().await;
    let leaf = f.vfs.stat_dir("/a/leaf").await.unwrap();
    let mut raw = f.docs.get(doctypes::FILES, &leaf.id).await.unwrap();
    raw["path"] = serde_json::json!("/elsewhere/leaf");
    f.docs.update(doctypes::FILES, raw).await.unwrap();

    let report = f.vfs.fsck(false).await.unwrap();
    assert_eq!(kinds(&report.logs), [FsckKind::IndexBadFullpath]);
    assert_eq!(report.logs[0].id.as_deref(), Some(leaf.id.as_str()));
}

#[tokio::test]
async fn test_file_without_parent() {
    let f = fixture().await;
    let mut orphan = FileDoc::new("lost.txt", "no-such-dir", "text/plain").unwrap();
    orphan.id = "lost-file".into();
    let raw = serde_json::to_value(IndexDoc::File(orphan)).unwrap();
    f.docs.create(doctypes::FILES, raw).await.unwrap();

    let report = f.vfs.fsck(false).await.unwrap();
    assert_eq!(report.count(FsckKind::IndexFileWithoutParent), 1);
    // Its content was never written either.
    assert_eq!(report.count(FsckKind::MissingInBackend), 1);
}

#[tokio::test]
async fn test_object_store_drift() {
    let f = fixture().await;
    let one = f.vfs.stat_file("/a/b/one.txt").await.unwrap();
    f.objects
        .delete(&format!("{}/{}", one.id, one.internal_vfs_id))
        .await
        .unwrap();
    f.objects.put("ghost/0123456789abcdef", b"boo");
    let two = f.vfs.stat_file("/a/two.txt").await.unwrap();
    f.objects.put(&format!("{}/{}", two.id, two.internal_vfs_id), b"TWO!");

    let report = f.vfs.fsck(false).await.unwrap();
    assert_eq!(
        kinds(&report.logs),
        [FsckKind::MissingInIndex, FsckKind::MissingInBackend, FsckKind::ContentMismatch]
    );
    let mismatch = report
        .logs
        .iter()
        .find(|l| l.kind == FsckKind::ContentMismatch)
        .unwrap();
    assert_eq!(mismatch.expected.as_deref(), Some("3"));
    assert_eq!(mismatch.actual.as_deref(), Some("4"));
}

#[tokio::test]
async fn test_fail_fast_stops_at_first_finding() {
    let f = fixture().await;
    f.objects.put("ghost/0123456789abcdef", b"boo");
    f.objects.put("ghost2/0123456789abcdef", b"boo");

    let report = f.vfs.fsck(true).await.unwrap();
    assert_eq!(report.logs.len(), 1);

    let full = f.vfs.fsck(false).await.unwrap();
    assert_eq!(full.count(FsckKind::MissingInIndex), 2);
}

#[tokio::test]
async fn test_report_serializes_as_json_lines() {
    let f = fixture().await;
    f.objects.put("ghost/0123456789abcdef", b"boo");
    let report = f.vfs.fsck(false).await.unwrap();
    let lines = report.to_json_lines().unwrap();
    let first: serde_json::Value = serde_json::from_str(lines.lines().next().unwrap()).unwrap();
    assert_eq!(first["type"], "missing_in_index");
    assert_eq!(first["object"], "ghost/0123456789abcdef");
}
