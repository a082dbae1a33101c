//! The façade over the persistent stores: SQLite index and local object tree.

use nimbus_vfs::instance::{CONFIG_FILE, OBJECTS_DIR};
use nimbus_vfs::{CreateOptions, Instance, VfsError};

#[tokio::test]
async fn test_hierarchy_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let vfs = Instance::open_local("dave", dir.path()).await.unwrap().vfs().await.unwrap();
        vfs.mkdir_all("/music/albums").await.unwrap();
        vfs.write_file("/music/albums/track.txt", b"la la la", CreateOptions::default())
            .await
            .unwrap();
        vfs.rename("/music", "/sound").await.unwrap();
    }

    let vfs = Instance::open_local("dave", dir.path()).await.unwrap().vfs().await.unwrap();
    let data = vfs.open("/sound/albums/track.txt").await.unwrap().read_all().await.unwrap();
    assert_eq!(data, b"la la la");
    assert!(matches!(vfs.stat("/music").await, Err(VfsError::NotFound(_))));
    assert!(dir.path().join(OBJECTS_DIR).is_dir());
    assert!(vfs.fsck(false).await.unwrap().is_clean());
}

#[tokio::test]
async fn test_versions_and_trash_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join(CONFIG_FILE),
        "(naming: flat_with_dirs, versioning: (max_number_to_keep: 5, min_delay_secs: 0))",
    )
    .unwrap();
    let vfs = Instance::open_local("erin", dir.path()).await.unwrap().vfs().await.unwrap();

    let earlier = chrono::Utc::now() - chrono::Duration::minutes(30);
    vfs.write_file(
        "/notes.txt",
        b"draft",
        CreateOptions { updated_at: Some(earlier), ..Default::default() },
    )
    .await
    .unwrap();
    vfs.write_file("/notes.txt", b"final", CreateOptions::overwrite()).await.unwrap();
    let versions = vfs.versions("/notes.txt").await.unwrap();
    assert_eq!(versions.len(), 1);

    vfs.mkdir("/old").await.unwrap();
    vfs.rename("/notes.txt", "/old/notes.txt").await.unwrap();
    vfs.trash("/old").await.unwrap();
    assert!(vfs.stat_file("/.cozy_trash/old/notes.txt").await.unwrap().trashed);
    assert!(vfs.fsck(false).await.unwrap().is_clean());

    vfs.destroy_trash().await.unwrap();
    assert_eq!(vfs.disk_usage().await.unwrap(), 0);
    assert!(vfs.fsck(false).await.unwrap().is_clean());
}
