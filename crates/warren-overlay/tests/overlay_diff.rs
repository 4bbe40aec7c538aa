//! End-to-end overlay scenarios: import, drift detection, patch export,
//! reset.

use std::fs;
use std::path::Path;

use warren_fs::InodeFs;
use warren_overlay::{changes, export_patch, initialize, reset, ChangeKind, OverlayConfig};
use warren_store::Database;

fn new_fs() -> InodeFs {
    InodeFs::new(Database::in_memory().unwrap())
}

fn stage_host_tree(dir: &Path) {
    fs::write(dir.join("a.txt"), "alpha\n").unwrap();
    fs::create_dir(dir.join("b")).unwrap();
    fs::write(dir.join("b/c.txt"), "charlie\n").unwrap();
}

#[tokio::test]
async fn test_import_recreates_tree() {
    let host = tempfile::tempdir().unwrap();
    stage_host_tree(host.path());

    let fs = new_fs();
    let config = OverlayConfig::new(host.path(), "/");
    let summary = initialize(&fs, &config).await.unwrap();

    assert_eq!(summary.files_imported, 2);
    assert_eq!(summary.directories_created, 1);
    assert_eq!(summary.bytes_imported, 14);
    assert!(summary.excluded_paths.is_empty());

    assert_eq!(fs.read_to_string("/a.txt").await.unwrap(), "alpha\n");
    assert_eq!(fs.read_to_string("/b/c.txt").await.unwrap(), "charlie\n");
}

#[tokio::test]
async fn test_import_under_mount_path() {
    let host = tempfile::tempdir().unwrap();
    stage_host_tree(host.path());

    let fs = new_fs();
    let config = OverlayConfig::new(host.path(), "/mnt/project");
    initialize(&fs, &config).await.unwrap();

    assert_eq!(
        fs.read_to_string("/mnt/project/a.txt").await.unwrap(),
        "alpha\n"
    );
    assert_eq!(fs.readdir("/mnt/project/b").await.unwrap(), vec!["c.txt"]);
}

#[tokio::test]
async fn test_import_skips_git_and_excludes() {
    let host = tempfile::tempdir().unwrap();
    stage_host_tree(host.path());
    fs::create_dir(host.path().join(".git")).unwrap();
    fs::write(host.path().join(".git/HEAD"), "ref: main").unwrap();
    fs::write(host.path().join("secret.env"), "KEY=1").unwrap();

    let fs = new_fs();
    let config = OverlayConfig::new(host.path(), "/")
        .with_excludes(vec!["/**/*.env".into(), "/*.env".into()]);
    let summary = initialize(&fs, &config).await.unwrap();

    assert!(!fs.exists("/.git").await.unwrap());
    assert!(!fs.exists("/secret.env").await.unwrap());
    assert_eq!(summary.excluded_paths, vec!["/secret.env".to_string()]);
    assert_eq!(summary.files_imported, 2);
}

#[cfg(unix)]
#[tokio::test]
async fn test_import_preserves_symlinks() {
    let host = tempfile::tempdir().unwrap();
    stage_host_tree(host.path());
    std::os::unix::fs::symlink("a.txt", host.path().join("link")).unwrap();

    let fs = new_fs();
    initialize(&fs, &OverlayConfig::new(host.path(), "/"))
        .await
        .unwrap();

    assert_eq!(fs.readlink("/link").await.unwrap(), "a.txt");
}

#[tokio::test]
async fn test_changes_classify_drift() {
    let host = tempfile::tempdir().unwrap();
    stage_host_tree(host.path());

    let fs = new_fs();
    let config = OverlayConfig::new(host.path(), "/");
    initialize(&fs, &config).await.unwrap();

    // No drift right after import.
    assert!(changes(&fs, host.path(), "/").await.unwrap().is_empty());

    fs.write_str("/a.txt", "ALPHA\n").await.unwrap();
    fs.write_str("/n.txt", "new\n").await.unwrap();
    fs.unlink("/b/c.txt").await.unwrap();

    let mut detected = changes(&fs, host.path(), "/").await.unwrap();
    detected.sort_by(|a, b| a.path.cmp(&b.path));
    assert_eq!(detected.len(), 3);

    assert_eq!(detected[0].path, "/a.txt");
    assert_eq!(detected[0].kind, ChangeKind::Modified);
    assert_eq!(detected[0].old.as_deref(), Some(b"alpha\n".as_slice()));
    assert_eq!(detected[0].new.as_deref(), Some(b"ALPHA\n".as_slice()));

    assert_eq!(detected[1].path, "/b/c.txt");
    assert_eq!(detected[1].kind, ChangeKind::Deleted);

    assert_eq!(detected[2].path, "/n.txt");
    assert_eq!(detected[2].kind, ChangeKind::Added);
}

#[tokio::test]
async fn test_changes_same_size_different_bytes() {
    let host = tempfile::tempdir().unwrap();
    fs::write(host.path().join("f.txt"), "aaaa").unwrap();

    let fs = new_fs();
    let config = OverlayConfig::new(host.path(), "/");
    initialize(&fs, &config).await.unwrap();

    fs.write_str("/f.txt", "aaab").await.unwrap();

    let detected = changes(&fs, host.path(), "/").await.unwrap();
    assert_eq!(detected.len(), 1);
    assert_eq!(detected[0].kind, ChangeKind::Modified);
}

#[tokio::test]
async fn test_patch_export_covers_all_changes() {
    let host = tempfile::tempdir().unwrap();
    stage_host_tree(host.path());

    let fs = new_fs();
    initialize(&fs, &OverlayConfig::new(host.path(), "/"))
        .await
        .unwrap();

    fs.write_str("/a.txt", "ALPHA\n").await.unwrap();
    fs.write_str("/n.txt", "new\n").await.unwrap();
    fs.unlink("/b/c.txt").await.unwrap();

    let detected = changes(&fs, host.path(), "/").await.unwrap();
    let patch = export_patch(&detected);

    assert!(patch.contains("diff --git a/a.txt b/a.txt"));
    assert!(patch.contains("-alpha"));
    assert!(patch.contains("+ALPHA"));
    assert!(patch.contains("diff --git a/n.txt b/n.txt"));
    assert!(patch.contains("--- /dev/null"));
    assert!(patch.contains("diff --git a/b/c.txt b/b/c.txt"));
    assert!(patch.contains("+++ /dev/null"));
}

#[tokio::test]
async fn test_reset_discards_drift() {
    let host = tempfile::tempdir().unwrap();
    stage_host_tree(host.path());

    let fs = new_fs();
    let config = OverlayConfig::new(host.path(), "/mnt");
    initialize(&fs, &config).await.unwrap();

    fs.write_str("/mnt/a.txt", "scribbled").await.unwrap();
    fs.write_str("/mnt/junk.txt", "junk").await.unwrap();

    let summary = reset(&fs, &config).await.unwrap();
    assert_eq!(summary.files_imported, 2);

    assert_eq!(fs.read_to_string("/mnt/a.txt").await.unwrap(), "alpha\n");
    assert!(!fs.exists("/mnt/junk.txt").await.unwrap());
    assert!(changes(&fs, host.path(), "/mnt").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_reset_clears_root_mount_children() {
    let host = tempfile::tempdir().unwrap();
    stage_host_tree(host.path());

    let fs = new_fs();
    let config = OverlayConfig::new(host.path(), "/");
    initialize(&fs, &config).await.unwrap();
    fs.write_str("/stray.txt", "x").await.unwrap();

    reset(&fs, &config).await.unwrap();
    assert!(!fs.exists("/stray.txt").await.unwrap());
    assert_eq!(fs.read_to_string("/a.txt").await.unwrap(), "alpha\n");
}

#[tokio::test]
async fn test_initialize_rejects_missing_base() {
    let fs = new_fs();
    let config = OverlayConfig::new("/definitely/not/here", "/");
    assert!(initialize(&fs, &config).await.is_err());
}
