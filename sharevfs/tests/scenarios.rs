use std::fs;
use std::path::Path;

use futures_util::StreamExt;
use sharevfs::{
    Depth, NodeStore, PermKind, RequestContext, ResolveOptions, ShareConfig, VfsError, Who,
    walk_node,
};
use tempfile::TempDir;

fn share(dir: &Path, pub_extra: &str) -> NodeStore {
    let json = format!(
        r#"{{ "vfs": {{ "children": [
            {{ "name": "pub", "source": {:?}, "can_read": true {pub_extra} }}
        ] }} }}"#,
        dir.to_string_lossy()
    );
    NodeStore::new(ShareConfig::from_json(&json).unwrap())
}

fn srv_pub() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("secret.txt"), "shh").unwrap();
    fs::write(dir.path().join("IMG_001.jpg"), "jpeg").unwrap();
    fs::write(dir.path().join("notes.md"), "# notes").unwrap();
    dir
}

async fn listing(store: &NodeStore, path: &str, depth: Depth) -> Vec<String> {
    let node = store.resolve(path, ResolveOptions::default()).await.unwrap();
    walk_node(node, RequestContext::anonymous(), depth, "")
        .map(|n| n.path)
        .collect()
        .await
}

#[tokio::test]
async fn disk_entry_inherits_mount_permissions() {
    let dir = srv_pub();
    let store = share(dir.path(), "");

    let node = store
        .resolve("/pub/secret.txt", ResolveOptions::default())
        .await
        .unwrap();
    assert_eq!(node.perms.can_read, Some(Who::Anyone));
    assert_eq!(node.source.as_deref(), Some(dir.path().join("secret.txt").as_path()));
    assert!(node.is_temporary);
    assert!(!node.is_dir);
}

#[tokio::test]
async fn mask_locks_file_and_hides_it_from_listings() {
    let dir = srv_pub();
    let store = share(dir.path(), r#", "masks": { "secret.txt": { "can_read": false } }"#);

    let node = store
        .resolve("/pub/secret.txt", ResolveOptions::default())
        .await
        .unwrap();
    assert_eq!(node.perms.can_read, Some(Who::NoOne));
    let anon = RequestContext::anonymous();
    assert!(!node.can(PermKind::Read, &anon.identity));
    assert!(!node.can(PermKind::See, &anon.identity));

    let entries = listing(&store, "/pub", Depth::Limited(0)).await;
    assert!(!entries.contains(&"secret.txt".to_string()));
    assert!(entries.contains(&"notes.md".to_string()));
}

#[tokio::test]
async fn renamed_entry_is_only_reachable_by_display_name() {
    let dir = srv_pub();
    let store = share(dir.path(), r#", "rename": { "IMG_001.jpg": "sunset.jpg" }"#);

    let node = store
        .resolve("/pub/sunset.jpg", ResolveOptions::default())
        .await
        .unwrap();
    assert_eq!(node.source.as_deref(), Some(dir.path().join("IMG_001.jpg").as_path()));
    assert_eq!(node.name, "sunset.jpg");

    let real = store
        .resolve("/pub/IMG_001.jpg", ResolveOptions::default())
        .await;
    assert!(matches!(real, Err(VfsError::NotFound(_))));

    let entries = listing(&store, "/pub", Depth::Limited(0)).await;
    assert!(entries.contains(&"sunset.jpg".to_string()));
    assert!(!entries.contains(&"IMG_001.jpg".to_string()));
}

#[tokio::test]
async fn unbounded_walk_is_pre_order_and_survives_cycles() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("one/two/three")).unwrap();
    fs::write(dir.path().join("one/two/three/leaf.txt"), "").unwrap();
    #[cfg(unix)]
    std::os::unix::fs::symlink(dir.path().join("one"), dir.path().join("one/two/three/up")).unwrap();

    let store = share(dir.path(), "");
    let entries = listing(&store, "/pub", Depth::Unbounded).await;

    let pos = |p: &str| entries.iter().position(|x| x == p).unwrap();
    assert!(pos("one") < pos("one/two"));
    assert!(pos("one/two") < pos("one/two/three"));
    assert!(pos("one/two/three") < pos("one/two/three/leaf.txt"));
    #[cfg(unix)]
    assert!(!entries.iter().any(|p| p.starts_with("one/two/three/up/")));
}

#[tokio::test]
async fn traversal_never_resolves() {
    let dir = srv_pub();
    let store = share(dir.path(), "");
    for path in ["/pub/../secret", "/a/../secret", "/pub/%2e%2e/x", "/pub/a%2fb"] {
        let err = store.resolve(path, ResolveOptions::default()).await.unwrap_err();
        assert!(err.is_bad_path(), "{path} -> {err}");
    }
}

#[tokio::test]
async fn default_entry_serves_index_only_when_asked() {
    let dir = srv_pub();
    fs::write(dir.path().join("index.html"), "<html>").unwrap();
    let store = share(dir.path(), r#", "default": "index.html""#);

    let listed = store.resolve("/pub", ResolveOptions::default()).await.unwrap();
    assert!(listed.is_dir);

    let served = store.resolve("/pub/", ResolveOptions::serving()).await.unwrap();
    assert_eq!(served.name, "index.html");

    fs::remove_file(dir.path().join("index.html")).unwrap();
    let fallback = store.resolve("/pub", ResolveOptions::serving()).await.unwrap();
    assert!(fallback.is_dir);
}

#[tokio::test]
async fn missing_disk_target_is_not_found() {
    let dir = srv_pub();
    let store = share(dir.path(), "");
    let err = store
        .resolve("/pub/nope/deeper", ResolveOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, VfsError::NotFound(_)));
    let err = store
        .resolve("/pub/secret.txt/child", ResolveOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, VfsError::NotFound(_)));
}
