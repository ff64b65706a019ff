//! The administrator-declared tree and its persistence.
//!
//! Readers take an `Arc` snapshot and keep it for the whole request; writers
//! build a new tree and swap it in, so an in-flight resolution or walk never
//! observes a half-applied edit.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::context::RequestContext;
use crate::error::{Result, VfsError};
use crate::mask::MaskSet;
use crate::node::{NodePatch, VfsNode};
use crate::perm::{Accounts, PermKind};
use crate::resolve::{Node, ResolveOptions, split_path, url_to_node};

/// The persisted document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShareConfig {
    #[serde(default)]
    pub vfs: Arc<VfsNode>,
    #[serde(default, skip_serializing_if = "is_empty_accounts")]
    pub accounts: Accounts,
}

fn is_empty_accounts(accounts: &Accounts) -> bool {
    accounts.0.is_empty()
}

impl ShareConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Used by `notify` when the platform has no native change events.
const WATCH_POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Events arriving this close together cause a single reload.
const RELOAD_DEBOUNCE: Duration = Duration::from_millis(50);

pub struct NodeStore {
    path: Option<PathBuf>,
    tx: watch::Sender<Arc<ShareConfig>>,
    /// Serializes read-modify-write cycles of admin edits.
    edit_lock: Mutex<()>,
}

impl NodeStore {
    /// An in-memory store; `save` is a no-op.
    pub fn new(config: ShareConfig) -> Self {
        let (tx, _) = watch::channel(Arc::new(config));
        Self {
            path: None,
            tx,
            edit_lock: Mutex::new(()),
        }
    }

    /// Loads the document at `path`. A missing file yields an empty tree that
    /// will be created on the first save.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let config = match read_config(&path).await {
            Ok(config) => config,
            Err(VfsError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no config yet, starting with an empty tree");
                ShareConfig::default()
            }
            Err(e) => return Err(e),
        };
        let mut store = Self::new(config);
        store.path = Some(path);
        Ok(store)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn snapshot(&self) -> Arc<ShareConfig> {
        self.tx.borrow().clone()
    }

    /// Notified with the new snapshot every time the tree is replaced.
    pub fn subscribe(&self) -> watch::Receiver<Arc<ShareConfig>> {
        self.tx.subscribe()
    }

    /// Swaps in `config` as a whole.
    pub fn replace(&self, config: ShareConfig) {
        self.tx.send_replace(Arc::new(config));
    }

    pub async fn reload(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let _guard = self.edit_lock.lock().await;
        let config = read_config(path).await?;
        if *self.snapshot() != config {
            info!(path = %path.display(), "config reloaded");
            self.replace(config);
        }
        Ok(())
    }

    /// Writes the current snapshot in full, through a temp file and rename.
    pub async fn save(&self) -> Result<()> {
        self.write(&self.snapshot()).await
    }

    async fn write(&self, config: &ShareConfig) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = config.to_json()?;
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }
        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        info!(path = %path.display(), "config saved");
        Ok(())
    }

    /// Reloads the document whenever the file changes on disk, until the
    /// returned handle is dropped.
    ///
    /// The parent directory is watched rather than the file, since `save` and
    /// most editors replace the file instead of writing it in place.
    pub fn watch_file(self: &Arc<Self>) -> Result<ConfigWatcher> {
        let Some(path) = self.path.clone() else {
            return Err(VfsError::NotFound(
                "an in-memory store has no file to watch".to_string(),
            ));
        };
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let file_name = path.file_name().map(|n| n.to_os_string());
        let (tx, mut rx) = mpsc::channel(16);
        let mut watcher = RecommendedWatcher::new(
            move |result: notify::Result<Event>| {
                let Ok(event) = result else {
                    return;
                };
                let ours = event
                    .paths
                    .iter()
                    .any(|p| p.file_name() == file_name.as_deref());
                if ours && matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                    let _ = tx.try_send(());
                }
            },
            notify::Config::default().with_poll_interval(WATCH_POLL_INTERVAL),
        )?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        let store = Arc::clone(self);
        let task = tokio::spawn(async move {
            while rx.recv().await.is_some() {
                tokio::time::sleep(RELOAD_DEBOUNCE).await;
                while rx.try_recv().is_ok() {}
                debug!(path = %path.display(), "config file changed");
                if let Err(e) = store.reload().await {
                    warn!(path = %path.display(), "config reload failed: {e}");
                }
            }
        });

        info!(path = %dir.display(), "config watcher started");
        Ok(ConfigWatcher {
            _watcher: watcher,
            task,
        })
    }

    pub fn root(&self) -> Node {
        Node::root(&self.snapshot().vfs)
    }

    pub fn context(&self, account: Option<&str>) -> RequestContext {
        RequestContext::for_account(account, &self.snapshot().accounts)
    }

    pub async fn resolve(&self, path: &str, opts: ResolveOptions) -> Result<Node> {
        url_to_node(path, &self.root(), opts).await
    }

    /// Declares `node` as the last child of the tree folder at `parent`.
    pub async fn add_node(&self, parent: &str, node: VfsNode) -> Result<()> {
        MaskSet::parse(&node.masks)?;
        let name = node
            .display_name()
            .map(|n| n.into_owned())
            .ok_or_else(|| VfsError::BadPath("a node needs a name or a source".to_string()))?;
        self.edit(parent, |folder| {
            if folder.find_child(&name).is_some() {
                return Err(VfsError::Conflict(name.clone()));
            }
            folder.children.push(Arc::new(node));
            Ok(())
        })
        .await
    }

    /// Removes the tree node at `path` together with its subtree.
    pub async fn remove_node(&self, path: &str) -> Result<VfsNode> {
        let mut segments = split_path(path)?;
        let name = segments
            .pop()
            .ok_or_else(|| VfsError::BadPath("the root cannot be removed".to_string()))?;
        self.edit_segments(&segments, |folder| {
            let idx = folder
                .find_child_index(&name)
                .ok_or_else(|| VfsError::NotFound(path.to_string()))?;
            let removed = folder.children.remove(idx);
            Ok(Arc::unwrap_or_clone(removed))
        })
        .await
    }

    /// Overlays `patch` on the tree node at `path`.
    pub async fn update_node(&self, path: &str, patch: NodePatch) -> Result<()> {
        self.edit(path, |node| {
            node.apply_patch(&patch);
            Ok(())
        })
        .await
    }

    /// Drops the explicit value of `kind` at `path`, so it inherits again.
    pub async fn clear_permission(&self, path: &str, kind: PermKind) -> Result<()> {
        self.edit(path, |node| {
            node.perms.set(kind, None);
            Ok(())
        })
        .await
    }

    /// Sets the mask `key` on the tree node at `path`, or removes it when
    /// `patch` is `None`.
    pub async fn set_mask(&self, path: &str, key: &str, patch: Option<NodePatch>) -> Result<()> {
        if let Some(patch) = &patch {
            let mut probe = IndexMap::new();
            probe.insert(key.to_string(), patch.clone());
            MaskSet::parse(&probe)?;
        }
        self.edit(path, |node| {
            match patch {
                Some(patch) => {
                    node.masks.insert(key.to_string(), patch);
                }
                None => {
                    node.masks
                        .shift_remove(key)
                        .ok_or_else(|| VfsError::NotFound(format!("mask {key}")))?;
                }
            }
            Ok(())
        })
        .await
    }

    async fn edit<R>(&self, path: &str, f: impl FnOnce(&mut VfsNode) -> Result<R>) -> Result<R> {
        let segments = split_path(path)?;
        self.edit_segments(&segments, f).await
    }

    async fn edit_segments<R>(
        &self,
        segments: &[String],
        f: impl FnOnce(&mut VfsNode) -> Result<R>,
    ) -> Result<R> {
        let _guard = self.edit_lock.lock().await;
        let current = self.snapshot();
        let (vfs, out) = edit_at(&current.vfs, segments, f)?;
        let config = ShareConfig {
            vfs,
            accounts: current.accounts.clone(),
        };
        self.write(&config).await?;
        self.replace(config);
        Ok(out)
    }
}

/// Keeps [`NodeStore::watch_file`] running. Dropping it stops the reloads.
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl Drop for ConfigWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Copies the path from `node` down to `segments` and applies `f` to the
/// copy of the target. Untouched subtrees stay shared with the old tree.
fn edit_at<R>(
    node: &Arc<VfsNode>,
    segments: &[String],
    f: impl FnOnce(&mut VfsNode) -> Result<R>,
) -> Result<(Arc<VfsNode>, R)> {
    let mut copy = VfsNode::clone(node);
    let out = match segments.split_first() {
        None => f(&mut copy)?,
        Some((head, rest)) => {
            let idx = copy
                .find_child_index(head)
                .ok_or_else(|| VfsError::NotFound(format!("{head} is not declared in the tree")))?;
            let (child, out) = edit_at(&copy.children[idx], rest, f)?;
            copy.children[idx] = child;
            out
        }
    };
    Ok((Arc::new(copy), out))
}

async fn read_config(path: &Path) -> Result<ShareConfig> {
    let json = tokio::fs::read_to_string(path).await?;
    ShareConfig::from_json(&json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perm::{Perms, Who};

    fn store() -> NodeStore {
        let config = ShareConfig::from_json(
            r#"{ "vfs": { "children": [ { "name": "docs", "children": [ { "name": "inner" } ] } ] },
                 "accounts": { "alice": { "belongs": ["staff"] }, "staff": {} } }"#,
        )
        .unwrap();
        NodeStore::new(config)
    }

    #[tokio::test]
    async fn test_add_and_resolve() {
        let store = store();
        store.add_node("/docs", VfsNode::folder("new")).await.unwrap();
        let node = store.resolve("/docs/new", ResolveOptions::default()).await.unwrap();
        assert!(!node.is_temporary);

        let dup = store.add_node("/docs", VfsNode::folder("new")).await;
        assert!(matches!(dup, Err(VfsError::Conflict(_))));

        let missing = store.add_node("/nope", VfsNode::folder("x")).await;
        assert!(matches!(missing, Err(VfsError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_edits_do_not_touch_old_snapshots() {
        let store = store();
        let before = store.snapshot();
        let mut rx = store.subscribe();

        let removed = store.remove_node("/docs/inner").await.unwrap();
        assert_eq!(removed.name.as_deref(), Some("inner"));
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().vfs.children[0].children.is_empty());

        assert_eq!(before.vfs.children[0].children.len(), 1);
        assert!(store.resolve("/docs/inner", ResolveOptions::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_update_and_masks() {
        let store = store();
        let patch = NodePatch {
            perms: Perms {
                can_read: Some(Who::AccountList(vec!["staff".into()])),
                ..Default::default()
            },
            ..Default::default()
        };
        store.update_node("/docs", patch).await.unwrap();

        let alice = store.context(Some("alice"));
        let anon = store.context(None);
        let inner = store.resolve("/docs/inner", ResolveOptions::default()).await.unwrap();
        assert!(inner.can(PermKind::Read, &alice.identity));
        assert!(!inner.can(PermKind::Read, &anon.identity));

        let bad = store.set_mask("/docs", "[", Some(NodePatch::default())).await;
        assert!(matches!(bad, Err(VfsError::InvalidPattern { .. })));
        store
            .set_mask("/docs", "inner", Some(NodePatch::default()))
            .await
            .unwrap();
        store.set_mask("/docs", "inner", None).await.unwrap();
        assert!(store.set_mask("/docs", "inner", None).await.is_err());

        store.clear_permission("/docs", PermKind::Read).await.unwrap();
        let inner = store.resolve("/docs/inner", ResolveOptions::default()).await.unwrap();
        assert!(inner.can(PermKind::Read, &anon.identity));
    }

    #[tokio::test]
    async fn test_root_cannot_be_removed() {
        let store = store();
        assert!(store.remove_node("/").await.unwrap_err().is_bad_path());
    }

    #[tokio::test]
    async fn test_save_and_reload_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf/vfs.json");

        let store = NodeStore::open(&path).await.unwrap();
        assert!(store.snapshot().vfs.children.is_empty());
        store
            .add_node("/", VfsNode::mount(Some("pub"), "/srv/pub"))
            .await
            .unwrap();
        assert!(path.exists());

        let reopened = NodeStore::open(&path).await.unwrap();
        assert_eq!(reopened.snapshot().vfs, store.snapshot().vfs);

        tokio::fs::write(&path, r#"{ "vfs": { "children": [ { "name": "other" } ] } }"#)
            .await
            .unwrap();
        let mut rx = reopened.subscribe();
        reopened.reload().await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert!(reopened.snapshot().vfs.find_child("other").is_some());
    }

    #[tokio::test]
    async fn test_failed_save_leaves_tree_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf/vfs.json");
        let store = NodeStore::open(&path).await.unwrap();
        std::fs::write(dir.path().join("conf"), "not a directory").unwrap();

        let rx = store.subscribe();
        let result = store.add_node("/", VfsNode::folder("ghost")).await;
        assert!(matches!(result, Err(VfsError::Io(_))));
        assert!(!rx.has_changed().unwrap());
        assert!(store.snapshot().vfs.children.is_empty());
        assert!(store.resolve("/ghost", ResolveOptions::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_watch_file_reloads_on_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vfs.json");
        tokio::fs::write(&path, r#"{ "vfs": { "children": [ { "name": "first" } ] } }"#)
            .await
            .unwrap();
        let store = Arc::new(NodeStore::open(&path).await.unwrap());
        let mut rx = store.subscribe();
        let _watcher = store.watch_file().unwrap();

        tokio::fs::write(&path, r#"{ "vfs": { "children": [ { "name": "second" } ] } }"#)
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(10), rx.changed())
            .await
            .expect("config change was not picked up")
            .unwrap();
        assert!(store.snapshot().vfs.find_child("second").is_some());
        assert!(store.snapshot().vfs.find_child("first").is_none());
    }

    #[test]
    fn test_in_memory_store_cannot_be_watched() {
        let store = Arc::new(store());
        assert!(matches!(store.watch_file(), Err(VfsError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_open_rejects_malformed_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vfs.json");
        tokio::fs::write(&path, "{ not json").await.unwrap();
        assert!(matches!(NodeStore::open(&path).await, Err(VfsError::Config(_))));
    }
}
