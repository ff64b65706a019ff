//! Permission-filtered, depth-bounded enumeration of a node's descendants.
//!
//! The walk is a pull-based stream: nothing is read from disk until the
//! consumer asks for the next entry, and at most one directory is opened ahead
//! of what has been yielded. Entries come out in pre-order, declared children
//! of a folder before its disk entries.

use std::borrow::Cow;
use std::path::PathBuf;

use futures_util::stream::{self, Stream};
use tokio::fs::{DirEntry, ReadDir};
use tracing::{debug, warn};

use crate::context::RequestContext;
use crate::node::same_name;
use crate::perm::PermKind;
use crate::resolve::{
    Node, Origin, display_name_for, materialize, reachable_by_name, shadowed_by_tree,
};

/// Hard limit on nesting, applied even to unbounded walks.
pub const MAX_WALK_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Depth {
    /// `Limited(0)` lists immediate entries only.
    Limited(usize),
    Unbounded,
}

impl Depth {
    /// Budget for the level below, or `None` if the walk stops here.
    fn below(self) -> Option<Depth> {
        match self {
            Depth::Limited(0) => None,
            Depth::Limited(n) => Some(Depth::Limited(n - 1)),
            Depth::Unbounded => Some(Depth::Unbounded),
        }
    }
}

enum Listing {
    Pending,
    Open(ReadDir),
    Done,
}

enum Step {
    Entry(Node),
    Skip,
    Exhausted,
}

struct Descend {
    dir: Node,
    prefix: String,
    depth: Depth,
}

struct Frame {
    dir: Node,
    prefix: String,
    depth: Depth,
    next_child: usize,
    listing: Listing,
    canonical: Option<PathBuf>,
}

impl Frame {
    async fn next_candidate(&mut self) -> Step {
        if let Some(decl) = self.dir.tree_children().get(self.next_child).cloned() {
            self.next_child += 1;
            let Some(name) = decl.display_name().map(Cow::into_owned) else {
                return Step::Skip;
            };
            let mut node = materialize(&self.dir, &name, Origin::Tree(&decl));
            if let Err(e) = node.stat().await {
                warn!(url = %node.url, "skipping declared entry: {e}");
                return Step::Skip;
            }
            return Step::Entry(node);
        }

        match &mut self.listing {
            Listing::Pending => {
                self.listing = match &self.dir.source {
                    Some(source) => match tokio::fs::read_dir(source).await {
                        Ok(rd) => Listing::Open(rd),
                        Err(e) => {
                            warn!(url = %self.dir.url, "cannot list {}: {e}", source.display());
                            Listing::Done
                        }
                    },
                    None => Listing::Done,
                };
                Step::Skip
            }
            Listing::Open(rd) => {
                let next = rd.next_entry().await;
                match next {
                    Ok(Some(entry)) => disk_candidate(&self.dir, entry).await,
                    Ok(None) => {
                        self.listing = Listing::Done;
                        Step::Skip
                    }
                    Err(e) => {
                        warn!(url = %self.dir.url, "listing interrupted: {e}");
                        self.listing = Listing::Done;
                        Step::Skip
                    }
                }
            }
            Listing::Done => Step::Exhausted,
        }
    }
}

async fn disk_candidate(dir: &Node, entry: DirEntry) -> Step {
    let Ok(disk) = entry.file_name().into_string() else {
        warn!(path = %entry.path().display(), "skipping entry with a non UTF-8 name");
        return Step::Skip;
    };
    if is_hidden(&entry).await
        || shadowed_by_tree(dir, &disk)
        || !reachable_by_name(dir, &disk)
    {
        return Step::Skip;
    }

    let name = display_name_for(dir, &disk);
    let declared = dir
        .tree_children()
        .iter()
        .any(|c| c.display_name().is_some_and(|n| same_name(&n, &name)));
    if declared {
        return Step::Skip;
    }

    let mut node = materialize(dir, &name, Origin::Disk(&disk));
    if let Err(e) = node.stat().await {
        warn!(path = %entry.path().display(), "skipping entry: {e}");
        return Step::Skip;
    }
    Step::Entry(node)
}

#[cfg(windows)]
async fn is_hidden(entry: &DirEntry) -> bool {
    use std::os::windows::fs::MetadataExt;
    const HIDDEN_OR_SYSTEM: u32 = 0x2 | 0x4;
    entry
        .metadata()
        .await
        .map(|m| m.file_attributes() & HIDDEN_OR_SYSTEM != 0)
        .unwrap_or(false)
}

#[cfg(not(windows))]
async fn is_hidden(_entry: &DirEntry) -> bool {
    false
}

struct Walker {
    ctx: RequestContext,
    stack: Vec<Frame>,
    descend: Option<Descend>,
}

impl Walker {
    async fn enter(&mut self, d: Descend) {
        if !d.dir.is_dir {
            return;
        }
        if self.stack.len() >= MAX_WALK_DEPTH {
            warn!(url = %d.dir.url, "walk depth cap reached, not descending");
            return;
        }

        let canonical = match &d.dir.source {
            Some(source) => match tokio::fs::canonicalize(source).await {
                Ok(c) => Some(c),
                Err(e) => {
                    warn!(url = %d.dir.url, "cannot enter {}: {e}", source.display());
                    return;
                }
            },
            None => None,
        };
        if let Some(c) = &canonical {
            if self.stack.iter().any(|f| f.canonical.as_ref() == Some(c)) {
                debug!(url = %d.dir.url, "directory loops back to an ancestor, not descending");
                return;
            }
        }

        self.stack.push(Frame {
            dir: d.dir,
            prefix: d.prefix,
            depth: d.depth,
            next_child: 0,
            listing: Listing::Pending,
            canonical,
        });
    }

    async fn next(&mut self) -> Option<Node> {
        loop {
            if !self.ctx.is_alive() {
                self.stack.clear();
                self.descend = None;
                return None;
            }
            if let Some(d) = self.descend.take() {
                self.enter(d).await;
                continue;
            }

            let frame = self.stack.last_mut()?;
            let mut node = match frame.next_candidate().await {
                Step::Entry(node) => node,
                Step::Skip => continue,
                Step::Exhausted => {
                    self.stack.pop();
                    continue;
                }
            };
            if !node.can(PermKind::See, &self.ctx.identity) {
                continue;
            }

            node.path = format!("{}{}", frame.prefix, node.name);
            if node.is_dir {
                if let Some(depth) = frame.depth.below() {
                    self.descend = Some(Descend {
                        dir: node.clone(),
                        prefix: format!("{}/", node.path),
                        depth,
                    });
                }
            }
            return Some(node);
        }
    }
}

/// Lazily yields every descendant of `node` that `ctx`'s identity may see.
///
/// Entries the identity cannot see are neither yielded nor descended into.
/// Failures to read a subtree are logged and the walk moves on to its
/// siblings. Cancelling `ctx` ends the stream at the next step.
pub fn walk_node(
    node: Node,
    ctx: RequestContext,
    depth: Depth,
    prefix: &str,
) -> impl Stream<Item = Node> + Send + 'static {
    let prefix = if prefix.is_empty() || prefix.ends_with('/') {
        prefix.to_string()
    } else {
        format!("{prefix}/")
    };
    let walker = Walker {
        ctx,
        stack: Vec::new(),
        descend: Some(Descend {
            dir: node,
            prefix,
            depth,
        }),
    };
    stream::unfold(walker, |mut walker| async move {
        let node = walker.next().await?;
        Some((node, walker))
    })
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Arc;

    use futures_util::StreamExt;
    use tempfile::TempDir;

    use super::*;
    use crate::node::VfsNode;
    use crate::resolve::{ResolveOptions, url_to_node};

    fn fixture() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("a/b")).unwrap();
        fs::write(dir.path().join("a/b/deep.txt"), "x").unwrap();
        fs::write(dir.path().join("a/one.txt"), "x").unwrap();
        fs::write(dir.path().join("top.txt"), "hello").unwrap();
        fs::write(dir.path().join(".hidden"), "").unwrap();
        dir
    }

    fn root_over(dir: &TempDir, extra: &str) -> Node {
        let json = format!(
            r#"{{ "source": {:?} {extra} }}"#,
            dir.path().to_string_lossy()
        );
        let tree: VfsNode = serde_json::from_str(&json).unwrap();
        Node::root(&Arc::new(tree))
    }

    async fn paths(node: Node, ctx: RequestContext, depth: Depth) -> Vec<String> {
        walk_node(node, ctx, depth, "")
            .map(|n| n.path)
            .collect::<Vec<_>>()
            .await
    }

    #[tokio::test]
    async fn test_depth_zero_lists_immediate_entries() {
        let dir = fixture();
        let mut got = paths(root_over(&dir, ""), RequestContext::anonymous(), Depth::Limited(0)).await;
        got.sort();
        assert_eq!(got, vec![".hidden", "a", "top.txt"]);
    }

    #[tokio::test]
    async fn test_unbounded_walk_is_pre_order() {
        let dir = fixture();
        let got = paths(root_over(&dir, ""), RequestContext::anonymous(), Depth::Unbounded).await;
        assert_eq!(got.len(), 6);
        let pos = |p: &str| got.iter().position(|x| x == p).unwrap();
        assert!(pos("a") < pos("a/one.txt"));
        assert!(pos("a") < pos("a/b"));
        assert!(pos("a/b") < pos("a/b/deep.txt"));
    }

    #[tokio::test]
    async fn test_limited_depth_stops_descending() {
        let dir = fixture();
        let mut got = paths(root_over(&dir, ""), RequestContext::anonymous(), Depth::Limited(1)).await;
        got.sort();
        assert_eq!(got, vec![".hidden", "a", "a/b", "a/one.txt", "top.txt"]);
    }

    #[tokio::test]
    async fn test_declared_children_first_and_not_duplicated() {
        let dir = fixture();
        let extra = format!(
            r#", "children": [ {{ "name": "alpha", "source": {:?} }}, {{ "name": "virtual" }} ]"#,
            dir.path().join("a").to_string_lossy()
        );
        let got = paths(root_over(&dir, &extra), RequestContext::anonymous(), Depth::Limited(0)).await;
        assert_eq!(&got[..2], &["alpha", "virtual"]);
        assert!(!got.contains(&"a".to_string()));
        assert_eq!(got.len(), 4);
    }

    #[tokio::test]
    async fn test_rename_onto_existing_name_lists_once() {
        let dir = fixture();
        fs::write(dir.path().join("b.txt"), "real b").unwrap();
        let extra = r#", "rename": { "top.txt": "b.txt" }"#;
        let root = root_over(&dir, extra);

        let listed: Vec<Node> =
            walk_node(root.clone(), RequestContext::anonymous(), Depth::Limited(0), "")
                .collect()
                .await;
        let named_b: Vec<&Node> = listed.iter().filter(|n| n.name == "b.txt").collect();
        assert_eq!(named_b.len(), 1);
        assert_eq!(named_b[0].source, Some(dir.path().join("top.txt")));
        assert_eq!(named_b[0].size, Some(5));

        let resolved = url_to_node("/b.txt", &root, ResolveOptions::default()).await.unwrap();
        assert_eq!(resolved.source, named_b[0].source);
    }

    #[tokio::test]
    async fn test_invisible_entries_are_dropped() {
        let dir = fixture();
        let extra = r#", "masks": { "**/*.txt": { "can_read": false }, "a": { "can_see": false } }"#;
        let got = paths(root_over(&dir, extra), RequestContext::anonymous(), Depth::Unbounded).await;
        assert_eq!(got, vec![".hidden"]);
    }

    #[tokio::test]
    async fn test_everything_hidden_yields_nothing() {
        let dir = fixture();
        let extra = r#", "masks": { "**/*": { "can_see": false } }"#;
        let got = paths(root_over(&dir, extra), RequestContext::anonymous(), Depth::Unbounded).await;
        assert!(got.is_empty());
    }

    #[tokio::test]
    async fn test_prefix_is_applied() {
        let dir = fixture();
        let a = url_to_node("/a", &root_over(&dir, ""), ResolveOptions::default())
            .await
            .unwrap();
        let mut got: Vec<String> = walk_node(a, RequestContext::anonymous(), Depth::Unbounded, "a")
            .map(|n| n.path)
            .collect()
            .await;
        got.sort();
        assert_eq!(got, vec!["a/b", "a/b/deep.txt", "a/one.txt"]);
    }

    #[tokio::test]
    async fn test_cancellation_ends_the_stream() {
        let dir = fixture();
        let ctx = RequestContext::anonymous();
        let cancel = ctx.cancel.clone();
        let mut walk = Box::pin(walk_node(root_over(&dir, ""), ctx, Depth::Unbounded, ""));
        assert!(walk.next().await.is_some());
        cancel.cancel();
        assert!(walk.next().await.is_none());
    }

    #[tokio::test]
    async fn test_missing_subtree_is_skipped() {
        let dir = fixture();
        let extra = r#", "children": [ { "name": "gone", "source": "/definitely/not/here" } ]"#;
        let got = paths(root_over(&dir, extra), RequestContext::anonymous(), Depth::Limited(0)).await;
        assert!(!got.contains(&"gone".to_string()));
        assert!(got.contains(&"top.txt".to_string()));
    }

    #[tokio::test]
    async fn test_walking_a_file_yields_nothing() {
        let dir = fixture();
        let file = url_to_node("/top.txt", &root_over(&dir, ""), ResolveOptions::default())
            .await
            .unwrap();
        assert_eq!(file.size, Some(5));
        assert!(paths(file, RequestContext::anonymous(), Depth::Unbounded).await.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_cycle_terminates() {
        let dir = fixture();
        std::os::unix::fs::symlink(dir.path(), dir.path().join("a/b/loop")).unwrap();
        let got = paths(root_over(&dir, ""), RequestContext::anonymous(), Depth::Unbounded).await;
        assert!(got.contains(&"a/b/loop".to_string()));
        assert!(!got.iter().any(|p| p.starts_with("a/b/loop/")));
    }
}
