//! URL to node resolution.
//!
//! A virtual path is consumed one segment at a time. Each step builds a fresh
//! [`Node`] from its parent with [`materialize`]: inherited values first, then
//! the parent's masks, then whatever the tree declares for that child. When the
//! tree declares nothing and the parent is backed by a directory, the segment
//! names a disk entry instead.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::debug;

use crate::error::{Result, VfsError};
use crate::mask::{MaskSet, apply_masks, inherit_masks};
use crate::node::{Mime, MimePatterns, NodePatch, VfsNode, same_name};
use crate::perm::{Identity, PermKind, Perms};

/// A node with every property computed, produced for one request and then
/// dropped.
#[derive(Debug, Clone)]
pub struct Node {
    /// Display name. Empty for the root.
    pub name: String,
    /// Name relative to the base of a walk, including the walk's prefix.
    /// Equal to `name` outside of a walk.
    pub path: String,
    /// Virtual path that produced this node.
    pub url: String,
    pub source: Option<PathBuf>,
    pub perms: Perms,
    pub mime: MimeMap,
    pub default: Option<String>,
    /// Renames still applicable to this node's disk entries.
    pub rename: IndexMap<String, String>,
    /// Masks in effect for this node's children.
    pub masks: MaskSet,
    pub is_dir: bool,
    pub size: Option<u64>,
    /// True unless the node is backed by a declaration in the tree.
    pub is_temporary: bool,
    /// The tree declaration this node mirrors, for admin code that has to
    /// edit the persisted node.
    pub original: Option<Arc<VfsNode>>,
    /// Number of segments between the tree root and this node.
    pub depth: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MimeMap {
    pub own: Option<String>,
    pub patterns: MimePatterns,
}

impl MimeMap {
    fn apply(&mut self, mime: &Mime) {
        match mime {
            Mime::Single(m) => self.own = Some(m.clone()),
            Mime::ByPattern(patterns) => self.patterns = patterns.layered_over(&self.patterns),
        }
    }

    /// The patterns carry over to children; the node's own type does not.
    fn inherited(&self) -> Self {
        Self {
            own: None,
            patterns: self.patterns.clone(),
        }
    }
}

impl Node {
    /// Materializes the root of `tree`.
    pub fn root(tree: &Arc<VfsNode>) -> Self {
        let mut mime = MimeMap::default();
        if let Some(m) = &tree.mime {
            mime.apply(m);
        }
        Self {
            name: String::new(),
            path: String::new(),
            url: "/".to_string(),
            source: tree.source.clone(),
            perms: tree.perms.clone(),
            mime,
            default: tree.default.clone(),
            rename: tree.rename.clone(),
            masks: tree.mask_set().clone(),
            is_dir: true,
            size: None,
            is_temporary: false,
            original: Some(Arc::clone(tree)),
            depth: 0,
        }
    }

    pub fn can(&self, kind: PermKind, identity: &Identity) -> bool {
        self.perms.allows(kind, identity)
    }

    /// Children declared in the tree for this node, in declaration order.
    pub fn tree_children(&self) -> &[Arc<VfsNode>] {
        self.original
            .as_deref()
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_virtual(&self) -> bool {
        self.source.is_none()
    }

    pub fn mime_type(&self) -> Option<&str> {
        if let Some(own) = &self.mime.own {
            return Some(own);
        }
        self.mime.patterns.lookup(&self.name)
    }

    fn apply(&mut self, patch: &NodePatch) {
        self.perms.overlay(&patch.perms);
        if let Some(mime) = &patch.mime {
            self.mime.apply(mime);
        }
        if patch.default.is_some() {
            self.default = patch.default.clone();
        }
    }

    /// Fills `is_dir` and `size` from disk. Purely virtual nodes are folders.
    pub(crate) async fn stat(&mut self) -> std::io::Result<()> {
        let Some(source) = &self.source else {
            self.is_dir = true;
            return Ok(());
        };
        let meta = tokio::fs::metadata(source).await?;
        self.is_dir = meta.is_dir();
        self.size = (!self.is_dir).then(|| meta.len());
        Ok(())
    }
}

/// Where a child of a materialized node is declared.
#[derive(Debug, Clone, Copy)]
pub enum Origin<'a> {
    Tree(&'a Arc<VfsNode>),
    Disk(&'a str),
}

/// Builds the child `name` of `parent` without touching `parent`.
///
/// Precedence, lowest first: values inherited from `parent`, masks declared
/// above, the tree declaration.
pub fn materialize(parent: &Node, name: &str, origin: Origin<'_>) -> Node {
    let disk_name = match origin {
        Origin::Disk(disk) => disk,
        Origin::Tree(_) => name,
    };

    let mut node = Node {
        name: name.to_string(),
        path: name.to_string(),
        url: join_url(&parent.url, name),
        source: None,
        perms: parent.perms.clone(),
        mime: parent.mime.inherited(),
        default: None,
        rename: narrow_rename(&parent.rename, disk_name),
        masks: inherit_masks(&parent.masks, name),
        is_dir: false,
        size: None,
        is_temporary: true,
        original: None,
        depth: parent.depth + 1,
    };
    node.apply(&apply_masks(name, &parent.masks));

    match origin {
        Origin::Tree(decl) => {
            node.apply(&decl.own_patch());
            node.masks.extend(decl.mask_set().clone());
            for (k, v) in &decl.rename {
                node.rename.insert(k.clone(), v.clone());
            }
            node.source = decl.source.clone();
            node.is_temporary = false;
            node.original = Some(Arc::clone(decl));
        }
        Origin::Disk(disk) => {
            node.source = parent.source.as_ref().map(|s| s.join(disk));
        }
    }
    node
}

fn join_url(parent: &str, name: &str) -> String {
    if parent.ends_with('/') {
        format!("{parent}{name}")
    } else {
        format!("{parent}/{name}")
    }
}

/// Rename entries below `disk_name`, with the `disk_name/` prefix removed.
fn narrow_rename(rename: &IndexMap<String, String>, disk_name: &str) -> IndexMap<String, String> {
    rename
        .iter()
        .filter_map(|(k, v)| {
            let (head, rest) = k.split_once('/')?;
            (same_name(head, disk_name) && !rest.is_empty()).then(|| (rest.to_string(), v.clone()))
        })
        .collect()
}

/// Display name for the disk entry `disk_name` under `parent`.
pub(crate) fn display_name_for(parent: &Node, disk_name: &str) -> String {
    parent
        .rename
        .iter()
        .find(|(k, _)| same_name(k, disk_name))
        .map(|(_, v)| v.clone())
        .unwrap_or_else(|| disk_name.to_string())
}

/// Disk name behind the display name `segment`, or `None` when `segment` is a
/// real name that has been renamed away.
fn disk_name_for<'a>(parent: &'a Node, segment: &'a str) -> Option<&'a str> {
    let direct = |k: &String| !k.contains('/');
    if let Some((k, _)) = parent
        .rename
        .iter()
        .find(|(k, v)| direct(k) && same_name(v, segment))
    {
        return Some(k.as_str());
    }
    if parent.rename.keys().any(|k| direct(k) && same_name(k, segment)) {
        return None;
    }
    Some(segment)
}

/// True when the display name of `disk_name` resolves back to it. A real
/// name that another entry is renamed to is not.
pub(crate) fn reachable_by_name(parent: &Node, disk_name: &str) -> bool {
    let name = display_name_for(parent, disk_name);
    disk_name_for(parent, &name).is_some_and(|disk| same_name(disk, disk_name))
}

/// True when a tree child already exposes the disk entry `disk_name`.
pub(crate) fn shadowed_by_tree(parent: &Node, disk_name: &str) -> bool {
    let Some(source) = &parent.source else {
        return false;
    };
    let on_disk = source.join(disk_name);
    parent
        .tree_children()
        .iter()
        .any(|c| c.source.as_ref().is_some_and(|s| *s == on_disk))
}

/// One resolution step, without I/O.
fn step(parent: &Node, segment: &str) -> Result<Node> {
    if let Some(decl) = parent.original.as_ref().and_then(|o| o.find_child(segment)) {
        let name = decl.display_name().map(|n| n.into_owned()).unwrap_or_default();
        return Ok(materialize(parent, &name, Origin::Tree(decl)));
    }

    if parent.source.is_none() {
        debug!(url = %parent.url, segment, "no such child in virtual folder");
        return Err(VfsError::NotFound(join_url(&parent.url, segment)));
    }

    let disk = disk_name_for(parent, segment)
        .filter(|disk| !shadowed_by_tree(parent, disk))
        .ok_or_else(|| VfsError::NotFound(join_url(&parent.url, segment)))?;
    let name = display_name_for(parent, disk);
    Ok(materialize(parent, &name, Origin::Disk(disk)))
}

/// Decodes a percent-encoded path segment and rejects anything that could
/// climb out of its parent.
pub fn decode_segment(raw: &str) -> Result<String> {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = raw
                .get(i + 1..i + 3)
                .and_then(|h| u8::from_str_radix(h, 16).ok())
                .ok_or_else(|| VfsError::BadPath(format!("bad escape in {raw:?}")))?;
            out.push(hex);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    let segment =
        String::from_utf8(out).map_err(|_| VfsError::BadPath(format!("{raw:?} is not UTF-8")))?;

    let forbidden = |c: char| c == '/' || c == '\\' || c == '\0' || (cfg!(windows) && c == ':');
    if segment == ".." || segment == "." || segment.contains(forbidden) {
        return Err(VfsError::BadPath(segment));
    }
    Ok(segment)
}

/// Splits and decodes a virtual path. A trailing slash is allowed, an empty
/// segment anywhere else is not.
pub fn split_path(path: &str) -> Result<Vec<String>> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    trimmed
        .split('/')
        .map(|raw| {
            if raw.is_empty() {
                Err(VfsError::BadPath(format!("empty segment in {path:?}")))
            } else {
                decode_segment(raw)
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Serve a folder's `default` entry in place of the folder itself.
    pub follow_default: bool,
}

impl ResolveOptions {
    pub fn serving() -> Self {
        Self {
            follow_default: true,
        }
    }
}

/// Resolves `path` below `start`.
///
/// Every segment is validated before any lookup, so a traversal attempt is a
/// [`VfsError::BadPath`] whether or not its prefix exists.
pub async fn url_to_node(path: &str, start: &Node, opts: ResolveOptions) -> Result<Node> {
    let segments = split_path(path)?;
    let mut current = start.clone();
    for segment in &segments {
        current = step(&current, segment)?;
    }

    if let Err(e) = current.stat().await {
        debug!(url = %current.url, "stat failed: {e}");
        return Err(match e.kind() {
            ErrorKind::NotFound | ErrorKind::NotADirectory | ErrorKind::PermissionDenied => {
                VfsError::NotFound(current.url)
            }
            _ => VfsError::Io(e),
        });
    }

    if opts.follow_default && current.is_dir {
        if let Some(default) = current.default.clone() {
            match Box::pin(url_to_node(&default, &current, ResolveOptions::default())).await {
                Ok(index) => return Ok(index),
                Err(VfsError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
    }
    Ok(current)
}
