use std::borrow::Cow;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use globset::GlobMatcher;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::mask::{MaskSet, compile_glob};
use crate::perm::Perms;

/// Disk names compare case-insensitively where the host filesystem does.
pub(crate) const CASE_INSENSITIVE_NAMES: bool = cfg!(any(windows, target_os = "macos"));

pub(crate) fn same_name(a: &str, b: &str) -> bool {
    if CASE_INSENSITIVE_NAMES {
        a.to_lowercase() == b.to_lowercase()
    } else {
        a == b
    }
}

/// A node of the administrator-declared tree, exactly as persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VfsNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Arc<VfsNode>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,

    /// Disk name (or `dir/name` path) to display name.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub rename: IndexMap<String, String>,

    /// Glob pattern to patch, applied to descendants only.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub masks: IndexMap<String, NodePatch>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime: Option<Mime>,

    #[serde(flatten)]
    pub perms: Perms,

    #[serde(skip)]
    compiled_masks: CompiledMasks,
}

/// `masks`, compiled on first use. A clone starts empty, so a copy that is
/// edited before being shared never sees the original's matchers.
#[derive(Default)]
struct CompiledMasks(OnceLock<MaskSet>);

impl Clone for CompiledMasks {
    fn clone(&self) -> Self {
        Self::default()
    }
}

impl PartialEq for CompiledMasks {
    fn eq(&self, _: &Self) -> bool {
        true
    }
}

impl fmt::Debug for CompiledMasks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.0.get().is_some() { "compiled" } else { "pending" })
    }
}

impl VfsNode {
    pub fn folder(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    pub fn mount<P: Into<PathBuf>>(name: Option<&str>, source: P) -> Self {
        Self {
            name: name.map(str::to_string),
            source: Some(source.into()),
            ..Default::default()
        }
    }

    /// Declared name, else the base name of `source`. The root has neither.
    pub fn display_name(&self) -> Option<Cow<'_, str>> {
        if let Some(name) = &self.name {
            return Some(Cow::Borrowed(name.as_str()));
        }
        self.source
            .as_ref()
            .and_then(|source| source.file_name())
            .map(|n| n.to_string_lossy())
    }

    pub fn find_child(&self, name: &str) -> Option<&Arc<VfsNode>> {
        self.children
            .iter()
            .find(|c| c.display_name().is_some_and(|n| same_name(&n, name)))
    }

    pub fn find_child_index(&self, name: &str) -> Option<usize> {
        self.children
            .iter()
            .position(|c| c.display_name().is_some_and(|n| same_name(&n, name)))
    }

    /// The declared masks, compiled once per node. Invalid patterns are logged
    /// and left out. Only call this once the node is shared: later edits to
    /// `masks` on the same value are not picked up.
    pub fn mask_set(&self) -> &MaskSet {
        self.compiled_masks
            .0
            .get_or_init(|| MaskSet::from_declared(&self.masks))
    }

    /// The fields an explicit declaration contributes on top of inherited and
    /// masked values.
    pub fn own_patch(&self) -> NodePatch {
        NodePatch {
            perms: self.perms.clone(),
            mime: self.mime.clone(),
            default: self.default.clone(),
        }
    }

    /// Applies an administrative update in place.
    pub fn apply_patch(&mut self, patch: &NodePatch) {
        self.perms.overlay(&patch.perms);
        if patch.mime.is_some() {
            self.mime = patch.mime.clone();
        }
        if patch.default.is_some() {
            self.default = patch.default.clone();
        }
    }
}

/// A partial set of node properties, used by masks and by admin updates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodePatch {
    #[serde(flatten)]
    pub perms: Perms,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime: Option<Mime>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

impl NodePatch {
    /// Folds `later` into `self`; keys set by `later` win.
    pub fn merge(&mut self, later: &NodePatch) {
        self.perms.overlay(&later.perms);
        if later.mime.is_some() {
            self.mime = later.mime.clone();
        }
        if later.default.is_some() {
            self.default = later.default.clone();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.perms.is_empty() && self.mime.is_none() && self.default.is_none()
    }
}

/// Either one mime type for the node itself, or glob patterns applied to the
/// node's descendants by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Mime {
    Single(String),
    ByPattern(MimePatterns),
}

/// Glob to mime type, in declaration order, compiled when deserialized.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "IndexMap<String, String>", into = "IndexMap<String, String>")]
pub struct MimePatterns {
    rules: Vec<Arc<MimeRule>>,
}

#[derive(Debug)]
struct MimeRule {
    pattern: String,
    /// `None` for a pattern that failed to compile; it is kept so the
    /// document saves back unchanged.
    glob: Option<GlobMatcher>,
    mime: String,
}

impl MimePatterns {
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn get(&self, pattern: &str) -> Option<&str> {
        self.rules
            .iter()
            .find(|r| r.pattern == pattern)
            .map(|r| r.mime.as_str())
    }

    /// Mime type of the first pattern matching `name`.
    pub fn lookup(&self, name: &str) -> Option<&str> {
        self.rules
            .iter()
            .find(|r| r.glob.as_ref().is_some_and(|g| g.is_match(name)))
            .map(|r| r.mime.as_str())
    }

    /// `self` layered over `older`: a pattern declared in both keeps the value
    /// from `self`, and the patterns only `older` has follow.
    pub fn layered_over(&self, older: &MimePatterns) -> MimePatterns {
        let mut rules = self.rules.clone();
        for rule in &older.rules {
            if self.get(&rule.pattern).is_none() {
                rules.push(Arc::clone(rule));
            }
        }
        MimePatterns { rules }
    }
}

impl From<IndexMap<String, String>> for MimePatterns {
    fn from(map: IndexMap<String, String>) -> Self {
        let rules = map
            .into_iter()
            .map(|(pattern, mime)| {
                let glob = compile_glob(&pattern)
                    .inspect_err(|e| warn!("ignoring mime pattern: {e}"))
                    .ok();
                Arc::new(MimeRule {
                    pattern,
                    glob,
                    mime,
                })
            })
            .collect();
        Self { rules }
    }
}

impl From<MimePatterns> for IndexMap<String, String> {
    fn from(patterns: MimePatterns) -> Self {
        patterns
            .rules
            .iter()
            .map(|r| (r.pattern.clone(), r.mime.clone()))
            .collect()
    }
}

impl PartialEq for MimePatterns {
    fn eq(&self, other: &Self) -> bool {
        self.rules.len() == other.rules.len()
            && self
                .rules
                .iter()
                .zip(&other.rules)
                .all(|(a, b)| a.pattern == b.pattern && a.mime == b.mime)
    }
}

impl Eq for MimePatterns {}
