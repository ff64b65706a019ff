//! Pattern-keyed property overrides.
//!
//! A mask key is a glob matched against a child's name. Keys starting with
//! `**/` apply at any depth below the declaring node; any other key applies to
//! direct children only, unless it is a `dir/rest` path, in which case `rest`
//! applies beneath the children matching `dir`.
//!
//! Nothing here touches the filesystem or the node store.

use std::sync::Arc;

use globset::{GlobBuilder, GlobMatcher};
use indexmap::IndexMap;
use tracing::warn;

use crate::error::{Result, VfsError};
use crate::node::{CASE_INSENSITIVE_NAMES, NodePatch};

const DEEP_PREFIX: &str = "**/";

pub(crate) fn compile_glob(pattern: &str) -> Result<GlobMatcher> {
    GlobBuilder::new(pattern)
        .literal_separator(true)
        .case_insensitive(CASE_INSENSITIVE_NAMES)
        .build()
        .map(|g| g.compile_matcher())
        .map_err(|e| VfsError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })
}

/// One `/`-separated piece of a mask key.
#[derive(Debug)]
struct Segment {
    /// Preceded by `**/`: may match at any depth below the previous segment.
    deep: bool,
    text: String,
    glob: GlobMatcher,
}

/// A compiled mask key, positioned at the segment that the next child name is
/// matched against. Narrowing moves `pos` forward and shares everything else.
#[derive(Debug, Clone)]
struct MaskEntry {
    segments: Arc<[Segment]>,
    pos: usize,
    patch: Arc<NodePatch>,
}

impl MaskEntry {
    fn new(key: &str, patch: Arc<NodePatch>) -> Result<Self> {
        let mut segments = Vec::new();
        let mut deep = false;
        let mut parts = key.split('/').filter(|p| !p.is_empty()).peekable();
        while let Some(part) = parts.next() {
            if part == "**" && parts.peek().is_some() {
                deep = true;
                continue;
            }
            segments.push(Segment {
                deep,
                text: part.to_string(),
                glob: compile_glob(part)?,
            });
            deep = false;
        }
        if segments.is_empty() {
            return Err(VfsError::InvalidPattern {
                pattern: key.to_string(),
                reason: "empty pattern".to_string(),
            });
        }

        Ok(Self {
            segments: segments.into(),
            pos: 0,
            patch,
        })
    }

    fn current(&self) -> &Segment {
        &self.segments[self.pos]
    }

    fn is_last(&self) -> bool {
        self.pos + 1 == self.segments.len()
    }

    /// True when this entry targets `name` at the current level.
    fn applies_to(&self, name: &str) -> bool {
        self.is_last() && self.current().glob.is_match(name)
    }

    fn narrowed(&self) -> Self {
        Self {
            segments: Arc::clone(&self.segments),
            pos: self.pos + 1,
            patch: Arc::clone(&self.patch),
        }
    }

    fn key(&self) -> String {
        let mut key = String::new();
        for (i, segment) in self.segments[self.pos..].iter().enumerate() {
            if i > 0 {
                key.push('/');
            }
            if segment.deep {
                key.push_str(DEEP_PREFIX);
            }
            key.push_str(&segment.text);
        }
        key
    }
}

/// The masks in effect for the children of one node, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct MaskSet {
    entries: Vec<MaskEntry>,
}

impl MaskSet {
    /// Builds a mask set, rejecting the first invalid pattern.
    pub fn parse(declared: &IndexMap<String, NodePatch>) -> Result<Self> {
        let entries = declared
            .iter()
            .map(|(key, patch)| MaskEntry::new(key, Arc::new(patch.clone())))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { entries })
    }

    /// Builds a mask set, logging and skipping invalid patterns.
    pub fn from_declared(declared: &IndexMap<String, NodePatch>) -> Self {
        let entries = declared
            .iter()
            .filter_map(|(key, patch)| match MaskEntry::new(key, Arc::new(patch.clone())) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("ignoring mask: {e}");
                    None
                }
            })
            .collect();
        Self { entries }
    }

    /// Appends `other` after the current entries, so its patches win on conflict.
    pub fn extend(&mut self, other: MaskSet) {
        self.entries.extend(other.entries);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Keys as they would be written in a config document.
    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(MaskEntry::key).collect()
    }
}

/// Union of every patch whose pattern matches `name`, later entries winning.
pub fn apply_masks(name: &str, masks: &MaskSet) -> NodePatch {
    let mut patch = NodePatch::default();
    for entry in masks.entries.iter().filter(|e| e.applies_to(name)) {
        patch.merge(&entry.patch);
    }
    patch
}

/// The mask set that carries on to the child named `consumed`.
///
/// `**/` entries pass through unchanged. `dir/rest` entries whose `dir`
/// matches `consumed` continue as `rest`. Everything else stops here.
pub fn inherit_masks(parent: &MaskSet, consumed: &str) -> MaskSet {
    let mut entries = Vec::new();
    for entry in &parent.entries {
        if entry.current().deep {
            entries.push(entry.clone());
        }
        if !entry.is_last() && entry.current().glob.is_match(consumed) {
            entries.push(entry.narrowed());
        }
    }
    MaskSet { entries }
}
