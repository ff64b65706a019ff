//! Core of a file-sharing server's virtual filesystem. An administrator
//! declares a tree that mounts real directories anywhere in a virtual
//! hierarchy, renames entries, and attaches permission rules by glob. This
//! crate turns URL paths into fully computed nodes and walks their
//! descendants with every permission already applied.

/// Per-request identity and cancellation.
pub mod context;
/// Error type shared by every operation in the crate.
pub mod error;
/// Pattern-keyed property overrides applied to descendants.
pub mod mask;
/// The persisted tree declaration.
pub mod node;
/// Permission kinds, `Who` values and identity expansion.
pub mod perm;
/// URL path to materialized node.
pub mod resolve;
/// Summaries computed over a walk.
pub mod stats;
/// Shared, atomically replaced tree plus its persistence.
pub mod store;
/// Lazy, permission-filtered descendant enumeration.
pub mod walk;

pub use context::RequestContext;
pub use error::{Result, VfsError};
pub use node::{Mime, MimePatterns, NodePatch, VfsNode};
pub use perm::{AccountSource, Accounts, Identity, PermKind, Perms, Who};
pub use resolve::{Node, ResolveOptions, url_to_node};
pub use store::{ConfigWatcher, NodeStore, ShareConfig};
pub use walk::{Depth, walk_node};
