use std::collections::HashSet;
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Which identities satisfy a permission check.
///
/// Persisted as `true`, `false`, `"*"` or a list of account names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WhoRepr", into = "WhoRepr")]
pub enum Who {
    Anyone,
    NoOne,
    AnyAccount,
    AccountList(Vec<String>),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum WhoRepr {
    Flag(bool),
    Keyword(String),
    Accounts(Vec<String>),
}

impl TryFrom<WhoRepr> for Who {
    type Error = String;

    fn try_from(repr: WhoRepr) -> Result<Self, Self::Error> {
        match repr {
            WhoRepr::Flag(true) => Ok(Who::Anyone),
            WhoRepr::Flag(false) => Ok(Who::NoOne),
            WhoRepr::Keyword(k) if k == "*" => Ok(Who::AnyAccount),
            WhoRepr::Keyword(k) => Err(format!("unknown permission keyword {k:?}")),
            WhoRepr::Accounts(list) => Ok(Who::AccountList(list)),
        }
    }
}

impl From<Who> for WhoRepr {
    fn from(who: Who) -> Self {
        match who {
            Who::Anyone => WhoRepr::Flag(true),
            Who::NoOne => WhoRepr::Flag(false),
            Who::AnyAccount => WhoRepr::Keyword("*".to_string()),
            Who::AccountList(list) => WhoRepr::Accounts(list),
        }
    }
}

impl Who {
    pub fn matches(&self, identity: &Identity) -> bool {
        match self {
            Who::Anyone => true,
            Who::NoOne => false,
            Who::AnyAccount => identity.is_authenticated(),
            Who::AccountList(list) => list.iter().any(|name| identity.names.contains(name)),
        }
    }
}

impl fmt::Display for Who {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Who::Anyone => write!(f, "anyone"),
            Who::NoOne => write!(f, "no one"),
            Who::AnyAccount => write!(f, "any account"),
            Who::AccountList(list) => write!(f, "{}", list.join(",")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PermKind {
    See,
    Read,
    List,
    Upload,
    Delete,
    Archive,
}

impl PermKind {
    pub const ALL: [PermKind; 6] = [
        PermKind::See,
        PermKind::Read,
        PermKind::List,
        PermKind::Upload,
        PermKind::Delete,
        PermKind::Archive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PermKind::See => "can_see",
            PermKind::Read => "can_read",
            PermKind::List => "can_list",
            PermKind::Upload => "can_upload",
            PermKind::Delete => "can_delete",
            PermKind::Archive => "can_archive",
        }
    }
}

/// One optional `Who` per permission kind. `None` means "inherit".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Perms {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_see: Option<Who>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_read: Option<Who>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_list: Option<Who>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_upload: Option<Who>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_delete: Option<Who>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_archive: Option<Who>,
}

impl Perms {
    pub fn get(&self, kind: PermKind) -> Option<&Who> {
        self.slot(kind).as_ref()
    }

    pub fn set(&mut self, kind: PermKind, who: Option<Who>) {
        *self.slot_mut(kind) = who;
    }

    fn slot(&self, kind: PermKind) -> &Option<Who> {
        match kind {
            PermKind::See => &self.can_see,
            PermKind::Read => &self.can_read,
            PermKind::List => &self.can_list,
            PermKind::Upload => &self.can_upload,
            PermKind::Delete => &self.can_delete,
            PermKind::Archive => &self.can_archive,
        }
    }

    fn slot_mut(&mut self, kind: PermKind) -> &mut Option<Who> {
        match kind {
            PermKind::See => &mut self.can_see,
            PermKind::Read => &mut self.can_read,
            PermKind::List => &mut self.can_list,
            PermKind::Upload => &mut self.can_upload,
            PermKind::Delete => &mut self.can_delete,
            PermKind::Archive => &mut self.can_archive,
        }
    }

    pub fn is_empty(&self) -> bool {
        PermKind::ALL.iter().all(|k| self.get(*k).is_none())
    }

    /// Fills every unset kind from `parent`.
    pub fn inherit(&mut self, parent: &Perms) {
        for kind in PermKind::ALL {
            if self.get(kind).is_none() {
                self.set(kind, parent.get(kind).cloned());
            }
        }
    }

    /// Replaces every kind that `patch` sets.
    pub fn overlay(&mut self, patch: &Perms) {
        for kind in PermKind::ALL {
            if let Some(who) = patch.get(kind) {
                self.set(kind, Some(who.clone()));
            }
        }
    }

    /// Effective permission, applying the system defaults to unset kinds.
    ///
    /// `can_see` and `can_read` default to anyone, `can_list` and
    /// `can_archive` follow `can_read`, upload and delete default to no one.
    /// Seeing is never granted without read access.
    pub fn allows(&self, kind: PermKind, identity: &Identity) -> bool {
        let explicit = |kind: PermKind| self.get(kind).map(|who| who.matches(identity));
        match kind {
            PermKind::Read => explicit(PermKind::Read).unwrap_or(true),
            PermKind::See => {
                explicit(PermKind::See).unwrap_or(true) && self.allows(PermKind::Read, identity)
            }
            PermKind::List | PermKind::Archive => {
                explicit(kind).unwrap_or_else(|| self.allows(PermKind::Read, identity))
            }
            PermKind::Upload | PermKind::Delete => explicit(kind).unwrap_or(false),
        }
    }
}

/// The requesting account together with every group it transitively belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    account: Option<String>,
    names: HashSet<String>,
}

impl Identity {
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Expands `account` through `source`. Unknown accounts resolve to an
    /// anonymous identity.
    pub fn resolve(account: &str, source: &dyn AccountSource) -> Self {
        if source.belongs(account).is_none() {
            debug!(account, "unknown account, treating request as anonymous");
            return Self::anonymous();
        }

        let mut names = HashSet::new();
        let mut pending = vec![account.to_string()];
        while let Some(name) = pending.pop() {
            if !names.insert(name.clone()) {
                continue;
            }
            if let Some(groups) = source.belongs(&name) {
                pending.extend(groups.iter().filter(|g| !names.contains(*g)).cloned());
            }
        }

        Self {
            account: Some(account.to_string()),
            names,
        }
    }

    pub fn account(&self) -> Option<&str> {
        self.account.as_deref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.account.is_some()
    }

    pub fn names(&self) -> &HashSet<String> {
        &self.names
    }
}

/// Answers group membership for identity expansion.
pub trait AccountSource: Send + Sync {
    /// Groups `account` directly belongs to, or `None` if the account is unknown.
    fn belongs(&self, account: &str) -> Option<&[String]>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub belongs: Vec<String>,
}

/// Account table as persisted next to the tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Accounts(pub IndexMap<String, Account>);

impl AccountSource for Accounts {
    fn belongs(&self, account: &str) -> Option<&[String]> {
        self.0.get(account).map(|a| a.belongs.as_slice())
    }
}
