use tokio_util::sync::CancellationToken;

use crate::perm::{AccountSource, Identity};

/// Per-request state handed to the walker: who is asking, and whether they
/// are still listening.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub identity: Identity,
    pub cancel: CancellationToken,
}

impl RequestContext {
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            cancel: CancellationToken::new(),
        }
    }

    pub fn anonymous() -> Self {
        Self::new(Identity::anonymous())
    }

    pub fn for_account(account: Option<&str>, accounts: &dyn AccountSource) -> Self {
        match account {
            Some(account) => Self::new(Identity::resolve(account, accounts)),
            None => Self::anonymous(),
        }
    }

    /// False once the connection behind this request has gone away.
    pub fn is_alive(&self) -> bool {
        !self.cancel.is_cancelled()
    }
}
