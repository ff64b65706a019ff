use std::path::PathBuf;

use sharevfs::{NodeStore, VfsNode};

use crate::error::{Result, SharevfsCliError};
use crate::utils;

pub async fn execute(
    store: &NodeStore,
    at: &str,
    source: PathBuf,
    name: Option<String>,
) -> Result<()> {
    let source = tokio::fs::canonicalize(&source).await.map_err(|e| {
        SharevfsCliError::Input(format!("cannot mount {}: {e}", source.display()))
    })?;
    if !tokio::fs::metadata(&source).await?.is_dir() {
        return Err(SharevfsCliError::Input(format!(
            "{} is not a directory",
            source.display()
        )));
    }

    let node = VfsNode::mount(name.as_deref(), &source);
    let shown = node
        .display_name()
        .map(|n| n.into_owned())
        .unwrap_or_default();
    store.add_node(at, node).await?;
    utils::print_success(&format!(
        "Mounted {} as {}/{}",
        source.display(),
        at.trim_end_matches('/'),
        shown
    ));
    Ok(())
}

pub async fn remove(store: &NodeStore, path: &str) -> Result<()> {
    let removed = store.remove_node(path).await?;
    let detail = match &removed.source {
        Some(source) => format!(" ({})", source.display()),
        None => String::new(),
    };
    utils::print_success(&format!("Removed {path}{detail}"));
    Ok(())
}
