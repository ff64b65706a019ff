use futures_util::StreamExt;
use sharevfs::{Depth, NodeStore, PermKind, RequestContext, ResolveOptions, walk_node};
use tabled::{Table, Tabled};

use crate::error::Result;
use crate::utils;

#[derive(Tabled)]
struct EntryInfo {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Size")]
    size: String,
    #[tabled(rename = "Read")]
    read: String,
    #[tabled(rename = "List")]
    list: String,
    #[tabled(rename = "Upload")]
    upload: String,
    #[tabled(rename = "Delete")]
    delete: String,
    #[tabled(rename = "Archive")]
    archive: String,
}

pub async fn execute(store: &NodeStore, ctx: RequestContext, path: &str) -> Result<()> {
    let folder = store.resolve(path, ResolveOptions::default()).await?;
    utils::print_banner("Listing", &folder.url, Some(&ctx.identity));

    if !folder.can(PermKind::List, &ctx.identity) {
        utils::print_error("Listing this folder is not allowed");
        return Ok(());
    }

    let identity = ctx.identity.clone();
    let entries: Vec<EntryInfo> = walk_node(folder, ctx, Depth::Limited(0), "")
        .map(|node| EntryInfo {
            name: if node.is_dir {
                format!("{}/", node.name)
            } else {
                node.name.clone()
            },
            size: node.size.map(utils::format_size).unwrap_or_default(),
            read: utils::mark(&node, PermKind::Read, &identity),
            list: utils::mark(&node, PermKind::List, &identity),
            upload: utils::mark(&node, PermKind::Upload, &identity),
            delete: utils::mark(&node, PermKind::Delete, &identity),
            archive: utils::mark(&node, PermKind::Archive, &identity),
        })
        .collect()
        .await;

    if entries.is_empty() {
        utils::print_info("Nothing to show.");
    } else {
        let len = entries.len();
        println!("{}", Table::new(entries));
        println!();
        utils::print_info(&format!("{len} entries"));
    }

    Ok(())
}
