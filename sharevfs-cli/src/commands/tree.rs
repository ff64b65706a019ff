use std::collections::HashMap;

use futures_util::StreamExt;
use sharevfs::{Depth, NodeStore, PermKind, RequestContext, ResolveOptions, walk_node};

use crate::error::Result;
use crate::utils;

#[derive(Debug, Default)]
struct TreeNode {
    name: String,
    is_dir: bool,
    children: HashMap<String, TreeNode>,
}

impl TreeNode {
    /// Walk entries arrive parents first, so every prefix already exists.
    fn add_path(&mut self, path: &str, is_dir: bool) {
        let mut current = self;
        for component in path.split('/') {
            current = current
                .children
                .entry(component.to_string())
                .or_insert_with(|| TreeNode {
                    name: component.to_string(),
                    ..Default::default()
                });
        }
        current.is_dir = is_dir;
    }

    fn print(&self, depth: usize, is_last: bool, prefix: &str) {
        let new_prefix = if depth == 0 {
            println!("{}", &self.name);
            prefix.to_string()
        } else {
            let connector = if is_last { "└── " } else { "├── " };
            let symbol = if self.is_dir { "/" } else { "" };
            println!("{}{}{}{}", prefix, connector, &self.name, symbol);
            format!("{}{}", prefix, if is_last { "    " } else { "│   " })
        };

        let mut sorted_children: Vec<&TreeNode> = self.children.values().collect();
        sorted_children.sort_by(|a, b| a.name.cmp(&b.name));
        let total = sorted_children.len();
        for (index, child) in sorted_children.iter().enumerate() {
            child.print(depth + 1, index == total - 1, &new_prefix);
        }
    }
}

pub async fn execute(store: &NodeStore, ctx: RequestContext, path: &str, depth: Depth) -> Result<()> {
    let folder = store.resolve(path, ResolveOptions::default()).await?;
    utils::print_banner("Tree of", &folder.url, Some(&ctx.identity));
    if !folder.can(PermKind::List, &ctx.identity) {
        utils::print_error("Listing this folder is not allowed");
        return Ok(());
    }

    let mut root = TreeNode {
        name: folder.url.clone(),
        is_dir: true,
        ..Default::default()
    };
    let mut walk = Box::pin(walk_node(folder, ctx, depth, ""));
    while let Some(node) = walk.next().await {
        root.add_path(&node.path, node.is_dir);
    }
    root.print(0, true, "");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_path() {
        let mut root = TreeNode::default();
        root.add_path("usr", true);
        root.add_path("usr/bin", true);
        root.add_path("usr/bin/ls", false);
        let bin = &root.children["usr"].children["bin"];
        assert!(bin.is_dir);
        assert!(!bin.children["ls"].is_dir);
    }
}
