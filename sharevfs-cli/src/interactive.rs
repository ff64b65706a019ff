use console::style;
use futures_util::StreamExt;
use inquire::Select;
use sharevfs::{Depth, NodeStore, PermKind, RequestContext, ResolveOptions, walk_node};

use crate::commands;
use crate::error::Result;
use crate::utils;

const UP: &str = "⬆️  ..";
const EXIT: &str = "❌ Exit";

pub async fn run(store: &NodeStore, ctx: RequestContext) -> Result<()> {
    println!(
        "{}",
        style(format!(
            "🗂  Browsing the share {}",
            utils::describe_identity(&ctx.identity)
        ))
        .bold()
        .cyan()
    );

    let mut current = String::from("/");
    loop {
        println!();
        let folder = match store.resolve(&current, ResolveOptions::default()).await {
            Ok(folder) => folder,
            Err(e) => {
                utils::print_error(&format!("Cannot open {current}: {e}"));
                current = parent_of(&current);
                continue;
            }
        };

        let mut options = Vec::new();
        if current != "/" {
            options.push(UP.to_string());
        }
        if folder.can(PermKind::List, &ctx.identity) {
            let walk = walk_node(folder, ctx.clone(), Depth::Limited(0), "");
            let entries: Vec<String> = walk
                .map(|node| {
                    if node.is_dir {
                        format!("📁 {}/", node.name)
                    } else {
                        format!("📄 {}", node.name)
                    }
                })
                .collect()
                .await;
            options.extend(entries);
        } else {
            utils::print_error("Listing this folder is not allowed");
        }
        options.push(EXIT.to_string());

        let choice = Select::new(&current, options).prompt()?;
        match choice.as_str() {
            EXIT => {
                utils::print_success("Goodbye! 👋");
                break;
            }
            UP => current = parent_of(&current),
            entry => {
                let (is_dir, name) = match entry.strip_prefix("📁 ") {
                    Some(dir) => (true, dir.trim_end_matches('/')),
                    None => (false, entry.trim_start_matches("📄 ")),
                };
                let target = child_of(&current, name);
                if is_dir {
                    current = target;
                } else if let Err(e) = commands::resolve::execute(store, &ctx, &target, false).await
                {
                    utils::print_error(&format!("Failed to resolve {target}: {e}"));
                }
            }
        }
    }

    Ok(())
}

/// Display names are used as-is; percent-encode the characters the resolver
/// would otherwise read as escapes or separators.
fn child_of(folder: &str, name: &str) -> String {
    let encoded = name.replace('%', "%25");
    format!("{}/{}", folder.trim_end_matches('/'), encoded)
}

fn parent_of(path: &str) -> String {
    match path.trim_end_matches('/').rsplit_once('/') {
        Some(("", _)) | None => "/".to_string(),
        Some((parent, _)) => parent.to_string(),
    }
}
