use console::style;
use sharevfs::{NodeStore, PermKind, RequestContext, ResolveOptions};

use crate::error::Result;
use crate::utils;

pub async fn execute(store: &NodeStore, ctx: &RequestContext, path: &str, serve: bool) -> Result<()> {
    let opts = ResolveOptions {
        follow_default: serve,
    };
    let node = store.resolve(path, opts).await?;

    utils::print_banner("Resolved", &node.url, None);
    let kind = if node.is_dir { "folder" } else { "file" };
    let origin = if node.is_temporary {
        "materialized from disk"
    } else {
        "declared in the tree"
    };
    println!("{:<10} {}", style("kind").bold(), kind);
    println!("{:<10} {}", style("origin").bold(), origin);
    match &node.source {
        Some(source) => println!("{:<10} {}", style("source").bold(), source.display()),
        None => println!("{:<10} (virtual)", style("source").bold()),
    }
    if let Some(size) = node.size {
        println!("{:<10} {}", style("size").bold(), utils::format_size(size));
    }
    if let Some(mime) = node.mime_type() {
        println!("{:<10} {}", style("mime").bold(), mime);
    }
    if let Some(default) = &node.default {
        println!("{:<10} {}", style("default").bold(), default);
    }

    println!();
    println!(
        "{} {}",
        style("Permissions").bold().cyan(),
        utils::describe_identity(&ctx.identity)
    );
    for kind in PermKind::ALL {
        let rule = node
            .perms
            .get(kind)
            .map(|who| who.to_string())
            .unwrap_or_else(|| "default".to_string());
        println!(
            "  {} {:<12} {}",
            utils::mark(&node, kind, &ctx.identity),
            kind.as_str(),
            style(rule).dim()
        );
    }

    Ok(())
}
