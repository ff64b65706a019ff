use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use sharevfs::stats::collect_statistics;
use sharevfs::{Depth, NodeStore, PermKind, RequestContext, ResolveOptions, walk_node};

use crate::error::Result;
use crate::utils;

pub async fn execute(store: &NodeStore, ctx: RequestContext, path: &str) -> Result<()> {
    let folder = store.resolve(path, ResolveOptions::default()).await?;
    utils::print_banner("Statistics for", &folder.url, Some(&ctx.identity));
    if !folder.can(PermKind::List, &ctx.identity) {
        utils::print_error("Listing this folder is not allowed");
        return Ok(());
    }

    // Ctrl-C stops the walk instead of killing the process mid-line.
    let cancel = ctx.cancel.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ "));
    }
    pb.enable_steady_tick(Duration::from_millis(100));

    let cancel = ctx.cancel.clone();
    let walk = walk_node(folder, ctx, Depth::Unbounded, "");
    let stats = collect_statistics(walk, |node, stats| {
        pb.set_message(format!(
            "{} entries, {} - {}",
            stats.dir_count + stats.file_count,
            utils::format_size(stats.total_size),
            node.path
        ));
    })
    .await;
    pb.finish_and_clear();
    interrupt.abort();

    if cancel.is_cancelled() {
        utils::print_info("Interrupted, totals are partial.");
    }
    println!("Total folders: {}", stats.dir_count);
    println!("Total files: {}", stats.file_count);
    println!("Total size: {}", utils::format_size(stats.total_size));

    Ok(())
}
