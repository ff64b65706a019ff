use futures_util::{Stream, StreamExt};

use crate::resolve::Node;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Statistics {
    pub dir_count: u64,
    pub file_count: u64,
    pub total_size: u64,
}

impl Statistics {
    pub fn add(&mut self, node: &Node) {
        if node.is_dir {
            self.dir_count += 1;
        } else {
            self.file_count += 1;
            self.total_size += node.size.unwrap_or(0);
        }
    }
}

/// Drains `walk`, calling `on_entry` with the running totals after each node.
pub async fn collect_statistics<S, F>(walk: S, mut on_entry: F) -> Statistics
where
    S: Stream<Item = Node>,
    F: FnMut(&Node, &Statistics),
{
    let mut stats = Statistics::default();
    let mut walk = std::pin::pin!(walk);
    while let Some(node) = walk.next().await {
        stats.add(&node);
        on_entry(&node, &stats);
    }
    stats
}
