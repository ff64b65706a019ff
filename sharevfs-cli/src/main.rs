use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use sharevfs::NodeStore;
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;
mod error;
mod interactive;
mod utils;

use error::Result;

#[derive(Parser)]
#[command(name = "sharevfs")]
#[command(about = "Inspect and edit a file-sharing virtual filesystem")]
#[command(version = "0.1.0")]
struct Cli {
    /// Tree document to use (default: $SHAREVFS_CONFIG or ~/.sharevfs/vfs.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Evaluate permissions for this account instead of an anonymous visitor
    #[arg(long = "as", global = true)]
    account: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List the entries of a folder
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },
    /// Show the folder tree
    Tree {
        #[arg(default_value = "/")]
        path: String,
        /// Maximum depth to show
        #[arg(short, long, default_value = "3")]
        depth: usize,
        /// Walk the whole subtree
        #[arg(long, conflicts_with = "depth")]
        all: bool,
    },
    /// Show how a path resolves and who may do what with it
    Resolve {
        path: String,
        /// Follow the folder's default entry, as a content request would
        #[arg(long)]
        serve: bool,
    },
    /// Count folders, files and bytes visible below a path
    Stats {
        #[arg(default_value = "/")]
        path: String,
    },
    /// Mount a real directory into the tree
    Mount {
        /// Directory on disk
        source: PathBuf,
        /// Folder of the tree to mount into
        #[arg(long, default_value = "/")]
        at: String,
        /// Name to show instead of the directory's own
        #[arg(long)]
        name: Option<String>,
    },
    /// Remove a declared node and everything declared below it
    Unmount { path: String },
    /// Set a permission on a declared node
    Set {
        path: String,
        /// see, read, list, upload, delete or archive
        permission: String,
        /// anyone, nobody, accounts, inherit, or a comma separated account list
        who: String,
    },
    /// Add or remove a mask on a declared node
    Mask {
        path: String,
        /// Glob matched against child names; prefix with **/ for any depth
        pattern: String,
        permission: Option<String>,
        who: Option<String>,
        #[arg(long, conflicts_with_all = ["permission", "who"])]
        remove: bool,
    },
    /// Browse the tree interactively
    Browse,
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            utils::print_error(&e.to_string());
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = config::get_config_path(cli.config);
    debug!(path = %config_path.display(), "opening tree document");
    let store = NodeStore::open(&config_path).await?;
    let ctx = store.context(cli.account.as_deref());

    match cli.command {
        Some(Commands::Ls { path }) => {
            commands::ls::execute(&store, ctx, &path).await?;
        }
        Some(Commands::Tree { path, depth, all }) => {
            let depth = if all {
                sharevfs::Depth::Unbounded
            } else {
                sharevfs::Depth::Limited(depth.saturating_sub(1))
            };
            commands::tree::execute(&store, ctx, &path, depth).await?;
        }
        Some(Commands::Resolve { path, serve }) => {
            commands::resolve::execute(&store, &ctx, &path, serve).await?;
        }
        Some(Commands::Stats { path }) => {
            commands::stats::execute(&store, ctx, &path).await?;
        }
        Some(Commands::Mount { source, at, name }) => {
            commands::mount::execute(&store, &at, source, name).await?;
        }
        Some(Commands::Unmount { path }) => {
            commands::mount::remove(&store, &path).await?;
        }
        Some(Commands::Set {
            path,
            permission,
            who,
        }) => {
            commands::set::execute(&store, &path, &permission, &who).await?;
        }
        Some(Commands::Mask {
            path,
            pattern,
            permission,
            who,
            remove,
        }) => {
            commands::set::mask(&store, &path, &pattern, permission, who, remove).await?;
        }
        Some(Commands::Browse) | None => {
            interactive::run(&store, ctx).await?;
        }
    }

    Ok(())
}
