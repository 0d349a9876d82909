//! # Workitem Replica CLI (`wir`)
//!
//! ## Usage
//!
//! ```bash
//! wir --config ./config/wir.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `wir init` | Create the SQLite database and run schema migrations |
//! | `wir sync` | Bring the replica up to date and refresh the index |
//! | `wir sync-metadata` | Refresh item types, states, and icons |
//! | `wir search "<query>"` | Fuzzy search the replica |
//! | `wir recent` | List the most recently changed items |
//! | `wir reset` | Drop the index snapshot and cached metadata |
//! | `wir test-connection` | Check credentials against the remote |
//! | `wir watch` | Poll the remote until interrupted |
//! | `wir serve` | Start the RPC server (and poll in the background) |

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use workitem_replica::config::{self, Config};
use workitem_replica::context::{test_connection, AppContext};
use workitem_replica::index_manager::BuildStage;
use workitem_replica::progress::{ProgressMode, ProgressReporter};
use workitem_replica::sync::SyncRequest;
use workitem_replica::{db, migrate, poller, search, server};
use workitem_replica_core::models::LocalRecord;

/// Workitem Replica: a local, searchable copy of your work items.
#[derive(Parser)]
#[command(name = "wir", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/wir.toml")]
    config: PathBuf,

    /// Progress output on stderr. Defaults to `human` on a TTY, else `off`.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressArg>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProgressArg {
    Off,
    Human,
    Json,
}

impl From<ProgressArg> for ProgressMode {
    fn from(arg: ProgressArg) -> Self {
        match arg {
            ProgressArg::Off => ProgressMode::Off,
            ProgressArg::Human => ProgressMode::Human,
            ProgressArg::Json => ProgressMode::Json,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Sync the replica with the remote.
    ///
    /// An empty replica is fully populated; otherwise only changed items are
    /// fetched. The index snapshot is rebuilt when requested or when the
    /// replica changed.
    Sync {
        /// Rebuild the search index even if nothing changed.
        #[arg(long)]
        rebuild_index: bool,
    },

    /// Refresh item type metadata and icons.
    SyncMetadata,

    /// Fuzzy search the replica.
    Search {
        query: String,

        /// Maximum number of results. Defaults to `[index].search_limit`.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// List the most recently changed items.
    Recent,

    /// Clear the index snapshot and the cached metadata.
    Reset,

    /// Check the configured credentials.
    TestConnection,

    /// Poll the remote on the configured interval until Ctrl-C.
    Watch,

    /// Start the RPC server.
    Serve {
        /// Do not poll in the background.
        #[arg(long)]
        no_poll: bool,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Render bus events until every publisher is gone.
fn spawn_reporter(ctx: &AppContext, reporter: Box<dyn ProgressReporter>) -> tokio::task::JoinHandle<()> {
    let mut receiver = ctx.events.subscribe();
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => reporter.report(&event),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn print_items(items: &[LocalRecord]) {
    if items.is_empty() {
        println!("No results.");
        return;
    }
    for item in items {
        println!(
            "{:>7}  {:<12} {:<10} {:<20} {}",
            item.id,
            item.type_name,
            item.state,
            item.assignee,
            item.title
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg: Config = config::load_config(&cli.config)?;

    if let Commands::Init = cli.command {
        let pool = db::connect(&cfg).await?;
        migrate::run_migrations(&pool).await?;
        pool.close().await;
        println!("Database initialized successfully.");
        return Ok(());
    }

    let mode = cli
        .progress
        .map(ProgressMode::from)
        .unwrap_or_else(ProgressMode::default_for_tty);
    let ctx = Arc::new(AppContext::from_config(&cfg).await?);
    let reporter = spawn_reporter(&ctx, mode.reporter());

    // Errors surface only after the reporter has flushed its progress.
    let outcome = run(cli.command, &ctx, &cfg).await;

    drop(ctx);
    let _ = reporter.await;
    outcome
}

async fn run(command: Commands, ctx: &Arc<AppContext>, cfg: &Config) -> anyhow::Result<()> {
    match command {
        Commands::Init => {}
        Commands::Sync { rebuild_index } => {
            let summary = ctx
                .sync
                .sync(SyncRequest { rebuild_index })
                .await
                .unwrap_or_default();
            // A one-shot process never builds in the background, so persist
            // the snapshot here whenever the replica moved.
            if !rebuild_index && summary.is_dirty() && !ctx.index.is_built() {
                ctx.index.build_index(&|_: BuildStage| {}).await?;
            }
            println!("{}", summary.message());
        }
        Commands::SyncMetadata => {
            match ctx.metadata.sync_metadata(ctx.remote.as_ref()).await {
                Some(summary) => println!(
                    "{} types, {} icons downloaded",
                    summary.type_count, summary.new_fetch_count
                ),
                None => anyhow::bail!("Metadata sync failed"),
            }
        }
        Commands::Search { query, limit } => {
            let items = search::search(
                &ctx.index,
                ctx.replica.as_ref(),
                &ctx.metadata.map(),
                &query,
                limit.unwrap_or(ctx.search_limit),
            )
            .await?;
            print_items(&items);
        }
        Commands::Recent => {
            let items = search::recent(ctx.replica.as_ref()).await?;
            print_items(&items);
        }
        Commands::Reset => {
            ctx.index.reset().await?;
            ctx.metadata.reset().await?;
            println!("Index snapshot and metadata cleared.");
        }
        Commands::TestConnection => {
            let status = test_connection(ctx.remote.as_ref()).await;
            println!("{}", status.message);
            if status.status != "success" {
                anyhow::bail!("Connection test failed");
            }
        }
        Commands::Watch => {
            poller::run_until(ctx.clone(), cfg.sync.poll_interval(), async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await;
        }
        Commands::Serve { no_poll } => {
            if !no_poll {
                let background = ctx.clone();
                let interval = cfg.sync.poll_interval();
                tokio::spawn(async move {
                    poller::run_until(background, interval, std::future::pending()).await;
                });
            }
            server::run_server(ctx.clone(), &cfg.server.bind).await?;
        }
    }

    Ok(())
}
