use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Subcommand;
use serde_json::Value;
use strata_common::signal_handler::ShutdownGuard;
use strata_common::CancellationToken;
use strata_store::{CloseMode, ColumnStore};
use tracing::info;

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Print the row and storage statistics of a store as JSON.
    Stats {
        /// The base path of the store.
        path: PathBuf,
    },
    /// Read every segment of a store and check it against the manifest.
    Verify {
        /// The base path of the store.
        path: PathBuf,
    },
    /// Rewrite segments to drop deleted rows and merge small segments.
    ///
    /// A shutdown signal cancels the compaction, leaving the store unchanged.
    Compact {
        /// The base path of the store.
        path: PathBuf,
    },
}

impl Commands {
    fn path(&self) -> &Path {
        match self {
            Commands::Stats { path } | Commands::Verify { path } | Commands::Compact { path } => {
                path
            },
        }
    }

    /// Logs what the command is about to do.
    pub fn display_startup_message(&self) {
        let action = match self {
            Commands::Stats { .. } => "Reading stats",
            Commands::Verify { .. } => "Verifying store",
            Commands::Compact { .. } => "Compacting store",
        };
        info!(path = %self.path().display(), "{action}");
    }

    /// Executes the command
    pub async fn execute(self) -> anyhow::Result<()> {
        let store = ColumnStore::open(self.path())
            .await
            .with_context(|| format!("Open store at {}", self.path().display()))?;

        let result = match &self {
            Commands::Stats { .. } => {
                print_json(serde_json::to_value(store.stats())?)
            },
            Commands::Verify { .. } => store
                .verify()
                .await
                .context("Verify store")
                .and_then(|report| print_json(serde_json::to_value(report)?)),
            Commands::Compact { .. } => compact(&store).await,
        };

        store
            .close(CloseMode::Flush)
            .await
            .context("Close store")?;
        result
    }
}

async fn compact(store: &ColumnStore) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let guard =
        ShutdownGuard::install("compaction", cancel.clone()).context("Install signal handlers")?;

    let result = store.compact_with(&cancel).await;
    drop(guard);

    let report = result.context("Compact store")?;
    print_json(serde_json::to_value(report)?)
}

fn print_json(value: Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
