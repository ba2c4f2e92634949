use std::fs;
use std::process;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::error;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

use thredds_mirror::core::definition;
use thredds_mirror::notify::LogNotifier;
use thredds_mirror::ops::Reconciler;
use thredds_mirror::scan::NetcdfScanner;
use thredds_mirror::store::JsonFileStore;
use thredds_mirror::MirrorResult;

mod cli;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    if let Err(e) = run() {
        error!("{:#}", e);
        process::exit(1);
    }
}

fn run() -> MirrorResult<()> {
    let settings = cli::resolve(cli::Cli::parse());

    let json = fs::read_to_string(&settings.definitions_path).with_context(|| {
        format!(
            "failed to read definitions from `{}`",
            settings.definitions_path.display()
        )
    })?;
    let definitions = definition::parse_definitions(&json)?;

    let store = JsonFileStore::new(settings.metadata_path.clone());
    let scanner = NetcdfScanner::new();
    let notifier = LogNotifier::new();
    let reconciler = Reconciler::new(&store, &scanner, &notifier, &settings.config);

    let outputs = reconciler.run_all(&definitions);
    if outputs.is_empty() {
        bail!("no definitions were run");
    }
    // Per-file warnings and errors are part of a successful run; they
    // have already been summarised and notified.
    Ok(())
}
