use std::io::{self, Write};
use std::process;

use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;
use verbatim::{
    cache::{CacheSnapshot, MemoryStore, MemoryStoreConfig, OverlayCache, OverlayConfig},
    config::{self, InspectArgs, ReplayArgs, Settings},
    error::AppError,
    replay, telemetry,
};

fn main() {
    if let Err(error) = run() {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_writer(io::stderr)
        .with_max_level(Level::ERROR)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    telemetry::init(&settings.logging)?;

    match cli_args.command {
        config::Command::Replay(args) => run_replay(&settings, args),
        config::Command::Inspect(args) => run_inspect(args),
    }
}

fn run_replay(settings: &Settings, args: ReplayArgs) -> Result<(), AppError> {
    let cache: OverlayCache<MemoryStore> = OverlayCache::with_store_config(
        OverlayConfig::from(&settings.cache),
        MemoryStoreConfig::from(&settings.store),
    );

    if let Some(path) = args.restore.as_deref() {
        cache.restore(CacheSnapshot::load(path)?)?;
        info!(path = %path.display(), "Restored snapshot");
    }

    let steps = replay::load_script(&args.script)?;
    let reports = replay::run(&cache, steps)?;

    let mut stdout = io::stdout().lock();
    for report in &reports {
        writeln!(stdout, "{}", serde_json::to_string(report)?)?;
    }

    if let Some(path) = args.extract.as_deref() {
        cache.extract(false).save(path)?;
        info!(path = %path.display(), "Saved snapshot");
    }

    Ok(())
}

fn run_inspect(args: InspectArgs) -> Result<(), AppError> {
    let snapshot = CacheSnapshot::load(&args.snapshot)?;
    let summary = replay::summarize(&snapshot);
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
