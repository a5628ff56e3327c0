//! Waymark trail driver.
//!
//! Walks a marker trail from the terminal using the `#` line protocol:
//!
//! ```bash
//! cargo run -p waymark -- --catalog trail/markers.json --store .waymark
//! ```

mod config;
mod headless;

use anyhow::{Context, Result};
use config::{load_config, AppConfig, CliArgs};
use std::io;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, reload, EnvFilter};
use waymark_core::HeadlessTrail;

type ReloadHandle = reload::Handle<EnvFilter, tracing_subscriber::Registry>;

#[tokio::main]
async fn main() {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return;
    }

    let reload_handle = init_tracing();
    if let Err(err) = run(&args, &reload_handle).await {
        error!("{err:?}");
        std::process::exit(1);
    }
}

async fn run(args: &[String], reload_handle: &ReloadHandle) -> Result<()> {
    let cli = CliArgs::parse(args);
    let mut config: AppConfig = load_config(&cli.config_path);
    config.apply_env();
    cli.apply(&mut config);

    if std::env::var("RUST_LOG").is_err() {
        set_log_level(reload_handle, &config.log_level);
    }

    let headless = config.to_headless()?;
    info!(
        catalog = ?headless.catalog,
        store = %headless.store_dir.display(),
        policy = ?headless.session.write_policy,
        radius_m = headless.session.claim_radius_m,
        "Opening trail"
    );

    let trail = HeadlessTrail::open(headless)
        .await
        .context("Failed to open the trail")?;

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    headless::run_headless(&trail, stdin.lock(), &mut stdout)
        .await
        .context("Terminal I/O failed")?;

    if trail.is_degraded() {
        warn!("Exiting with unsaved progress; the next start resumes from the last saved claim");
    }
    Ok(())
}

fn init_tracing() -> ReloadHandle {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (filter_layer, handle) = reload::Layer::new(env_filter);
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_writer(io::stderr)
                .with_filter(filter_layer),
        )
        .init();
    handle
}

fn set_log_level(handle: &ReloadHandle, level: &str) {
    let parsed = EnvFilter::builder()
        .parse(level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    if let Err(err) = handle.modify(|filter| *filter = parsed) {
        warn!(%level, "Failed to update log level from config: {err}");
    }
}

fn print_help() {
    println!("Waymark - claim the markers of a trail in order");
    println!();
    println!("USAGE:");
    println!("    waymark [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    --config <PATH>    Configuration file (default: waymark.toml)");
    println!("    --catalog <LOC>    Marker catalog URL or file path");
    println!("    --store <DIR>      Directory for saved progress (default: .waymark)");
    println!("    --pessimistic      Only advance once progress is saved");
    println!("    -h, --help         Print help information");
    println!();
    println!("ENVIRONMENT:");
    println!("    WAYMARK_CATALOG_URL    Marker catalog location");
    println!("    WAYMARK_STORE_DIR      Directory for saved progress");
    println!("    RUST_LOG               Log filter (overrides log_level)");
}
