mod bundle;

use anyhow::Context;
use clap::Parser;
use portal_core::feeds::FeedsSource;
use portal_core::weather::WeatherSource;
use portal_core::{now_playing, platform, resolve_source, status, CacheStore, Config};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Resolve the portal's dynamic data and write it for the renderer.
#[derive(Parser, Debug)]
#[command(name = "portal-build", version)]
struct Args {
    /// Content directory (config.yaml, feeds.yaml, mock data)
    #[arg(long, default_value = "content")]
    content_dir: PathBuf,

    /// Cache directory for fetched data [default: platform cache dir]
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Where data.json is written
    #[arg(long, default_value = "dist")]
    output_dir: PathBuf,

    /// Config file [default: <content-dir>/config.yaml]
    #[arg(long)]
    config: Option<PathBuf>,

    /// Append logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn init_logging(log_file: Option<&PathBuf>) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,portal_core=debug"));

    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(file)
                        .with_ansi(false),
                )
                .with(filter)
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .with(filter)
                .init();
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.log_file.as_ref())?;

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| Config::find_in(&args.content_dir));
    let config = Config::load(&config_path)?;
    info!("Config loaded from: {:?}", config_path);

    let cache_dir = args.cache_dir.clone().unwrap_or_else(platform::cache_dir);
    std::fs::create_dir_all(&cache_dir)
        .with_context(|| format!("failed to create cache dir {}", cache_dir.display()))?;
    let store = CacheStore::new(&cache_dir);
    info!("Cache dir: {:?}", cache_dir);

    // One source at a time; none of these can fail the build.
    let links = resolve_source(&store, &FeedsSource::new(&config, &args.content_dir)).await;
    let weather = resolve_source(&store, &WeatherSource::new(&config)).await;
    let status = status::resolve(&store, &config).await;
    let now = now_playing::resolve(&store, &config, &args.content_dir).await;

    info!(
        links = %links.provenance,
        weather = %weather.provenance,
        status = %status.provenance,
        now = %now.provenance,
        "data sources resolved"
    );

    let bundle = bundle::Bundle::new(chrono::Local::now(), links, weather, status, now);
    std::fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("failed to create {}", args.output_dir.display()))?;
    let out = args.output_dir.join("data.json");
    let json = serde_json::to_string_pretty(&bundle)?;
    std::fs::write(&out, json).with_context(|| format!("failed to write {}", out.display()))?;

    info!("Wrote {:?}", out);
    Ok(())
}
