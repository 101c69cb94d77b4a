use std::error::Error;
use std::time::Duration;

use clap::Parser;

use chunk_viewer::cache::TileState;
use chunk_viewer::config::{EvictionPolicy, ViewerConfig};
use chunk_viewer::explorer::run_explorer;
use chunk_viewer::reconciler::GridReconciler;
use chunk_viewer::seed::{local_seed, SeedClient};
use chunk_viewer::sink::MemorySink;
use chunk_viewer::transport::HttpTransport;
use chunk_viewer::viewport::{ContainerGeometry, PanCenter};

#[derive(Parser, Debug)]
#[command(name = "chunk_viewer")]
#[command(about = "Browse chunk biome maps served by a map server")]
struct Args {
    /// Base URL of the map server
    #[arg(long, default_value = "http://127.0.0.1:3001")]
    base_url: String,

    /// Seed text (a number, or any text which is hashed)
    #[arg(short, long)]
    seed: Option<String>,

    /// Convert seed text locally instead of asking the server
    #[arg(long)]
    local_seed: bool,

    /// World type
    #[arg(short = 't', long, default_value = "default")]
    world_type: String,

    /// Format version
    #[arg(short = 'V', long, default_value = "1.16")]
    version: String,

    /// Maximum tile requests in flight
    #[arg(short = 'c', long, default_value = "10")]
    concurrency: usize,

    /// Pixels per world unit
    #[arg(long, default_value = "2")]
    scale: f64,

    /// Seed input idle time before conversion, in milliseconds
    #[arg(long, default_value = "2000")]
    debounce_ms: u64,

    /// Drop tiles more than this many tiles off screen (default: keep all)
    #[arg(long)]
    evict_margin: Option<u32>,

    /// Fetch one viewport without a terminal UI and print a summary
    #[arg(long)]
    headless: bool,

    /// Container width in pixels (headless)
    #[arg(short = 'W', long, default_value = "800")]
    width: u32,

    /// Container height in pixels (headless)
    #[arg(short = 'H', long, default_value = "600")]
    height: u32,

    /// Pan center x in world units (headless)
    #[arg(long, default_value = "0", allow_hyphen_values = true)]
    x: f64,

    /// Pan center z in world units (headless)
    #[arg(long, default_value = "0", allow_hyphen_values = true)]
    z: f64,
}

impl Args {
    fn config(&self) -> ViewerConfig {
        ViewerConfig {
            base_url: self.base_url.clone(),
            max_concurrent: self.concurrency,
            scale: self.scale,
            seed_debounce: Duration::from_millis(self.debounce_ms),
            eviction: self
                .evict_margin
                .map_or(EvictionPolicy::Never, EvictionPolicy::ViewportMargin),
            ..ViewerConfig::default()
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    let config = args.config();
    config.validate()?;

    let runtime = tokio::runtime::Runtime::new()?;

    if args.headless {
        return runtime.block_on(run_headless(&args, config));
    }

    run_explorer(config, args.seed.clone(), args.local_seed, runtime.handle().clone())
}

async fn run_headless(args: &Args, config: ViewerConfig) -> Result<(), Box<dyn Error>> {
    let text = args.seed.clone().unwrap_or_default();
    let seed = if args.local_seed {
        local_seed(&text)
    } else {
        SeedClient::new(&config.base_url)?.convert(&text).await?
    };

    let transport = HttpTransport::new(&config.base_url)?;
    let mut grid = GridReconciler::new(config, transport, MemorySink::new(), tokio::runtime::Handle::current());

    let geometry = ContainerGeometry::new(args.width as f64, args.height as f64, PanCenter::new(args.x, args.z));
    grid.on_viewport_or_identity_change(geometry);
    let report = grid.set_identity(Some(seed), Some(&args.world_type), Some(&args.version));

    println!("Map {}", grid.identity());
    if let Some(range) = grid.range() {
        println!(
            "Tiles x [{}, {}) z [{}, {}): {} requested",
            range.x_min, range.x_max, range.z_min, range.z_max, report.requested
        );
    }

    grid.run_until_idle().await;

    let counts = grid.cache().state_counts();
    let count = |state: TileState| counts.get(&state).copied().unwrap_or(0);
    let (_, empty, images) = grid.sink().content_counts();
    println!("Loaded:  {} ({} with images, {} empty)", count(TileState::Loaded) + count(TileState::Empty), images, empty);
    println!("Failed:  {}", count(TileState::Failed));
    println!("Peak concurrent requests: {}", grid.queue_stats().high_water);

    Ok(())
}
