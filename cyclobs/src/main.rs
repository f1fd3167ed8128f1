use clap::{ArgGroup, Parser};
use cyclobs::backtest::{daily_equity_curve, BacktestSimulator, HistoryIndex, StrategyPolicy};
use cyclobs::config::CleanerConfig;
use cyclobs::history::{download_event, update_history, PriceHistoryClient};
use cyclobs::report::{print_analysis, run_screener};
use cyclobs::{
    ClobClient, Config, Credentials, DataApiClient, Discovery, DryRunSubmitter, EventStore, FeedHandler,
    GammaClient, HistoryStore, JumpDetector, LiveTradingLoop, MarketFeedProcessor, MarketSource, OrderSubmitter,
    PositionSource, PositionWatcher, TradingConfig,
};
use rust_decimal::prelude::ToPrimitive;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(
    name = "cyclobs",
    about = "Order book trigger engine and hourly backtester for Polymarket",
    group(
        ArgGroup::new("mode")
            .required(true)
            .args(["data", "trigger", "jump", "history", "analyze", "backtest", "screener", "download_event"])
    )
)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Record markets of the configured tags and run entry triggers
    #[arg(long)]
    data: bool,

    /// Manage held positions with take-profit / stop-loss triggers
    #[arg(long)]
    trigger: bool,

    /// Alert on hourly price jumps
    #[arg(long)]
    jump: bool,

    /// Download hourly price histories
    #[arg(long)]
    history: bool,

    /// Print YES resolution rates per tag
    #[arg(long)]
    analyze: bool,

    /// Run the configured backtest
    #[arg(long)]
    backtest: bool,

    /// List markets in the jump target range
    #[arg(long)]
    screener: bool,

    /// Write minute price CSVs for every market of an event
    #[arg(long, value_name = "SLUG")]
    download_event: Option<String>,

    /// Run a decay parameter sweep instead of the configured strategy
    #[arg(long, requires = "backtest")]
    sweep: bool,

    /// Output path for backtest JSON or event CSVs
    #[arg(long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    // Set up logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log_level);
    let level = match log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .compact()
        .init();

    info!("cyclobs starting...");

    let gamma = GammaClient::with_base_url(&config.gamma_url);
    let prices = PriceHistoryClient::new(&config.clob_url);
    let history_dir = config.data_dir.join("history");

    if let Some(slug) = &args.download_event {
        let dir = args.output.clone().unwrap_or_else(|| config.data_dir.join("events").join(slug));
        let files = download_event(&gamma, &prices, slug, &dir).await?;
        info!(files = files, dir = %dir.display(), "Event download finished");
        return Ok(());
    }
    if args.history {
        let store = HistoryStore::open(&history_dir)?;
        let written = update_history(&gamma, &prices, &store).await?;
        info!(written = written, "History update finished");
        return Ok(());
    }
    if args.analyze {
        let store = HistoryStore::open(&history_dir)?;
        print_analysis(&store.all()?);
        return Ok(());
    }

    // Remaining modes need the trading configuration
    let trading = TradingConfig::from_file(&config.config_path)?;
    info!(path = %config.config_path.display(), "Configuration loaded");

    if args.backtest {
        return run_backtest(&trading, &history_dir, args.sweep, args.output.as_ref()).await;
    }
    if args.screener {
        let jump = trading.require_jump()?;
        let rows = run_screener(&gamma, &prices, jump).await?;
        println!("Found {} matching markets:", rows.len());
        for (i, row) in rows.iter().enumerate() {
            let marker = if row.jumped { "*" } else { " " };
            println!("{} {}. {}", marker, i + 1, row);
        }
        return Ok(());
    }

    let reconnect_delay = Duration::from_secs(config.reconnect_delay_secs);
    let open_positions = Arc::new(Mutex::new(0usize));

    if args.jump {
        let jump = trading.require_jump()?;
        let source = MarketSource::Jump {
            include_tags: jump.include_tags.clone(),
            exclude_tags: jump.exclude_tags.clone(),
        };
        let live = LiveTradingLoop::new(
            &config.ws_url,
            reconnect_delay,
            source,
            Discovery::new(gamma),
            JumpDetector::new(jump),
            Arc::new(DryRunSubmitter),
            open_positions,
        );
        live.run().await?;
        return Ok(());
    }

    if args.data {
        let data = trading.require_data()?;
        let credentials = if data.live { Some(Credentials::from_env()?) } else { None };
        let submitter = submitter(&config, credentials.as_ref())?;
        if let (Some(credentials), Some(cleaner)) = (&credentials, &trading.cleaner) {
            spawn_watcher(&config, credentials, cleaner, submitter.clone(), open_positions.clone());
        }

        let source = MarketSource::Tags {
            tag_slugs: data.tag_slugs.clone(),
            events: data.events.clone(),
            min_volume: data.min_volume.to_f64().unwrap_or(0.0),
        };
        let processor = MarketFeedProcessor::new(
            data.triggers.clone(),
            Vec::new(),
            chrono::Duration::seconds(data.buffer_time_span as i64),
            data.position_limit,
        );
        let store = EventStore::open(config.data_dir.join("events"))?;
        run_live(&config, source, Discovery::new(gamma), processor, submitter, open_positions, Some(store)).await?;
        return Ok(());
    }

    if args.trigger {
        let trigger = trading.require_trigger()?;
        let credentials = Credentials::from_env()?;
        let positions: Arc<dyn PositionSource> =
            Arc::new(DataApiClient::new(&config.data_api_url, &credentials.proxy_address));
        let submitter = submitter(&config, trigger.live.then_some(&credentials))?;
        if let Some(cleaner) = &trading.cleaner {
            spawn_watcher(&config, &credentials, cleaner, submitter.clone(), open_positions.clone());
        }

        let processor = MarketFeedProcessor::new(
            Vec::new(),
            trigger.triggers.clone(),
            chrono::Duration::hours(1),
            usize::MAX,
        );
        let source = MarketSource::Positions {
            slugs: processor.exit_slugs(),
        };
        let store = if trigger.record_data {
            Some(EventStore::open(config.data_dir.join("events"))?)
        } else {
            None
        };
        let discovery = Discovery::new(gamma).with_positions(positions);
        run_live(&config, source, discovery, processor, submitter, open_positions, store).await?;
    }

    Ok(())
}

/// Live order client when credentials are given, dry run otherwise.
fn submitter(
    config: &Config,
    credentials: Option<&Credentials>,
) -> Result<Arc<dyn OrderSubmitter>, Box<dyn std::error::Error>> {
    match credentials {
        Some(credentials) => Ok(Arc::new(ClobClient::new(&config.clob_url, credentials)?)),
        None => {
            info!("Dry run: orders are logged, not placed");
            Ok(Arc::new(DryRunSubmitter))
        }
    }
}

fn spawn_watcher(
    config: &Config,
    credentials: &Credentials,
    cleaner: &CleanerConfig,
    submitter: Arc<dyn OrderSubmitter>,
    open_positions: Arc<Mutex<usize>>,
) {
    let source: Arc<dyn PositionSource> =
        Arc::new(DataApiClient::new(&config.data_api_url, &credentials.proxy_address));
    let watcher = PositionWatcher::new(cleaner);
    info!(interval = cleaner.interval, expiration = cleaner.expiration, "Starting position watcher");
    tokio::spawn(watcher.run(source, submitter, open_positions));
}

async fn run_live<H: FeedHandler>(
    config: &Config,
    source: MarketSource,
    discovery: Discovery,
    handler: H,
    submitter: Arc<dyn OrderSubmitter>,
    open_positions: Arc<Mutex<usize>>,
    store: Option<EventStore>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut live = LiveTradingLoop::new(
        &config.ws_url,
        Duration::from_secs(config.reconnect_delay_secs),
        source,
        discovery,
        handler,
        submitter,
        open_positions,
    );
    if let Some(store) = store {
        live = live.with_store(store);
    }
    live.run().await?;
    Ok(())
}

async fn run_backtest(
    trading: &TradingConfig,
    history_dir: &std::path::Path,
    sweep: bool,
    output: Option<&PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let backtest = trading.require_backtest()?;
    let index = Arc::new(HistoryIndex::load(&HistoryStore::open(history_dir)?)?);
    let start = backtest.start.and_time(chrono::NaiveTime::MIN).and_utc();
    let end = backtest.end.and_time(chrono::NaiveTime::MIN).and_utc();
    let simulator = Arc::new(BacktestSimulator::new(index, start, end, backtest.strict));

    if sweep {
        let results = simulator.decay_sweep(&backtest.sweep_tags).await?;
        let json = serde_json::to_string_pretty(&results)?;
        match output {
            Some(path) => std::fs::write(path, json)?,
            None => println!("{}", json),
        }
        return Ok(());
    }

    let mut policy = StrategyPolicy::from(backtest.strategy.clone());
    let result = simulator.run(&mut policy)?;
    println!("{}", result);
    if let Some(path) = output {
        let curve = daily_equity_curve(&result.equity_curve);
        std::fs::write(path, serde_json::to_string_pretty(&curve)?)?;
        info!(path = %path.display(), samples = curve.len(), "Wrote daily equity curve");
    }
    Ok(())
}
