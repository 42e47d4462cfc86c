use qchart_data::{
    candle::{self, ChartPeriod},
    config::PipelineConfig,
    filter::FilterPolicy,
    pipeline::{PipelineEvent, TradePipeline},
    trade::ForeignChain,
};

const HOUR_MS: i64 = 60 * 60 * 1000;

#[tokio::main]
async fn main() {
    // Initialise INFO Tracing log subscriber
    init_logging();

    let config = PipelineConfig::from_env().expect("pipeline configuration is valid");
    let pipeline = TradePipeline::from_config(config);

    // Restore whatever the last run cached before touching the network.
    pipeline.load();
    if pipeline.cache_stale() {
        println!("⚠️  cached data is older than a week; refreshing");
    }

    let chain = ForeignChain::Litecoin;
    let pair = chain.pair_key();

    // Watch progress while the fetch pages through the remote source.
    let mut events = pipeline.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                PipelineEvent::FetchProgress { pair, fetched } => {
                    println!("   … {pair}: {fetched} trades so far");
                }
                PipelineEvent::NamesProgress { remaining } => {
                    println!("   … {remaining} names left to resolve");
                }
                _ => {}
            }
        }
    });

    // Incremental when we already hold trades for the pair, full otherwise.
    let result = if pipeline.trades(&pair).is_empty() {
        println!("📡 full backfill for {pair}");
        pipeline.fetch_full(&pair).await
    } else {
        println!("📡 incremental update for {pair}");
        pipeline.fetch_incremental(&pair).await
    };

    match result {
        Ok(fetched) => println!("✅ fetched {fetched} trades for {pair}"),
        Err(error) => {
            eprintln!("fetch failed for {pair}: {error}");
            return;
        }
    }

    // Resolve counterparty display names for the summary below.
    pipeline.resolve_missing().await;

    let candles = pipeline.candles(
        &pair,
        HOUR_MS,
        ChartPeriod::Days(5),
        FilterPolicy::percentile_default(),
    );
    let sma7 = candle::sma(&candles, 7);

    println!("\n🕯️  {} hourly candles over the last 5 days", candles.len());
    for candle in candles.iter().rev().take(10).rev() {
        println!(
            "   {}  o {:.8}  h {:.8}  l {:.8}  c {:.8}  vol {:.2} QORT",
            candle.bucket_start, candle.open, candle.high, candle.low, candle.close, candle.volume
        );
    }
    if let Some((ts, mean)) = sma7.last() {
        println!("   SMA(7) @ {ts}: {mean:.8}");
    }

    let summary = pipeline.summary(&pair);
    println!("\n📊 {} ({})", pair, chain.ticker());
    println!("   trades: {}", summary.trade_count);
    println!("   volume: {:.2} QORT", summary.qort_volume);
    if let (Some(low), Some(high)) = (summary.price_low, summary.price_high) {
        println!("   price range: {low:.8} – {high:.8} {}", chain.ticker());
    }
    if let Some(top) = summary.top_buyer {
        println!(
            "   top buyer: {} ({:.2} QORT)",
            top.display_name.unwrap_or(top.address),
            top.qort_volume
        );
    }

    pipeline.close();
}

// Initialise an INFO `Subscriber` for `Tracing` logs
fn init_logging() {
    tracing_subscriber::fmt()
        // Filter messages based on the INFO level
        .with_env_filter(
            tracing_subscriber::filter::EnvFilter::builder()
                .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        // Use colored output in debug mode
        .with_ansi(cfg!(debug_assertions))
        // Install this Tracing subscriber as global default
        .init()
}
