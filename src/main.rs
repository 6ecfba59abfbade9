//! Market data streamer
//!
//! Subscribes to Bybit or Deribit channels and writes every decoded record as
//! one JSON line to stdout (or `--output`). Logs go to `logs/` and stderr.
//! Exits on Ctrl-C or when the stream fails for good.

use anyhow::Context;
use clap::{Parser, Subcommand};
use market_streams::exchanges::{bybit, deribit, Exchange};
use market_streams::infrastructure::logging::init_logging;
use market_streams::{Config, Credentials, StreamOptions, StreamSession, Subscription};
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "market-streams", version, about = "Stream venue market data as JSON lines")]
struct Cli {
    /// Override the venue endpoint
    #[arg(long, global = true)]
    url: Option<String>,

    /// Append records to this file instead of stdout
    #[arg(long, short, global = true)]
    output: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Bybit public trades (linear)
    BybitTrades {
        #[arg(required = true)]
        symbols: Vec<String>,
    },
    /// Bybit order book snapshots and deltas (linear)
    BybitOrderbook {
        #[arg(long, default_value_t = 50)]
        depth: u32,
        #[arg(required = true)]
        symbols: Vec<String>,
    },
    /// Bybit spot tickers
    BybitTickers {
        #[arg(required = true)]
        symbols: Vec<String>,
    },
    /// Deribit instrument tickers
    DeribitTicker {
        #[arg(long, default_value = "100ms")]
        interval: String,
        #[arg(required = true)]
        instruments: Vec<String>,
    },
    /// Deribit price indexes, e.g. btc_usd
    DeribitPriceIndex {
        #[arg(required = true)]
        indexes: Vec<String>,
    },
    /// Deribit portfolio updates (authenticated)
    DeribitPortfolio {
        #[arg(long, env = "DERIBIT_CLIENT_ID")]
        client_id: String,
        #[arg(long, env = "DERIBIT_CLIENT_SECRET", hide_env_values = true)]
        client_secret: String,
        #[arg(required = true)]
        currencies: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load().context("loading configuration")?;
    let _guards = init_logging(&config.logging).context("initializing logging")?;

    let ctx = CancellationToken::new();
    let signal_ctx = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, shutting down");
            signal_ctx.cancel();
        }
    });

    let out = open_output(cli.output.as_ref())?;
    let url = |default: &str| cli.url.clone().unwrap_or_else(|| default.to_string());
    let options = &config.stream;

    match &cli.command {
        Command::BybitTrades { symbols } => {
            let subs = symbols
                .iter()
                .map(|s| bybit::TradesSub { symbol: s.clone() })
                .collect();
            pump(bybit::trades_stream(url(bybit::LINEAR_URL), subs), options, ctx, out).await
        }
        Command::BybitOrderbook { depth, symbols } => {
            let subs = symbols
                .iter()
                .map(|s| bybit::OrderbookSub { symbol: s.clone(), depth: *depth })
                .collect();
            pump(bybit::orderbook_stream(url(bybit::LINEAR_URL), subs), options, ctx, out).await
        }
        Command::BybitTickers { symbols } => {
            let subs = symbols
                .iter()
                .map(|s| bybit::TickerSub { symbol: s.clone() })
                .collect();
            pump(bybit::spot_ticker_stream(url(bybit::SPOT_URL), subs), options, ctx, out).await
        }
        Command::DeribitTicker { interval, instruments } => {
            let subs = instruments
                .iter()
                .map(|i| deribit::TickerSub { instrument: i.clone(), interval: interval.clone() })
                .collect();
            let default = Exchange::Deribit.default_url();
            pump(deribit::ticker_stream(url(default), subs), options, ctx, out).await
        }
        Command::DeribitPriceIndex { indexes } => {
            let subs = indexes
                .iter()
                .map(|i| deribit::PriceIndexSub { index_name: i.clone() })
                .collect();
            let default = Exchange::Deribit.default_url();
            pump(deribit::price_index_stream(url(default), subs), options, ctx, out).await
        }
        Command::DeribitPortfolio { client_id, client_secret, currencies } => {
            let subs = currencies
                .iter()
                .map(|c| deribit::UserPortfolioSub { currency: c.clone() })
                .collect();
            let creds = Credentials::new(client_id.clone(), client_secret.clone());
            let session = deribit::user_portfolio_stream(url(deribit::PRIVATE_URL), creds, subs);
            pump(session, options, ctx, out).await
        }
    }
}

fn open_output(path: Option<&PathBuf>) -> anyhow::Result<Box<dyn Write + Send>> {
    Ok(match path {
        Some(path) => {
            let file = File::options()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening {}", path.display()))?;
            Box::new(BufWriter::new(file))
        }
        None => Box::new(io::stdout()),
    })
}

/// Drive one session until cancellation or a terminal error
async fn pump<T, U>(
    mut session: StreamSession<T, U>,
    options: &StreamOptions,
    ctx: CancellationToken,
    mut out: Box<dyn Write + Send>,
) -> anyhow::Result<()>
where
    T: Serialize + Send + 'static,
    U: Subscription,
{
    session.set_options(options.clone());
    session.start(ctx).await?;
    tracing::info!(stream = session.name(), "streaming");

    let mut result = Ok(());
    while let Some(item) = session.recv().await {
        match item {
            Ok(record) => {
                serde_json::to_writer(&mut out, &record)?;
                out.write_all(b"\n")?;
                out.flush()?;
            }
            Err(e) => {
                result = Err(anyhow::Error::new(e));
                break;
            }
        }
    }
    session.join().await;

    let stats = session.metrics().snapshot();
    tracing::info!(
        stream = session.name(),
        delivered = stats.messages_delivered,
        reconnects = stats.reconnects,
        uptime_s = stats.uptime_seconds,
        "stream finished"
    );
    result
}
