use std::sync::Arc;

use tokio::sync::mpsc;

use perp_quoter::backtest::metrics::{BacktestResult, EquityPoint};
use perp_quoter::backtest::{data, sim, BacktestEngine, DEFAULT_START_BALANCE};
use perp_quoter::cluster;
use perp_quoter::config::Config;
use perp_quoter::engine::quote::QuoteEngine;
use perp_quoter::oracle::PriceOracle;
use perp_quoter::types::{Balance, EngineEvent, Market};
use perp_quoter::venue::sim::{sim_feed, SimVenue};
use perp_quoter::venue::ws::{orderbook_feed, LiveVenue};
use perp_quoter::venue::VenueClient;

const USAGE: &str = "Usage: quoter <command> [options]

Commands:
  live      [-m <marketId>] [-t|--test]       start live quoting
  backtest  [-d <file.json|file.csv>] [-s <steps>] [-o <out.json|out.csv>]
  simulate  [-s <steps>] [-t illiquid|trending|ranging] [-o <out.json>]
  test      configuration, credentials, and venue connectivity checks";

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("LOG_LEVEL", "info"))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let code = match args.get(1).map(String::as_str) {
        Some("live") => run_live(&args[2..]).await,
        Some("backtest") => run_backtest(&args[2..]).await,
        Some("simulate") => run_simulate(&args[2..]),
        Some("test") => run_doctor().await,
        _ => {
            eprintln!("{}", USAGE);
            1
        }
    };
    std::process::exit(code);
}

// ─── Flag helpers ───

fn flag_value<'a>(args: &'a [String], names: &[&str]) -> Option<&'a str> {
    args.iter()
        .position(|a| names.contains(&a.as_str()))
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn has_flag(args: &[String], names: &[&str]) -> bool {
    args.iter().any(|a| names.contains(&a.as_str()))
}

fn time_seed() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}

// ─── live ───

async fn run_live(args: &[String]) -> i32 {
    let config = Config::from_env();
    if let Err(e) = config.validate() {
        log::error!("[MAIN] {}", e);
        return 1;
    }

    let paper = has_flag(args, &["-t", "--test"]);
    let market_filter: Option<u32> = flag_value(args, &["-m"]).and_then(|v| v.parse().ok());

    // With process groups configured, the parent becomes the supervisor and
    // each worker re-enters `live` with a MARKETS assignment.
    if config.cluster.enabled() && !cluster::is_worker() && !paper {
        cluster::run_supervisor(&config).await;
        return 0;
    }

    let (feed_tx, feed_rx) = mpsc::channel::<EngineEvent>(4096);

    // Venue + orderbook feed
    let venue: Arc<dyn VenueClient> = if paper {
        log::info!("[MAIN] Paper mode: simulated venue, no credentials required");
        let venue = Arc::new(SimVenue::new(
            paper_markets(),
            Balance {
                total: 10_000.0,
                available: 10_000.0,
            },
        ));
        let markets = venue.get_all_markets().await.unwrap_or_default();
        let tx = feed_tx.clone();
        tokio::spawn(async move {
            sim_feed(tx, markets, 100.0, 500, time_seed()).await;
        });
        venue
    } else {
        let (venue, sub_rx) = match LiveVenue::new(&config) {
            Ok(pair) => pair,
            Err(e) => {
                log::error!("[MAIN] Venue init failed: {}", e);
                return 1;
            }
        };
        let tx = feed_tx.clone();
        let ws_url = config.web_server_url.clone();
        tokio::spawn(async move {
            orderbook_feed(tx, ws_url, sub_rx).await;
        });
        Arc::new(venue)
    };

    // Market universe, narrowed by -m and by a worker's MARKETS assignment.
    let mut markets = match venue.get_all_markets().await {
        Ok(m) => m,
        Err(e) => {
            log::error!("[MAIN] Market listing failed: {}", e);
            return 1;
        }
    };
    if let Some(id) = market_filter {
        markets.retain(|m| m.id == id);
    }
    if let Some(assigned) = cluster::worker_markets_from_env() {
        markets.retain(|m| assigned.contains(&m.id));
    }
    if markets.is_empty() {
        log::error!("[MAIN] No markets to quote");
        return 1;
    }
    log::info!(
        "[MAIN] Quoting {} market(s): {}",
        markets.len(),
        markets
            .iter()
            .map(|m| m.symbol.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let oracle = config
        .oracle
        .enabled
        .then(|| Arc::new(PriceOracle::new(config.oracle.clone())));

    // Heartbeat: periodic safety tick.
    {
        let tx = feed_tx.clone();
        let interval_ms = config.requote_interval_ms;
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(tokio::time::Duration::from_millis(interval_ms.max(1)));
            loop {
                interval.tick().await;
                if tx.send(EngineEvent::Tick).await.is_err() {
                    break;
                }
            }
        });
    }

    // Signals → graceful shutdown through the same event channel.
    {
        let tx = feed_tx.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            log::info!("[MAIN] Signal received, shutting down");
            let _ = tx.send(EngineEvent::Shutdown).await;
        });
    }

    if cluster::is_worker() {
        let ids: Vec<u32> = markets.iter().map(|m| m.id).collect();
        cluster::spawn_worker_ipc(feed_tx.clone(), ids.clone());
        cluster::emit(&cluster::IpcMessage::Status {
            worker_id: cluster::worker_id_from_env(),
            markets: ids,
            state: "starting".into(),
        });
    }

    let mut engine = QuoteEngine::new(config, venue, oracle, markets);
    if let Err(e) = engine.startup().await {
        log::error!("[MAIN] Engine startup failed: {}", e);
        return 1;
    }
    engine.run(feed_rx).await;
    log::info!("[MAIN] Shutdown complete");
    0
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn paper_markets() -> Vec<Market> {
    vec![
        Market {
            id: 0,
            symbol: "SOL-PERP".into(),
            tick_size: 0.01,
            min_size: 0.01,
            max_leverage: 10.0,
        },
        Market {
            id: 1,
            symbol: "ETH-PERP".into(),
            tick_size: 0.05,
            min_size: 0.001,
            max_leverage: 10.0,
        },
    ]
}

// ─── backtest ───

async fn run_backtest(args: &[String]) -> i32 {
    let config = Config::from_env();
    if let Err(e) = config.validate() {
        log::error!("[MAIN] {}", e);
        return 1;
    }

    let bars = match flag_value(args, &["-d"]) {
        Some(path) => match data::load_bars(path) {
            Ok(bars) => {
                log::info!("[MAIN] Loaded {} bars from {}", bars.len(), path);
                bars
            }
            Err(e) => {
                log::error!("[MAIN] Failed to load {}: {}", path, e);
                return 1;
            }
        },
        None => {
            let steps = flag_value(args, &["-s"])
                .and_then(|v| v.parse().ok())
                .unwrap_or(1000);
            log::info!("[MAIN] No data file, generating {} synthetic bars", steps);
            sim::generate(&sim::SimParams {
                steps,
                seed: time_seed(),
                ..sim::SimParams::default()
            })
        }
    };
    if bars.is_empty() {
        log::error!("[MAIN] No bars to replay");
        return 1;
    }

    let mut engine = BacktestEngine::new(config, DEFAULT_START_BALANCE, time_seed());
    let result = engine.run(&bars);
    print_backtest_summary(&result, engine.equity());

    if let Some(out) = flag_value(args, &["-o"]) {
        let written = if out.to_lowercase().ends_with(".csv") {
            data::export_csv(out, engine.equity())
        } else {
            data::export_json(out, &result, engine.equity())
        };
        match written {
            Ok(()) => log::info!("[MAIN] Results written to {}", out),
            Err(e) => {
                log::error!("[MAIN] Export failed: {}", e);
                return 1;
            }
        }
    }
    0
}

fn print_backtest_summary(result: &BacktestResult, equity: &[EquityPoint]) {
    println!("╔══════════════════════════════════════════════════╗");
    println!("║  BACKTEST RESULTS                                ║");
    println!("╚══════════════════════════════════════════════════╝");
    println!("  Start balance    {:>12.2}", result.start_balance);
    println!("  End balance      {:>12.2}", result.end_balance);
    println!("  Total PnL        {:>+12.2}", result.total_pnl);
    println!("  Total volume     {:>12.2}", result.total_volume);
    println!(
        "  Trades           {:>12} ({} W / {} L, {:.1}% win rate)",
        result.num_trades,
        result.num_wins,
        result.num_losses,
        result.win_rate * 100.0
    );
    println!("  Fill rate        {:>11.1}%", result.fill_rate * 100.0);
    println!("  Avg spread       {:>12.5}", result.avg_spread);
    println!("  Sharpe           {:>12.2}", result.sharpe_ratio);
    println!(
        "  Max drawdown     {:>11.2}% (avg {:.2}%, longest {} bars)",
        result.max_drawdown * 100.0,
        result.avg_drawdown * 100.0,
        result.max_drawdown_duration_bars
    );
    println!("  Calmar           {:>12.2}", result.calmar_ratio);
    println!(
        "  Avg win/loss     {:>+12.4} / {:.4} (PF {:.2})",
        result.avg_win, result.avg_loss, result.profit_factor
    );
    println!(
        "  Largest win/loss {:>+12.4} / {:.4}",
        result.largest_win, result.largest_loss
    );

    if equity.len() > 1 {
        let max = equity.iter().map(|p| p.equity).fold(f64::MIN, f64::max);
        let min = equity.iter().map(|p| p.equity).fold(f64::MAX, f64::min);
        let range = (max - min).max(1e-9);
        let bars = ['\u{2581}', '\u{2582}', '\u{2583}', '\u{2584}', '\u{2585}', '\u{2586}', '\u{2587}', '\u{2588}'];
        let width = 64.min(equity.len());
        let step = equity.len() as f64 / width as f64;
        let curve: String = (0..width)
            .map(|i| {
                let p = &equity[(i as f64 * step) as usize];
                let idx = ((p.equity - min) / range * 7.0).round() as usize;
                bars[idx.min(7)]
            })
            .collect();
        println!("  Equity           {}", curve);
    }
}

// ─── simulate ───

fn run_simulate(args: &[String]) -> i32 {
    let steps = flag_value(args, &["-s"])
        .and_then(|v| v.parse().ok())
        .unwrap_or(10_000);
    let scenario = match flag_value(args, &["-t"]) {
        Some(name) => match sim::Scenario::parse(name) {
            Some(s) => Some(s),
            None => {
                log::error!("[MAIN] Unknown scenario '{}'", name);
                return 1;
            }
        },
        None => None,
    };

    let bars = sim::generate(&sim::SimParams {
        steps,
        scenario,
        seed: time_seed(),
        ..sim::SimParams::default()
    });
    let first = bars.first().map(|b| b.open).unwrap_or(0.0);
    let last = bars.last().map(|b| b.close).unwrap_or(0.0);
    let high = bars.iter().map(|b| b.high).fold(f64::MIN, f64::max);
    let low = bars.iter().map(|b| b.low).fold(f64::MAX, f64::min);
    log::info!(
        "[SIM] {} bars ({:?}): open {:.2} close {:.2} range [{:.2}, {:.2}]",
        bars.len(),
        scenario,
        first,
        last,
        low,
        high
    );

    if let Some(out) = flag_value(args, &["-o"]) {
        if let Err(e) = data::save_bars_json(out, &bars) {
            log::error!("[MAIN] Export failed: {}", e);
            return 1;
        }
        log::info!("[MAIN] Bars written to {}", out);
    }
    0
}

// ─── test ───

async fn run_doctor() -> i32 {
    let config = Config::from_env();

    match config.validate() {
        Ok(()) => log::info!("[TEST] Config: ok"),
        Err(e) => {
            log::error!("[TEST] Config: {}", e);
            return 1;
        }
    }

    if config.private_key.is_none() {
        log::error!("[TEST] Credentials: PRIVATE_KEY_BASE58 is not set");
        return 1;
    }
    log::info!("[TEST] Credentials: present");
    log::info!("[TEST] RPC endpoint: {}", config.rpc_endpoint);
    log::info!("[TEST] Venue WS: {}", config.web_server_url);

    let (venue, _sub_rx) = match LiveVenue::new(&config) {
        Ok(pair) => pair,
        Err(e) => {
            log::error!("[TEST] Venue init: {}", e);
            return 1;
        }
    };
    match venue.get_all_markets().await {
        Ok(markets) => {
            log::info!("[TEST] Venue connectivity: ok ({} markets)", markets.len());
            for m in &markets {
                log::info!(
                    "[TEST]   {} {} tick {} min {} lev {}x",
                    m.id,
                    m.symbol,
                    m.tick_size,
                    m.min_size,
                    m.max_leverage
                );
            }
        }
        Err(e) => {
            log::error!("[TEST] Venue connectivity: {}", e);
            return 1;
        }
    }

    log::info!("[TEST] All checks passed");
    0
}
