use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use dialoguer::{theme::ColorfulTheme, Confirm, Select};
use rust_decimal::Decimal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use polymarket_resolver::config::Config;
use polymarket_resolver::engine::{EngineOutcome, PricedOrder, TradeEngine, TradeRequest};
use polymarket_resolver::error::{AppError, Result};
use polymarket_resolver::fetcher::{ClobBook, GammaListing};
use polymarket_resolver::guard::GuardResult;
use polymarket_resolver::index::{SearchCandidate, SearchFilters};
use polymarket_resolver::market_refresh::HotMarketPoller;
use polymarket_resolver::paper::PaperVenue;
use polymarket_resolver::resolver::OutcomeSource;
use polymarket_resolver::types::{Category, OrderKind, Outcome, Side};

#[derive(Parser)]
#[command(name = "resolver")]
#[command(about = "Turn free-text trade instructions into Polymarket orders", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Rank markets matching a phrase
    Search {
        text: Vec<String>,
        #[arg(short, long, default_value = "5")]
        limit: usize,
        /// Include closed and inactive markets
        #[arg(long)]
        include_closed: bool,
        /// sports, weather, crypto, politics, economics or other
        #[arg(long)]
        category: Option<Category>,
        #[arg(long)]
        min_volume: Option<f64>,
    },
    /// Resolve, price-check and place an order on the paper venue
    Trade {
        text: Vec<String>,
        #[arg(long, value_enum)]
        side: SideArg,
        /// Shares, or USDC to spend for a market buy
        #[arg(long)]
        size: Decimal,
        #[arg(long, value_enum)]
        outcome: Option<OutcomeArg>,
        /// Limit price in (0, 1)
        #[arg(long, conflicts_with = "market")]
        price: Option<Decimal>,
        /// Cross the book one tick through the touch
        #[arg(long)]
        market: bool,
        #[arg(long)]
        post_only: bool,
        /// Skip the final "place this order?" prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Poll the listing and log the busiest markets
    Watch,
}

#[derive(Clone, Copy, ValueEnum)]
enum SideArg {
    Buy,
    Sell,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutcomeArg {
    Yes,
    No,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cfg, cli.command).await {
        error!("{e}");
        if let Some(hint) = e.guidance() {
            eprintln!("hint: {hint}");
        }
        std::process::exit(1);
    }
}

async fn run(cfg: Config, command: Command) -> Result<()> {
    let listing = Arc::new(GammaListing::new(&cfg)?);
    let book = Arc::new(ClobBook::new(&cfg)?);
    let venue = Arc::new(PaperVenue::new());
    let engine = TradeEngine::new(&cfg, listing, book, venue);

    match command {
        Command::Search {
            text,
            limit,
            include_closed,
            category,
            min_volume,
        } => {
            let filters = SearchFilters {
                include_closed,
                category,
                min_volume_24h: min_volume,
            };
            search(&engine, &text.join(" "), &filters, limit).await
        }
        Command::Trade {
            text,
            side,
            size,
            outcome,
            price,
            market,
            post_only,
            yes,
        } => {
            let side = match side {
                SideArg::Buy => Side::Buy,
                SideArg::Sell => Side::Sell,
            };
            let text = text.join(" ");
            let mut req = if market {
                TradeRequest::market(text, side, size)
            } else {
                let price = price.ok_or(AppError::InvalidRequest {
                    kind: OrderKind::Limit,
                    what: "a limit price",
                })?;
                TradeRequest::limit(text, side, size, price)
            };
            req.outcome_hint = outcome.map(|o| match o {
                OutcomeArg::Yes => Outcome::Yes,
                OutcomeArg::No => Outcome::No,
            });
            req.post_only = post_only;
            trade(&engine, req, yes).await
        }
        Command::Watch => {
            let poller = HotMarketPoller::new(
                Arc::clone(engine.cache()),
                Duration::from_secs(cfg.hot_poll_secs),
                cfg.hot_top_n,
            );
            info!("Watching hot markets every {}s (Ctrl-C to stop)", cfg.hot_poll_secs);
            tokio::select! {
                _ = poller.run() => {}
                _ = tokio::signal::ctrl_c() => info!("Stopping watch"),
            }
            Ok(())
        }
    }
}

async fn search(engine: &TradeEngine, text: &str, filters: &SearchFilters, limit: usize) -> Result<()> {
    let results = engine.search(text, filters, limit).await?;
    if results.stale {
        warn!("Market list could not be refreshed; results may be out of date");
    }
    if results.candidates.is_empty() {
        return Err(AppError::NotFound(text.to_string()));
    }
    for (i, c) in results.candidates.iter().enumerate() {
        println!("{:>2}. {}", i + 1, describe(c));
    }
    Ok(())
}

async fn trade(engine: &TradeEngine, mut req: TradeRequest, skip_confirm: bool) -> Result<()> {
    let theme = ColorfulTheme::default();

    loop {
        match engine.resolve_and_price(&req).await? {
            EngineOutcome::NeedsInput(candidates) => {
                let mut items: Vec<String> = candidates.iter().map(describe).collect();
                items.push("None of these".to_string());
                let pick = Select::with_theme(&theme)
                    .with_prompt(format!("\"{}\" matches several markets", req.text))
                    .items(&items)
                    .default(0)
                    .interact()
                    .map_err(prompt_error)?;
                let Some(chosen) = candidates.get(pick) else {
                    info!("No market chosen, nothing placed");
                    return Ok(());
                };
                req.market_id = Some(chosen.market.id.clone());
            }
            EngineOutcome::NeedsConfirmation { resolved, report } => {
                let GuardResult::Warn { deviation } = report.result else {
                    return Ok(());
                };
                let reference = report.reference_price.unwrap_or_default();
                println!("{}", resolved.market.question);
                let proceed = Confirm::with_theme(&theme)
                    .with_prompt(format!(
                        "{} {} @ {} is {}% away from the book ({}). Continue?",
                        report.side,
                        report.outcome,
                        report.price,
                        (deviation * Decimal::ONE_HUNDRED).round_dp(2),
                        reference
                    ))
                    .default(false)
                    .interact()
                    .map_err(prompt_error)?;
                if !proceed {
                    info!("Price not confirmed, nothing placed");
                    return Ok(());
                }
                req.confirm_warn = true;
            }
            EngineOutcome::Ready(order) => {
                print_order(&order);
                if !skip_confirm {
                    let place = Confirm::with_theme(&theme)
                        .with_prompt(format!("Place this order on the {} venue?", engine.venue_name()))
                        .default(false)
                        .interact()
                        .map_err(prompt_error)?;
                    if !place {
                        info!("Order not placed");
                        return Ok(());
                    }
                }
                let id = engine.submit(&order.intent).await?;
                println!("Order placed: {id}");
                return Ok(());
            }
        }
    }
}

fn describe(c: &SearchCandidate) -> String {
    let closes = c
        .market
        .close_time
        .map(|t| t.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "n/a".to_string());
    format!(
        "{} [score {:.2} | vol ${:.0} | closes {} | {}]",
        c.market.question, c.score, c.market.volume_24h, closes, c.market.id
    )
}

fn print_order(order: &PricedOrder) {
    let intent = &order.intent;
    let outcome_note = match order.resolved.outcome_source {
        OutcomeSource::Explicit => "",
        OutcomeSource::Inferred => " (from your wording)",
        OutcomeSource::Default => " (assumed)",
    };
    println!("Market:   {}", order.resolved.market.question);
    println!("Outcome:  {}{outcome_note}", intent.outcome());
    println!("Order:    {intent}");
    println!("Implied probability: {}%", (intent.implied_probability() * Decimal::ONE_HUNDRED).round_dp(1));
    if let Some(p) = order.report.payoff(intent.size(), intent.size_unit()) {
        println!(
            "If filled: {} shares, ${} at risk, ${} potential upside",
            p.shares.round_dp(2),
            p.at_risk.round_dp(2),
            p.upside.round_dp(2)
        );
    }
}

fn prompt_error(e: dialoguer::Error) -> AppError {
    match e {
        dialoguer::Error::IO(io) => AppError::Io(io),
    }
}
