//! gafferbot - autonomous fantasy-football manager
//!
//! Wires the event bus, agents and scheduler loops together. The
//! scheduler never sleeps on its own; the interval tasks here are the
//! cron-like driver calling its operations at wall-clock cadence.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use gafferbot_backend::agents::AgentOrchestrator;
use gafferbot_backend::analysis::{DcAnalyst, FixtureAnalyst, ValueAnalyst, XgAnalyst};
use gafferbot_backend::announce::{HttpTextGenerator, TextGenerator};
use gafferbot_backend::bus::EventBus;
use gafferbot_backend::config::{Config, DEFAULT_CONFIG_PATH};
use gafferbot_backend::coordinator::ManagerAgent;
use gafferbot_backend::events::payloads::TeamSelectionRequestedPayload;
use gafferbot_backend::events::{Event, EventKind};
use gafferbot_backend::gateway::{Cache, DataCollectorAgent, FplClient, MemoryCache, RedisCache};
use gafferbot_backend::league::LeagueIntelAgent;
use gafferbot_backend::learning::LearningAgent;
use gafferbot_backend::notify::Webhook;
use gafferbot_backend::optimizer::ChipStrategist;
use gafferbot_backend::prediction::PredictionService;
use gafferbot_backend::price::PriceMonitorAgent;
use gafferbot_backend::scheduler::GameweekScheduler;
use gafferbot_backend::storage::Database;

/// Broker connect attempts before startup is declared fatal.
const BUS_CONNECT_RETRIES: u32 = 5;
const BUS_CONNECT_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "gafferbot", about = "Autonomous fantasy-football manager")]
struct Args {
    /// Path to the JSON config file.
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full agent fleet and scheduler loops (default).
    Run,
    /// One-shot: fetch fresh upstream data and exit.
    Refresh,
    /// One-shot: request a team selection for a gameweek and exit.
    Decide {
        #[arg(long)]
        gameweek: i32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let config = Config::load(&args.config)?;

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::Refresh => refresh(config).await,
        Command::Decide { gameweek } => decide(config, gameweek).await,
    }
}

async fn connect_bus(config: &Config) -> Result<Arc<EventBus>> {
    let bus = Arc::new(EventBus::new(&config.redis_url, &config.channel_prefix));
    let mut attempt = 0;
    loop {
        match bus.connect().await {
            Ok(()) => return Ok(bus),
            Err(e) => {
                attempt += 1;
                if attempt >= BUS_CONNECT_RETRIES {
                    return Err(e).context("broker unavailable after retries");
                }
                warn!("Broker connect attempt {attempt} failed: {e}; retrying");
                sleep(BUS_CONNECT_BACKOFF).await;
            }
        }
    }
}

async fn build_cache(config: &Config) -> Arc<dyn Cache> {
    match redis::Client::open(config.redis_url.as_str()) {
        Ok(client) => match redis::aio::ConnectionManager::new(client).await {
            Ok(manager) => {
                return Arc::new(RedisCache::new(manager, config.channel_prefix.clone()))
            }
            Err(e) => warn!("Cache connection failed ({e}); using in-process cache"),
        },
        Err(e) => warn!("Cache client failed ({e}); using in-process cache"),
    }
    Arc::new(MemoryCache::new())
}

async fn run(config: Config) -> Result<()> {
    info!("Starting gafferbot");

    let db = Database::open(&config.database_path)?;
    let bus = connect_bus(&config).await?;
    let cache = build_cache(&config).await;

    let client = Arc::new(FplClient::new(
        config.api_base_url.clone(),
        cache,
        db.clone(),
    ));
    let prediction = Arc::new(PredictionService::new(db.clone()));
    let webhook = Arc::new(Webhook::new(config.webhook_url.clone()));
    let text_generator: Option<Arc<dyn TextGenerator>> = config
        .text_api_url
        .as_ref()
        .map(|url| Arc::new(HttpTextGenerator::new(url.clone())) as Arc<dyn TextGenerator>);

    let mut orchestrator = AgentOrchestrator::new();
    orchestrator.register(Arc::new(DataCollectorAgent::new(Arc::clone(&client))), Arc::clone(&bus));
    orchestrator.register(Arc::new(DcAnalyst::new(db.clone())), Arc::clone(&bus));
    orchestrator.register(Arc::new(FixtureAnalyst::new(db.clone())), Arc::clone(&bus));
    orchestrator.register(Arc::new(XgAnalyst::new(db.clone())), Arc::clone(&bus));
    orchestrator.register(Arc::new(ValueAnalyst::new(db.clone())), Arc::clone(&bus));
    orchestrator.register(Arc::new(ChipStrategist::new(db.clone())), Arc::clone(&bus));
    orchestrator.register(
        Arc::new(PriceMonitorAgent::new(db.clone(), Arc::clone(&client))),
        Arc::clone(&bus),
    );
    orchestrator.register(Arc::new(LearningAgent::new(db.clone())), Arc::clone(&bus));
    if let Some(league_id) = config.league_id {
        orchestrator.register(
            Arc::new(LeagueIntelAgent::new(
                db.clone(),
                Arc::clone(&client),
                league_id,
            )),
            Arc::clone(&bus),
        );
    }
    orchestrator.register(
        Arc::new(ManagerAgent::new(
            db.clone(),
            Arc::clone(&prediction),
            Arc::clone(&webhook),
            text_generator,
            config.team_id,
            config.league_id,
        )),
        Arc::clone(&bus),
    );
    orchestrator.start_all().await;
    if let Err(e) = bus
        .publish(&Event::new(EventKind::SystemStartup, serde_json::Map::new()).with_source("main"))
        .await
    {
        warn!("system.startup publish failed: {e}");
    }

    let scheduler = Arc::new(GameweekScheduler::new(Arc::clone(&client), Arc::clone(&bus)));
    spawn_scheduler_loops(Arc::clone(&scheduler));

    info!("gafferbot is up; waiting for shutdown signal");
    tokio::signal::ctrl_c().await.ok();
    info!("Shutdown signal received");

    if let Err(e) = bus
        .publish(&Event::new(EventKind::SystemShutdown, serde_json::Map::new()).with_source("main"))
        .await
    {
        warn!("system.shutdown publish failed: {e}");
    }
    orchestrator.stop_all().await;
    bus.disconnect().await;
    Ok(())
}

/// Cron-like drivers for the scheduler operations: deadline checks every
/// six hours, a daily refresh, pre/post price pulses around the nightly
/// update, a weekly review sweep.
fn spawn_scheduler_loops(scheduler: Arc<GameweekScheduler>) {
    {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(6 * 3600));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = scheduler.check_deadlines(chrono::Utc::now()).await {
                    error!("Deadline check failed: {e:#}");
                }
            }
        });
    }

    {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(24 * 3600));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = scheduler.daily_refresh().await {
                    error!("Daily refresh request failed: {e:#}");
                }
            }
        });
    }

    {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(24 * 3600));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = scheduler.price_pulse("pre").await {
                    error!("Pre-update price pulse failed: {e:#}");
                }
                sleep(Duration::from_secs(3600)).await;
                if let Err(e) = scheduler.price_pulse("post").await {
                    error!("Post-update price pulse failed: {e:#}");
                }
            }
        });
    }

    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(7 * 24 * 3600));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = scheduler.weekly_review().await {
                error!("Weekly review failed: {e:#}");
            }
        }
    });
}

async fn refresh(config: Config) -> Result<()> {
    let db = Database::open(&config.database_path)?;
    let cache = build_cache(&config).await;
    let client = FplClient::new(config.api_base_url.clone(), cache, db);

    match client.update_all_data(true).await? {
        Some(summary) => {
            info!(
                "Refreshed: {} players, {} teams, {} fixtures (current GW {:?})",
                summary.num_players, summary.num_teams, summary.num_fixtures, summary.gameweek
            );
            Ok(())
        }
        None => anyhow::bail!("upstream returned no data"),
    }
}

async fn decide(config: Config, gameweek: i32) -> Result<()> {
    let bus = connect_bus(&config).await?;
    let payload = TeamSelectionRequestedPayload {
        gameweek,
        free_transfers: None,
    };
    let receivers = bus
        .publish(
            &Event::from_payload(EventKind::TeamSelectionRequested, &payload).with_source("cli"),
        )
        .await?;
    info!("team.selection_requested for GW{gameweek} reached {receivers} subscribers");
    bus.disconnect().await;
    Ok(())
}
