use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use rulebot::adapters::{Notification, NotificationSink, Notifier, PostgresStore, WebhookNotifier};
use rulebot::config::AppConfig;
use rulebot::coordination::{install_signal_handlers, KillReason, KillSwitch, Shutdown};
use rulebot::domain::Frequency;
use rulebot::exchange::build_broker_client;
use rulebot::persistence::{MemoryStore, RuleStore};
use rulebot::services::{RuleEngine, Scheduler};
use rulebot::strategy::Expr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

mod main_runtime;

use main_runtime::{init_logging, init_logging_simple};

#[derive(Parser)]
#[command(name = "rulebot", version, about = "Rule-driven stock trading bot")]
struct Cli {
    /// Configuration directory
    #[arg(long, global = true, env = "RULEBOT_CONFIG_DIR", default_value = "config")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the fast and slow rule cadences until stopped
    Run {
        /// Paper-trade: simulated orders, rules read once from the database
        #[arg(long)]
        dry_run: bool,
        /// Start with the kill switch engaged
        #[arg(long)]
        liquidate: bool,
    },
    /// Load and validate the configuration
    CheckConfig,
    /// Parse a rule predicate and print its syntax tree
    CheckRule { expr: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { dry_run, liquidate } => run(&cli.config, dry_run, liquidate).await,
        Commands::CheckConfig => {
            init_logging_simple();
            check_config(&cli.config)
        }
        Commands::CheckRule { expr } => {
            init_logging_simple();
            check_rule(&expr)
        }
    }
}

async fn run(config_dir: &Path, dry_run: bool, liquidate: bool) -> anyhow::Result<()> {
    let mut config = AppConfig::load_from(config_dir)
        .with_context(|| format!("loading configuration from {}", config_dir.display()))?;
    config.dry_run.enabled |= dry_run;
    config.execution.liquidate_all |= liquidate;
    init_logging(&config.logging);

    if let Err(problems) = config.validate() {
        for problem in &problems {
            tracing::error!("config: {}", problem);
        }
        bail!("invalid configuration ({} problems)", problems.len());
    }

    let dry_run = config.dry_run.enabled;
    info!(dry_run, "starting rulebot");

    let broker = build_broker_client(&config, dry_run)?;

    let pg = PostgresStore::new(&config.database.url, config.database.max_connections)
        .await
        .context("connecting to database")?;
    let store: Arc<dyn RuleStore> = if dry_run {
        let mut rules = pg.get_active_rules(Frequency::Fast).await?;
        rules.extend(pg.get_active_rules(Frequency::Slow).await?);
        warn!(rules = rules.len(), "dry run: rules loaded once; trades stay in memory");
        Arc::new(MemoryStore::with_rules(rules))
    } else {
        pg.migrate().await?;
        Arc::new(pg)
    };

    let notifier: Option<Arc<dyn Notifier>> = match &config.notifications.webhook_url {
        Some(url) => Some(WebhookNotifier::new(url.clone()) as Arc<dyn Notifier>),
        None => WebhookNotifier::from_env().map(|n| n as Arc<dyn Notifier>),
    };
    let notifications = NotificationSink::new(notifier);

    let kill_switch = KillSwitch::new();
    if config.execution.liquidate_all {
        kill_switch.engage(KillReason::Startup).await;
    }

    let shutdown = Shutdown::new(Duration::from_millis(config.scheduler.rule_timeout_ms));
    install_signal_handlers(shutdown.clone(), kill_switch.clone());

    let rule_count = store.get_active_rules(Frequency::Fast).await?.len()
        + store.get_active_rules(Frequency::Slow).await?.len();
    notifications.emit(Notification::Startup {
        mode: if dry_run { "paper" } else { "live" }.to_string(),
        rules: rule_count,
    });

    let engine = RuleEngine::new(broker, store, &config, notifications, kill_switch);
    Scheduler::new(engine, config.scheduler.clone(), shutdown)
        .run()
        .await;

    info!("rulebot stopped");
    Ok(())
}

fn check_config(config_dir: &Path) -> anyhow::Result<()> {
    let config = AppConfig::load_from(config_dir)
        .with_context(|| format!("loading configuration from {}", config_dir.display()))?;
    match config.validate() {
        Ok(()) => {
            println!("configuration OK ({})", config_dir.display());
            println!(
                "  broker: {} (dry run: {})",
                config.broker.trading_url, config.dry_run.enabled
            );
            println!(
                "  cadences: fast {}ms, slow {}ms, rule timeout {}ms",
                config.scheduler.fast_interval_ms,
                config.scheduler.slow_interval_ms,
                config.scheduler.rule_timeout_ms
            );
            Ok(())
        }
        Err(problems) => {
            for problem in &problems {
                println!("  - {}", problem);
            }
            bail!("invalid configuration ({} problems)", problems.len())
        }
    }
}

fn check_rule(source: &str) -> anyhow::Result<()> {
    let expr = Expr::parse(source)?;
    println!("{:#?}", expr);
    Ok(())
}
