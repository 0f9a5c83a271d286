use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hlcopy_scheduler::{new_rebalance_lock, run_loop, CadenceIntervals, Scheduler};
use hlcopy_schemas::SchedulerState;
use tokio::sync::watch;

use hlcopy_daemon::{handlers::DaemonHandlers, routes, state::AppState};

#[derive(Parser)]
#[command(name = "hlcopy-daemon")]
#[command(about = "Hyperliquid copytrading daemon", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon: scheduler loop plus the HTTP status surface.
    Run {
        /// Layered config paths in merge order.
        #[arg(long = "config", required = true)]
        config_paths: Vec<String>,
    },

    /// Config commands.
    Config {
        #[command(subcommand)]
        cmd: ConfigCmd,
    },

    /// Run embedded Postgres migrations then exit.
    Migrate,
}

#[derive(Subcommand)]
enum ConfigCmd {
    /// Load and validate the layered config, printing its canonical hash.
    Check {
        #[arg(long = "config", required = true)]
        config_paths: Vec<String>,
    },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::from_filename(".env.local");
    init_tracing();

    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(()) => 0,
        Err(err) if err.downcast_ref::<ConfigError>().is_some() => {
            tracing::error!(error = %err, "config error");
            2
        }
        Err(err) => {
            tracing::error!(error = %err, "fatal error");
            1
        }
    };
    std::process::exit(code);
}

#[derive(Debug)]
struct ConfigError(String);

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl std::error::Error for ConfigError {}

async fn run(cli: Cli) -> Result<()> {
    match cli.cmd {
        Commands::Config { cmd: ConfigCmd::Check { config_paths } } => {
            let paths: Vec<&str> = config_paths.iter().map(String::as_str).collect();
            let cfg = hlcopy_config::load(&paths).map_err(|e| ConfigError(e.to_string()))?;
            println!("config_hash={}", cfg.config_hash);
            Ok(())
        }
        Commands::Migrate => {
            let pool = connect().await?;
            hlcopy_db::migrate(&pool).await.context("migration failed")?;
            tracing::info!("migrations applied");
            Ok(())
        }
        Commands::Run { config_paths } => run_daemon(config_paths).await,
    }
}

async fn connect() -> Result<sqlx::PgPool> {
    hlcopy_db::connect_from_env().await
}

async fn run_daemon(config_paths: Vec<String>) -> Result<()> {
    let paths: Vec<&str> = config_paths.iter().map(String::as_str).collect();
    let config = hlcopy_config::load(&paths).map_err(|e| ConfigError(e.to_string()))?;

    std::env::set_var(hlcopy_db::ENV_DB_URL, &config.database_url);
    let pool = connect().await?;
    hlcopy_db::migrate(&pool).await.context("migration failed")?;

    let now = chrono::Utc::now();
    let scheduler_state = hlcopy_db::load_scheduler_state(&pool).await.unwrap_or(SchedulerState {
        last_refresh_at: None,
        last_rebalance_at: None,
        last_monitor_at: None,
        last_ingest_at: None,
        last_ml_snapshot_at: None,
    });

    let positions = hlcopy_db::load_open_positions(&pool).await.context("loading open positions at startup")?;
    let rebalance_lock = new_rebalance_lock(positions);

    let app_state = AppState::new(pool.clone(), config.config_hash.clone());
    hlcopy_daemon::state::spawn_heartbeat(app_state.bus.clone(), std::time::Duration::from_secs(5));

    let intervals = CadenceIntervals {
        refresh: chrono::Duration::seconds(config.scheduler.refresh_interval_secs),
        rebalance: chrono::Duration::seconds(config.scheduler.rebalance_interval_secs),
        monitor: chrono::Duration::seconds(config.scheduler.monitor_interval_secs),
        ingest: chrono::Duration::seconds(config.scheduler.ingest_interval_secs),
    };

    let handlers = DaemonHandlers::new(pool.clone(), config.clone(), rebalance_lock).context("building daemon handlers")?;
    let mut scheduler = Scheduler::new(handlers, scheduler_state, intervals, config.config_hash.clone(), now);

    let (stop_tx, stop_rx) = watch::channel(false);

    let (persist_tx, mut persist_rx) = tokio::sync::mpsc::unbounded_channel::<SchedulerState>();
    let persist_pool = pool.clone();
    tokio::spawn(async move {
        while let Some(state) = persist_rx.recv().await {
            if let Err(e) = hlcopy_db::save_scheduler_state(&persist_pool, &state).await {
                tracing::error!(error = %e, "failed to persist scheduler state");
            }
        }
    });

    let scheduler_status = app_state.status.clone();
    let poll_interval = std::time::Duration::from_secs(1);
    let grace_period = std::time::Duration::from_secs(config.scheduler.shutdown_grace_secs);

    let scheduler_task = tokio::spawn(async move {
        run_loop(&mut scheduler, stop_rx, poll_interval, grace_period, |state| {
            let _ = persist_tx.send(state.clone());
        })
        .await;
        scheduler
    });

    // Mirror the scheduler's latest status into the HTTP-visible snapshot on
    // a slow tick of our own; the scheduler itself never touches AppState.
    let status_poll_pool = pool.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(2));
        loop {
            ticker.tick().await;
            if let Ok(count) = hlcopy_db::load_open_positions(&status_poll_pool).await.map(|v| v.iter().filter(|p| p.is_open()).count() as u32) {
                let mut snap = scheduler_status.write().await;
                snap.open_position_count = count;
            }
        }
    });

    let router = routes::build_router(app_state).layer(tower_http::trace::TraceLayer::new_for_http());
    let addr = std::env::var("HLCOPY_BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8787".to_string());
    let listener = tokio::net::TcpListener::bind(&addr).await.with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "hlcopy-daemon listening");

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    tokio::select! {
        res = axum::serve(listener, router) => {
            res.context("http server error")?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("ctrl-c received, shutting down");
        }
        _ = sigterm.recv() => {
            tracing::info!("sigterm received, shutting down");
        }
    }

    let _ = stop_tx.send(true);
    let scheduler = scheduler_task.await.context("scheduler task panicked")?;
    hlcopy_db::save_scheduler_state(&pool, scheduler.state()).await.context("final scheduler state persist")?;
    Ok(())
}
