//! Process wiring.
//!
//! Brings up the store, control flags, gateways, recovery, the watchdog
//! task, the command API and the end-of-day summary task, then drives the
//! engine's one-second heartbeat until shutdown.

use chrono::{Datelike, FixedOffset, NaiveTime, Utc, Weekday};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::alerts::{AlertBus, AlertLevel};
use crate::command::http::{self, ApiContext};
use crate::command::Controller;
use crate::config::{AppConfig, LoggingConfig};
use crate::control::ControlFlags;
use crate::domain::{StrategyParams, TradeMode};
use crate::engine::{Engine, EngineConfig};
use crate::error::Result;
use crate::gateway::{GatewayFactory, GatewaySet};
use crate::store::{
    Bootstrapper, SqliteStore, SETTING_ACCESS_TOKEN, SETTING_KILLED, SETTING_MODE, SETTING_PAUSED,
};
use crate::watchdog::Watchdog;

/// Install the tracing stack: console layer, optional JSON, optional daily
/// rolling file. Returns the appender guard; dropping it stops the file
/// writer, so the caller holds it for the process lifetime.
pub fn init_logging(cfg: &LoggingConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("info,optix={},sqlx=warn", cfg.level)));

    let mut guard = None;
    let file_layer = match &cfg.dir {
        Some(dir) if std::fs::create_dir_all(dir).is_ok() => {
            // The rolling appender panics if it cannot create its first
            // file, so writability is checked up front.
            let probe = std::path::Path::new(dir).join(".optix_write_test");
            match std::fs::OpenOptions::new().create(true).append(true).open(&probe) {
                Ok(_) => {
                    let _ = std::fs::remove_file(&probe);
                    let appender = tracing_appender::rolling::daily(dir, "optix.log");
                    let (writer, g) = tracing_appender::non_blocking(appender);
                    guard = Some(g);
                    Some(
                        tracing_subscriber::fmt::layer()
                            .with_writer(writer)
                            .with_ansi(false),
                    )
                }
                Err(_) => {
                    eprintln!("log dir {} is not writable; console logging only", dir);
                    None
                }
            }
        }
        _ => None,
    };

    let registry = tracing_subscriber::registry().with(filter).with(file_layer);
    if cfg.json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
    guard
}

pub async fn run(cfg: AppConfig) -> Result<()> {
    let tz = cfg.market.tz();

    let store = SqliteStore::connect(&cfg.database.url, cfg.database.max_connections).await?;
    store.migrate().await?;

    store.seed_setting(SETTING_MODE, TradeMode::Paper.as_str()).await?;
    store.seed_setting(SETTING_PAUSED, "0").await?;
    store.seed_setting(SETTING_KILLED, "0").await?;
    store.seed_setting(SETTING_ACCESS_TOKEN, "").await?;
    store
        .seed_params(&StrategyParams::seed_pairs(&cfg.strategy))
        .await?;

    let cutoff = Utc::now() - chrono::Duration::days(cfg.audit.retention_days);
    store.purge_audit_before(cutoff).await?;

    let alerts = AlertBus::new();

    let mode = store
        .setting(SETTING_MODE)
        .await?
        .as_deref()
        .and_then(|s| TradeMode::try_from(s).ok())
        .unwrap_or(TradeMode::Paper);
    let flags = Arc::new(ControlFlags::new(
        mode,
        store.flag_setting(SETTING_PAUSED).await?,
        store.flag_setting(SETTING_KILLED).await?,
    ));

    let factory = GatewayFactory::new(&cfg.market, &cfg.execution);
    let token = store.setting(SETTING_ACCESS_TOKEN).await?;
    let (market, orders) = match factory.build(flags.mode(), token.as_deref()) {
        Ok(pair) => pair,
        Err(e) => {
            // Same posture as a missing token at the original's startup:
            // degrade to paper instead of refusing to run.
            alerts.notify(
                AlertLevel::Warning,
                "runtime",
                "falling back to paper mode",
                &e.to_string(),
            );
            flags.set_mode(TradeMode::Paper);
            store.set_setting(SETTING_MODE, TradeMode::Paper.as_str()).await?;
            factory.build(TradeMode::Paper, token.as_deref())?
        }
    };
    let gateways = Arc::new(GatewaySet::new(market, orders));

    let now_local = Utc::now().with_timezone(&tz);
    let recovered = Bootstrapper::new(store.clone(), alerts.clone())
        .recover(now_local.date_naive(), flags.mode())
        .await?;
    let mut engine = Engine::new(
        store.clone(),
        gateways.clone(),
        alerts.clone(),
        flags.clone(),
        EngineConfig::from_app(&cfg),
    )
    .with_recovered(recovered);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let watchdog = Watchdog::new(
        store.clone(),
        gateways.clone(),
        alerts.clone(),
        flags.clone(),
        cfg.watchdog.clone(),
        Duration::from_millis(cfg.execution.request_timeout_ms),
    );
    let watchdog_handle = tokio::spawn(watchdog.run(shutdown_rx.clone()));

    let controller = Arc::new(Controller::new(
        store.clone(),
        flags.clone(),
        alerts.clone(),
        gateways.clone(),
        factory.clone(),
        cfg.api.admin_actor_ids.clone(),
        tz,
    ));
    let api_state = Arc::new(ApiContext {
        controller,
        alerts: alerts.clone(),
        flags: flags.clone(),
        cfg: cfg.api.clone(),
        started_at: Utc::now(),
    });
    let api_handle = tokio::spawn({
        let shutdown = shutdown_rx.clone();
        async move {
            if let Err(e) = http::serve(api_state, shutdown).await {
                error!("command api failed: {}", e);
            }
        }
    });

    let summary_handle = tokio::spawn(summary_loop(
        store.clone(),
        alerts.clone(),
        tz,
        cfg.session.market_close,
        shutdown_rx,
    ));

    info!("system online; entering main loop");
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let now = Utc::now().with_timezone(&tz);
                if let Err(e) = engine.on_tick(now).await {
                    if e.is_transient() {
                        warn!("engine tick failed: {}", e);
                    } else {
                        alerts.notify(AlertLevel::Error, "engine", "tick failed", &e.to_string());
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    let _ = shutdown_tx.send(true);
    let _ = watchdog_handle.await;
    let _ = api_handle.await;
    let _ = summary_handle.await;
    info!("bot stopped");
    Ok(())
}

/// Dispatch the end-of-day summary at most once per trading date, surviving
/// restarts via the daily_run marker.
async fn summary_loop(
    store: SqliteStore,
    alerts: AlertBus,
    tz: FixedOffset,
    market_close: NaiveTime,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.changed() => break,
        }

        let now = Utc::now().with_timezone(&tz);
        if now.time() < market_close || matches!(now.weekday(), Weekday::Sat | Weekday::Sun) {
            continue;
        }
        let today = now.date_naive();

        match store.daily_run(today).await {
            Ok(Some((true, _))) => continue,
            Ok(_) => {}
            Err(e) => {
                debug!("daily_run read failed: {}", e);
                continue;
            }
        }

        match store.daily_summary(today).await {
            Ok(summary) => {
                alerts.notify(
                    AlertLevel::Info,
                    "summary",
                    "session summary",
                    &format!(
                        "trades {} | wins {} | losses {} | net pnl {}",
                        summary.trades, summary.wins, summary.losses, summary.net_pnl
                    ),
                );
                if let Err(e) = store.mark_summary_sent(today, summary.net_pnl).await {
                    warn!("could not mark summary sent: {}", e);
                }
            }
            Err(e) => debug!("summary computation failed: {}", e),
        }
    }
}
