//! Safety watchdog.
//!
//! An independent loop, decoupled from the engine's decision path: every
//! interval it re-reads the open trade and its working stop straight from
//! the store (never from engine memory), fetches the LTP, and force-exits
//! a position the engine failed to close. Transient read failures retry on
//! the next tick; sustained failure escalates to an alert and, past the
//! second threshold, trips the kill-switch.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::alerts::{AlertBus, AlertLevel};
use crate::config::WatchdogConfig;
use crate::control::ControlFlags;
use crate::domain::{ExitReason, StopSnapshot, StrategyParams, Trade, TradeStatus};
use crate::error::{BotError, Result};
use crate::gateway::{FillState, GatewaySet, OrderSide};
use crate::store::{SqliteStore, SETTING_KILLED};

/// Actor id recorded for watchdog-originated audit entries
const WATCHDOG_ACTOR: i64 = -1;

/// First observation of the stop being breached, per trade
#[derive(Debug, Clone, Copy)]
struct Breach {
    trade_id: i64,
    since: DateTime<Utc>,
}

pub struct Watchdog {
    store: SqliteStore,
    gateways: Arc<GatewaySet>,
    alerts: AlertBus,
    flags: Arc<ControlFlags>,
    cfg: WatchdogConfig,
    request_timeout: Duration,
}

impl Watchdog {
    pub fn new(
        store: SqliteStore,
        gateways: Arc<GatewaySet>,
        alerts: AlertBus,
        flags: Arc<ControlFlags>,
        cfg: WatchdogConfig,
        request_timeout: Duration,
    ) -> Self {
        Self {
            store,
            gateways,
            alerts,
            flags,
            cfg,
            request_timeout,
        }
    }

    /// Run until the shutdown signal flips. The interval is inviolable:
    /// every await inside a tick is bounded by the request timeout, so a
    /// wedged engine or broker never delays the next check.
    pub async fn run(self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(Duration::from_millis(self.cfg.interval_ms));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut consecutive_failures: u32 = 0;
        let mut breach: Option<Breach> = None;

        info!(interval_ms = self.cfg.interval_ms, "watchdog started");
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => break,
            }

            match self.check(&mut breach).await {
                Ok(()) => consecutive_failures = 0,
                Err(e) => {
                    consecutive_failures += 1;
                    self.escalate(consecutive_failures, &e).await;
                }
            }
        }
        info!("watchdog stopped");
    }

    /// One verification pass
    async fn check(&self, breach: &mut Option<Breach>) -> Result<()> {
        let Some((trade, stored)) = self.store.open_trade().await? else {
            *breach = None;
            return Ok(());
        };
        let trade_id = trade.id.expect("persisted trade always has an id");

        // Missing state row: fall back to the hard stop from the current
        // parameters; protection must not wait for the engine.
        let snapshot = match stored {
            Some(snap) => snap,
            None => {
                let params = StrategyParams::from_map(&self.store.all_params().await?)?;
                StopSnapshot {
                    current_stop: trade.entry_price - params.sl_points,
                    peak_price: trade.entry_price,
                    trailing_active: true,
                    breakeven_locked: false,
                    target_price: trade.entry_price + params.target_points,
                }
            }
        };

        let market = self.gateways.market().await;
        let quote = match timeout(self.request_timeout, market.ltp(&trade.symbol)).await {
            Ok(result) => result?,
            Err(_) => return Err(BotError::Timeout(format!("ltp {}", trade.symbol))),
        };

        if quote.price > snapshot.current_stop {
            *breach = None;
            return Ok(());
        }

        // Stop breached. Give the engine its grace period before stepping in.
        let now = Utc::now();
        let since = match *breach {
            Some(b) if b.trade_id == trade_id => b.since,
            _ => {
                *breach = Some(Breach {
                    trade_id,
                    since: now,
                });
                debug!(
                    trade_id,
                    ltp = %quote.price,
                    stop = %snapshot.current_stop,
                    "stop breached; grace period running"
                );
                return Ok(());
            }
        };

        if (now - since).num_seconds() < self.cfg.grace_secs as i64 {
            return Ok(());
        }

        warn!(
            trade_id,
            ltp = %quote.price,
            stop = %snapshot.current_stop,
            grace_secs = self.cfg.grace_secs,
            "engine did not act on a breached stop; forcing exit"
        );
        self.force_exit(&trade, quote.price).await?;
        *breach = None;
        Ok(())
    }

    /// Failsafe exit. Uses the same atomic status-guard as the engine, so
    /// if the engine's exit landed first this is a no-op.
    async fn force_exit(&self, trade: &Trade, ltp: Decimal) -> Result<()> {
        let trade_id = trade.id.expect("persisted trade always has an id");
        let pnl = trade.pnl_at(ltp);

        let claimed = self
            .store
            .claim_exit(trade_id, Utc::now(), ltp, pnl, TradeStatus::for_pnl(pnl))
            .await?;
        if !claimed {
            debug!(trade_id, "trade already closed by the engine; standing down");
            return Ok(());
        }

        self.alerts.notify(
            AlertLevel::Critical,
            "watchdog",
            "failsafe exit",
            &format!(
                "{} x{}: ltp {} through stop; force-exiting at market",
                trade.symbol, trade.quantity, ltp
            ),
        );

        let orders = self.gateways.orders().await;
        let order_id = match timeout(
            self.request_timeout,
            orders.place_market(&trade.symbol, OrderSide::Sell, trade.quantity),
        )
        .await
        {
            Ok(Ok(order_id)) => order_id,
            Ok(Err(e)) => {
                self.alerts.notify(
                    AlertLevel::Critical,
                    "watchdog",
                    "failsafe exit order failed",
                    &format!("{}; broker may still hold {}", e, trade.symbol),
                );
                return Err(e);
            }
            Err(_) => {
                self.alerts.notify(
                    AlertLevel::Critical,
                    "watchdog",
                    "failsafe exit order timed out",
                    &format!("outcome unknown for {}; reconcile manually", trade.symbol),
                );
                return Err(BotError::Timeout("failsafe exit order".into()));
            }
        };

        // Best-effort price refinement; the claimed estimates already hold.
        if let Ok(Ok(report)) = timeout(self.request_timeout, orders.order_status(&order_id)).await
        {
            if report.state == FillState::Filled {
                if let Some(fill) = report.average_price {
                    let pnl = trade.pnl_at(fill);
                    self.store
                        .finalize_exit(trade_id, fill, pnl, TradeStatus::for_pnl(pnl))
                        .await?;
                }
            }
        }

        if let Err(e) = self
            .store
            .append_audit(
                WATCHDOG_ACTOR,
                "FAILSAFE_EXIT",
                &format!("{} {} at ~{}", trade.symbol, ExitReason::Failsafe, ltp),
            )
            .await
        {
            warn!("audit write failed: {}", e);
        }
        Ok(())
    }

    async fn escalate(&self, failures: u32, error: &BotError) {
        debug!(failures, "watchdog pass failed: {}", error);

        if failures == self.cfg.failure_alert_threshold {
            self.alerts.notify(
                AlertLevel::Error,
                "watchdog",
                "repeated verification failures",
                &format!("{} consecutive failures; last: {}", failures, error),
            );
        }

        if failures >= self.cfg.failure_kill_threshold && !self.flags.is_killed() {
            self.flags.set_killed(true);
            if let Err(e) = self.store.set_setting(SETTING_KILLED, "1").await {
                warn!("could not persist kill flag: {}", e);
            }
            self.alerts.notify(
                AlertLevel::Critical,
                "watchdog",
                "kill-switch tripped",
                &format!(
                    "{} consecutive failures; trading halted as a last resort",
                    failures
                ),
            );
        }
    }
}
