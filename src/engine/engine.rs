//! Trade lifecycle engine.
//!
//! Owns the state machine for the single symbol-leg position:
//! IDLE -> ARMED -> ENTERED -> BREAKEVEN_LOCKED -> TRAILING -> CLOSED.
//! Every transition is persisted before the next tick is processed, and
//! every exit path claims the trade row off OPEN before touching the
//! order gateway, so a race with the watchdog can never double-exit.

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Utc, Weekday};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::alerts::{AlertBus, AlertLevel};
use crate::config::{AppConfig, SessionConfig};
use crate::control::ControlFlags;
use crate::domain::{EngineState, ExitReason, OptionSide, StrategyParams, Trade, TradeStatus};
use crate::engine::selector::{self, Watchlist};
use crate::engine::stops::{StopBook, TrailRule};
use crate::error::{BotError, Result};
use crate::gateway::{FillState, GatewaySet, OrderSide, Quote};
use crate::store::{RecoveredState, SqliteStore, SETTING_PAUSED};

/// Actor id recorded for engine-originated audit entries
const SYSTEM_ACTOR: i64 = 0;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Spot instrument key (watchlist anchor)
    pub underlying: String,
    /// Underlying symbol for chain snapshots
    pub symbol: String,
    pub session: SessionConfig,
    pub premium_tolerance: Decimal,
    pub entry_cap_buffer: Decimal,
    pub request_timeout: Duration,
    pub order_poll_interval: Duration,
    pub order_fill_timeout: Duration,
}

impl EngineConfig {
    pub fn from_app(cfg: &AppConfig) -> Self {
        Self {
            underlying: cfg.market.underlying.clone(),
            symbol: cfg.market.symbol.clone(),
            session: cfg.session.clone(),
            premium_tolerance: cfg.strategy.premium_tolerance,
            entry_cap_buffer: cfg.strategy.entry_cap_buffer,
            request_timeout: Duration::from_millis(cfg.execution.request_timeout_ms),
            order_poll_interval: Duration::from_millis(cfg.execution.order_poll_interval_ms),
            order_fill_timeout: Duration::from_millis(cfg.execution.order_fill_timeout_ms),
        }
    }
}

/// Entry order in flight (ARMED)
#[derive(Debug, Clone)]
struct PendingEntry {
    order_id: String,
    instrument_key: String,
    side: OptionSide,
    quantity: i64,
    signal_price: Decimal,
    placed_at: DateTime<Utc>,
}

/// In-memory projection of the open position. `trade_id` is None only in
/// the filled-but-unrecorded failure mode, which keeps being managed
/// while the insert is retried.
#[derive(Debug, Clone)]
struct ActivePosition {
    trade_id: Option<i64>,
    trade: Trade,
    stops: StopBook,
    target: Decimal,
}

pub struct Engine {
    store: SqliteStore,
    gateways: Arc<GatewaySet>,
    alerts: AlertBus,
    flags: Arc<ControlFlags>,
    cfg: EngineConfig,

    state: EngineState,
    watchlist: Watchlist,
    pending: Option<PendingEntry>,
    position: Option<ActivePosition>,
    trade_done_today: bool,
    session_date: Option<NaiveDate>,
}

fn is_trading_day(now: DateTime<FixedOffset>) -> bool {
    !matches!(now.weekday(), Weekday::Sat | Weekday::Sun)
}

impl Engine {
    pub fn new(
        store: SqliteStore,
        gateways: Arc<GatewaySet>,
        alerts: AlertBus,
        flags: Arc<ControlFlags>,
        cfg: EngineConfig,
    ) -> Self {
        Self {
            store,
            gateways,
            alerts,
            flags,
            cfg,
            state: EngineState::Idle,
            watchlist: Watchlist::default(),
            pending: None,
            position: None,
            trade_done_today: false,
            session_date: None,
        }
    }

    /// Apply what the bootstrapper reconstructed from the store
    pub fn with_recovered(mut self, recovered: RecoveredState) -> Self {
        self.trade_done_today = recovered.trade_done_today;
        if let Some(rec) = recovered.position {
            self.state = rec.state;
            self.position = Some(ActivePosition {
                trade_id: rec.trade.id,
                stops: StopBook::resume(rec.trade.entry_price, &rec.snapshot),
                target: rec.snapshot.target_price,
                trade: rec.trade,
            });
        }
        self
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn has_open_position(&self) -> bool {
        self.position.is_some()
    }

    /// One heartbeat. Driven by the runtime's 1s interval; `now` is
    /// exchange-local so the session windows line up.
    pub async fn on_tick(&mut self, now: DateTime<FixedOffset>) -> Result<()> {
        self.roll_session_date(now.date_naive());

        // Kill switch first: flatten everything, take nothing new.
        if self.flags.is_killed() {
            return self.flatten_for_kill(now).await;
        }

        if let Some(pending) = self.pending.take() {
            self.confirm_entry(pending, now).await?;
        }

        if self.position.as_ref().is_some_and(|p| p.trade_id.is_none()) {
            self.retry_record().await;
        }

        // Managing an open position has priority over everything else and
        // continues while paused: pausing must never strand risk.
        if self.position.is_some() {
            return self.manage(now).await;
        }

        if !self.flags.is_active() || self.trade_done_today || self.pending.is_some() {
            return Ok(());
        }
        if !is_trading_day(now) {
            return Ok(());
        }

        let t = now.time();
        let session = self.cfg.session.clone();
        if t >= session.observation_start && t < session.entry_start {
            if !self.watchlist.is_complete() {
                self.try_refresh_watchlist().await?;
            }
        } else if t >= session.entry_start && t < session.entry_end {
            if !self.watchlist.is_complete() {
                self.try_refresh_watchlist().await?;
            }
            if self.watchlist.is_complete() {
                self.scan_for_breakout(now).await?;
            }
        }

        Ok(())
    }

    fn roll_session_date(&mut self, today: NaiveDate) {
        if self.session_date == Some(today) {
            return;
        }
        let first_tick = self.session_date.is_none();
        self.session_date = Some(today);
        if first_tick {
            return;
        }
        if self.position.is_none() && self.pending.is_none() {
            self.trade_done_today = false;
            self.watchlist = Watchlist::default();
            self.transition(EngineState::Idle);
            info!(%today, "new session; entry window re-armed");
        }
    }

    fn transition(&mut self, to: EngineState) {
        if self.state == to {
            return;
        }
        if !self.state.can_transition_to(to) {
            warn!(from = %self.state, to = %to, "unexpected state transition");
        }
        debug!(from = %self.state, to = %to, "state transition");
        self.state = to;
    }

    async fn params(&self) -> Result<StrategyParams> {
        StrategyParams::from_map(&self.store.all_params().await?)
    }

    async fn fetch_ltp(&self, instrument_key: &str) -> Result<Quote> {
        let market = self.gateways.market().await;
        match timeout(self.cfg.request_timeout, market.ltp(instrument_key)).await {
            Ok(result) => result,
            Err(_) => Err(BotError::Timeout(format!("ltp {}", instrument_key))),
        }
    }

    async fn audit(&self, command: &str, details: &str) {
        if let Err(e) = self.store.append_audit(SYSTEM_ACTOR, command, details).await {
            warn!("audit write failed: {}", e);
        }
    }

    // ==================== Observation / entry ====================

    async fn try_refresh_watchlist(&mut self) -> Result<()> {
        match self.refresh_watchlist().await {
            Ok(()) => Ok(()),
            Err(e) if e.is_transient() => {
                debug!("watchlist scan failed, retrying next tick: {}", e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn refresh_watchlist(&mut self) -> Result<()> {
        let params = self.params().await?;
        let spot = self.fetch_ltp(&self.cfg.underlying).await?;

        let market = self.gateways.market().await;
        let chain = match timeout(
            self.cfg.request_timeout,
            market.option_chain(&self.cfg.symbol, spot.price),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => return Err(BotError::Timeout("option chain".into())),
        };

        let watchlist =
            selector::build_watchlist(&chain, params.target_premium, self.cfg.premium_tolerance);
        if watchlist.is_complete() {
            let ce = watchlist.ce.as_ref().expect("complete watchlist");
            let pe = watchlist.pe.as_ref().expect("complete watchlist");
            info!(
                ce = %ce.premium, pe = %pe.premium, target = %params.target_premium,
                "watchlist set"
            );
            self.alerts.notify(
                AlertLevel::Info,
                "engine",
                "watchlist set",
                &format!("CE {} @ {} | PE {} @ {}", ce.strike, ce.premium, pe.strike, pe.premium),
            );
            self.watchlist = watchlist;
        } else {
            debug!(target = %params.target_premium, "no strikes inside tolerance band yet");
        }
        Ok(())
    }

    async fn scan_for_breakout(&mut self, now: DateTime<FixedOffset>) -> Result<()> {
        let params = self.params().await?;
        let legs: Vec<_> = self.watchlist.legs().cloned().collect();

        for leg in legs {
            let quote = match self.fetch_ltp(&leg.instrument_key).await {
                Ok(q) => q,
                Err(e) if e.is_transient() => continue,
                Err(e) => return Err(e),
            };

            if !selector::breakout_signal(
                quote.price,
                params.target_premium,
                params.target_points,
                self.cfg.entry_cap_buffer,
            ) {
                continue;
            }

            info!(
                side = %leg.side, ltp = %quote.price, trigger = %params.target_premium,
                "breakout signal"
            );

            let orders = self.gateways.orders().await;
            match timeout(
                self.cfg.request_timeout,
                orders.place_market(&leg.instrument_key, OrderSide::Buy, params.lot_size),
            )
            .await
            {
                Ok(Ok(order_id)) => {
                    self.pending = Some(PendingEntry {
                        order_id,
                        instrument_key: leg.instrument_key.clone(),
                        side: leg.side,
                        quantity: params.lot_size,
                        signal_price: quote.price,
                        placed_at: now.with_timezone(&Utc),
                    });
                    // One trade per day, counted from the order, as the
                    // original strategy does.
                    self.trade_done_today = true;
                    self.transition(EngineState::Armed);
                    self.audit(
                        "TRADE_ENTRY",
                        &format!("{} breakout @ {}", leg.side, quote.price),
                    )
                    .await;
                    self.alerts.notify(
                        AlertLevel::Info,
                        "engine",
                        "entry order placed",
                        &format!("{} {} x{} @ ~{}", leg.side, leg.instrument_key, params.lot_size, quote.price),
                    );
                }
                Ok(Err(e)) => {
                    self.alerts.notify(
                        AlertLevel::Warning,
                        "engine",
                        "entry order failed",
                        &e.to_string(),
                    );
                }
                Err(_) => {
                    // Timeout is not an outcome; without an order id there
                    // is nothing to reconcile against, so stand down for
                    // the day rather than risk a duplicate order.
                    self.trade_done_today = true;
                    self.alerts.notify(
                        AlertLevel::Error,
                        "engine",
                        "entry order timed out at placement",
                        "broker state unknown; verify manually before re-enabling entries",
                    );
                }
            }
            break;
        }
        Ok(())
    }

    // ==================== Fill confirmation (ARMED -> ENTERED) ====================

    async fn confirm_entry(
        &mut self,
        pending: PendingEntry,
        now: DateTime<FixedOffset>,
    ) -> Result<()> {
        let orders = self.gateways.orders().await;
        let report = match timeout(
            self.cfg.request_timeout,
            orders.order_status(&pending.order_id),
        )
        .await
        {
            Ok(Ok(report)) => report,
            Ok(Err(e)) if e.is_transient() => {
                debug!(order_id = %pending.order_id, "fill poll failed: {}", e);
                self.pending = Some(pending);
                return Ok(());
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                self.pending = Some(pending);
                return Ok(());
            }
        };

        match report.state {
            FillState::Filled => {
                let entry_price = report.average_price.unwrap_or(pending.signal_price);
                self.record_entry(&pending, entry_price, now).await;
            }
            FillState::PartiallyFilled => {
                // Requires follow-up reconciliation, never assumed done.
                debug!(
                    order_id = %pending.order_id,
                    filled = report.filled_quantity,
                    "partial fill; continuing to poll"
                );
                self.pending = Some(pending);
            }
            FillState::Pending => {
                let waited = (now.with_timezone(&Utc) - pending.placed_at)
                    .to_std()
                    .unwrap_or_default();
                if waited >= self.cfg.order_fill_timeout {
                    let cancelled = orders.cancel(&pending.order_id).await.unwrap_or(false);
                    self.alerts.notify(
                        AlertLevel::Warning,
                        "engine",
                        "entry order timed out",
                        &format!(
                            "order {} unfilled after {:?}; cancel {}",
                            pending.order_id,
                            waited,
                            if cancelled { "accepted" } else { "refused" }
                        ),
                    );
                    self.transition(EngineState::Idle);
                } else {
                    self.pending = Some(pending);
                }
            }
            FillState::Rejected | FillState::Cancelled => {
                self.alerts.notify(
                    AlertLevel::Warning,
                    "engine",
                    "entry order rejected",
                    &format!("order {} ended {:?}", pending.order_id, report.state),
                );
                self.transition(EngineState::Idle);
            }
        }
        Ok(())
    }

    /// Persist the OPEN trade before anything else happens. A fill the
    /// store does not know about is the most dangerous failure mode, so a
    /// failed insert pauses entries, alerts the operator, and the
    /// position is managed from memory while the insert is retried.
    async fn record_entry(
        &mut self,
        pending: &PendingEntry,
        entry_price: Decimal,
        now: DateTime<FixedOffset>,
    ) {
        let params = self.params().await.unwrap_or_else(|e| {
            warn!("param read failed at entry, using stock defaults: {}", e);
            StrategyParams::from_map(&HashMap::new()).expect("stock defaults parse")
        });

        let trade = Trade {
            id: None,
            date: now.date_naive(),
            mode: self.flags.mode(),
            symbol: pending.instrument_key.clone(),
            side: pending.side,
            entry_time: now.with_timezone(&Utc),
            entry_price,
            exit_time: None,
            exit_price: None,
            quantity: pending.quantity,
            pnl: None,
            status: TradeStatus::Open,
        };
        let stops = StopBook::open(entry_price, params.sl_points);
        let target = entry_price + params.target_points;

        self.transition(EngineState::Entered);
        match self.store.insert_trade(&trade, &stops.snapshot(target)).await {
            Ok(trade_id) => {
                self.position = Some(ActivePosition {
                    trade_id: Some(trade_id),
                    trade,
                    stops,
                    target,
                });
                self.alerts.notify(
                    AlertLevel::Info,
                    "engine",
                    "trade executed",
                    &format!(
                        "{} {} x{} @ {} | SL {} | target {}",
                        pending.side, pending.instrument_key, pending.quantity,
                        entry_price, stops.current, target
                    ),
                );
            }
            Err(e) => {
                self.flags.set_paused(true);
                if let Err(e) = self.store.set_setting(SETTING_PAUSED, "1").await {
                    warn!("could not persist pause flag: {}", e);
                }
                self.alerts.notify(
                    AlertLevel::Critical,
                    "engine",
                    "filled entry could not be persisted",
                    &format!(
                        "{} x{} @ {} is live at the broker but unrecorded ({}); entries paused, insert will be retried",
                        pending.instrument_key, pending.quantity, entry_price, e
                    ),
                );
                self.position = Some(ActivePosition {
                    trade_id: None,
                    trade,
                    stops,
                    target,
                });
            }
        }
    }

    async fn retry_record(&mut self) {
        let Some(pos) = self.position.as_ref() else { return };
        if pos.trade_id.is_some() {
            return;
        }
        let trade = pos.trade.clone();
        let snapshot = pos.stops.snapshot(pos.target);

        match self.store.insert_trade(&trade, &snapshot).await {
            Ok(trade_id) => {
                if let Some(pos) = self.position.as_mut() {
                    pos.trade_id = Some(trade_id);
                }
                self.alerts.notify(
                    AlertLevel::Info,
                    "engine",
                    "trade record recovered",
                    "filled entry persisted after retry; entries remain paused until resumed",
                );
            }
            Err(e) => debug!("trade record retry failed: {}", e),
        }
    }

    // ==================== Position management ====================

    async fn manage(&mut self, now: DateTime<FixedOffset>) -> Result<()> {
        if self.flags.take_exit_request() {
            return self.close_position(ExitReason::Manual, now, None).await;
        }

        let symbol = self
            .position
            .as_ref()
            .expect("manage called with a position")
            .trade
            .symbol
            .clone();
        let ltp = match self.fetch_ltp(&symbol).await {
            Ok(quote) => quote.price,
            Err(e) if e.is_transient() => {
                debug!("ltp fetch failed while managing: {}", e);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let params = match self.params().await {
            Ok(p) => p,
            Err(e) => {
                debug!("param read failed while managing: {}", e);
                return Ok(());
            }
        };
        let rule = TrailRule {
            enabled: params.trailing_on,
            trigger: params.trailing_trigger,
            gap: params.trailing_gap,
        };

        let (stop_moved, trailing_started, old_stop) = {
            let pos = self.position.as_mut().expect("position present");
            let was_trailing = pos.stops.trailing_active;
            let old_stop = pos.stops.current;
            let moved = pos.stops.observe(ltp, &rule);
            (moved, !was_trailing && pos.stops.trailing_active, old_stop)
        };

        if trailing_started {
            self.transition(EngineState::Trailing);
            info!(ltp = %ltp, "trailing activated");
        }
        if stop_moved {
            // Durable before anything acts on it
            self.persist_stop().await?;
            let pos = self.position.as_ref().expect("position present");
            info!(old = %old_stop, new = %pos.stops.current, ltp = %ltp, "stop trailed");
        }

        // SL-to-cost checkpoint: only relevant before trailing takes over.
        let checkpoint_due = now.time() >= self.cfg.session.breakeven_checkpoint;
        let needs_lock = {
            let pos = self.position.as_ref().expect("position present");
            checkpoint_due && !pos.stops.breakeven_locked && !pos.stops.trailing_active
        };
        if needs_lock {
            let entry = self
                .position
                .as_ref()
                .expect("position present")
                .trade
                .entry_price;
            if ltp < entry {
                // No reason to hold a loser past the checkpoint
                return self
                    .close_position(ExitReason::CheckpointAbort, now, Some(ltp))
                    .await;
            }
            {
                let pos = self.position.as_mut().expect("position present");
                pos.stops.lock_breakeven();
            }
            self.transition(EngineState::BreakevenLocked);
            self.persist_stop().await?;
            self.alerts.notify(
                AlertLevel::Info,
                "engine",
                "stop moved to cost",
                &format!("checkpoint reached with ltp {} above entry {}", ltp, entry),
            );
        }

        let (stop, target) = {
            let pos = self.position.as_ref().expect("position present");
            (pos.stops.current, pos.target)
        };
        if ltp <= stop {
            return self.close_position(ExitReason::StopHit, now, Some(ltp)).await;
        }
        if ltp >= target {
            return self.close_position(ExitReason::TargetHit, now, Some(ltp)).await;
        }
        if now.time() >= self.cfg.session.square_off {
            return self.close_position(ExitReason::SquareOff, now, Some(ltp)).await;
        }

        Ok(())
    }

    async fn persist_stop(&self) -> Result<()> {
        let Some(pos) = self.position.as_ref() else { return Ok(()) };
        let Some(trade_id) = pos.trade_id else { return Ok(()) };
        self.store
            .update_position_state(trade_id, &pos.stops.snapshot(pos.target))
            .await
    }

    // ==================== Exits ====================

    /// Close the open position. Exactly one exit path may win: the claim
    /// moves the row off OPEN first, and only the winner sends the order.
    async fn close_position(
        &mut self,
        reason: ExitReason,
        now: DateTime<FixedOffset>,
        ltp_hint: Option<Decimal>,
    ) -> Result<()> {
        let Some(pos) = self.position.take() else { return Ok(()) };

        let estimate = match ltp_hint {
            Some(price) => price,
            None => match self.fetch_ltp(&pos.trade.symbol).await {
                Ok(quote) => quote.price,
                // Conservative estimate; finalized from the fill below
                Err(_) => pos.stops.current,
            },
        };
        let est_pnl = pos.trade.pnl_at(estimate);

        if let Some(trade_id) = pos.trade_id {
            let claimed = self
                .store
                .claim_exit(
                    trade_id,
                    now.with_timezone(&Utc),
                    estimate,
                    est_pnl,
                    TradeStatus::for_pnl(est_pnl),
                )
                .await?;
            if !claimed {
                info!(trade_id, "exit already claimed by another path; standing down");
                self.transition(EngineState::Closed);
                self.trade_done_today = true;
                return Ok(());
            }
        } else {
            self.alerts.notify(
                AlertLevel::Critical,
                "engine",
                "closing unrecorded position",
                &format!("{} exits without a trade row; reconcile the ledger manually", pos.trade.symbol),
            );
        }

        let orders = self.gateways.orders().await;
        match timeout(
            self.cfg.request_timeout,
            orders.place_market(&pos.trade.symbol, OrderSide::Sell, pos.trade.quantity),
        )
        .await
        {
            Ok(Ok(order_id)) => {
                self.transition(EngineState::Closed);
                let fill = self.await_fill(&order_id).await;
                let (exit_price, pnl) = match fill {
                    Some(price) => (price, pos.trade.pnl_at(price)),
                    None => (estimate, est_pnl),
                };
                if let (Some(trade_id), Some(_)) = (pos.trade_id, fill) {
                    self.store
                        .finalize_exit(trade_id, exit_price, pnl, TradeStatus::for_pnl(pnl))
                        .await?;
                }
                let status = TradeStatus::for_pnl(pnl);
                self.audit(
                    "TRADE_EXIT",
                    &format!("{} {} @ {}", pos.trade.side, reason, exit_price),
                )
                .await;
                self.alerts.notify(
                    AlertLevel::Info,
                    "engine",
                    "position closed",
                    &format!("{} | exit {} | pnl {} ({})", reason, exit_price, pnl, status),
                );
            }
            Ok(Err(e)) => {
                self.exit_order_failed(&pos, &e.to_string()).await;
            }
            Err(_) => {
                self.exit_order_failed(&pos, "order placement timed out").await;
            }
        }

        self.trade_done_today = true;
        Ok(())
    }

    /// The row is claimed closed but the broker order did not go through:
    /// a store/broker inconsistency the operator must resolve.
    async fn exit_order_failed(&mut self, pos: &ActivePosition, detail: &str) {
        self.transition(EngineState::Closed);
        self.flags.set_paused(true);
        if let Err(e) = self.store.set_setting(SETTING_PAUSED, "1").await {
            warn!("could not persist pause flag: {}", e);
        }
        self.alerts.notify(
            AlertLevel::Critical,
            "engine",
            "exit order failed after claim",
            &format!(
                "{}; broker may still hold {} x{}; entries paused",
                detail, pos.trade.symbol, pos.trade.quantity
            ),
        );
    }

    async fn await_fill(&self, order_id: &str) -> Option<Decimal> {
        let orders = self.gateways.orders().await;
        let deadline = tokio::time::Instant::now() + self.cfg.order_fill_timeout;

        loop {
            match timeout(self.cfg.request_timeout, orders.order_status(order_id)).await {
                Ok(Ok(report)) => match report.state {
                    FillState::Filled => return report.average_price,
                    FillState::Rejected | FillState::Cancelled => {
                        warn!(order_id, state = ?report.state, "exit order did not fill");
                        return None;
                    }
                    _ => {}
                },
                Ok(Err(e)) => debug!(order_id, "status poll failed: {}", e),
                Err(_) => debug!(order_id, "status poll timed out"),
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(order_id, "fill confirmation timed out; keeping the estimated exit");
                return None;
            }
            tokio::time::sleep(self.cfg.order_poll_interval).await;
        }
    }

    // ==================== Kill switch ====================

    async fn flatten_for_kill(&mut self, now: DateTime<FixedOffset>) -> Result<()> {
        if let Some(pending) = self.pending.take() {
            let orders = self.gateways.orders().await;
            let _ = timeout(self.cfg.request_timeout, orders.cancel(&pending.order_id)).await;

            // The order may have filled before the cancel landed; if so it
            // becomes a position and is flattened below.
            if let Ok(Ok(report)) = timeout(
                self.cfg.request_timeout,
                orders.order_status(&pending.order_id),
            )
            .await
            {
                if report.state == FillState::Filled {
                    let entry_price = report.average_price.unwrap_or(pending.signal_price);
                    self.record_entry(&pending, entry_price, now).await;
                }
            }
            if self.position.is_none() {
                self.transition(EngineState::Closed);
            }
        }

        if self.position.is_some() {
            self.close_position(ExitReason::Kill, now, None).await?;
        }
        Ok(())
    }
}
