//! Command controller.
//!
//! Authenticates actors against the allow-list, appends every accepted
//! command to the audit trail before applying it, and maps each command
//! onto store/flag/gateway mutations. Destructive commands (kill) take a
//! two-step confirmation.

use chrono::{DateTime, Datelike, Duration as ChronoDuration, FixedOffset, Utc};
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::alerts::{AlertBus, AlertLevel};
use crate::command::{Command, Reply};
use crate::control::ControlFlags;
use crate::domain::{StrategyParams, TradeMode};
use crate::domain::params as param_keys;
use crate::error::{BotError, Result};
use crate::gateway::{GatewayFactory, GatewaySet};
use crate::store::{
    SqliteStore, SETTING_ACCESS_TOKEN, SETTING_KILLED, SETTING_MODE, SETTING_PAUSED,
};

/// Seconds a kill confirmation code stays valid
const KILL_CODE_TTL_SECS: i64 = 60;

pub struct Controller {
    store: SqliteStore,
    flags: Arc<ControlFlags>,
    alerts: AlertBus,
    gateways: Arc<GatewaySet>,
    factory: GatewayFactory,
    admins: Vec<i64>,
    tz: FixedOffset,
    kill_codes: Mutex<HashMap<i64, (String, DateTime<Utc>)>>,
}

impl Controller {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: SqliteStore,
        flags: Arc<ControlFlags>,
        alerts: AlertBus,
        gateways: Arc<GatewaySet>,
        factory: GatewayFactory,
        admins: Vec<i64>,
        tz: FixedOffset,
    ) -> Self {
        Self {
            store,
            flags,
            alerts,
            gateways,
            factory,
            admins,
            tz,
            kill_codes: Mutex::new(HashMap::new()),
        }
    }

    /// Entry point for every inbound command. Rejected actors are logged
    /// but never audited as accepted.
    pub async fn handle(&self, actor: i64, command: Command) -> Result<Reply> {
        if !self.admins.contains(&actor) {
            warn!(actor, command = command.name(), "unauthorized command attempt");
            return Err(BotError::Unauthorized(actor));
        }

        // Audit before apply
        self.store
            .append_audit(actor, command.name(), &command.details())
            .await?;

        self.apply(actor, command).await
    }

    async fn apply(&self, actor: i64, command: Command) -> Result<Reply> {
        match command {
            Command::Status => self.status().await,
            Command::Params => {
                let params = self.store.all_params().await?;
                Ok(Reply::with_data("strategy parameters", serde_json::to_value(params)?))
            }
            Command::SetParam { key, value } => self.set_param(&key, &value).await,
            Command::SetStrategy {
                target_points,
                sl_points,
                lot_size,
            } => {
                let updates = [
                    (param_keys::TARGET_POINTS, target_points.to_string()),
                    (param_keys::SL_POINTS, sl_points.to_string()),
                    (param_keys::LOT_SIZE, lot_size.to_string()),
                ];
                for (key, value) in &updates {
                    self.set_param(key, value).await?;
                }
                Ok(Reply::ok(format!(
                    "strategy updated: target {} / sl {} / lots {}",
                    target_points, sl_points, lot_size
                )))
            }
            Command::SetTrigger { premium } => {
                self.set_param(param_keys::TARGET_PREMIUM, &premium.to_string()).await
            }
            Command::Pause => {
                self.store.set_setting(SETTING_PAUSED, "1").await?;
                self.flags.set_paused(true);
                info!("system paused");
                Ok(Reply::ok(
                    "paused: no new entries; an open position keeps being managed",
                ))
            }
            Command::Resume => {
                self.store.set_setting(SETTING_PAUSED, "0").await?;
                self.flags.set_paused(false);
                info!("system resumed");
                Ok(Reply::ok("resumed"))
            }
            Command::Kill => self.arm_kill(actor).await,
            Command::KillConfirm { code } => self.confirm_kill(actor, &code).await,
            Command::SystemReset => self.system_reset().await,
            Command::Mode { mode } => self.switch_mode(mode).await,
            Command::SetToken { token } => {
                self.store.set_setting(SETTING_ACCESS_TOKEN, token.trim()).await?;
                self.rebuild_gateways().await?;
                Ok(Reply::ok("session token updated; gateways rebuilt"))
            }
            Command::Exit => {
                if self.store.open_trade().await?.is_none() {
                    return Ok(Reply::rejected("no open position"));
                }
                self.flags.request_exit();
                Ok(Reply::ok("manual exit queued; executes on the next tick"))
            }
            Command::History { limit } => {
                let trades = self.store.recent_trades(limit.unwrap_or(5) as i64).await?;
                Ok(Reply::with_data("trade history", serde_json::to_value(trades)?))
            }
            Command::Summary => self.summary().await,
        }
    }

    async fn status(&self) -> Result<Reply> {
        let params = StrategyParams::from_map(&self.store.all_params().await?)?;
        let open = self.store.open_trade().await?;

        let position = open.map(|(trade, state)| {
            serde_json::json!({
                "symbol": trade.symbol,
                "side": trade.side.as_str(),
                "entry_price": trade.entry_price.to_string(),
                "quantity": trade.quantity,
                "current_stop": state.map(|s| s.current_stop.to_string()),
            })
        });

        Ok(Reply::with_data(
            "status",
            serde_json::json!({
                "mode": self.flags.mode().as_str(),
                "paused": self.flags.is_paused(),
                "killed": self.flags.is_killed(),
                "target_premium": params.target_premium.to_string(),
                "target_points": params.target_points.to_string(),
                "sl_points": params.sl_points.to_string(),
                "position": position,
            }),
        ))
    }

    /// Validation failures leave the stored value untouched and come back
    /// with the reason.
    async fn set_param(&self, key: &str, value: &str) -> Result<Reply> {
        let current = self.store.all_params().await?;
        StrategyParams::validate_update(&current, key, value)?;
        self.store.set_param(key, value.trim()).await?;
        info!(key, value, "strategy parameter updated");
        Ok(Reply::ok(format!("{} set to {}", key, value.trim())))
    }

    async fn arm_kill(&self, actor: i64) -> Result<Reply> {
        let code = format!("{}", rand::thread_rng().gen_range(1000..10000));
        self.kill_codes
            .lock()
            .await
            .insert(actor, (code.clone(), Utc::now()));

        Ok(Reply::with_data(
            format!(
                "kill requested: confirm with the code within {}s",
                KILL_CODE_TTL_SECS
            ),
            serde_json::json!({ "code": code }),
        ))
    }

    async fn confirm_kill(&self, actor: i64, code: &str) -> Result<Reply> {
        let armed = self.kill_codes.lock().await.remove(&actor);
        let Some((expected, issued_at)) = armed else {
            return Ok(Reply::rejected("no kill pending; issue kill first"));
        };
        if Utc::now() - issued_at > ChronoDuration::seconds(KILL_CODE_TTL_SECS) {
            return Ok(Reply::rejected("confirmation code expired; issue kill again"));
        }
        if expected != code.trim() {
            return Ok(Reply::rejected("wrong confirmation code"));
        }

        self.store.set_setting(SETTING_KILLED, "1").await?;
        self.store.set_setting(SETTING_PAUSED, "1").await?;
        self.flags.set_killed(true);
        self.flags.set_paused(true);
        self.alerts.notify(
            AlertLevel::Critical,
            "command",
            "kill switch engaged",
            "open position will be force-closed; entries blocked until system_reset",
        );
        Ok(Reply::ok("killed: flattening and locking down"))
    }

    async fn system_reset(&self) -> Result<Reply> {
        self.store.set_setting(SETTING_KILLED, "0").await?;
        self.store.set_setting(SETTING_PAUSED, "0").await?;
        self.flags.set_killed(false);
        self.flags.set_paused(false);
        self.rebuild_gateways().await?;
        self.alerts.notify(
            AlertLevel::Info,
            "command",
            "system reset",
            "kill cleared; bot active",
        );
        Ok(Reply::ok("system reset complete; bot is active"))
    }

    async fn switch_mode(&self, mode: TradeMode) -> Result<Reply> {
        if mode == TradeMode::Live {
            let token = self.store.setting(SETTING_ACCESS_TOKEN).await?;
            if token.as_deref().map_or(true, |t| t.trim().is_empty()) {
                return Err(BotError::Validation(
                    "cannot switch to live: no session token set; use set_token first".into(),
                ));
            }
        }

        self.store.set_setting(SETTING_MODE, mode.as_str()).await?;
        self.flags.set_mode(mode);
        self.rebuild_gateways().await?;
        info!(%mode, "execution mode switched");
        Ok(Reply::ok(format!("mode switched to {}", mode)))
    }

    async fn rebuild_gateways(&self) -> Result<()> {
        let token = self.store.setting(SETTING_ACCESS_TOKEN).await?;
        let (market, orders) = self.factory.build(self.flags.mode(), token.as_deref())?;
        self.gateways.swap(market, orders).await;
        Ok(())
    }

    async fn summary(&self) -> Result<Reply> {
        let today = Utc::now().with_timezone(&self.tz).date_naive();
        let daily = self.store.daily_summary(today).await?;
        let week_start = today - ChronoDuration::days(today.weekday().num_days_from_monday() as i64);
        let weekly_pnl = self.store.pnl_since(week_start).await?;

        Ok(Reply::with_data(
            "session summary",
            serde_json::json!({
                "date": today.to_string(),
                "trades": daily.trades,
                "wins": daily.wins,
                "losses": daily.losses,
                "net_pnl": daily.net_pnl.to_string(),
                "weekly_pnl": weekly_pnl.to_string(),
            }),
        ))
    }
}
