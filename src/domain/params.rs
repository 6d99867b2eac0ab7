use crate::error::{BotError, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::str::FromStr;

pub const TARGET_PREMIUM: &str = "TARGET_PREMIUM";
pub const TARGET_POINTS: &str = "TARGET_POINTS";
pub const SL_POINTS: &str = "SL_POINTS";
pub const LOT_SIZE: &str = "LOT_SIZE";
pub const TRAILING_ON: &str = "TRAILING_ON";
pub const TRAILING_TRIGGER: &str = "TRAILING_TRIGGER";
pub const TRAILING_GAP: &str = "TRAILING_GAP";

/// Typed view over the strategy_params KV table. Values are re-read from
/// the store on use, so command-interface updates apply on the next tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrategyParams {
    /// Breakout trigger premium; also the watchlist anchor
    pub target_premium: Decimal,
    pub target_points: Decimal,
    pub sl_points: Decimal,
    pub lot_size: i64,
    pub trailing_on: bool,
    /// Points of profit before trailing starts
    pub trailing_trigger: Decimal,
    /// Points kept behind the peak favorable price
    pub trailing_gap: Decimal,
}

fn decimal_or(map: &HashMap<String, String>, key: &str, fallback: Decimal) -> Result<Decimal> {
    match map.get(key) {
        Some(raw) => Decimal::from_str(raw.trim())
            .map_err(|_| BotError::Validation(format!("{} is not numeric: {:?}", key, raw))),
        None => Ok(fallback),
    }
}

impl StrategyParams {
    /// Build from the raw KV map; absent keys fall back to the stock
    /// defaults, malformed values are an error.
    pub fn from_map(map: &HashMap<String, String>) -> Result<Self> {
        let lot_size = match map.get(LOT_SIZE) {
            Some(raw) => raw
                .trim()
                .parse::<i64>()
                .map_err(|_| BotError::Validation(format!("{} is not an integer: {:?}", LOT_SIZE, raw)))?,
            None => 50,
        };
        let trailing_on = match map.get(TRAILING_ON) {
            Some(raw) => parse_flag(raw)
                .ok_or_else(|| BotError::Validation(format!("{} is not a flag: {:?}", TRAILING_ON, raw)))?,
            None => true,
        };

        Ok(Self {
            target_premium: decimal_or(map, TARGET_PREMIUM, dec!(180))?,
            target_points: decimal_or(map, TARGET_POINTS, dec!(40))?,
            sl_points: decimal_or(map, SL_POINTS, dec!(20))?,
            lot_size,
            trailing_on,
            trailing_trigger: decimal_or(map, TRAILING_TRIGGER, dec!(20))?,
            trailing_gap: decimal_or(map, TRAILING_GAP, dec!(15))?,
        })
    }

    /// Validate a single-key update against its declared type and the
    /// cross-field constraints, given the currently stored values. The
    /// caller only persists when this returns Ok.
    pub fn validate_update(
        current: &HashMap<String, String>,
        key: &str,
        value: &str,
    ) -> Result<()> {
        let value = value.trim();
        match key {
            LOT_SIZE => {
                let qty = value
                    .parse::<i64>()
                    .map_err(|_| BotError::Validation(format!("{} must be an integer", LOT_SIZE)))?;
                if qty <= 0 {
                    return Err(BotError::Validation(format!("{} must be positive", LOT_SIZE)));
                }
            }
            TRAILING_ON => {
                parse_flag(value).ok_or_else(|| {
                    BotError::Validation(format!("{} must be 0/1 or true/false", TRAILING_ON))
                })?;
            }
            TARGET_PREMIUM | TARGET_POINTS | SL_POINTS | TRAILING_TRIGGER | TRAILING_GAP => {
                let parsed = Decimal::from_str(value)
                    .map_err(|_| BotError::Validation(format!("{} must be numeric", key)))?;
                if parsed <= Decimal::ZERO {
                    return Err(BotError::Validation(format!("{} must be positive", key)));
                }

                // A gap at or above the trigger would let the stop start at
                // or below entry the moment trailing activates.
                let mut next = current.clone();
                next.insert(key.to_string(), value.to_string());
                let params = Self::from_map(&next)?;
                if params.trailing_gap >= params.trailing_trigger {
                    return Err(BotError::Validation(format!(
                        "{} ({}) must stay below {} ({})",
                        TRAILING_GAP, params.trailing_gap, TRAILING_TRIGGER, params.trailing_trigger
                    )));
                }
            }
            _ => {
                return Err(BotError::Validation(format!("unknown parameter: {}", key)));
            }
        }
        Ok(())
    }

    /// Seed list for a fresh database
    pub fn seed_pairs(defaults: &crate::config::StrategyDefaults) -> Vec<(String, String)> {
        vec![
            (TARGET_PREMIUM.into(), defaults.target_premium.to_string()),
            (TARGET_POINTS.into(), defaults.target_points.to_string()),
            (SL_POINTS.into(), defaults.sl_points.to_string()),
            (LOT_SIZE.into(), defaults.lot_size.to_string()),
            (
                TRAILING_ON.into(),
                if defaults.trailing_on { "1" } else { "0" }.into(),
            ),
            (TRAILING_TRIGGER.into(), defaults.trailing_trigger.to_string()),
            (TRAILING_GAP.into(), defaults.trailing_gap.to_string()),
        ]
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
