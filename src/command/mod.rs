pub mod controller;
pub mod http;

pub use controller::Controller;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::TradeMode;

/// Remote commands accepted over the command channel. Transport-agnostic:
/// the HTTP adapter is one carrier, tests drive the controller directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    Status,
    Params,
    SetParam { key: String, value: String },
    SetStrategy {
        target_points: Decimal,
        sl_points: Decimal,
        lot_size: i64,
    },
    SetTrigger { premium: Decimal },
    Pause,
    Resume,
    Kill,
    KillConfirm { code: String },
    SystemReset,
    Mode { mode: TradeMode },
    SetToken { token: String },
    Exit,
    History { limit: Option<u32> },
    Summary,
}

impl Command {
    /// Command name as recorded in the audit trail
    pub fn name(&self) -> &'static str {
        match self {
            Command::Status => "STATUS",
            Command::Params => "PARAMS",
            Command::SetParam { .. } => "SET_PARAM",
            Command::SetStrategy { .. } => "SET_STRATEGY",
            Command::SetTrigger { .. } => "SET_TRIGGER",
            Command::Pause => "PAUSE",
            Command::Resume => "RESUME",
            Command::Kill => "KILL",
            Command::KillConfirm { .. } => "KILL_CONFIRM",
            Command::SystemReset => "SYSTEM_RESET",
            Command::Mode { .. } => "MODE",
            Command::SetToken { .. } => "SET_TOKEN",
            Command::Exit => "EXIT",
            Command::History { .. } => "HISTORY",
            Command::Summary => "SUMMARY",
        }
    }

    /// Audit detail string; secrets are redacted.
    pub fn details(&self) -> String {
        match self {
            Command::SetParam { key, value } => format!("{}={}", key, value),
            Command::SetStrategy {
                target_points,
                sl_points,
                lot_size,
            } => format!("target={} sl={} lots={}", target_points, sl_points, lot_size),
            Command::SetTrigger { premium } => format!("premium={}", premium),
            Command::Mode { mode } => mode.as_str().to_string(),
            Command::SetToken { .. } => "<redacted>".to_string(),
            Command::KillConfirm { .. } => "<code>".to_string(),
            Command::History { limit } => format!("limit={}", limit.unwrap_or(5)),
            _ => String::new(),
        }
    }
}

/// Outcome returned to the commanding actor
#[derive(Debug, Clone, Serialize)]
pub struct Reply {
    pub ok: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Reply {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            ok: true,
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
            data: None,
        }
    }
}
