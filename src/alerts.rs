//! Operator alert fan-out.
//!
//! Every user-visible failure and notable lifecycle event goes through the
//! bus: it is logged, kept in a recent ring for the command API, and
//! broadcast to any subscriber.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

const RECENT_CAPACITY: usize = 64;

/// Alert severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    /// Informational - log only
    Info,
    /// Degraded but self-healing (transient feed/store failures)
    Warning,
    /// Needs operator attention soon
    Error,
    /// Inconsistency or failsafe action; operator must intervene
    Critical,
}

impl AlertLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Info => "info",
            AlertLevel::Warning => "warning",
            AlertLevel::Error => "error",
            AlertLevel::Critical => "critical",
        }
    }
}

impl std::fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Alert payload
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub level: AlertLevel,
    pub component: String,
    pub title: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    pub fn new(level: AlertLevel, component: &str, title: &str, message: &str) -> Self {
        Self {
            level,
            component: component.to_string(),
            title: title.to_string(),
            message: message.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// Shared alert bus
#[derive(Clone)]
pub struct AlertBus {
    event_tx: tokio::sync::broadcast::Sender<Alert>,
    recent: Arc<Mutex<VecDeque<Alert>>>,
}

impl AlertBus {
    pub fn new() -> Self {
        let (event_tx, _) = tokio::sync::broadcast::channel(64);
        Self {
            event_tx,
            recent: Arc::new(Mutex::new(VecDeque::with_capacity(RECENT_CAPACITY))),
        }
    }

    /// Subscribe to alerts
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Alert> {
        self.event_tx.subscribe()
    }

    /// Emit an alert: log, remember, broadcast
    pub fn emit(&self, alert: Alert) {
        match alert.level {
            AlertLevel::Info => info!(component = %alert.component, "{}: {}", alert.title, alert.message),
            AlertLevel::Warning => warn!(component = %alert.component, "{}: {}", alert.title, alert.message),
            AlertLevel::Error | AlertLevel::Critical => {
                error!(component = %alert.component, level = %alert.level, "{}: {}", alert.title, alert.message)
            }
        }

        {
            let mut recent = self.recent.lock().expect("alert ring poisoned");
            if recent.len() == RECENT_CAPACITY {
                recent.pop_front();
            }
            recent.push_back(alert.clone());
        }

        let _ = self.event_tx.send(alert);
    }

    pub fn notify(&self, level: AlertLevel, component: &str, title: &str, message: &str) {
        self.emit(Alert::new(level, component, title, message));
    }

    /// Most recent alerts, oldest first
    pub fn recent(&self) -> Vec<Alert> {
        self.recent
            .lock()
            .expect("alert ring poisoned")
            .iter()
            .cloned()
            .collect()
    }
}

impl Default for AlertBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_keeps_latest() {
        let bus = AlertBus::new();
        for i in 0..(RECENT_CAPACITY + 10) {
            bus.notify(AlertLevel::Info, "test", "tick", &i.to_string());
        }
        let recent = bus.recent();
        assert_eq!(recent.len(), RECENT_CAPACITY);
        assert_eq!(recent.last().unwrap().message, (RECENT_CAPACITY + 9).to_string());
    }

    #[tokio::test]
    async fn broadcast_delivers() {
        let bus = AlertBus::new();
        let mut rx = bus.subscribe();
        bus.notify(AlertLevel::Critical, "watchdog", "failsafe exit", "stop breached");
        let alert = rx.recv().await.unwrap();
        assert_eq!(alert.level, AlertLevel::Critical);
        assert_eq!(alert.component, "watchdog");
    }
}
