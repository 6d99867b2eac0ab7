//! Shared control flags.
//!
//! In-memory mirror of the PAUSED/KILLED/BOT_MODE settings plus the pending
//! manual-exit request. The durable copy in the settings table is
//! authoritative across restarts; the mirror exists so both loops observe a
//! flip within one tick without a store read.

use crate::domain::TradeMode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

pub struct ControlFlags {
    paused: AtomicBool,
    killed: AtomicBool,
    exit_requested: AtomicBool,
    mode: RwLock<TradeMode>,
}

impl ControlFlags {
    pub fn new(mode: TradeMode, paused: bool, killed: bool) -> Self {
        Self {
            paused: AtomicBool::new(paused),
            killed: AtomicBool::new(killed),
            exit_requested: AtomicBool::new(false),
            mode: RwLock::new(mode),
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    /// Master check for taking new entries
    pub fn is_active(&self) -> bool {
        !self.is_killed() && !self.is_paused()
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    pub fn set_killed(&self, killed: bool) {
        self.killed.store(killed, Ordering::SeqCst);
    }

    pub fn mode(&self) -> TradeMode {
        *self.mode.read().expect("mode lock poisoned")
    }

    pub fn set_mode(&self, mode: TradeMode) {
        *self.mode.write().expect("mode lock poisoned") = mode;
    }

    /// Queue a manual exit; consumed by the engine at the next tick
    pub fn request_exit(&self) {
        self.exit_requested.store(true, Ordering::SeqCst);
    }

    /// Take the pending manual-exit request, if any
    pub fn take_exit_request(&self) -> bool {
        self.exit_requested.swap(false, Ordering::SeqCst)
    }
}
