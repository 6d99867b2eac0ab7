//! Working-stop arithmetic.
//!
//! Pure state, no IO: the engine feeds prices in and persists the result.
//! The one invariant everything else leans on: the working stop of a long
//! option position never moves down.

use rust_decimal::Decimal;

use crate::domain::StopSnapshot;

/// Trailing parameters in force for the tick being processed
#[derive(Debug, Clone, Copy)]
pub struct TrailRule {
    pub enabled: bool,
    /// Points of profit that arm the trail
    pub trigger: Decimal,
    /// Points kept behind the peak
    pub gap: Decimal,
}

/// In-memory working stop for the open position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StopBook {
    pub entry: Decimal,
    pub current: Decimal,
    pub peak: Decimal,
    pub trailing_active: bool,
    pub breakeven_locked: bool,
}

impl StopBook {
    /// Fresh position: hard stop `sl_points` under entry
    pub fn open(entry: Decimal, sl_points: Decimal) -> Self {
        Self {
            entry,
            current: entry - sl_points,
            peak: entry,
            trailing_active: false,
            breakeven_locked: false,
        }
    }

    /// Rebuild from a persisted snapshot (crash recovery)
    pub fn resume(entry: Decimal, snapshot: &StopSnapshot) -> Self {
        Self {
            entry,
            current: snapshot.current_stop,
            peak: snapshot.peak_price,
            trailing_active: snapshot.trailing_active,
            breakeven_locked: snapshot.breakeven_locked,
        }
    }

    /// Fold one price observation into the book. Returns true when the
    /// working stop moved (and therefore must be persisted).
    pub fn observe(&mut self, ltp: Decimal, rule: &TrailRule) -> bool {
        if ltp > self.peak {
            self.peak = ltp;
        }
        if !rule.enabled {
            return false;
        }

        if !self.trailing_active && self.peak - self.entry >= rule.trigger {
            self.trailing_active = true;
        }

        if self.trailing_active {
            let candidate = self.peak - rule.gap;
            // Only ever up
            if candidate > self.current {
                self.current = candidate;
                return true;
            }
        }
        false
    }

    /// SL-to-cost: raise the stop to at least entry. Returns true when
    /// the stop actually moved.
    pub fn lock_breakeven(&mut self) -> bool {
        self.breakeven_locked = true;
        if self.entry > self.current {
            self.current = self.entry;
            return true;
        }
        false
    }

    pub fn snapshot(&self, target_price: Decimal) -> StopSnapshot {
        StopSnapshot {
            current_stop: self.current,
            peak_price: self.peak,
            trailing_active: self.trailing_active,
            breakeven_locked: self.breakeven_locked,
            target_price,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn rule() -> TrailRule {
        TrailRule {
            enabled: true,
            trigger: dec!(20),
            gap: dec!(15),
        }
    }

    #[test]
    fn trail_follows_peak_and_never_retreats() {
        // Entry 180, trigger 20, gap 15: peak 205 -> stop 190,
        // peak 230 -> stop 215, dip to 200 leaves 215 untouched.
        let mut book = StopBook::open(dec!(180), dec!(20));
        assert_eq!(book.current, dec!(160));

        assert!(book.observe(dec!(205), &rule()));
        assert!(book.trailing_active);
        assert_eq!(book.current, dec!(190));

        assert!(book.observe(dec!(230), &rule()));
        assert_eq!(book.current, dec!(215));

        assert!(!book.observe(dec!(200), &rule()));
        assert_eq!(book.current, dec!(215));
        assert_eq!(book.peak, dec!(230));
    }

    #[test]
    fn stop_is_monotonic_over_arbitrary_sequences() {
        let ticks = [
            dec!(181), dec!(199), dec!(205), dec!(188), dec!(214),
            dec!(230), dec!(207), dec!(221), dec!(230.5), dec!(200),
        ];
        let mut book = StopBook::open(dec!(180), dec!(20));
        let mut last_stop = book.current;
        for ltp in ticks {
            book.observe(ltp, &rule());
            assert!(book.current >= last_stop, "stop moved down at ltp {}", ltp);
            last_stop = book.current;
        }
    }

    #[test]
    fn trail_needs_the_trigger() {
        let mut book = StopBook::open(dec!(180), dec!(20));
        assert!(!book.observe(dec!(199), &rule())); // +19, one short
        assert!(!book.trailing_active);
        assert_eq!(book.current, dec!(160));
    }

    #[test]
    fn disabled_trailing_keeps_hard_stop() {
        let off = TrailRule {
            enabled: false,
            ..rule()
        };
        let mut book = StopBook::open(dec!(180), dec!(20));
        assert!(!book.observe(dec!(240), &off));
        assert!(!book.trailing_active);
        assert_eq!(book.current, dec!(160));
        // Peak still tracked for reporting
        assert_eq!(book.peak, dec!(240));
    }

    #[test]
    fn breakeven_raises_to_cost_only() {
        let mut book = StopBook::open(dec!(180), dec!(20));
        assert!(book.lock_breakeven());
        assert_eq!(book.current, dec!(180));
        assert!(book.breakeven_locked);
    }

    #[test]
    fn breakeven_never_lowers_a_trailed_stop() {
        let mut book = StopBook::open(dec!(180), dec!(20));
        book.observe(dec!(230), &rule()); // stop at 215
        assert!(!book.lock_breakeven());
        assert_eq!(book.current, dec!(215));
    }

    #[test]
    fn resume_matches_snapshot() {
        let snap = StopSnapshot {
            current_stop: dec!(215),
            peak_price: dec!(230),
            trailing_active: true,
            breakeven_locked: false,
            target_price: dec!(220),
        };
        let book = StopBook::resume(dec!(180), &snap);
        assert_eq!(book.current, dec!(215));
        assert_eq!(book.peak, dec!(230));
        assert!(book.trailing_active);
        assert_eq!(book.snapshot(dec!(220)), snap);
    }
}
