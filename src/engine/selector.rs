//! Strike selection and entry signal rules.

use rust_decimal::Decimal;

use crate::domain::OptionSide;
use crate::gateway::{OptionChain, OptionQuote};

/// A leg under observation for the breakout
#[derive(Debug, Clone, PartialEq)]
pub struct WatchLeg {
    pub instrument_key: String,
    pub side: OptionSide,
    pub strike: Decimal,
    pub premium: Decimal,
}

/// The CE/PE pair picked during the observation phase
#[derive(Debug, Clone, Default)]
pub struct Watchlist {
    pub ce: Option<WatchLeg>,
    pub pe: Option<WatchLeg>,
}

impl Watchlist {
    pub fn is_complete(&self) -> bool {
        self.ce.is_some() && self.pe.is_some()
    }

    pub fn legs(&self) -> impl Iterator<Item = &WatchLeg> {
        self.ce.iter().chain(self.pe.iter())
    }
}

fn pick(quotes: &[OptionQuote], target: Decimal, tolerance: Decimal) -> Option<WatchLeg> {
    quotes
        .iter()
        // Within the band, and never more than the tolerance above target
        .filter(|q| (q.premium - target).abs() <= tolerance)
        .min_by_key(|q| (q.premium - target).abs())
        .map(|q| WatchLeg {
            instrument_key: q.instrument_key.clone(),
            side: q.side,
            strike: q.strike,
            premium: q.premium,
        })
}

/// Per side, the strike whose premium sits closest to the target without
/// leaving the tolerance band.
pub fn build_watchlist(chain: &OptionChain, target: Decimal, tolerance: Decimal) -> Watchlist {
    Watchlist {
        ce: pick(&chain.ce, target, tolerance),
        pe: pick(&chain.pe, target, tolerance),
    }
}

/// Breakout entry rule: the premium must cross the trigger, but not so far
/// that the remaining run to target makes the risk/reward pointless.
pub fn breakout_signal(
    ltp: Decimal,
    trigger: Decimal,
    target_points: Decimal,
    cap_buffer: Decimal,
) -> bool {
    let cap = trigger + target_points - cap_buffer;
    ltp > trigger && ltp < cap
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn quote(key: &str, side: OptionSide, strike: i64, premium: Decimal) -> OptionQuote {
        OptionQuote {
            instrument_key: key.to_string(),
            side,
            strike: Decimal::from(strike),
            premium,
        }
    }

    #[test]
    fn picks_closest_within_band() {
        let chain = OptionChain {
            ce: vec![
                quote("a", OptionSide::Ce, 24400, dec!(139)),
                quote("b", OptionSide::Ce, 24450, dec!(171.3)),
                quote("c", OptionSide::Ce, 24500, dec!(188.9)),
            ],
            pe: vec![
                quote("d", OptionSide::Pe, 24400, dec!(251)),
                quote("e", OptionSide::Pe, 24350, dec!(176.5)),
            ],
        };

        let watchlist = build_watchlist(&chain, dec!(180), dec!(25));
        assert_eq!(watchlist.ce.as_ref().unwrap().instrument_key, "b");
        assert_eq!(watchlist.pe.as_ref().unwrap().instrument_key, "e");
        assert!(watchlist.is_complete());
    }

    #[test]
    fn tolerance_band_excludes_far_strikes() {
        let chain = OptionChain {
            ce: vec![quote("a", OptionSide::Ce, 24400, dec!(240))],
            pe: vec![quote("b", OptionSide::Pe, 24400, dec!(120))],
        };
        let watchlist = build_watchlist(&chain, dec!(180), dec!(25));
        assert!(watchlist.ce.is_none());
        assert!(watchlist.pe.is_none());
    }

    #[test]
    fn premium_above_target_is_capped_by_tolerance() {
        // 212 is 32 over a 180 target; with tolerance 25 it may not be
        // selected even if it is the only candidate.
        let chain = OptionChain {
            ce: vec![quote("a", OptionSide::Ce, 24500, dec!(212))],
            pe: vec![],
        };
        assert!(build_watchlist(&chain, dec!(180), dec!(25)).ce.is_none());
    }

    #[test]
    fn breakout_requires_cross_and_room() {
        // trigger 180, target 40 pts, buffer 10 => cap 210
        assert!(!breakout_signal(dec!(180), dec!(180), dec!(40), dec!(10)));
        assert!(breakout_signal(dec!(180.05), dec!(180), dec!(40), dec!(10)));
        assert!(breakout_signal(dec!(205), dec!(180), dec!(40), dec!(10)));
        assert!(!breakout_signal(dec!(210), dec!(180), dec!(40), dec!(10)));
        assert!(!breakout_signal(dec!(215), dec!(180), dec!(40), dec!(10)));
    }
}
