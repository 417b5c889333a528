//! Saturating integer helpers shared by timing and pairing processors.

use crate::events::Abstime;

/// Saturating addition on abstime.
pub fn add_sat(a: Abstime, b: Abstime) -> Abstime {
    a.saturating_add(b)
}

/// Lower cutoff of a pairing window ending at `stop_time`.
///
/// `window_size` must be non-negative. Underflow saturates to the minimum
/// abstime so that very early stop times keep all buffered starts.
pub fn pairing_cutoff(stop_time: Abstime, window_size: Abstime) -> Abstime {
    debug_assert!(window_size >= 0);
    stop_time.saturating_sub(window_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_sat_clamps() {
        assert_eq!(add_sat(1, 2), 3);
        assert_eq!(add_sat(Abstime::MAX, 1), Abstime::MAX);
        assert_eq!(add_sat(Abstime::MIN, -1), Abstime::MIN);
    }

    #[test]
    fn pairing_cutoff_saturates() {
        assert_eq!(pairing_cutoff(100, 10), 90);
        assert_eq!(pairing_cutoff(Abstime::MIN + 5, 10), Abstime::MIN);
        assert_eq!(pairing_cutoff(Abstime::MIN, 0), Abstime::MIN);
    }
}
