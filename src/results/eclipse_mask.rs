//! In-eclipse sample masking.
//!
//! A sample at time `t` lies inside eclipse `(t_e, d)` of a binary with period `P` when its
//! phase distance to the eclipse centre is under half the duration:
//!
//! ```text
//! | ((t − t_e + P/2) mod P) − P/2 | < d/2
//! ```
//!
//! `mod` is the Euclidean remainder, so samples before `t_e` fold the same way as samples
//! after it. Without a usable period only the single window around `t_e` is masked.
use crate::constants::{Btjd, Days};

/// `true` for every sample of `time` inside any of the `eclipses` windows.
///
/// Arguments
/// -----------------
/// * `time`: sample times (BTJD).
/// * `period`: orbital period in days; `None`, zero or non-finite disables folding.
/// * `eclipses`: `(mid-eclipse time, full duration)` pairs.
pub fn eclipse_mask(time: &[Btjd], period: Option<Days>, eclipses: &[(Btjd, Days)]) -> Vec<bool> {
    let period = period.filter(|p| p.is_finite() && *p > 0.0);
    time.iter()
        .map(|&t| {
            eclipses
                .iter()
                .filter(|(_, d)| d.is_finite() && *d > 0.0)
                .any(|&(t_e, d)| phase_distance(t, t_e, period) < 0.5 * d)
        })
        .collect()
}

/// Distance from `t` to the nearest occurrence of `t_e`.
fn phase_distance(t: Btjd, t_e: Btjd, period: Option<Days>) -> Days {
    match period {
        Some(p) => ((t - t_e + 0.5 * p).rem_euclid(p) - 0.5 * p).abs(),
        None => (t - t_e).abs(),
    }
}
