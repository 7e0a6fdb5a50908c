//! Stochastic tick synthesis.
//!
//! Prices follow geometric Brownian motion,
//! `dS = mu*S*dt + sigma*S*sqrt(dt)*Z` with `Z ~ N(0,1)` drawn via the
//! Box-Muller transform. Both Box-Muller outputs are used; the second is
//! cached for the next call. Spread and volume are drawn uniformly
//! (volume log-uniformly) per message.

use crate::defs::{MAX_SPREAD_PCT, MIN_PRICE, MIN_SPREAD_PCT, QUOTE_PROBABILITY};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Random generator behind per-tick price, spread, volume and
/// quote/trade decisions.
///
/// One engine belongs to one thread; the tick loop owns its own
/// instance.
#[derive(Debug)]
pub struct TickEngine {
    rng: StdRng,
    spare_normal: Option<f64>,
}

impl TickEngine {
    /// Creates an engine seeded from the OS entropy source.
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
            spare_normal: None,
        }
    }

    /// Creates a deterministically seeded engine, for reproducible
    /// simulations and tests.
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            spare_normal: None,
        }
    }

    /// Advances a price one step of geometric Brownian motion.
    ///
    /// `dt` is the elapsed process time in seconds. The result is
    /// floored at [`MIN_PRICE`] so the process never collapses to zero.
    pub fn next_price(&mut self, current: f64, drift: f64, volatility: f64, dt: f64) -> f64 {
        let z = self.normal();
        let drift_component = drift * current * dt;
        let diffusion_component = volatility * current * dt.sqrt() * z;

        (current + drift_component + diffusion_component).max(MIN_PRICE)
    }

    /// Draws a bid-ask spread between 0.05% and 0.2% of `price`.
    pub fn spread(&mut self, price: f64) -> f64 {
        let pct = MIN_SPREAD_PCT + self.rng.gen::<f64>() * (MAX_SPREAD_PCT - MIN_SPREAD_PCT);
        price * pct
    }

    /// Draws a log-uniform volume between 100 and 100,000.
    pub fn volume(&mut self) -> u32 {
        let log_volume = 2.0 + self.rng.gen::<f64>() * 3.0;
        10f64.powf(log_volume) as u32
    }

    /// Decides whether the next message is a quote (70%) or a trade
    /// (30%).
    pub fn should_generate_quote(&mut self) -> bool {
        self.rng.gen::<f64>() < QUOTE_PROBABILITY
    }

    /// Returns a uniform draw in `[0, 1)`, exposed for the fault
    /// injection dice in the server.
    pub fn roll(&mut self) -> f64 {
        self.rng.gen()
    }

    /// Standard normal via Box-Muller; the sine output of each
    /// transform is kept for the following call.
    fn normal(&mut self) -> f64 {
        if let Some(z) = self.spare_normal.take() {
            return z;
        }

        let mut u1: f64 = self.rng.gen();
        while u1 == 0.0 {
            // log(0) is -inf; redraw.
            u1 = self.rng.gen();
        }
        let u2: f64 = self.rng.gen();

        let radius = (-2.0 * u1.ln()).sqrt();
        let theta = 2.0 * std::f64::consts::PI * u2;
        let z0 = radius * theta.cos();
        let z1 = radius * theta.sin();

        self.spare_normal = Some(z1);
        z0
    }
}

impl Default for TickEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_price_stays_above_floor() {
        let mut engine = TickEngine::from_seed(1);
        let mut price = 0.2;
        for _ in 0..10_000 {
            price = engine.next_price(price, -5.0, 3.0, 0.1);
            assert!(price >= MIN_PRICE);
        }
    }

    #[test]
    fn test_spread_within_bounds() {
        let mut engine = TickEngine::from_seed(2);
        for _ in 0..1_000 {
            let spread = engine.spread(100.0);
            assert!(spread >= 100.0 * MIN_SPREAD_PCT);
            assert!(spread <= 100.0 * MAX_SPREAD_PCT);
        }
    }

    #[test]
    fn test_volume_is_log_uniform_range() {
        let mut engine = TickEngine::from_seed(3);
        let mut below_1000 = 0u32;
        for _ in 0..10_000 {
            let v = engine.volume();
            assert!((100..=100_000).contains(&v));
            if v < 1_000 {
                below_1000 += 1;
            }
        }
        // Log-uniform: roughly a third of the draws land per decade.
        assert!(below_1000 > 2_000 && below_1000 < 5_000);
    }

    #[test]
    fn test_quote_trade_ratio() {
        let mut engine = TickEngine::from_seed(4);
        let quotes = (0..10_000)
            .filter(|_| engine.should_generate_quote())
            .count();
        assert!(quotes > 6_500 && quotes < 7_500, "quotes = {}", quotes);
    }

    #[test]
    fn test_normal_moments() {
        let mut engine = TickEngine::from_seed(5);
        let n = 100_000;
        let draws: Vec<f64> = (0..n).map(|_| engine.normal()).collect();

        let mean = draws.iter().sum::<f64>() / n as f64;
        let var = draws.iter().map(|z| (z - mean) * (z - mean)).sum::<f64>() / n as f64;

        assert!(mean.abs() < 0.02, "mean = {}", mean);
        assert!((var - 1.0).abs() < 0.05, "var = {}", var);
    }

    /// With positive drift the log-return trends positive over a long
    /// horizon, and symmetrically for negative drift.
    #[test]
    fn test_drift_direction() {
        for (drift, positive) in [(0.5, true), (-0.5, false)] {
            let mut engine = TickEngine::from_seed(6);
            let s0 = 100.0;
            let mut price = s0;
            for _ in 0..10_000 {
                price = engine.next_price(price, drift, 0.05, 0.01);
            }
            let log_return = (price / s0).ln();
            assert_eq!(
                log_return > 0.0,
                positive,
                "drift {} gave log return {}",
                drift,
                log_return
            );
        }
    }

    #[test]
    fn test_deterministic_with_seed() {
        let mut a = TickEngine::from_seed(42);
        let mut b = TickEngine::from_seed(42);
        for _ in 0..100 {
            assert_eq!(
                a.next_price(100.0, 0.1, 0.2, 0.01),
                b.next_price(100.0, 0.1, 0.2, 0.01)
            );
        }
    }
}
