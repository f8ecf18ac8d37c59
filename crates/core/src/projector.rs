//! HF Projector (C10).
//!
//! Deterministic, explicitly not ML: for a user sitting in the "critical
//! band" (HF ∈ [1.00, 1.03]), extrapolates a next-block HF from recent
//! price and variable-debt-index deltas. Grounded in `sensitivity.rs`'s
//! "compute once, cheap re-estimate" shape, rebuilt around fixed-size
//! per-asset ring buffers (rather than a single price snapshot) so the
//! projection can use a real observation window instead of one delta.

use std::collections::VecDeque;

use alloy::primitives::{Address, U256};
use dashmap::DashMap;

use crate::u256_math::pct_diff_bps;

const CRITICAL_BAND_LOW: f64 = 1.00;
const CRITICAL_BAND_HIGH: f64 = 1.03;

fn in_critical_band(hf: f64) -> bool {
    (CRITICAL_BAND_LOW..=CRITICAL_BAND_HIGH).contains(&hf)
}

/// How confident the projection is, from the combined magnitude of
/// `|price_impact| + |debt_growth|`, thresholded at 0.5%/1%.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Likelihood {
    Low,
    Medium,
    High,
}

fn likelihood_of(magnitude: f64) -> Likelihood {
    if magnitude >= 0.01 {
        Likelihood::High
    } else if magnitude >= 0.005 {
        Likelihood::Medium
    } else {
        Likelihood::Low
    }
}

/// A next-block HF forecast, only ever produced inside the critical band.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    pub projected_hf: f64,
    pub price_impact: f64,
    pub debt_growth: f64,
    pub likelihood: Likelihood,
}

fn relative_change(buf: &VecDeque<U256>) -> Option<f64> {
    let old = *buf.front()?;
    let new = *buf.back()?;
    if old.is_zero() {
        return None;
    }
    Some(pct_diff_bps(old, new) as f64 / 10_000.0)
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn push_sample(buf: &mut VecDeque<U256>, window: usize, sample: U256) {
    if buf.len() >= window {
        buf.pop_front();
    }
    buf.push_back(sample);
}

/// HF Projector (C10). Holds per-asset ring buffers of price and
/// variable-debt-index samples (size = `window`, default 10).
pub struct HfProjector {
    window: usize,
    prices: DashMap<Address, VecDeque<U256>>,
    debt_indices: DashMap<Address, VecDeque<U256>>,
}

impl HfProjector {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(2),
            prices: DashMap::new(),
            debt_indices: DashMap::new(),
        }
    }

    pub fn observe_price(&self, asset: Address, price: U256) {
        let mut buf = self.prices.entry(asset).or_default();
        push_sample(&mut buf, self.window, price);
    }

    pub fn observe_debt_index(&self, asset: Address, index: U256) {
        let mut buf = self.debt_indices.entry(asset).or_default();
        push_sample(&mut buf, self.window, index);
    }

    /// Project next-block HF for a user, given the reserves backing their
    /// collateral and debt. Returns `None` outside the critical band or
    /// with no history recorded for any relevant asset (`price_impact`/
    /// `debt_growth` default to 0 for assets with no samples, not an
    /// excluded user).
    pub fn project(
        &self,
        hf_now: f64,
        collateral_assets: &[Address],
        debt_assets: &[Address],
    ) -> Option<Projection> {
        if !in_critical_band(hf_now) {
            return None;
        }

        let price_impacts: Vec<f64> = collateral_assets
            .iter()
            .filter_map(|a| self.prices.get(a).and_then(|b| relative_change(&b)))
            .collect();
        let debt_growths: Vec<f64> = debt_assets
            .iter()
            .filter_map(|a| self.debt_indices.get(a).and_then(|b| relative_change(&b)))
            .collect();

        let price_impact = mean(&price_impacts);
        let debt_growth = mean(&debt_growths);
        let projected_hf = hf_now * (1.0 + price_impact) / (1.0 + debt_growth);
        let likelihood = likelihood_of(price_impact.abs() + debt_growth.abs());

        Some(Projection {
            projected_hf,
            price_impact,
            debt_growth,
            likelihood,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outside_critical_band_produces_no_projection() {
        let p = HfProjector::new(10);
        assert!(p.project(1.5, &[], &[]).is_none());
        assert!(p.project(0.99, &[], &[]).is_none());
    }

    #[test]
    fn ring_buffer_caps_at_window_size() {
        let p = HfProjector::new(3);
        let asset = Address::repeat_byte(1);
        for price in [100u64, 101, 102, 103, 104] {
            p.observe_price(asset, U256::from(price));
        }
        let buf = p.prices.get(&asset).unwrap();
        assert_eq!(buf.len(), 3);
        assert_eq!(*buf.front().unwrap(), U256::from(102u64));
        assert_eq!(*buf.back().unwrap(), U256::from(104u64));
    }

    #[test]
    fn projects_hf_from_price_and_index_deltas() {
        let p = HfProjector::new(10);
        let collateral = Address::repeat_byte(1);
        let debt = Address::repeat_byte(2);

        p.observe_price(collateral, U256::from(100_000_000u64));
        p.observe_price(collateral, U256::from(98_000_000u64)); // -2%
        p.observe_debt_index(debt, U256::from(1_000_000_000_000_000_000u64));
        p.observe_debt_index(debt, U256::from(1_010_000_000_000_000_000u64)); // +1%

        let projection = p.project(1.01, &[collateral], &[debt]).unwrap();
        assert!((projection.price_impact - (-0.02)).abs() < 1e-6);
        assert!((projection.debt_growth - 0.01).abs() < 1e-6);

        let expected = 1.01 * (1.0 - 0.02) / (1.0 + 0.01);
        assert!((projection.projected_hf - expected).abs() < 1e-6);
    }

    #[test]
    fn likelihood_thresholds_at_half_and_one_percent() {
        assert_eq!(likelihood_of(0.001), Likelihood::Low);
        assert_eq!(likelihood_of(0.005), Likelihood::Medium);
        assert_eq!(likelihood_of(0.009), Likelihood::Medium);
        assert_eq!(likelihood_of(0.01), Likelihood::High);
        assert_eq!(likelihood_of(0.02), Likelihood::High);
    }

    #[test]
    fn asset_with_no_history_contributes_zero_not_exclusion() {
        let p = HfProjector::new(10);
        let tracked = Address::repeat_byte(1);
        let untracked = Address::repeat_byte(2);

        p.observe_price(tracked, U256::from(100_000_000u64));
        p.observe_price(tracked, U256::from(99_000_000u64)); // -1%

        let projection = p.project(1.02, &[tracked, untracked], &[]).unwrap();
        // mean of [-0.01] (untracked excluded from the average, not zeroed into it)
        assert!((projection.price_impact - (-0.01)).abs() < 1e-6);
    }
}
