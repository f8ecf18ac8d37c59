//! Executor Planner (C12).
//!
//! Given a liquidatable user's per-reserve balances, picks one
//! `(collateral, debt)` pair and a repay amount and runs it through the
//! dust/min-debt/profit gate sequence, producing either an
//! `ActionablePlan` or a `SkipReason`. Grounded in `liquidator.rs`'s
//! `Liquidator` (`calculate_collateral_amount`, `apply_slippage`,
//! `estimate_profit`), generalized: the teacher's hardcoded 50% close
//! factor becomes a configurable `CloseFactorMode`, and the teacher's
//! single profit-only `anyhow::bail!` gate becomes an explicit gate
//! sequence that returns a `SkipReason` value instead of unwinding —
//! every hot-path miss here is a value, not an error propagated up.

use alloy::primitives::{Address, U256};

use crate::trace::GateResults;
use crate::u256_math;

/// One side of a user's position as seen by the planner: a single
/// reserve's balance, oracle price, and (for collateral) the risk
/// parameters needed to size a seizure. Resolved by the caller from the
/// registry (C1) and micro-verifier (C7) snapshots; the planner itself
/// makes no RPC calls and is pure.
#[derive(Debug, Clone, Copy)]
pub struct DebtLeg {
    pub asset: Address,
    pub amount_wei: U256,
    pub price: U256,
    pub decimals: u8,
    pub value_usd: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct CollateralLeg {
    pub asset: Address,
    pub amount_wei: U256,
    pub price: U256,
    pub decimals: u8,
    pub value_usd: f64,
    pub liquidation_bonus_bps: u16,
    pub enabled: bool,
}

/// Everything the planner needs for one user at one block.
#[derive(Debug, Clone)]
pub struct ExecutorInput {
    pub user: Address,
    pub hf_now: f64,
    pub user_total_debt_usd: f64,
    pub debts: Vec<DebtLeg>,
    pub collaterals: Vec<CollateralLeg>,
    /// Set by the oracle gateway (C2) when a price backing this snapshot
    /// failed its freshness check; short-circuits every other gate.
    pub price_stale: bool,
}

/// Close-factor policy. `fixed_50` always repays half the chosen debt
/// reserve; `full` escalates to full repayment only once HF has fallen
/// to `full_cf_hf_max` or below — a policy choice, not automatic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseFactorMode {
    Fixed50,
    Full,
}

/// A chosen liquidation shape, ready for the signer pool (C13) to sign
/// and the racer (C14) to broadcast.
#[derive(Debug, Clone)]
pub struct ActionablePlan {
    pub user: Address,
    pub collateral_asset: Address,
    pub debt_asset: Address,
    pub repay_wei: U256,
    pub seized_collateral_wei: U256,
    pub min_out_wei: U256,
    pub expected_profit_usd: f64,
}

/// Non-fatal reasons a plan was not produced. `Prefund` and
/// `CallstaticFail` are never returned by `plan()` itself — they're
/// populated by the executor/scheduler layer that wraps `plan()` with a
/// simulation or a prefund balance check, but share this taxonomy so
/// every hot-path miss funnels through one sum type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    MinDebt,
    MinProfit,
    Slippage,
    Prefund,
    PriceStale,
    CallstaticFail,
    Unknown,
}

pub struct ExecutorPlanner {
    close_factor_mode: CloseFactorMode,
    full_cf_hf_max: f64,
    dust_min_usd: f64,
    min_debt_usd: f64,
    min_profit_usd: f64,
    max_slippage_pct: f64,
    est_gas_usd: f64,
}

impl ExecutorPlanner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        close_factor_mode: CloseFactorMode,
        full_cf_hf_max: f64,
        dust_min_usd: f64,
        min_debt_usd: f64,
        min_profit_usd: f64,
        max_slippage_pct: f64,
        est_gas_usd: f64,
    ) -> Self {
        Self {
            close_factor_mode,
            full_cf_hf_max,
            dust_min_usd,
            min_debt_usd,
            min_profit_usd,
            max_slippage_pct,
            est_gas_usd,
        }
    }

    fn repay_wei(&self, debt: &DebtLeg, hf_now: f64) -> U256 {
        let half = debt.amount_wei / U256::from(2u64);
        match self.close_factor_mode {
            CloseFactorMode::Fixed50 => half,
            CloseFactorMode::Full => {
                if hf_now <= self.full_cf_hf_max {
                    debt.amount_wei
                } else {
                    half
                }
            }
        }
    }

    /// Build a plan for a liquidatable user, or report why not. Returns the
    /// per-gate booleans alongside either outcome so the decision trace
    /// (C15) can record which gates actually ran, not just the final verdict.
    pub fn plan(&self, input: &ExecutorInput) -> Result<(ActionablePlan, GateResults), (SkipReason, GateResults)> {
        let mut gates = GateResults::default();

        if input.price_stale {
            return Err((SkipReason::PriceStale, gates));
        }

        if input.user_total_debt_usd < self.min_debt_usd {
            return Err((SkipReason::MinDebt, gates));
        }
        gates.passed_min_debt = true;

        let debt = match input
            .debts
            .iter()
            .max_by(|a, b| a.value_usd.total_cmp(&b.value_usd))
        {
            Some(debt) => debt,
            None => return Err((SkipReason::Unknown, gates)),
        };

        let collateral = match input
            .collaterals
            .iter()
            .filter(|c| c.enabled)
            .max_by(|a, b| a.value_usd.total_cmp(&b.value_usd))
        {
            Some(collateral) => collateral,
            None => return Err((SkipReason::Unknown, gates)),
        };

        let repay_wei = self.repay_wei(debt, input.hf_now);
        let repay_usd_wad = u256_math::calculate_usd_wad(repay_wei, debt.price, debt.decimals);
        let repay_usd = u256_math::wad_to_f64(repay_usd_wad);

        let seized_usd_wad =
            u256_math::apply_basis_points_up(repay_usd_wad, collateral.liquidation_bonus_bps);
        let seized_wei =
            u256_math::usd_wad_to_amount(seized_usd_wad, collateral.price, collateral.decimals);
        let seized_usd = u256_math::wad_to_f64(seized_usd_wad);

        // Dust guard is AND, not OR: a valid repay_usd alone is enough to
        // proceed even if the seized side is unpriced/zero, and vice versa.
        // There's no dedicated `SkipReason` variant for "dust" in the
        // taxonomy, so this reports as `Unknown` (see DESIGN.md).
        if repay_usd < self.dust_min_usd && seized_usd < self.dust_min_usd {
            return Err((SkipReason::Unknown, gates));
        }
        gates.passed_dust_guard = true;

        let expected_profit_usd = seized_usd - repay_usd - self.est_gas_usd;
        if expected_profit_usd < self.min_profit_usd {
            return Err((SkipReason::MinProfit, gates));
        }
        gates.passed_profit = true;

        let slippage_bps = (self.max_slippage_pct * 100.0).round() as u16;
        let min_out_usd_wad = u256_math::apply_basis_points(seized_usd_wad, slippage_bps);
        let min_out_wei = u256_math::usd_wad_to_amount(min_out_usd_wad, debt.price, debt.decimals);
        gates.passed_slippage = true;

        Ok((
            ActionablePlan {
                user: input.user,
                collateral_asset: collateral.asset,
                debt_asset: debt.asset,
                repay_wei,
                seized_collateral_wei: seized_wei,
                min_out_wei,
                expected_profit_usd,
            },
            gates,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn debt_leg(amount: u64, price: u64, value_usd: f64) -> DebtLeg {
        DebtLeg {
            asset: Address::repeat_byte(1),
            amount_wei: U256::from(amount),
            price: U256::from(price),
            decimals: 6,
            value_usd,
        }
    }

    fn collateral_leg(amount: u128, price: u64, value_usd: f64, bonus_bps: u16) -> CollateralLeg {
        CollateralLeg {
            asset: Address::repeat_byte(2),
            amount_wei: U256::from(amount),
            price: U256::from(price),
            decimals: 18,
            value_usd,
            liquidation_bonus_bps: bonus_bps,
            enabled: true,
        }
    }

    fn input(debt: DebtLeg, collateral: CollateralLeg, hf_now: f64, total_debt_usd: f64) -> ExecutorInput {
        ExecutorInput {
            user: Address::repeat_byte(9),
            hf_now,
            user_total_debt_usd: total_debt_usd,
            debts: vec![debt],
            collaterals: vec![collateral],
            price_stale: false,
        }
    }

    fn planner() -> ExecutorPlanner {
        ExecutorPlanner::new(CloseFactorMode::Fixed50, 0.95, 10.0, 100.0, 1.0, 1.0, 0.03)
    }

    #[test]
    fn price_stale_short_circuits_everything_else() {
        let mut i = input(
            debt_leg(1_000_000_000, 100_000_000, 1_000.0),
            collateral_leg(1_000_000_000_000_000_000_000, 100_000_000, 100_000.0, 500),
            0.9,
            1_000.0,
        );
        i.price_stale = true;
        assert_eq!(planner().plan(&i).unwrap_err().0, SkipReason::PriceStale);
    }

    #[test]
    fn min_debt_filter_skips_small_positions() {
        let i = input(
            debt_leg(1_000_000, 100_000_000, 1.0),
            collateral_leg(1_000_000_000_000_000_000, 100_000_000, 100.0, 500),
            0.9,
            50.0,
        );
        assert_eq!(planner().plan(&i).unwrap_err().0, SkipReason::MinDebt);
    }

    #[test]
    fn fixed_50_mode_always_repays_half_regardless_of_hf() {
        let debt = debt_leg(1_000_000_000, 100_000_000, 1_000.0); // 1000 USDC
        let collateral = collateral_leg(1_000_000_000_000_000_000_000, 100_000_000, 100_000.0, 500);
        let i = input(debt, collateral, 0.2, 1_000.0);
        let (plan, gates) = planner().plan(&i).unwrap();
        assert_eq!(plan.repay_wei, U256::from(500_000_000u64));
        assert!(gates.passed_min_debt && gates.passed_dust_guard && gates.passed_profit && gates.passed_slippage);
    }

    #[test]
    fn full_mode_escalates_only_below_hf_threshold() {
        let p = ExecutorPlanner::new(CloseFactorMode::Full, 0.95, 10.0, 100.0, 1.0, 1.0, 0.03);
        let debt = debt_leg(1_000_000_000, 100_000_000, 1_000.0);
        let collateral = collateral_leg(1_000_000_000_000_000_000_000, 100_000_000, 100_000.0, 500);

        let above_threshold = input(debt, collateral, 0.97, 1_000.0);
        assert_eq!(p.plan(&above_threshold).unwrap().0.repay_wei, U256::from(500_000_000u64));

        let below_threshold = input(debt, collateral, 0.90, 1_000.0);
        assert_eq!(p.plan(&below_threshold).unwrap().0.repay_wei, U256::from(1_000_000_000u64));
    }

    #[test]
    fn dust_guard_requires_both_sides_below_threshold() {
        // repay_usd (500) clears dust_min_usd (10) on its own even though
        // seized pricing is effectively dust; plan should still proceed.
        let debt = debt_leg(1_000_000_000, 100_000_000, 1_000.0);
        let collateral = collateral_leg(1_000_000, 100_000_000, 0.1, 500); // tiny collateral balance
        let i = input(debt, collateral, 0.9, 1_000.0);
        assert!(planner().plan(&i).is_ok());
    }

    #[test]
    fn dust_guard_skips_when_both_sides_are_dust() {
        let p = ExecutorPlanner::new(CloseFactorMode::Fixed50, 0.95, 10_000.0, 1.0, 1.0, 1.0, 0.03);
        let debt = debt_leg(1_000_000_000, 100_000_000, 1_000.0);
        let collateral = collateral_leg(1_000_000_000_000_000_000_000, 100_000_000, 100_000.0, 500);
        let i = input(debt, collateral, 0.9, 1_000.0);
        let (reason, gates) = p.plan(&i).unwrap_err();
        assert_eq!(reason, SkipReason::Unknown);
        assert!(gates.passed_min_debt && !gates.passed_dust_guard);
    }

    #[test]
    fn profit_filter_skips_when_bonus_does_not_cover_gas_and_min_profit() {
        let p = ExecutorPlanner::new(CloseFactorMode::Fixed50, 0.95, 0.0, 0.0, 1.0, 1.0, 1_000.0);
        let debt = debt_leg(1_000_000_000, 100_000_000, 1_000.0);
        let collateral = collateral_leg(1_000_000_000_000_000_000_000, 100_000_000, 100_000.0, 500);
        let i = input(debt, collateral, 0.9, 1_000.0);
        let (reason, gates) = p.plan(&i).unwrap_err();
        assert_eq!(reason, SkipReason::MinProfit);
        assert!(gates.passed_dust_guard && !gates.passed_profit);
    }

    #[test]
    fn seized_collateral_applies_liquidation_bonus() {
        // Repay 500 USDC (half of 1000), bonus 5% -> seized should be
        // worth $525 before being converted to collateral decimals.
        let debt = debt_leg(1_000_000_000, 100_000_000, 1_000.0);
        let collateral = collateral_leg(1_000_000_000_000_000_000_000, 100_000_000, 100_000.0, 500);
        let i = input(debt, collateral, 0.9, 1_000.0);
        let (plan, _gates) = planner().plan(&i).unwrap();
        // price = $1.00 (1e8), 18 decimals -> seized_wei == seized_usd * 1e18
        let seized_usd = u256_math::wad_to_f64(u256_math::calculate_usd_wad(
            plan.seized_collateral_wei,
            collateral.price,
            collateral.decimals,
        ));
        assert!((seized_usd - 525.0).abs() < 0.01);
    }

    #[test]
    fn min_out_applies_slippage_tolerance_to_seized_value() {
        let debt = debt_leg(1_000_000_000, 100_000_000, 1_000.0);
        let collateral = collateral_leg(1_000_000_000_000_000_000_000, 100_000_000, 100_000.0, 500);
        let i = input(debt, collateral, 0.9, 1_000.0);
        let (plan, _gates) = planner().plan(&i).unwrap();
        // 1% slippage (planner() uses max_slippage_pct = 1.0) off $525 seized.
        let min_out_usd = u256_math::wad_to_f64(u256_math::calculate_usd_wad(
            plan.min_out_wei,
            debt.price,
            debt.decimals,
        ));
        assert!((min_out_usd - 519.75).abs() < 0.1);
    }
}
