//! Per-cycle notional selection.
//!
//! Draws a notional from the configured USD range that both venues can
//! express exactly: the draw is taken over the lattice of multiples of the
//! least common step size, clipped to both venues' minimum and maximum
//! notional and to the free balance.

use rand::Rng;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

use super::executor::OrderExecutor;
use crate::config::{HedgeConfig, SizeDistribution};
use crate::error::HedgeError;
use crate::exchange::LotConstraints;
use crate::utils::decimal_lcm;

/// Step used when neither venue imposes one.
const FALLBACK_STEP: Decimal = dec!(0.01);

/// Chosen notional plus the venue constraints it was drawn against.
#[derive(Debug, Clone, PartialEq)]
pub struct SizeDecision {
    pub notional: Decimal,
    pub constraints_a: LotConstraints,
    pub constraints_b: LotConstraints,
}

/// Candidate notionals `k * step` for `k` in `[k_min, k_max]`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Lattice {
    step: Decimal,
    k_min: i64,
    k_max: i64,
}

/// Picks the notional for each hedge cycle.
#[derive(Debug, Clone)]
pub struct SizePicker {
    distribution: SizeDistribution,
    balance_utilization: Decimal,
}

impl SizePicker {
    pub fn new(distribution: SizeDistribution, balance_utilization: Decimal) -> Self {
        Self {
            distribution,
            balance_utilization,
        }
    }

    pub fn from_config(config: &HedgeConfig) -> Self {
        Self::new(config.size_distribution, config.balance_utilization)
    }

    /// Pick a notional in `[min_usd, max_usd]` valid on both venues.
    pub fn pick(
        &self,
        min_usd: Decimal,
        max_usd: Decimal,
        a: &LotConstraints,
        b: &LotConstraints,
    ) -> Result<Decimal, HedgeError> {
        self.pick_capped(min_usd, max_usd, a, b, None)
    }

    /// Like `pick`, additionally capped at the smaller free balance scaled
    /// by the utilization factor.
    pub fn pick_with_balance(
        &self,
        min_usd: Decimal,
        max_usd: Decimal,
        a: &LotConstraints,
        b: &LotConstraints,
        balance_a: Decimal,
        balance_b: Decimal,
    ) -> Result<Decimal, HedgeError> {
        let cap = balance_a.min(balance_b) * self.balance_utilization;
        self.pick_capped(min_usd, max_usd, a, b, Some(cap))
    }

    /// Fetch lot constraints and balances from both venues, then pick.
    pub async fn pick_for_venues(
        &self,
        min_usd: Decimal,
        max_usd: Decimal,
        venue_a: &OrderExecutor,
        venue_b: &OrderExecutor,
    ) -> Result<SizeDecision, HedgeError> {
        let (lot_a, lot_b, balance_a, balance_b) = tokio::join!(
            venue_a.lot_constraints(),
            venue_b.lot_constraints(),
            venue_a.available_balance(),
            venue_b.available_balance(),
        );
        let (constraints_a, constraints_b) = (lot_a?, lot_b?);
        let (balance_a, balance_b) = (balance_a?, balance_b?);

        debug!(
            %balance_a,
            %balance_b,
            step_a = %constraints_a.step_size,
            step_b = %constraints_b.step_size,
            "Fetched sizing inputs"
        );

        let notional = self.pick_with_balance(
            min_usd,
            max_usd,
            &constraints_a,
            &constraints_b,
            balance_a,
            balance_b,
        )?;

        Ok(SizeDecision {
            notional,
            constraints_a,
            constraints_b,
        })
    }

    fn pick_capped(
        &self,
        min_usd: Decimal,
        max_usd: Decimal,
        a: &LotConstraints,
        b: &LotConstraints,
        cap: Option<Decimal>,
    ) -> Result<Decimal, HedgeError> {
        let lattice = lattice(min_usd, max_usd, a, b, cap)?;

        let mut rng = rand::thread_rng();
        let k = match self.distribution {
            SizeDistribution::Uniform => rng.gen_range(lattice.k_min..=lattice.k_max),
            // Mean of two uniform draws is triangular, peaking mid-range
            SizeDistribution::Triangular => {
                let first = rng.gen_range(lattice.k_min..=lattice.k_max);
                let second = rng.gen_range(lattice.k_min..=lattice.k_max);
                first + (second - first) / 2
            }
        };

        Ok((Decimal::from(k) * lattice.step).normalize())
    }
}

fn lattice(
    min_usd: Decimal,
    max_usd: Decimal,
    a: &LotConstraints,
    b: &LotConstraints,
    cap: Option<Decimal>,
) -> Result<Lattice, HedgeError> {
    if min_usd <= Decimal::ZERO {
        return Err(HedgeError::Config(format!(
            "minimum position {} must be positive",
            min_usd
        )));
    }
    if min_usd > max_usd {
        return Err(HedgeError::Config(format!(
            "minimum position {} exceeds maximum {}",
            min_usd, max_usd
        )));
    }

    let lower = min_usd.max(a.min_notional).max(b.min_notional);
    let upper = [a.max_notional, b.max_notional, cap]
        .into_iter()
        .flatten()
        .fold(max_usd, |upper, bound| upper.min(bound));

    let step = decimal_lcm(a.step_size, b.step_size).ok_or_else(|| {
        HedgeError::SizeUnavailable(format!(
            "step sizes {} and {} have no representable common multiple",
            a.step_size, b.step_size
        ))
    })?;
    let step = if step.is_zero() { FALLBACK_STEP } else { step };

    let k_min = (lower / step).ceil().to_i64();
    let k_max = (upper / step).floor().to_i64();

    match (k_min, k_max) {
        (Some(k_min), Some(k_max)) if k_min <= k_max && k_max > 0 => Ok(Lattice {
            step,
            k_min: k_min.max(1),
            k_max,
        }),
        _ => Err(HedgeError::SizeUnavailable(format!(
            "no multiple of {} within [{}, {}]",
            step, lower, upper
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::is_multiple_of;

    fn lot(min: Decimal, step: Decimal) -> LotConstraints {
        LotConstraints::new(min, step)
    }

    #[test]
    fn test_degenerate_range_returns_exact_value() {
        let picker = SizePicker::new(SizeDistribution::Uniform, dec!(0.95));
        for _ in 0..20 {
            let notional = picker
                .pick(dec!(100), dec!(100), &lot(dec!(10), dec!(1)), &lot(dec!(5), dec!(0.5)))
                .unwrap();
            assert_eq!(notional, dec!(100));
        }
    }

    #[test]
    fn test_pick_respects_bounds_and_common_step() {
        let a = lot(dec!(60), dec!(0.4));
        let b = lot(dec!(5), dec!(0.6));

        for distribution in [SizeDistribution::Uniform, SizeDistribution::Triangular] {
            let picker = SizePicker::new(distribution, dec!(1));
            for _ in 0..200 {
                let notional = picker.pick(dec!(50), dec!(200), &a, &b).unwrap();
                assert!(notional >= dec!(60), "{} below venue minimum", notional);
                assert!(notional <= dec!(200));
                assert!(is_multiple_of(notional, dec!(0.4)));
                assert!(is_multiple_of(notional, dec!(0.6)));
            }
        }
    }

    #[test]
    fn test_invalid_range_is_config_error() {
        let picker = SizePicker::new(SizeDistribution::Uniform, dec!(0.95));
        let a = lot(dec!(1), dec!(1));

        assert!(matches!(
            picker.pick(dec!(200), dec!(100), &a, &a),
            Err(HedgeError::Config(_))
        ));
        assert!(matches!(
            picker.pick(Decimal::ZERO, dec!(100), &a, &a),
            Err(HedgeError::Config(_))
        ));
    }

    #[test]
    fn test_no_common_lattice_point() {
        let picker = SizePicker::new(SizeDistribution::Uniform, dec!(0.95));
        // lcm(3, 7) = 21 has no multiple in [50, 60]
        let result = picker.pick(dec!(50), dec!(60), &lot(dec!(1), dec!(3)), &lot(dec!(1), dec!(7)));
        assert!(matches!(result, Err(HedgeError::SizeUnavailable(_))));
    }

    #[test]
    fn test_venue_max_notional_clips_range() {
        let picker = SizePicker::new(SizeDistribution::Uniform, dec!(1));
        let a = lot(dec!(10), dec!(1)).with_max_notional(dec!(120));
        for _ in 0..50 {
            let notional = picker.pick(dec!(100), dec!(1000), &a, &lot(dec!(5), dec!(1))).unwrap();
            assert!(notional <= dec!(120));
        }

        let tiny = lot(dec!(10), dec!(1)).with_max_notional(dec!(50));
        assert!(matches!(
            picker.pick(dec!(100), dec!(1000), &tiny, &a),
            Err(HedgeError::SizeUnavailable(_))
        ));
    }

    #[test]
    fn test_balance_cap() {
        let picker = SizePicker::new(SizeDistribution::Uniform, dec!(0.5));
        let a = lot(dec!(10), dec!(1));

        for _ in 0..50 {
            let notional = picker
                .pick_with_balance(dec!(50), dec!(1000), &a, &a, dec!(300), dec!(10000))
                .unwrap();
            assert!(notional <= dec!(150));
        }

        assert!(matches!(
            picker.pick_with_balance(dec!(50), dec!(1000), &a, &a, dec!(80), dec!(10000)),
            Err(HedgeError::SizeUnavailable(_))
        ));
    }

    #[test]
    fn test_zero_steps_fall_back_to_cents() {
        let lattice = lattice(
            dec!(10),
            dec!(11),
            &lot(dec!(1), Decimal::ZERO),
            &lot(dec!(1), Decimal::ZERO),
            None,
        )
        .unwrap();
        assert_eq!(lattice.step, dec!(0.01));
        assert_eq!(lattice.k_min, 1000);
        assert_eq!(lattice.k_max, 1100);
    }
}
