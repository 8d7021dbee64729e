//! Phase size contracts.
//!
//! Every optimization phase declares how much it may grow a graph. The
//! [`ContractVerifier`] compares the graph size before and after the phase
//! and reports a [`InlineError::ContractViolation`] when the growth exceeds
//! the declared factor. Small graphs are exempt: the check only fires once
//! the size before the phase is above a floor.
//!
//! This is a regression net for heuristics, not part of any decision.

use tracing::warn;

use crate::error::{InlineError, InlineResult};
use crate::ir::kind::MethodId;

/// Relative slack applied on top of the allowed size.
pub const CONTRACT_TOLERANCE: f64 = 0.001;

/// Default size below which contracts are not checked.
pub const DEFAULT_MIN_CONTRACT_SIZE: i64 = 1000;

// =============================================================================
// Contract
// =============================================================================

/// Declared growth bound of a phase.
pub trait PhaseSizeContract {
    /// Name reported when the contract is violated.
    fn contract_owner(&self) -> &str;

    /// Maximum ratio `size_after / size_before`.
    fn growth_factor(&self) -> f64;
}

/// A free-standing contract, for phases that are not passes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizeContract {
    pub owner: &'static str,
    pub growth_factor: f64,
}

impl SizeContract {
    pub const fn new(owner: &'static str, growth_factor: f64) -> Self {
        SizeContract {
            owner,
            growth_factor,
        }
    }
}

impl PhaseSizeContract for SizeContract {
    fn contract_owner(&self) -> &str {
        self.owner
    }

    fn growth_factor(&self) -> f64 {
        self.growth_factor
    }
}

// =============================================================================
// Verifier
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContractVerifier {
    /// Checks are skipped while `size_before <= min_size_floor`.
    pub min_size_floor: i64,
}

impl ContractVerifier {
    pub const fn new(min_size_floor: i64) -> Self {
        ContractVerifier { min_size_floor }
    }

    /// Check one phase.
    pub fn check<C: PhaseSizeContract + ?Sized>(
        &self,
        before: i64,
        after: i64,
        contract: &C,
        method: Option<MethodId>,
    ) -> InlineResult<()> {
        if before <= self.min_size_floor {
            return Ok(());
        }
        let factor = contract.growth_factor();
        let allowed = before as f64 * factor;
        let tolerance = before as f64 * CONTRACT_TOLERANCE;
        if after as f64 <= allowed + tolerance {
            return Ok(());
        }

        let observed = after as f64 / before as f64;
        warn!(
            owner = contract.contract_owner(),
            before,
            after,
            expected = factor,
            observed,
            "phase size contract violated"
        );
        Err(InlineError::ContractViolation {
            owner: contract.contract_owner().to_string(),
            method,
            before,
            after,
            expected_ratio: factor,
            observed_ratio: observed,
        })
    }
}

impl Default for ContractVerifier {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_CONTRACT_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INLINING: SizeContract = SizeContract::new("inlining", 1.5);

    #[test]
    fn test_growth_beyond_factor_is_violation() {
        let verifier = ContractVerifier::default();
        let err = verifier
            .check(10_000, 20_000, &INLINING, Some(MethodId(4)))
            .unwrap_err();
        match err {
            InlineError::ContractViolation {
                owner,
                method,
                before,
                after,
                expected_ratio,
                observed_ratio,
            } => {
                assert_eq!(owner, "inlining");
                assert_eq!(method, Some(MethodId(4)));
                assert_eq!((before, after), (10_000, 20_000));
                assert_eq!(expected_ratio, 1.5);
                assert_eq!(observed_ratio, 2.0);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_growth_within_factor_passes() {
        let verifier = ContractVerifier::default();
        assert!(verifier.check(10_000, 14_990, &INLINING, None).is_ok());
    }

    #[test]
    fn test_tolerance_is_relative_to_size_before() {
        let verifier = ContractVerifier::default();
        // allowed 15000, tolerance 10
        assert!(verifier.check(10_000, 15_010, &INLINING, None).is_ok());
        assert!(verifier.check(10_000, 15_011, &INLINING, None).is_err());
    }

    #[test]
    fn test_small_graphs_are_exempt() {
        let verifier = ContractVerifier::new(1000);
        assert!(verifier.check(1000, 100_000, &INLINING, None).is_ok());
        assert!(verifier.check(1001, 100_000, &INLINING, None).is_err());
    }

    #[test]
    fn test_shrinking_always_passes() {
        let verifier = ContractVerifier::new(0);
        let never_grow = SizeContract::new("simplify", 1.0);
        assert!(verifier.check(5000, 4000, &never_grow, None).is_ok());
    }
}
