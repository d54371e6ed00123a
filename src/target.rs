//! Target derivation
//!
//! Converts raw difficulty plus the account's coin-age and the block's
//! transaction count into the acceptance target. The arithmetic here is
//! consensus-critical: every operation, including the bit-length root
//! approximation and its truncation order, must match on all nodes or they
//! silently diverge on which blocks validate.

use crate::{Error, Result, Target};
use num_bigint::BigUint;
use num_traits::Zero;
use tracing::debug;

/// Divisor applied before taking the approximate root (1e14)
const ROOT_SCALE: u64 = 100_000_000_000_000;

/// Weight applied to the transaction count before its root (5e18)
const TX_WEIGHT: u64 = 5_000_000_000_000_000_000;

/// Upper bound of the digest space (2^256)
pub fn max_magnitude() -> BigUint {
    BigUint::from(1u8) << 256u32
}

/// Bit-length approximation of the k-th root
///
/// Divides by 1e14, right-shifts the quotient by `bits * (k-1) / k`, then
/// divides by 32. This is not an exact root; it is reproduced exactly as
/// deployed, truncation order included.
pub fn approx_root(x: &BigUint, k: u64) -> BigUint {
    let q = x / BigUint::from(ROOT_SCALE);
    let bits = q.bits();
    let shift = bits * (k - 1) / k;
    (q >> shift) / BigUint::from(32u8)
}

/// Derive the acceptance target for a sealing attempt
///
/// Base target is `2^256 / difficulty`; a positive coin-age factor and then a
/// positive transaction-count factor each multiply it unconditionally, so the
/// target only ever grows (more nonces qualify).
pub fn derive_target(difficulty: &BigUint, coin_age: &BigUint, tx_count: u64) -> Result<Target> {
    if difficulty.is_zero() {
        return Err(Error::target("difficulty must be non-zero"));
    }
    let mut target = max_magnitude() / difficulty;

    let coin_age_factor = approx_root(coin_age, 6);
    if !coin_age_factor.is_zero() {
        target *= &coin_age_factor;
    }
    let tx_factor = approx_root(&(BigUint::from(tx_count) * BigUint::from(TX_WEIGHT)), 6);
    if !tx_factor.is_zero() {
        target *= &tx_factor;
    }

    if target.bits() > 256 {
        debug!(
            coin_age_factor = %coin_age_factor,
            tx_factor = %tx_factor,
            "derived target exceeds 256 bits, saturating"
        );
    }
    Ok(Target::from_biguint(&target))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn big(v: u64) -> BigUint {
        BigUint::from(v)
    }

    #[test]
    fn test_approx_root_zero_identity() {
        for k in 2..8 {
            assert_eq!(approx_root(&BigUint::zero(), k), BigUint::zero());
        }
    }

    #[test]
    fn test_approx_root_is_pure() {
        let x = big(123_456) * big(ROOT_SCALE);
        assert_eq!(approx_root(&x, 6), approx_root(&x, 6));
    }

    #[test]
    fn test_approx_root_below_scale_is_zero() {
        // Anything under 1e14 collapses to a zero quotient.
        assert_eq!(approx_root(&big(ROOT_SCALE - 1), 6), BigUint::zero());
    }

    #[test]
    fn test_approx_root_known_value() {
        // q = 2^30: bits = 31, shift = 31*5/6 = 25, 2^30 >> 25 = 32, / 32 = 1
        let x = (BigUint::from(1u8) << 30u32) * big(ROOT_SCALE);
        assert_eq!(approx_root(&x, 6), big(1));
    }

    #[test]
    fn test_base_target_when_factors_zero() {
        let difficulty = big(131_072);
        let target = derive_target(&difficulty, &BigUint::zero(), 0).unwrap();
        assert_eq!(target.to_biguint(), max_magnitude() / &difficulty);
    }

    #[test]
    fn test_zero_difficulty_rejected() {
        assert!(derive_target(&BigUint::zero(), &BigUint::zero(), 0).is_err());
    }

    #[test]
    fn test_target_monotone_in_coin_age() {
        // Decade-spaced samples; the bit-length approximation is monotone
        // across these magnitudes.
        let difficulty = big(1) << 200u32;
        let mut last = derive_target(&difficulty, &BigUint::zero(), 0)
            .unwrap()
            .to_biguint();
        for exp in 15..25u32 {
            let coin_age = BigUint::from(10u8).pow(exp);
            let target = derive_target(&difficulty, &coin_age, 0).unwrap().to_biguint();
            assert!(target >= last, "target shrank at coin_age=1e{}", exp);
            last = target;
        }
    }

    #[test]
    fn test_target_monotone_in_tx_count() {
        let difficulty = big(1) << 200u32;
        let mut last = derive_target(&difficulty, &BigUint::zero(), 0)
            .unwrap()
            .to_biguint();
        for tx_count in [0u64, 1, 10, 100, 1000, 10_000] {
            let target = derive_target(&difficulty, &BigUint::zero(), tx_count)
                .unwrap()
                .to_biguint();
            assert!(target >= last, "target shrank at tx_count={}", tx_count);
            last = target;
        }
    }

    #[test]
    fn test_factors_multiply_not_clamp() {
        let difficulty = big(1) << 240u32;
        let coin_age = BigUint::from(10u8).pow(30);
        let factor = approx_root(&coin_age, 6);
        assert!(!factor.is_zero());

        let base = max_magnitude() / &difficulty;
        let target = derive_target(&difficulty, &coin_age, 0).unwrap();
        assert_eq!(target.to_biguint(), base * factor);
    }

    #[test]
    fn test_oversized_target_saturates() {
        // Easy difficulty plus a huge coin-age factor pushes past 2^256.
        let difficulty = big(2);
        let coin_age = BigUint::from(10u8).pow(30);
        let target = derive_target(&difficulty, &coin_age, 0).unwrap();
        assert_eq!(target, Target::max());
    }
}
