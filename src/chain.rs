//! Chain-state collaborator interface
//!
//! The engine only needs one thing from the surrounding node: a point-in-time
//! coin-age read for the header's coinbase. The accrual rule that turns the
//! snapshot into an effective coin-age lives here too, since both search
//! modes share it.

use crate::{Address, CoinAgeSnapshot, Header, Result};
use async_trait::async_trait;
use num_bigint::BigUint;

/// Per-block reward credited to the balance before coin-age accrues (1e18)
pub const BLOCK_REWARD: u64 = 1_000_000_000_000_000_000;

/// Read access to the chain-state layer's coin-age records
#[async_trait]
pub trait CoinAgeReader: Send + Sync {
    /// Fetch the balance/coin-age snapshot for a coinbase account
    ///
    /// A side-effect-free point-in-time read; the engine calls it exactly
    /// once per sealing attempt.
    async fn lookup_coin_age(&self, coinbase: &Address) -> Result<CoinAgeSnapshot>;
}

/// Effective coin-age of a header under a snapshot
///
/// Coin-age accrues only when the snapshot block strictly precedes the
/// candidate in both time and number; otherwise it carries over unchanged.
pub fn accrue_coin_age(snapshot: &CoinAgeSnapshot, header: &Header) -> BigUint {
    if snapshot.prev_time < header.time && snapshot.prev_number < header.number {
        let balance = &snapshot.balance + BigUint::from(BLOCK_REWARD);
        let elapsed = BigUint::from(header.time - snapshot.prev_time);
        &snapshot.coin_age + balance * elapsed
    } else {
        snapshot.coin_age.clone()
    }
}

/// Fixed in-memory coin-age source for tests and the demo binary
#[derive(Debug, Clone)]
pub struct FixedCoinAge {
    snapshot: CoinAgeSnapshot,
}

impl FixedCoinAge {
    /// Create a source that answers every lookup with the same snapshot
    pub fn new(snapshot: CoinAgeSnapshot) -> Self {
        Self { snapshot }
    }

    /// A zero-balance, zero-age source
    pub fn empty() -> Self {
        Self::new(CoinAgeSnapshot {
            balance: BigUint::default(),
            coin_age: BigUint::default(),
            prev_number: 0,
            prev_time: 0,
        })
    }
}

#[async_trait]
impl CoinAgeReader for FixedCoinAge {
    async fn lookup_coin_age(&self, _coinbase: &Address) -> Result<CoinAgeSnapshot> {
        Ok(self.snapshot.clone())
    }
}
