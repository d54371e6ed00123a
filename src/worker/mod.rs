//! Nonce search workers
//!
//! A worker consumes a [`SearchContext`] and races to find a nonce whose
//! chain digest meets the target. CPU workers grind locally; the
//! accelerator worker drives an external device over TCP and reverifies
//! everything it claims.

use crate::types::Target;
use crate::x11::Order;
use crate::Header;
use num_bigint::BigUint;

pub(crate) mod accelerator;
pub(crate) mod cpu;

pub use accelerator::AcceleratorConfig;

/// How many attempts a CPU worker batches between hashrate marks and
/// cancellation checks
pub(crate) const MARK_INTERVAL: u64 = 1 << 15;

/// Everything a worker needs to search one header
#[derive(Debug, Clone)]
pub(crate) struct SearchContext {
    pub header: Header,
    /// Accrued coin age, stamped onto the sealed header
    pub coin_age: BigUint,
    pub target: Target,
    pub order: Order,
}
