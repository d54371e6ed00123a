//! CPU nonce search
//!
//! A plain synchronous grind loop, one per spawned blocking task. Each
//! worker starts from its own random seed and walks nonces upward with
//! wrapping arithmetic, so workers cover disjoint stretches of the space
//! without coordination.

use super::{SearchContext, MARK_INTERVAL};
use crate::types::HashrateMeter;
use crate::x11::{chain_input, X11Chain};
use crate::{Header, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Grind nonces from `seed` until the target is met or the search is
/// aborted
///
/// Runs inside `spawn_blocking`; cancellation is polled before every
/// attempt. A solution is pushed into `found` with `try_send`: if the race
/// already ended the send fails and the solution is discarded.
pub(crate) fn search(
    id: usize,
    seed: u64,
    ctx: SearchContext,
    abort: CancellationToken,
    found: mpsc::Sender<Result<Header>>,
    meter: Arc<HashrateMeter>,
) {
    let pre_nonce_hash = ctx.header.pre_nonce_hash();
    let mut chain = X11Chain::new();
    let mut nonce = seed;
    let mut attempts: u64 = 0;

    debug!(worker = id, seed, "cpu search started");
    loop {
        if abort.is_cancelled() {
            break;
        }
        if attempts >= MARK_INTERVAL {
            meter.mark(attempts);
            attempts = 0;
        }

        let output = chain.digest(&chain_input(&pre_nonce_hash, nonce), &ctx.order);
        attempts += 1;

        if ctx.target.meets(&output.result) {
            meter.mark(attempts);
            let sealed = ctx
                .header
                .with_seal(nonce, output.mix_digest, ctx.coin_age.clone());
            debug!(worker = id, nonce, "cpu search found a seal");
            if found.try_send(Ok(sealed)).is_err() {
                trace!(worker = id, nonce, "seal discarded, search already over");
            }
            return;
        }

        nonce = nonce.wrapping_add(1);
    }

    meter.mark(attempts);
    trace!(worker = id, "cpu search aborted");
}
