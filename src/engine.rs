//! Sealing engine
//!
//! Owns the nonce search for one header at a time: derives the target,
//! fixes the chain order, spawns workers, and races their results against
//! the caller's stop token and thread-count updates. A thread-count update
//! tears the workers down and restarts the search on the same header.

use crate::chain::{accrue_coin_age, CoinAgeReader};
use crate::target::derive_target;
use crate::types::HashrateMeter;
use crate::worker::{accelerator, cpu, AcceleratorConfig, SearchContext};
use crate::x11::Order;
use crate::{Error, Header, Result};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tokio::task;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// How the engine searches for nonces
#[derive(Debug, Clone)]
pub enum SealMode {
    /// Local multi-threaded CPU search
    Cpu,
    /// External accelerator over TCP, locally reverified
    Accelerator(AcceleratorConfig),
    /// Seal instantly with a zero nonce; testing only
    Fake,
}

struct EngineInner {
    /// Requested worker count: 0 means one per CPU, negative disables
    /// local search entirely
    threads: i32,
    /// Seed source, created lazily on the first seal
    rng: Option<StdRng>,
}

/// The sealing engine
pub struct Engine {
    mode: SealMode,
    inner: Mutex<EngineInner>,
    /// Wakes the active seal when the thread count changes
    update: Notify,
    meter: Arc<HashrateMeter>,
    /// Accelerator-reported rate; the local meter is meaningless in that mode
    accel_rate: AtomicU64,
    reply_tx: mpsc::Sender<u64>,
    reply_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<u64>>>,
    /// When set, this engine delegates sealing to the shared one
    shared: Option<Arc<Engine>>,
}

impl Engine {
    pub fn new(mode: SealMode, threads: i32) -> Self {
        let (reply_tx, reply_rx) = mpsc::channel(64);
        Self {
            mode,
            inner: Mutex::new(EngineInner { threads, rng: None }),
            update: Notify::new(),
            meter: Arc::new(HashrateMeter::new()),
            accel_rate: AtomicU64::new(0),
            reply_tx,
            reply_rx: Arc::new(tokio::sync::Mutex::new(reply_rx)),
            shared: None,
        }
    }

    /// An engine that seals every header immediately; testing only
    pub fn fake() -> Self {
        Self::new(SealMode::Fake, 1)
    }

    /// An engine that forwards all sealing to `shared`
    pub fn with_shared(mode: SealMode, threads: i32, shared: Arc<Engine>) -> Self {
        let mut engine = Self::new(mode, threads);
        engine.shared = Some(shared);
        engine
    }

    /// Current requested thread count
    pub fn threads(&self) -> i32 {
        self.inner.lock().threads
    }

    /// Change the worker count; an in-flight seal restarts with the new
    /// count on the same header
    pub fn set_threads(&self, threads: i32) {
        self.inner.lock().threads = threads;
        info!(threads, "seal thread count updated");
        self.update.notify_waiters();
    }

    /// Hashes per second: the accelerator's own report in accelerator
    /// mode, the local meter otherwise
    pub fn hashrate(&self) -> f64 {
        match self.mode {
            SealMode::Accelerator(_) => self.accel_rate.load(Ordering::Relaxed) as f64,
            _ => self.meter.rate(),
        }
    }

    pub fn set_accelerator_hashrate(&self, rate: u64) {
        self.accel_rate.store(rate, Ordering::Relaxed);
    }

    pub fn accelerator_hashrate(&self) -> u64 {
        self.accel_rate.load(Ordering::Relaxed)
    }

    /// Sender side of the accelerator reply channel, for the reply listener
    pub fn reply_sender(&self) -> mpsc::Sender<u64> {
        self.reply_tx.clone()
    }

    /// Search for a seal on `header`
    ///
    /// Returns `Ok(Some(sealed))` on success, `Ok(None)` when `stop` fires
    /// first, and an error only for unrecoverable failures. Thread-count
    /// updates restart the search internally without returning.
    pub async fn seal(
        &self,
        chain: &dyn CoinAgeReader,
        header: &Header,
        stop: &CancellationToken,
    ) -> Result<Option<Header>> {
        let mut engine = self;
        while let Some(shared) = &engine.shared {
            engine = shared.as_ref();
        }
        engine.seal_local(chain, header, stop).await
    }

    async fn seal_local(
        &self,
        chain: &dyn CoinAgeReader,
        header: &Header,
        stop: &CancellationToken,
    ) -> Result<Option<Header>> {
        if let SealMode::Fake = self.mode {
            let snapshot = chain.lookup_coin_age(&header.coinbase).await?;
            let coin_age = accrue_coin_age(&snapshot, header);
            return Ok(Some(header.with_seal(0, [0u8; 32], coin_age)));
        }

        loop {
            match self.run_search(chain, header, stop).await? {
                SearchEnd::Stopped => return Ok(None),
                SearchEnd::Sealed(sealed) => return Ok(Some(sealed)),
                SearchEnd::Restart => {
                    debug!(number = header.number, "restarting search on update");
                }
            }
        }
    }

    /// One round of the search: spawn workers, race them against stop and
    /// update, tear everything down
    async fn run_search(
        &self,
        chain: &dyn CoinAgeReader,
        header: &Header,
        stop: &CancellationToken,
    ) -> Result<SearchEnd> {
        let snapshot = chain.lookup_coin_age(&header.coinbase).await?;
        let coin_age = accrue_coin_age(&snapshot, header);
        let target = derive_target(&header.difficulty, &coin_age, header.tx_count)?;
        let order = Order::for_hash(&header.pre_nonce_hash());

        let (worker_count, seeds) = {
            let mut inner = self.inner.lock();
            let count = match &self.mode {
                SealMode::Accelerator(_) => 1,
                _ => match inner.threads {
                    0 => num_cpus::get(),
                    n if n < 0 => 0,
                    n => n as usize,
                },
            };
            if inner.rng.is_none() {
                let rng = StdRng::try_from_os_rng()
                    .map_err(|e| Error::config(format!("seed source unavailable: {}", e)))?;
                inner.rng = Some(rng);
            }
            let rng = inner.rng.as_mut().unwrap();
            let seeds: Vec<u64> = (0..count).map(|_| rng.random()).collect();
            (count, seeds)
        };

        let ctx = SearchContext {
            header: header.clone(),
            coin_age,
            target,
            order,
        };
        debug!(
            number = header.number,
            workers = worker_count,
            "search round starting"
        );

        let abort = CancellationToken::new();
        let (found_tx, mut found_rx) = mpsc::channel::<Result<Header>>(1);
        let mut handles = Vec::with_capacity(worker_count.max(1));

        match &self.mode {
            SealMode::Accelerator(cfg) => {
                let cfg = cfg.clone();
                let ctx = ctx.clone();
                let abort = abort.clone();
                let found = found_tx.clone();
                let replies = self.reply_rx.clone();
                handles.push(task::spawn(async move {
                    accelerator::search(cfg, ctx, seeds[0], abort, found, replies).await;
                }));
            }
            _ => {
                for (id, seed) in seeds.into_iter().enumerate() {
                    let ctx = ctx.clone();
                    let abort = abort.clone();
                    let found = found_tx.clone();
                    let meter = self.meter.clone();
                    handles.push(task::spawn_blocking(move || {
                        cpu::search(id, seed, ctx, abort, found, meter);
                    }));
                }
            }
        }
        drop(found_tx);

        // With no workers there is nothing to receive; wait on stop and
        // update only instead of spinning on the closed channel.
        let mut drained = worker_count == 0;
        let end = loop {
            tokio::select! {
                _ = stop.cancelled() => {
                    trace!(number = header.number, "search stopped by caller");
                    break Ok(SearchEnd::Stopped);
                }
                found = found_rx.recv(), if !drained => {
                    match found {
                        Some(Ok(sealed)) => break Ok(SearchEnd::Sealed(sealed)),
                        Some(Err(err)) => {
                            warn!(error = %err, "search worker failed");
                            break Err(err);
                        }
                        None => {
                            drained = true;
                        }
                    }
                }
                _ = self.update.notified() => {
                    break Ok(SearchEnd::Restart);
                }
            }
        };

        abort.cancel();
        futures::future::join_all(handles).await;
        end
    }
}

enum SearchEnd {
    Stopped,
    Sealed(Header),
    Restart,
}
