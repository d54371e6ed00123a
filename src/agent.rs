//! Mining agent
//!
//! Sits between a work source and the [`Engine`]: accepts header templates,
//! keeps only the newest one, runs one seal at a time, and pushes outcomes
//! into a results channel. Also hosts the TCP listener that accelerators
//! deliver replies to.

use crate::chain::CoinAgeReader;
use crate::engine::Engine;
use crate::protocol::{decode_reply, Reply};
use crate::types::{SealOutcome, Work};
use crate::{Header, Result};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Size of the reply read buffer
const REPLY_BUF_LEN: usize = 2048;

/// The mining agent
pub struct Agent {
    engine: Arc<Engine>,
    chain: Arc<dyn CoinAgeReader>,
    results: mpsc::Sender<Option<SealOutcome>>,
    work_tx: watch::Sender<Option<Work>>,
    work_rx: watch::Receiver<Option<Work>>,
    running: AtomicBool,
    /// Stop token for the running update loop
    run_stop: Mutex<Option<CancellationToken>>,
    /// Stop token for the reply listener, when one is bound
    listener_stop: Mutex<Option<CancellationToken>>,
    generation: AtomicU64,
}

impl Agent {
    pub fn new(
        engine: Arc<Engine>,
        chain: Arc<dyn CoinAgeReader>,
        results: mpsc::Sender<Option<SealOutcome>>,
    ) -> Arc<Self> {
        let (work_tx, work_rx) = watch::channel(None);
        Arc::new(Self {
            engine,
            chain,
            results,
            work_tx,
            work_rx,
            running: AtomicBool::new(false),
            run_stop: Mutex::new(None),
            listener_stop: Mutex::new(None),
            generation: AtomicU64::new(0),
        })
    }

    /// Start the update loop; a second start is a no-op
    pub fn start(self: &Arc<Self>) {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let stop = CancellationToken::new();
        *self.run_stop.lock() = Some(stop.clone());
        let agent = self.clone();
        tokio::spawn(async move {
            agent.update_loop(stop).await;
        });
        info!("agent started");
    }

    /// Stop the update loop and cancel any in-flight seal; a second stop is
    /// a no-op
    pub fn stop(&self) {
        if self
            .running
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        if let Some(stop) = self.run_stop.lock().take() {
            stop.cancel();
        }
        if let Some(stop) = self.listener_stop.lock().take() {
            stop.cancel();
        }
        // Clear the template so a later start does not replay stale work
        let _ = self.work_tx.send(None);
        info!("agent stopped");
    }

    /// Submit a header template; it supersedes any template not yet sealed
    pub fn submit_work(&self, header: Header) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        trace!(number = header.number, generation, "work submitted");
        let _ = self.work_tx.send(Some(Work { header, generation }));
    }

    /// Engine hashrate passthrough
    pub fn hashrate(&self) -> f64 {
        self.engine.hashrate()
    }

    async fn update_loop(self: Arc<Self>, stop: CancellationToken) {
        let mut work_rx = self.work_rx.clone();
        let mut current: Option<(CancellationToken, JoinHandle<()>)> = None;

        loop {
            tokio::select! {
                _ = stop.cancelled() => {
                    if let Some((seal_stop, handle)) = current.take() {
                        seal_stop.cancel();
                        let _ = handle.await;
                    }
                    debug!("agent update loop exiting");
                    return;
                }
                changed = work_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    let work = work_rx.borrow_and_update().clone();
                    let Some(work) = work else { continue };

                    if let Some((seal_stop, handle)) = current.take() {
                        seal_stop.cancel();
                        let _ = handle.await;
                    }

                    let seal_stop = CancellationToken::new();
                    let agent = self.clone();
                    let token = seal_stop.clone();
                    let handle = tokio::spawn(async move {
                        agent.mine(work, token).await;
                    });
                    current = Some((seal_stop, handle));
                }
            }
        }
    }

    /// Run one seal and report its outcome
    async fn mine(self: Arc<Self>, work: Work, stop: CancellationToken) {
        let number = work.header.number;
        match self
            .engine
            .seal(self.chain.as_ref(), &work.header, &stop)
            .await
        {
            Ok(Some(sealed)) => {
                info!(number, nonce = sealed.nonce, "header sealed");
                let outcome = SealOutcome { work, sealed };
                if self.results.send(Some(outcome)).await.is_err() {
                    warn!(number, "results channel closed, seal dropped");
                }
            }
            Ok(None) => {
                debug!(number, "seal superseded or stopped");
                let _ = self.results.send(None).await;
            }
            Err(err) => {
                error!(number, error = %err, "seal failed");
                let _ = self.results.send(None).await;
            }
        }
    }

    /// Bind the accelerator reply listener
    ///
    /// Returns the bound address (useful with port 0) and the accept-loop
    /// task handle. Bind failures surface to the caller; [`Agent::stop`]
    /// retires the listener along with the update loop.
    pub async fn bind_reply_listener(
        &self,
        addr: SocketAddr,
    ) -> Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;
        info!(addr = %local, "reply listener bound");

        let stop = CancellationToken::new();
        *self.listener_stop.lock() = Some(stop.clone());

        let engine = self.engine.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop.cancelled() => {
                        debug!("reply listener retired");
                        return;
                    }
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            trace!(peer = %peer, "accelerator connected");
                            let engine = engine.clone();
                            let stop = stop.clone();
                            tokio::spawn(async move {
                                handle_replies(stream, engine, stop).await;
                            });
                        }
                        Err(err) => {
                            warn!(error = %err, "reply accept failed");
                        }
                    }
                }
            }
        });
        Ok((local, handle))
    }
}

/// Read reply frames off one accelerator connection
async fn handle_replies(mut stream: TcpStream, engine: Arc<Engine>, stop: CancellationToken) {
    let reply_tx = engine.reply_sender();
    let mut buf = [0u8; REPLY_BUF_LEN];
    loop {
        let read = tokio::select! {
            _ = stop.cancelled() => return,
            read = stream.read(&mut buf) => read,
        };
        let n = match read {
            Ok(0) => return,
            Ok(n) => n,
            Err(err) => {
                trace!(error = %err, "reply connection closed");
                return;
            }
        };
        match decode_reply(&buf[..n]) {
            Ok(Reply::HashRate(rate)) => {
                trace!(rate, "accelerator hashrate report");
                engine.set_accelerator_hashrate(rate);
            }
            Ok(Reply::Nonce(nonce)) => {
                trace!(nonce, "accelerator nonce report");
                if reply_tx.send(nonce).await.is_err() {
                    return;
                }
            }
            Err(err) => {
                warn!(error = %err, "discarding malformed reply");
            }
        }
    }
}
