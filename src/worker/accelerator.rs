//! External accelerator search
//!
//! Drives an accelerator device over TCP: one start command per search,
//! candidate nonces arriving back through the engine's reply channel.
//! Every candidate is recomputed locally before it is accepted; an
//! accelerator that lies gets a fresh start command and nothing else.

use super::SearchContext;
use crate::protocol::Command;
use crate::x11::{chain_input, X11Chain};
use crate::{Error, Header, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Where the accelerator listens and how long to wait before attaching
#[derive(Debug, Clone)]
pub struct AcceleratorConfig {
    /// Address the accelerator accepts command frames on
    pub command_addr: String,
    /// Grace period before the first command, letting the device settle
    pub attach_delay: Duration,
}

impl AcceleratorConfig {
    pub fn new(command_addr: impl Into<String>) -> Self {
        Self {
            command_addr: command_addr.into(),
            attach_delay: Duration::from_secs(2),
        }
    }
}

/// Run one accelerator-backed search
///
/// Connection and send failures surface as recoverable errors through
/// `found`; the caller decides whether to retry with a fresh search.
pub(crate) async fn search(
    cfg: AcceleratorConfig,
    ctx: SearchContext,
    seed: u64,
    abort: CancellationToken,
    found: mpsc::Sender<Result<Header>>,
    replies: Arc<Mutex<mpsc::Receiver<u64>>>,
) {
    tokio::time::sleep(cfg.attach_delay).await;
    if abort.is_cancelled() {
        return;
    }

    let pre_nonce_hash = ctx.header.pre_nonce_hash();
    let start = Command::start(
        ctx.header.number,
        pre_nonce_hash,
        seed,
        ctx.target,
        ctx.order,
    );

    let mut replies = replies.lock().await;
    // Nonces from a previous search may still be queued
    while replies.try_recv().is_ok() {}

    if let Err(err) = send_command(&cfg.command_addr, &start).await {
        let _ = found.try_send(Err(err));
        return;
    }
    debug!(addr = %cfg.command_addr, number = ctx.header.number, "accelerator search started");

    let mut chain = X11Chain::new();
    loop {
        tokio::select! {
            _ = abort.cancelled() => {
                let stop = Command::stop(pre_nonce_hash, ctx.order);
                if let Err(err) = send_command(&cfg.command_addr, &stop).await {
                    warn!(error = %err, "could not deliver stop command");
                }
                trace!("accelerator search aborted");
                return;
            }
            reply = replies.recv() => {
                let Some(nonce) = reply else {
                    let _ = found.try_send(Err(Error::network(
                        "accelerator reply channel closed",
                    )));
                    return;
                };
                let output = chain.digest(&chain_input(&pre_nonce_hash, nonce), &ctx.order);
                if ctx.target.meets(&output.result) {
                    let sealed = ctx
                        .header
                        .with_seal(nonce, output.mix_digest, ctx.coin_age.clone());
                    debug!(nonce, "accelerator nonce verified");
                    if found.try_send(Ok(sealed)).is_err() {
                        trace!(nonce, "seal discarded, search already over");
                    }
                    return;
                }
                warn!(nonce, "accelerator reported a bogus nonce, restarting it");
                if let Err(err) = send_command(&cfg.command_addr, &start).await {
                    let _ = found.try_send(Err(err));
                    return;
                }
            }
        }
    }
}

/// Deliver one command frame on a fresh connection
async fn send_command(addr: &str, command: &Command) -> Result<()> {
    let mut stream = TcpStream::connect(addr)
        .await
        .map_err(|e| Error::network(format!("accelerator connect to {} failed: {}", addr, e)))?;
    stream
        .write_all(&command.encode())
        .await
        .map_err(|e| Error::network(format!("accelerator send to {} failed: {}", addr, e)))?;
    stream
        .shutdown()
        .await
        .map_err(|e| Error::network(format!("accelerator send to {} failed: {}", addr, e)))?;
    Ok(())
}
