//! Coin-age weighted X11 proof-of-work sealing engine
//!
//! Seals block headers by grinding nonces through an 11-algorithm hash
//! chain whose step order is derived per header. Targets scale with the
//! coinbase account's accrued coin age and the block's transaction count,
//! so well-aged miners face an easier search.
//!
//! # Features
//!
//! - Multi-threaded CPU nonce search with live thread-count updates
//! - External accelerator support over a binary TCP protocol, with
//!   mandatory local reverification of every claimed nonce
//! - A mining agent that races seals against incoming work updates
//! - Structured logging via tracing

pub mod agent;
pub mod chain;
pub mod config;
pub mod engine;
pub mod error;
pub mod protocol;
pub mod target;
pub mod types;
pub mod worker;
pub mod x11;

pub use agent::Agent;
pub use chain::{CoinAgeReader, FixedCoinAge};
pub use config::{Config, LogLevel, WorkerType};
pub use engine::{Engine, SealMode};
pub use error::{Error, Result};
pub use types::{Address, CoinAgeSnapshot, Header, SealOutcome, Target, Work};
pub use worker::AcceleratorConfig;
pub use x11::{Order, PowOutput, X11Chain};

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");

/// Application version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
