//! Core types for the sealing engine
//!
//! Headers, targets, coin-age snapshots, and work items with the binary
//! encodings the consensus comparison and the accelerator protocol rely on.

use crate::{Error, Result};
use blake2::{Blake2s256, Digest};
use byteorder::{BigEndian, WriteBytesExt};
use num_bigint::BigUint;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Account address (20 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Address(pub [u8; 20]);

impl Address {
    /// Create an address from raw bytes
    pub fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Get the raw address bytes
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s)
            .map_err(|e| Error::header(format!("invalid hex in address: {}", e)))?;
        if bytes.len() != 20 {
            return Err(Error::header(format!(
                "invalid address length: expected 20 bytes, got {}",
                bytes.len()
            )));
        }
        let mut array = [0u8; 20];
        array.copy_from_slice(&bytes);
        Ok(Self(array))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// Unsealed block header template
///
/// The engine never mutates a caller's header; a winning attempt produces a
/// sealed copy via [`Header::with_seal`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Beneficiary account whose coin-age eases the target
    pub coinbase: Address,
    /// Block number
    pub number: u64,
    /// Block timestamp (unix seconds)
    pub time: u64,
    /// Raw proof-of-work difficulty
    pub difficulty: BigUint,
    /// Number of transactions carried by the block
    pub tx_count: u64,
    /// Proof-of-work nonce (zero until sealed)
    pub nonce: u64,
    /// Secondary digest channel output (zero until sealed)
    pub mix_digest: [u8; 32],
    /// Effective coin-age attached by the winning attempt
    pub coin_age: BigUint,
}

impl Header {
    /// Hash of the header with the proof-of-work fields excluded
    ///
    /// Identical for every nonce tried against this template; it seeds both
    /// the algorithm order and the chain input, and travels verbatim to the
    /// accelerator.
    pub fn pre_nonce_hash(&self) -> [u8; 32] {
        let mut buf = Vec::with_capacity(20 + 8 + 8 + 32 + 8);
        buf.extend_from_slice(self.coinbase.as_bytes());
        buf.write_u64::<BigEndian>(self.number).unwrap();
        buf.write_u64::<BigEndian>(self.time).unwrap();
        buf.extend_from_slice(&full_to_32(&self.difficulty.to_bytes_be()));
        buf.write_u64::<BigEndian>(self.tx_count).unwrap();

        let mut hasher = Blake2s256::new();
        hasher.update(&buf);
        hasher.finalize().into()
    }

    /// Return a sealed copy with nonce, mix-digest, and coin-age attached
    pub fn with_seal(&self, nonce: u64, mix_digest: [u8; 32], coin_age: BigUint) -> Header {
        let mut sealed = self.clone();
        sealed.nonce = nonce;
        sealed.mix_digest = mix_digest;
        sealed.coin_age = coin_age;
        sealed
    }
}

/// Point-in-time coin-age state for a coinbase account
///
/// Fetched once per sealing attempt and immutable for its duration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoinAgeSnapshot {
    /// Account balance at the previous block
    pub balance: BigUint,
    /// Accrued coin-age at the previous block
    pub coin_age: BigUint,
    /// Number of the block the snapshot was taken at
    pub prev_number: u64,
    /// Timestamp of the block the snapshot was taken at
    pub prev_time: u64,
}

/// Acceptance threshold for proof-of-work digests
///
/// A 256-bit unsigned magnitude stored as 32 big-endian bytes; a digest is
/// accepted when it is not greater than the target, compared byte-by-byte
/// from the most significant byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Target([u8; 32]);

impl Target {
    /// Create a target from its 32 big-endian bytes
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Build a target from an arbitrary-precision magnitude
    ///
    /// Coin-age scaling is unbounded, so the magnitude can exceed 256 bits;
    /// such targets saturate to all-ones (every digest qualifies).
    pub fn from_biguint(value: &BigUint) -> Self {
        let bytes = value.to_bytes_be();
        if bytes.len() > 32 {
            return Self([0xFF; 32]);
        }
        Self(full_to_32(&bytes))
    }

    /// Get the 32 big-endian target bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Interpret the target as a magnitude
    pub fn to_biguint(&self) -> BigUint {
        BigUint::from_bytes_be(&self.0)
    }

    /// Check whether a digest satisfies this target (`digest <= target`)
    pub fn meets(&self, digest: &[u8; 32]) -> bool {
        for i in 0..32 {
            match digest[i].cmp(&self.0[i]) {
                std::cmp::Ordering::Less => return true,
                std::cmp::Ordering::Greater => return false,
                std::cmp::Ordering::Equal => continue,
            }
        }
        true
    }

    /// Maximum possible target (every digest qualifies)
    pub fn max() -> Self {
        Self([0xFF; 32])
    }

    /// Minimum possible target (only the all-zero digest qualifies)
    pub fn zero() -> Self {
        Self([0; 32])
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Left-pad a big-endian magnitude to 32 bytes
pub(crate) fn full_to_32(word: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    if word.len() >= 32 {
        out.copy_from_slice(&word[word.len() - 32..]);
    } else {
        out[32 - word.len()..].copy_from_slice(word);
    }
    out
}

/// A sealing request submitted to the mining agent
///
/// Only the latest work item is honored; the generation stamp orders
/// submissions so superseded searches can be identified in logs and results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Work {
    /// Header template to seal
    pub header: Header,
    /// Monotonic supersede generation assigned by the agent
    pub generation: u64,
}

/// A completed seal reported by the mining agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealOutcome {
    /// The work item this outcome answers
    pub work: Work,
    /// The sealed header
    pub sealed: Header,
}

/// Thread-safe hash-rate meter
///
/// Workers mark attempt batches; readers get an average rate over the meter's
/// lifetime. Single-writer cells elsewhere handle the accelerator gauge.
#[derive(Debug)]
pub struct HashrateMeter {
    marks: AtomicU64,
    started: Instant,
}

impl HashrateMeter {
    /// Create a new meter starting now
    pub fn new() -> Self {
        Self {
            marks: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    /// Record a batch of attempts
    pub fn mark(&self, attempts: u64) {
        self.marks.fetch_add(attempts, Ordering::Relaxed);
    }

    /// Total attempts recorded
    pub fn total(&self) -> u64 {
        self.marks.load(Ordering::Relaxed)
    }

    /// Average hashes per second since creation
    pub fn rate(&self) -> f64 {
        let elapsed = self.started.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.total() as f64 / elapsed
        } else {
            0.0
        }
    }
}

impl Default for HashrateMeter {
    fn default() -> Self {
        Self::new()
    }
}
