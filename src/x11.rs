//! The 11-step proof-of-work digest chain
//!
//! Eleven distinct 512-bit hash algorithms run back to back, each round's
//! output feeding the next round's input. Which algorithm runs at which step
//! is a per-header permutation derived from the pre-nonce hash; node and
//! accelerator must compute the identical permutation or they diverge on
//! which blocks are valid, so the order travels verbatim on the wire.

use crate::{Error, Result};
use digest::DynDigest;

/// Number of chain steps (and of supported algorithms)
pub const STEPS: usize = 11;

/// Width of every round's output in bytes
pub const DIGEST_LEN: usize = 64;

/// One of the 11 chain algorithms, identified on the wire by a letter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Algorithm {
    Blake2b = 0,
    Sha512,
    Sha3,
    Keccak,
    Groestl,
    Jh,
    Skein,
    Whirlpool,
    Streebog,
    Shabal,
    Fsb,
}

/// All algorithms in wire-letter order (`A`..=`K`)
pub const ALGORITHMS: [Algorithm; STEPS] = [
    Algorithm::Blake2b,
    Algorithm::Sha512,
    Algorithm::Sha3,
    Algorithm::Keccak,
    Algorithm::Groestl,
    Algorithm::Jh,
    Algorithm::Skein,
    Algorithm::Whirlpool,
    Algorithm::Streebog,
    Algorithm::Shabal,
    Algorithm::Fsb,
];

impl Algorithm {
    /// Index into the chain's algorithm table
    pub fn index(self) -> usize {
        self as usize
    }

    /// Wire letter (`A`..=`K`)
    pub fn letter(self) -> u8 {
        b'A' + self as u8
    }

    /// Parse a wire letter
    pub fn from_letter(letter: u8) -> Result<Self> {
        if !(b'A'..=b'K').contains(&letter) {
            return Err(Error::protocol(format!(
                "unknown algorithm letter: 0x{:02x}",
                letter
            )));
        }
        Ok(ALGORITHMS[(letter - b'A') as usize])
    }
}

/// The per-header permutation of chain steps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Order([Algorithm; STEPS]);

impl Order {
    /// The reference fixed order `A`..=`K`
    pub fn fixed() -> Self {
        Self(ALGORITHMS)
    }

    /// Derive the order for a header from its pre-nonce hash
    ///
    /// A Fisher-Yates shuffle of the 11 letters driven by the leading hash
    /// bytes. Pure: no nonce, clock, or worker identity feeds in, and every
    /// result contains each algorithm exactly once.
    pub fn for_hash(hash: &[u8; 32]) -> Self {
        let mut steps = ALGORITHMS;
        for i in (1..STEPS).rev() {
            let j = (hash[STEPS - 1 - i] as usize) % (i + 1);
            steps.swap(i, j);
        }
        Self(steps)
    }

    /// The chain steps in execution order
    pub fn steps(&self) -> &[Algorithm; STEPS] {
        &self.0
    }

    /// Wire form: one letter per step
    pub fn as_letters(&self) -> [u8; STEPS] {
        let mut letters = [0u8; STEPS];
        for (letter, algorithm) in letters.iter_mut().zip(self.0.iter()) {
            *letter = algorithm.letter();
        }
        letters
    }

    /// Parse the wire form
    pub fn from_letters(letters: &[u8]) -> Result<Self> {
        if letters.len() != STEPS {
            return Err(Error::protocol(format!(
                "invalid order length: expected {} letters, got {}",
                STEPS,
                letters.len()
            )));
        }
        let mut steps = ALGORITHMS;
        for (step, letter) in steps.iter_mut().zip(letters.iter()) {
            *step = Algorithm::from_letter(*letter)?;
        }
        Ok(Self(steps))
    }
}

/// Output of a full chain evaluation
///
/// The final 64-byte state splits into two channels: the leading half is the
/// comparison result checked against the target, the trailing half becomes
/// the sealed header's mix-digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowOutput {
    /// Comparison channel, checked byte-wise against the target
    pub result: [u8; 32],
    /// Mix-digest channel, attached to the sealed header
    pub mix_digest: [u8; 32],
}

/// The digest chain state
///
/// Holds one live instance of each algorithm plus a rolling scratch buffer;
/// instances are reset and reused across calls instead of being rebuilt per
/// nonce. One chain per search thread.
pub struct X11Chain {
    digests: [Box<dyn DynDigest + Send>; STEPS],
    scratch: [u8; DIGEST_LEN],
}

impl X11Chain {
    /// Create a chain with fresh algorithm state
    pub fn new() -> Self {
        let digests: [Box<dyn DynDigest + Send>; STEPS] = [
            Box::new(blake2::Blake2b512::default()),
            Box::new(sha2::Sha512::default()),
            Box::new(sha3::Sha3_512::default()),
            Box::new(sha3::Keccak512::default()),
            Box::new(groestl::Groestl512::default()),
            Box::new(jh::Jh512::default()),
            Box::new(skein::Skein512::<digest::consts::U64>::default()),
            Box::new(whirlpool::Whirlpool::default()),
            Box::new(streebog::Streebog512::default()),
            Box::new(shabal::Shabal512::default()),
            Box::new(fsb::Fsb512::default()),
        ];
        Self {
            digests,
            scratch: [0u8; DIGEST_LEN],
        }
    }

    /// Run the chain over `input` with the steps named by `order`
    pub fn digest(&mut self, input: &[u8], order: &Order) -> PowOutput {
        for (i, algorithm) in order.steps().iter().enumerate() {
            let hasher = &mut self.digests[algorithm.index()];
            if i == 0 {
                hasher.update(input);
            } else {
                hasher.update(&self.scratch);
            }
            hasher
                .finalize_into_reset(&mut self.scratch)
                .expect("every chain algorithm emits 64 bytes");
        }
        let mut result = [0u8; 32];
        let mut mix_digest = [0u8; 32];
        result.copy_from_slice(&self.scratch[..32]);
        mix_digest.copy_from_slice(&self.scratch[32..]);
        PowOutput { result, mix_digest }
    }

    /// Run the reference fixed-order chain
    ///
    /// Companion for protocol hashrate/validity sanity checks; production
    /// validity always uses the per-header order.
    pub fn digest_fixed(&mut self, input: &[u8]) -> PowOutput {
        let fixed = Order::fixed();
        self.digest(input, &fixed)
    }
}

impl Default for X11Chain {
    fn default() -> Self {
        Self::new()
    }
}

/// Assemble the chain input for a nonce attempt
pub fn chain_input(pre_nonce_hash: &[u8; 32], nonce: u64) -> [u8; 40] {
    let mut input = [0u8; 40];
    input[..32].copy_from_slice(pre_nonce_hash);
    input[32..].copy_from_slice(&nonce.to_be_bytes());
    input
}
