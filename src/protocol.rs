//! Binary accelerator wire protocol
//!
//! Commands travel node -> accelerator as a single fixed 96-byte frame;
//! replies travel back on a separate connection to the node's reply
//! listener. The accelerator is untrusted: nothing it sends is believed
//! without local reverification.

use crate::types::{full_to_32, Target};
use crate::x11::Order;
use crate::{Error, Result};
use byteorder::{BigEndian, ByteOrder};

/// Fixed size of every command frame
pub const COMMAND_LEN: usize = 96;

/// Control byte: begin searching
pub const CONTROL_START: u8 = 0;
/// Control byte: stop searching
pub const CONTROL_STOP: u8 = 1;

/// Reply tag carrying an ASCII hashrate report instead of a nonce
pub const REPLY_RATE_TAG: u8 = 1;

/// Minimum reply length for a nonce report
const NONCE_REPLY_LEN: usize = 44;
/// Byte offset of the nonce within a nonce report
const NONCE_REPLY_OFFSET: usize = 36;

/// Nominal work units per start command
///
/// The accelerator treats this as its search budget; the node restarts the
/// search long before a budget this size runs out.
pub const WORK_UNIT_COUNT: u64 = 9_000_000_000_000_000_000;

// Frame layout offsets
const OFF_CONTROL: usize = 0;
const OFF_NUMBER: usize = 1;
const OFF_HASH: usize = 5;
const OFF_NONCE: usize = 37;
const OFF_TARGET: usize = 45;
const OFF_WORK_UNITS: usize = 77;
const OFF_ORDER: usize = 85;

/// One command frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    pub control: u8,
    /// Block number; only the low 32 bits travel on the wire
    pub number: u64,
    /// Pre-nonce header hash
    pub hash: [u8; 32],
    /// Starting nonce for the search
    pub nonce: u64,
    pub target: Target,
    pub work_units: u64,
    pub order: Order,
}

impl Command {
    /// Build a start command for a search
    pub fn start(number: u64, hash: [u8; 32], nonce: u64, target: Target, order: Order) -> Self {
        Self {
            control: CONTROL_START,
            number,
            hash,
            nonce,
            target,
            work_units: WORK_UNIT_COUNT,
            order,
        }
    }

    /// Build a stop command for the current search
    ///
    /// Stop frames identify the search by hash and order only; number,
    /// nonce, and target are all zeroed on the wire.
    pub fn stop(hash: [u8; 32], order: Order) -> Self {
        Self {
            control: CONTROL_STOP,
            number: 0,
            hash,
            nonce: 0,
            target: Target::zero(),
            work_units: WORK_UNIT_COUNT,
            order,
        }
    }

    /// Serialize to the fixed 96-byte frame
    pub fn encode(&self) -> [u8; COMMAND_LEN] {
        let mut frame = [0u8; COMMAND_LEN];
        frame[OFF_CONTROL] = self.control;
        // Low 4 bytes of the big-endian block number
        let number = self.number.to_be_bytes();
        frame[OFF_NUMBER..OFF_HASH].copy_from_slice(&number[4..]);
        frame[OFF_HASH..OFF_NONCE].copy_from_slice(&self.hash);
        BigEndian::write_u64(&mut frame[OFF_NONCE..OFF_TARGET], self.nonce);
        frame[OFF_TARGET..OFF_WORK_UNITS].copy_from_slice(self.target.as_bytes());
        BigEndian::write_u64(&mut frame[OFF_WORK_UNITS..OFF_ORDER], self.work_units);
        frame[OFF_ORDER..].copy_from_slice(&self.order.as_letters());
        frame
    }

    /// Parse a 96-byte frame
    pub fn decode(frame: &[u8]) -> Result<Self> {
        if frame.len() != COMMAND_LEN {
            return Err(Error::protocol(format!(
                "invalid command length: expected {} bytes, got {}",
                COMMAND_LEN,
                frame.len()
            )));
        }
        let control = frame[OFF_CONTROL];
        if control != CONTROL_START && control != CONTROL_STOP {
            return Err(Error::protocol(format!(
                "unknown control byte: 0x{:02x}",
                control
            )));
        }
        let number = BigEndian::read_u32(&frame[OFF_NUMBER..OFF_HASH]) as u64;
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&frame[OFF_HASH..OFF_NONCE]);
        let nonce = BigEndian::read_u64(&frame[OFF_NONCE..OFF_TARGET]);
        let target = Target::new(full_to_32(&frame[OFF_TARGET..OFF_WORK_UNITS]));
        let work_units = BigEndian::read_u64(&frame[OFF_WORK_UNITS..OFF_ORDER]);
        let order = Order::from_letters(&frame[OFF_ORDER..])?;
        Ok(Self {
            control,
            number,
            hash,
            nonce,
            target,
            work_units,
            order,
        })
    }
}

/// One accelerator reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Self-reported hash rate in hashes per second
    HashRate(u64),
    /// Candidate nonce for the current search
    Nonce(u64),
}

/// Parse a reply buffer
///
/// A leading tag byte of [`REPLY_RATE_TAG`] marks an ASCII hashrate report,
/// digits terminated by NUL; anything else is a nonce report with the nonce
/// big-endian at a fixed offset.
pub fn decode_reply(buf: &[u8]) -> Result<Reply> {
    if buf.is_empty() {
        return Err(Error::protocol("empty reply"));
    }
    if buf[0] == REPLY_RATE_TAG {
        let digits = &buf[1..];
        let end = digits
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(digits.len());
        let text = std::str::from_utf8(&digits[..end])
            .map_err(|_| Error::protocol("hashrate report is not ASCII"))?;
        let rate = text
            .parse::<u64>()
            .map_err(|_| Error::protocol(format!("malformed hashrate report: {:?}", text)))?;
        return Ok(Reply::HashRate(rate));
    }
    if buf.len() < NONCE_REPLY_LEN {
        return Err(Error::protocol(format!(
            "truncated nonce reply: {} bytes",
            buf.len()
        )));
    }
    let nonce = BigEndian::read_u64(&buf[NONCE_REPLY_OFFSET..NONCE_REPLY_OFFSET + 8]);
    Ok(Reply::Nonce(nonce))
}
