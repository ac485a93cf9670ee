use std::sync::atomic::{AtomicBool, Ordering};

use log::debug;
use thiserror::Error;

use super::block::Block;
use super::encoding::{int_to_bytes, sha256, HASH_LEN};

/// Number of leading zero bits a block hash must have
pub const TARGET_BITS: u32 = 16;

/// Upper bound of the nonce search
pub const MAX_NONCE: u64 = i64::MAX as u64;

/// How many nonces are tried between two checks of the cancellation flag
const CANCEL_POLL_INTERVAL: u64 = 1 << 12;

/// Errors that can occur while sealing a block
#[derive(Debug, Error)]
pub enum ProofOfWorkError {
    #[error("Nonce search exhausted after {0} attempts")]
    Exhausted(u64),

    #[error("Nonce search cancelled at nonce {0}")]
    Cancelled(u64),
}

/// Proof-of-work puzzle bound to a single block
pub struct ProofOfWork<'a> {
    block: &'a Block,
    target: [u8; HASH_LEN],
}

impl<'a> ProofOfWork<'a> {
    pub fn new(block: &'a Block) -> Self {
        ProofOfWork {
            block,
            target: target(TARGET_BITS),
        }
    }

    /// Concatenates the header fields of the block with a candidate nonce
    pub fn prepare_data(&self, nonce: u64) -> Vec<u8> {
        let mut data = Vec::with_capacity(self.block.prev_hash.len() + HASH_LEN + 24);
        data.extend_from_slice(&self.block.prev_hash);
        data.extend_from_slice(&self.block.hash_transactions());
        data.extend_from_slice(&int_to_bytes(self.block.timestamp));
        data.extend_from_slice(&int_to_bytes(TARGET_BITS as i64));
        data.extend_from_slice(&int_to_bytes(nonce as i64));
        data
    }

    /// Searches nonces upward from zero until the hash falls below the target
    ///
    /// # Returns
    ///
    /// The winning nonce and the resulting hash
    pub fn run(&self, cancel: &AtomicBool) -> Result<(u64, Vec<u8>), ProofOfWorkError> {
        self.search(MAX_NONCE, cancel)
    }

    /// Tries nonces in `0..max_nonce`
    fn search(&self, max_nonce: u64, cancel: &AtomicBool) -> Result<(u64, Vec<u8>), ProofOfWorkError> {
        // the header bytes only vary in the trailing nonce
        let mut data = self.prepare_data(0);
        let nonce_offset = data.len() - 8;

        let mut nonce = 0u64;
        while nonce < max_nonce {
            if nonce % CANCEL_POLL_INTERVAL == 0 && cancel.load(Ordering::Relaxed) {
                return Err(ProofOfWorkError::Cancelled(nonce));
            }

            data[nonce_offset..].copy_from_slice(&int_to_bytes(nonce as i64));
            let hash = sha256(&data);
            if self.meets_target(&hash) {
                debug!("Found nonce {} with hash {}", nonce, hex::encode(hash));
                return Ok((nonce, hash.to_vec()));
            }

            nonce += 1;
        }

        Err(ProofOfWorkError::Exhausted(max_nonce))
    }

    /// Checks that the stored nonce yields a hash below the target.
    ///
    /// The stored hash itself is not compared, see [`Self::validate_strict`].
    pub fn validate(&self) -> bool {
        let hash = sha256(&self.prepare_data(self.block.nonce));
        self.meets_target(&hash)
    }

    /// Like [`Self::validate`] but also requires the recomputed hash to equal
    /// the block's stored hash
    pub fn validate_strict(&self) -> bool {
        let hash = sha256(&self.prepare_data(self.block.nonce));
        self.meets_target(&hash) && hash.as_slice() == self.block.hash.as_slice()
    }

    fn meets_target(&self, hash: &[u8; HASH_LEN]) -> bool {
        // big-endian byte order compares like the 256-bit integers
        hash < &self.target
    }
}

/// Builds `1 << (256 - bits)` as a big-endian 256-bit integer
fn target(bits: u32) -> [u8; HASH_LEN] {
    let mut target = [0u8; HASH_LEN];
    let shift = (HASH_LEN as u32 * 8) - bits;
    let index = HASH_LEN - 1 - (shift / 8) as usize;
    target[index] = 1 << (shift % 8);
    target
}
