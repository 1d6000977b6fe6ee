//! HMAC chaining and stream verification.
//!
//! Each record's MAC covers its own fields plus the previous record's MAC,
//! so altering, inserting, deleting, or reordering any record breaks every
//! MAC from that point on. The chain forces serialized appends; that is the
//! point, not a limitation.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::record::AuditRecord;

type HmacSha256 = Hmac<Sha256>;

/// Hex MAC that precedes the first record of a stream.
pub const GENESIS_PREV_HMAC: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Where verification of a stream failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    /// The audit key is unusable.
    #[error("audit key rejected")]
    BadKey,
    /// A record's MAC does not match its contents.
    #[error("record {sequence} fails MAC verification")]
    MacMismatch {
        /// Sequence number of the failing record.
        sequence: u64,
    },
    /// A record does not chain from its predecessor.
    #[error("record {sequence} does not chain from its predecessor")]
    BrokenLink {
        /// Sequence number of the failing record.
        sequence: u64,
    },
    /// Sequence numbers are not strictly increasing from 1.
    #[error("record at position {position} has unexpected sequence {sequence}")]
    BadSequence {
        /// Zero-based position in the stream.
        position: usize,
        /// The sequence number found there.
        sequence: u64,
    },
}

/// Compute the hex MAC for a record whose `hmac` field is not yet set.
pub fn compute_hmac(key: &[u8], record: &AuditRecord) -> Result<String, ChainError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| ChainError::BadKey)?;
    mac.update(&record.canonical_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Replay a stream from the start, recomputing every MAC.
///
/// Detects any alteration, insertion, deletion, or reordering. Truncation
/// from the tail is indistinguishable from a shorter stream by the chain
/// alone; callers that need truncation evidence compare against the expected
/// tail MAC with [`verify_tail`].
pub fn verify_stream(key: &[u8], records: &[AuditRecord]) -> Result<(), ChainError> {
    let mut prev = GENESIS_PREV_HMAC.to_string();
    for (position, record) in records.iter().enumerate() {
        let expected_sequence = position as u64 + 1;
        if record.sequence != expected_sequence {
            return Err(ChainError::BadSequence {
                position,
                sequence: record.sequence,
            });
        }
        if record.prev_hmac != prev {
            return Err(ChainError::BrokenLink {
                sequence: record.sequence,
            });
        }
        let recomputed = compute_hmac(key, record)?;
        if recomputed
            .as_bytes()
            .ct_eq(record.hmac.as_bytes())
            .unwrap_u8()
            == 0
        {
            return Err(ChainError::MacMismatch {
                sequence: record.sequence,
            });
        }
        prev = record.hmac.clone();
    }
    Ok(())
}

/// Verify a stream and additionally that it ends at `expected_tail_hmac`,
/// which catches truncation.
pub fn verify_tail(
    key: &[u8],
    records: &[AuditRecord],
    expected_tail_hmac: &str,
) -> Result<(), ChainError> {
    verify_stream(key, records)?;
    let tail = records.last().map_or(GENESIS_PREV_HMAC, |r| r.hmac.as_str());
    if tail.as_bytes().ct_eq(expected_tail_hmac.as_bytes()).unwrap_u8() == 0 {
        return Err(ChainError::BrokenLink {
            sequence: records.last().map_or(0, |r| r.sequence),
        });
    }
    Ok(())
}
