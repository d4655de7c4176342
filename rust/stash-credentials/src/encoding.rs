//! Base58check framing for serialized grants.
//!
//! `base58(version || payload || checksum)` where `checksum` is the first
//! four bytes of `sha256(sha256(version || payload))`.

use base58::{FromBase58, ToBase58};
use sha2::{Digest, Sha256};

use crate::CredentialError;

/// Format version of serialized grants.
pub(crate) const VERSION: u8 = 0;

const CHECKSUM_LEN: usize = 4;

fn checksum(bytes: &[u8]) -> [u8; CHECKSUM_LEN] {
    let digest = Sha256::digest(Sha256::digest(bytes));
    let mut out = [0u8; CHECKSUM_LEN];
    out.copy_from_slice(&digest[..CHECKSUM_LEN]);
    out
}

pub(crate) fn encode(payload: &[u8]) -> String {
    let mut bytes = Vec::with_capacity(1 + payload.len() + CHECKSUM_LEN);
    bytes.push(VERSION);
    bytes.extend_from_slice(payload);
    let sum = checksum(&bytes);
    bytes.extend_from_slice(&sum);
    bytes.to_base58()
}

pub(crate) fn decode(input: &str) -> Result<Vec<u8>, CredentialError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CredentialError::Empty);
    }

    let bytes = input
        .from_base58()
        .map_err(|error| CredentialError::InvalidEncoding(format!("{error:?}")))?;

    if bytes.len() < 1 + CHECKSUM_LEN {
        return Err(CredentialError::Truncated);
    }

    let (body, sum) = bytes.split_at(bytes.len() - CHECKSUM_LEN);
    if checksum(body).as_slice() != sum {
        return Err(CredentialError::ChecksumMismatch);
    }

    match body[0] {
        VERSION => Ok(body[1..].to_vec()),
        other => Err(CredentialError::UnsupportedVersion(other)),
    }
}
