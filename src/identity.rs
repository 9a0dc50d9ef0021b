//! Candidate identity derivation: 21-byte program hashes and redeem scripts.
//!
//! A candidate is known by three identifiers, all derived from the same
//! public key: the `CID` (hash of the standard redeem script with the CR-ID
//! prefix), the `DID` (same script with its trailing opcode replaced by the
//! DID opcode), and the deposit program hash (same script hashed with the
//! deposit prefix).
//!
//! # Determinism
//! All derivations are pure functions of their byte inputs; no randomness or
//! system time. Same code bytes always yield the same identifier.

use ripemd::Ripemd160;
use secp256k1::PublicKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::error::{CrStateError, Result};

/// Script opcode terminating a standard single-signature redeem script.
pub const OP_CHECKSIG: u8 = 0xAC;

/// Script opcode substituted for `OP_CHECKSIG` when deriving a DID.
pub const OP_DID: u8 = 0xAD;

/// Length in bytes of a [`U168`] identifier (1 prefix byte + 20 hash bytes).
pub const U168_LEN: usize = 21;

/// Prefix tag occupying the first byte of a [`U168`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Prefix {
    Standard = 0x21,
    MultiSig = 0x12,
    Deposit = 0x1F,
    CrId = 0x67,
    Did = 0x64,
}

impl Prefix {
    /// Maps a raw tag byte back to its prefix, if known.
    pub fn from_byte(b: u8) -> Option<Prefix> {
        match b {
            0x21 => Some(Prefix::Standard),
            0x12 => Some(Prefix::MultiSig),
            0x1F => Some(Prefix::Deposit),
            0x67 => Some(Prefix::CrId),
            0x64 => Some(Prefix::Did),
            _ => None,
        }
    }
}

/// 21-byte program-hash identifier. The first byte is a [`Prefix`] tag; the
/// remaining 20 bytes are RIPEMD160(SHA256(code)).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct U168([u8; U168_LEN]);

impl U168 {
    /// Wraps raw identifier bytes. Returns `None` unless exactly 21 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<U168> {
        let arr: [u8; U168_LEN] = bytes.try_into().ok()?;
        Some(U168(arr))
    }

    pub fn as_bytes(&self) -> &[u8; U168_LEN] {
        &self.0
    }

    /// Returns the prefix tag, if the leading byte is a known tag.
    pub fn prefix(&self) -> Option<Prefix> {
        Prefix::from_byte(self.0[0])
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Display for U168 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Errors produced by identity derivation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("Malformed public key: {0}")]
    MalformedKey(String),

    #[error("Malformed program code: code must not be empty")]
    MalformedCode,
}

impl From<IdentityError> for CrStateError {
    fn from(e: IdentityError) -> Self {
        CrStateError::Identity(e.to_string())
    }
}

/// Hashes `code` into a program hash under the given prefix:
/// `prefix || RIPEMD160(SHA256(code))`.
fn program_hash(prefix: Prefix, code: &[u8]) -> U168 {
    let sha = Sha256::digest(code);
    let rip = Ripemd160::digest(sha);
    let mut out = [0u8; U168_LEN];
    out[0] = prefix as u8;
    out[1..].copy_from_slice(&rip);
    U168(out)
}

/// Derives the candidate `CID` from its program code.
pub fn cid_of(code: &[u8]) -> Result<U168> {
    if code.is_empty() {
        return Err(IdentityError::MalformedCode.into());
    }
    Ok(program_hash(Prefix::CrId, code))
}

/// Derives the candidate `DID` from its program code: the trailing opcode is
/// replaced by `OP_DID`, then hashed with the CR-ID prefix.
pub fn did_of(code: &[u8]) -> Result<U168> {
    if code.is_empty() {
        return Err(IdentityError::MalformedCode.into());
    }
    let mut did_code = code.to_vec();
    if let Some(last) = did_code.last_mut() {
        *last = OP_DID;
    }
    Ok(program_hash(Prefix::CrId, &did_code))
}

/// Derives the deposit program hash from the candidate's program code.
pub fn deposit_hash_of(code: &[u8]) -> Result<U168> {
    if code.is_empty() {
        return Err(IdentityError::MalformedCode.into());
    }
    Ok(program_hash(Prefix::Deposit, code))
}

/// Builds the standard redeem script for a public key:
/// `<len><compressed point><OP_CHECKSIG>`. The point is validated and
/// normalized to its 33-byte compressed encoding.
pub fn code_of(pubkey: &[u8]) -> Result<Vec<u8>> {
    let point = PublicKey::from_slice(pubkey)
        .map_err(|e| IdentityError::MalformedKey(e.to_string()))?;
    let compressed = point.serialize();
    let mut code = Vec::with_capacity(compressed.len() + 2);
    code.push(compressed.len() as u8);
    code.extend_from_slice(&compressed);
    code.push(OP_CHECKSIG);
    Ok(code)
}
