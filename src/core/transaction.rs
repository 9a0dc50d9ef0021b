//! Transaction, block, and output records consumed by the CR state engine.
//!
//! These are summaries of the chain's wire types: payload construction,
//! signing, and validation happen upstream. The engine only inspects the
//! fields that drive candidate and vote state.
//!
//! **Determinism:** The transaction hash is computed from a canonical
//! serialization of the transaction content; no randomness or system time.
//! Same transaction data yields the same hash, and therefore the same
//! outpoint refer keys.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::core::amount::Fixed64;
use crate::error::{CrStateError, Result};
use crate::identity::U168;

/// First transaction version that may carry vote outputs.
pub const TX_VERSION_09: u8 = 9;

/// First vote-payload version that may carry CR vote contents.
pub const VOTE_PRODUCER_AND_CR_VERSION: u8 = 1;

/// Transaction hash, hex encoded (alias for String).
pub type TxHash = String;

/// Canonical string encoding of an outpoint, used as a map key.
pub type ReferKey = String;

/// Transaction type tag. Only the CR kinds and `TransferAsset` are meaningful
/// to this engine; the rest pass through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TxType {
    CoinBase = 0x00,
    TransferAsset = 0x02,
    SideChainPow = 0x05,
    RegisterProducer = 0x09,
    CancelProducer = 0x0A,
    UpdateProducer = 0x0B,
    ReturnDepositCoin = 0x0C,
    ActivateProducer = 0x0D,
    RegisterCr = 0x21,
    UnregisterCr = 0x22,
    UpdateCr = 0x23,
    ReturnCrDepositCoin = 0x24,
}

/// Output type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum OutputType {
    Default = 0x00,
    Vote = 0x01,
}

/// Vote category inside a vote output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum VoteType {
    Delegate = 0x00,
    Crc = 0x01,
}

/// Votes credited to a single candidate, identified by its raw 21-byte id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateVotes {
    pub candidate: Vec<u8>,
    pub votes: Fixed64,
}

/// One vote category with its per-candidate allocations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteContent {
    pub vote_type: VoteType,
    pub candidate_votes: Vec<CandidateVotes>,
}

/// Payload carried by an output of type [`OutputType::Vote`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteOutput {
    pub version: u8,
    pub contents: Vec<VoteContent>,
}

impl VoteOutput {
    /// Returns true if any content votes for CR candidates.
    pub fn has_cr_content(&self) -> bool {
        self.contents.iter().any(|c| c.vote_type == VoteType::Crc)
    }
}

/// A transaction output as seen by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
    pub value: Fixed64,
    pub program_hash: U168,
    pub output_type: OutputType,
    pub payload: Option<VoteOutput>,
}

/// Reference to an output of a prior transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutPoint {
    /// Hex-encoded hash of the transaction the output belongs to.
    pub tx_hash: TxHash,
    pub index: u16,
}

impl OutPoint {
    /// Canonical refer key: `hex(tx_hash) || hex(index_u16_le)`.
    pub fn refer_key(&self) -> ReferKey {
        format!("{}{}", self.tx_hash, hex::encode(self.index.to_le_bytes()))
    }
}

/// A transaction input spending a prior output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Input {
    pub previous: OutPoint,
}

impl Input {
    pub fn refer_key(&self) -> ReferKey {
        self.previous.refer_key()
    }
}

/// A program attached to a transaction: redeem script plus its parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    pub code: Vec<u8>,
    pub parameter: Vec<u8>,
}

/// Registration / update payload for a CR candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrInfo {
    pub code: Vec<u8>,
    pub cid: U168,
    pub did: U168,
    pub nickname: String,
    pub url: String,
    pub location: u64,
    pub signature: Vec<u8>,
    pub payload_version: u8,
}

/// Unregistration payload for a CR candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnregisterCr {
    pub cid: U168,
    pub signature: Vec<u8>,
}

/// Transaction payload variants the engine understands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    None,
    CrInfo(CrInfo),
    UnregisterCr(UnregisterCr),
}

impl Payload {
    pub fn as_cr_info(&self) -> Option<&CrInfo> {
        match self {
            Payload::CrInfo(info) => Some(info),
            _ => None,
        }
    }

    pub fn as_unregister_cr(&self) -> Option<&UnregisterCr> {
        match self {
            Payload::UnregisterCr(p) => Some(p),
            _ => None,
        }
    }
}

/// Error produced when a transaction does not carry the payload its type
/// promises.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    #[error("Payload mismatch: {tx_type:?} transaction carries no {expected}")]
    Mismatch {
        tx_type: TxType,
        expected: &'static str,
    },
}

impl From<PayloadError> for CrStateError {
    fn from(e: PayloadError) -> Self {
        CrStateError::State(format!("Payload: {}", e))
    }
}

/// Canonical transaction record (the subset the engine needs).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Transaction hash, hex encoded (computed from transaction content).
    pub hash: TxHash,
    pub tx_type: TxType,
    pub version: u8,
    pub payload: Payload,
    pub inputs: Vec<Input>,
    pub outputs: Vec<Output>,
    pub programs: Vec<Program>,
}

impl Transaction {
    /// Constructs a transaction and computes its content hash.
    pub fn new(
        tx_type: TxType,
        version: u8,
        payload: Payload,
        inputs: Vec<Input>,
        outputs: Vec<Output>,
        programs: Vec<Program>,
    ) -> Result<Self> {
        let mut tx = Self {
            hash: String::new(),
            tx_type,
            version,
            payload,
            inputs,
            outputs,
            programs,
        };
        tx.hash = tx.compute_hash()?;
        Ok(tx)
    }

    /// Computes the transaction hash. Same transaction content -> same hash.
    pub fn compute_hash(&self) -> Result<TxHash> {
        #[derive(Serialize)]
        struct TransactionHashData<'a> {
            tx_type: TxType,
            version: u8,
            payload: &'a Payload,
            inputs: &'a [Input],
            outputs: &'a [Output],
            programs: &'a [Program],
        }
        let hash_data = TransactionHashData {
            tx_type: self.tx_type,
            version: self.version,
            payload: &self.payload,
            inputs: &self.inputs,
            outputs: &self.outputs,
            programs: &self.programs,
        };
        let json = serde_json::to_string(&hash_data)
            .map_err(|e| CrStateError::State(format!("Failed to serialize transaction: {}", e)))?;
        let digest = Sha256::digest(json.as_bytes());
        Ok(hex::encode(digest))
    }

    /// Outpoint of this transaction's output at `index`.
    pub fn outpoint(&self, index: u16) -> OutPoint {
        OutPoint {
            tx_hash: self.hash.clone(),
            index,
        }
    }
}

/// A committed block: the only unit the engine advances by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub height: u32,
    pub transactions: Vec<Transaction>,
}

/// Consensus confirmation attached to a relayed block. The engine accepts it
/// for interface parity with the block pipeline but does not inspect it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirm {
    pub block_hash: TxHash,
}
