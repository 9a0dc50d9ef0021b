//! CR candidate entity and its lifecycle state.

use serde::{Deserialize, Serialize};

use crate::core::amount::Fixed64;
use crate::core::transaction::CrInfo;
use crate::identity::U168;

/// Candidate lifecycle state.
///
/// A candidate enters `Pending` on registration, becomes `Active` after the
/// activation depth, may be `Canceled` by its owner, and ends `Returned` once
/// the deposit has been withdrawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CandidateState {
    Pending,
    Active,
    Canceled,
    Returned,
}

/// A CR candidate with its registration info, lifecycle bookkeeping, votes,
/// and locked deposit. Fields mutate only through history-wrapped operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub(crate) info: CrInfo,
    pub(crate) state: CandidateState,
    pub(crate) votes: Fixed64,
    pub(crate) register_height: u32,
    pub(crate) cancel_height: u32,
    pub(crate) deposit_hash: U168,
    pub(crate) deposit_amount: Fixed64,
}

impl Candidate {
    /// Builds a freshly registered candidate in `Pending` state.
    pub(crate) fn new(
        info: CrInfo,
        register_height: u32,
        deposit_hash: U168,
        deposit_amount: Fixed64,
    ) -> Self {
        Self {
            info,
            state: CandidateState::Pending,
            votes: Fixed64::ZERO,
            register_height,
            cancel_height: 0,
            deposit_hash,
            deposit_amount,
        }
    }

    /// Registration info as carried by the latest register/update payload.
    pub fn info(&self) -> &CrInfo {
        &self.info
    }

    pub fn state(&self) -> CandidateState {
        self.state
    }

    /// Votes currently credited.
    pub fn votes(&self) -> Fixed64 {
        self.votes
    }

    /// Height at which the candidate first entered `Pending`.
    pub fn register_height(&self) -> u32 {
        self.register_height
    }

    /// Height of the transition to `Canceled`, or 0 if never canceled.
    pub fn cancel_height(&self) -> u32 {
        self.cancel_height
    }

    /// Program hash of the deposit contract derived from the candidate code.
    pub fn deposit_hash(&self) -> U168 {
        self.deposit_hash
    }

    /// Total deposit currently attributed to the candidate.
    pub fn deposit_amount(&self) -> Fixed64 {
        self.deposit_amount
    }
}
