pub mod core;
pub mod error;
pub mod identity;

pub use crate::core::amount::Fixed64;
pub use crate::core::candidate::{Candidate, CandidateState};
pub use crate::core::history::{HistoryError, HistoryLedger, StateOp, MAX_HISTORY_CAPACITY};
pub use crate::core::keyframe::{CandidateMap, StateKeyFrame};
pub use crate::core::state::{CrState, ACTIVATE_DURATION, CACHE_CR_VOTES_SIZE};
pub use crate::core::transaction::{
    Block, CandidateVotes, Confirm, CrInfo, Input, OutPoint, Output, OutputType, Payload, Program,
    ReferKey, Transaction, TxHash, TxType, UnregisterCr, VoteContent, VoteOutput, VoteType,
    TX_VERSION_09, VOTE_PRODUCER_AND_CR_VERSION,
};
pub use crate::error::{CrStateError, Result};
pub use crate::identity::{cid_of, code_of, deposit_hash_of, did_of, Prefix, U168};
