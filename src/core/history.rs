//! History ledger: bounded, height-keyed log of reversible state operations.
//!
//! Every mutation of the key-frame is expressed as a [`StateOp`], a tagged
//! record that knows how to apply itself and how to invert itself. `append`
//! applies the operation on the spot and records it against the open batch
//! for its height; `commit` seals the batch; `rollback_to` unwinds sealed
//! batches newest-first, running inversions in reverse insertion order.
//!
//! # Invariants
//! - Within a batch, operations apply in append order and revert in reverse
//!   append order, so overlapping mutations unwind to the exact prior state.
//! - At most [`MAX_HISTORY_CAPACITY`] sealed batches are retained; committing
//!   beyond that permanently discards the oldest batch.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::amount::Fixed64;
use crate::core::candidate::{Candidate, CandidateState};
use crate::core::keyframe::{CandidateMap, StateKeyFrame};
use crate::core::transaction::{CrInfo, Output, ReferKey};
use crate::error::CrStateError;
use crate::identity::U168;

/// Maximum number of sealed heights the ledger retains.
pub const MAX_HISTORY_CAPACITY: usize = 10;

/// Errors produced by the history ledger.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HistoryError {
    #[error(
        "Insufficient history: cannot roll back to height {requested}, oldest retained is {oldest}"
    )]
    InsufficientHistory { requested: u32, oldest: u32 },
}

impl From<HistoryError> for CrStateError {
    fn from(e: HistoryError) -> Self {
        CrStateError::History(e.to_string())
    }
}

/// A reversible mutation of the key-frame. Each variant carries everything
/// needed to apply the change and to undo it exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StateOp {
    /// First registration of a candidate: inserts the pending record and all
    /// three secondary indexes in one entry.
    InsertCandidate {
        code_key: String,
        candidate: Candidate,
    },
    /// Re-registration of a previously canceled cid: the canceled record is
    /// replaced by a fresh pending one. The code and deposit-hash indexes are
    /// left untouched; they survive from the original registration.
    ReregisterCandidate {
        fresh: Candidate,
        prior: Box<Candidate>,
    },
    /// Wholesale info replacement, with the nickname index kept in lockstep.
    UpdateCandidateInfo { origin: CrInfo, update: CrInfo },
    /// Owner-initiated transition to `Canceled`. Applied to any located
    /// candidate, including one already canceled or returned, whose cancel
    /// height is re-stamped; the prior state, cancel height, and map make
    /// the undo exact.
    CancelCandidate {
        cid: U168,
        height: u32,
        prior_state: CandidateState,
        prior_cancel_height: u32,
        prior_map: CandidateMap,
    },
    /// Deferred activation: `Pending` -> `Active` after the activation depth.
    ActivateCandidate { cid: U168 },
    /// Vote credit (positive delta) or vote cancellation (negative delta).
    AddVotes { cid: U168, delta: Fixed64 },
    /// Deposit credit from an output paying the candidate's deposit address.
    AddDeposit { cid: U168, value: Fixed64 },
    /// Deposit withdrawal: state flips to `Returned` in place.
    ReturnDeposit {
        cid: U168,
        input_value: Fixed64,
        prior_state: CandidateState,
    },
    /// A vote output became live.
    EnrollVote { refer_key: ReferKey, output: Output },
    /// A vote output was spent. The entry is kept with a null value so that
    /// a spent key remains distinguishable from a never-seen one; `prior` is
    /// the entry value before the spend (null for a cancel-of-cancel).
    CancelVote {
        refer_key: ReferKey,
        prior: Option<Output>,
    },
    /// A deposit output became live.
    EnrollDeposit { refer_key: ReferKey, output: Output },
}

/// Replaces `origin` info with `update`, migrating the nickname index when
/// the nickname changed. Symmetric: revert calls it with swapped arguments.
fn update_candidate_info(frame: &mut StateKeyFrame, origin: &CrInfo, update: &CrInfo) {
    if origin.nickname != update.nickname {
        frame.nicknames.remove(&origin.nickname);
        frame.nicknames.insert(update.nickname.clone());
    }
    if let Some(candidate) = frame.candidate_mut(&origin.cid) {
        candidate.info = update.clone();
    }
}

impl StateOp {
    /// Applies the operation to the key-frame.
    pub fn apply(&self, frame: &mut StateKeyFrame) {
        match self {
            StateOp::InsertCandidate { code_key, candidate } => {
                let cid = candidate.info.cid;
                frame.nicknames.insert(candidate.info.nickname.clone());
                frame.code_cid_map.insert(code_key.clone(), cid);
                frame.deposit_hash_map.insert(candidate.deposit_hash);
                frame.pending_candidates.insert(cid, candidate.clone());
            }
            StateOp::ReregisterCandidate { fresh, prior } => {
                let cid = fresh.info.cid;
                frame.canceled_candidates.remove(&prior.info.cid);
                frame.nicknames.insert(fresh.info.nickname.clone());
                frame.pending_candidates.insert(cid, fresh.clone());
            }
            StateOp::UpdateCandidateInfo { origin, update } => {
                update_candidate_info(frame, origin, update);
            }
            StateOp::CancelCandidate {
                cid,
                height,
                prior_map,
                ..
            } => {
                let removed = match prior_map {
                    CandidateMap::Pending => frame.pending_candidates.remove(cid),
                    CandidateMap::Activity => frame.activity_candidates.remove(cid),
                    CandidateMap::Canceled => frame.canceled_candidates.remove(cid),
                };
                if let Some(mut candidate) = removed {
                    candidate.state = CandidateState::Canceled;
                    candidate.cancel_height = *height;
                    frame.nicknames.remove(&candidate.info.nickname);
                    frame.canceled_candidates.insert(*cid, candidate);
                }
            }
            StateOp::ActivateCandidate { cid } => {
                if let Some(mut candidate) = frame.pending_candidates.remove(cid) {
                    candidate.state = CandidateState::Active;
                    frame.activity_candidates.insert(*cid, candidate);
                }
            }
            StateOp::AddVotes { cid, delta } => {
                if let Some(candidate) = frame.candidate_mut(cid) {
                    candidate.votes += *delta;
                }
            }
            StateOp::AddDeposit { cid, value } => {
                if let Some(candidate) = frame.candidate_mut(cid) {
                    candidate.deposit_amount += *value;
                }
            }
            StateOp::ReturnDeposit {
                cid, input_value, ..
            } => {
                if let Some(candidate) = frame.candidate_mut(cid) {
                    candidate.deposit_amount -= *input_value;
                    candidate.state = CandidateState::Returned;
                    let nickname = candidate.info.nickname.clone();
                    frame.nicknames.remove(&nickname);
                }
            }
            StateOp::EnrollVote { refer_key, output } => {
                frame.votes.insert(refer_key.clone(), Some(output.clone()));
            }
            StateOp::CancelVote { refer_key, .. } => {
                frame.votes.insert(refer_key.clone(), None);
            }
            StateOp::EnrollDeposit { refer_key, output } => {
                frame
                    .deposit_outputs
                    .insert(refer_key.clone(), output.clone());
            }
        }
    }

    /// Undoes the operation, restoring the key-frame to the exact state it
    /// had before `apply`.
    pub fn revert(&self, frame: &mut StateKeyFrame) {
        match self {
            StateOp::InsertCandidate { code_key, candidate } => {
                let cid = candidate.info.cid;
                frame.nicknames.remove(&candidate.info.nickname);
                frame.code_cid_map.remove(code_key);
                frame.deposit_hash_map.remove(&candidate.deposit_hash);
                frame.pending_candidates.remove(&cid);
            }
            StateOp::ReregisterCandidate { fresh, prior } => {
                let cid = fresh.info.cid;
                frame.pending_candidates.remove(&cid);
                frame.nicknames.remove(&fresh.info.nickname);
                frame
                    .canceled_candidates
                    .insert(prior.info.cid, (**prior).clone());
            }
            StateOp::UpdateCandidateInfo { origin, update } => {
                update_candidate_info(frame, update, origin);
            }
            StateOp::CancelCandidate {
                cid,
                prior_state,
                prior_cancel_height,
                prior_map,
                ..
            } => {
                if let Some(mut candidate) = frame.canceled_candidates.remove(cid) {
                    candidate.cancel_height = *prior_cancel_height;
                    candidate.state = *prior_state;
                    // The nickname was live before the cancel only while the
                    // candidate was pending or active.
                    if matches!(
                        prior_state,
                        CandidateState::Pending | CandidateState::Active
                    ) {
                        frame.nicknames.insert(candidate.info.nickname.clone());
                    }
                    match prior_map {
                        CandidateMap::Pending => {
                            frame.pending_candidates.insert(*cid, candidate);
                        }
                        CandidateMap::Activity => {
                            frame.activity_candidates.insert(*cid, candidate);
                        }
                        CandidateMap::Canceled => {
                            frame.canceled_candidates.insert(*cid, candidate);
                        }
                    }
                }
            }
            StateOp::ActivateCandidate { cid } => {
                if let Some(mut candidate) = frame.activity_candidates.remove(cid) {
                    candidate.state = CandidateState::Pending;
                    frame.pending_candidates.insert(*cid, candidate);
                }
            }
            StateOp::AddVotes { cid, delta } => {
                if let Some(candidate) = frame.candidate_mut(cid) {
                    candidate.votes -= *delta;
                }
            }
            StateOp::AddDeposit { cid, value } => {
                if let Some(candidate) = frame.candidate_mut(cid) {
                    candidate.deposit_amount -= *value;
                }
            }
            StateOp::ReturnDeposit {
                cid,
                input_value,
                prior_state,
            } => {
                if let Some(candidate) = frame.candidate_mut(cid) {
                    candidate.deposit_amount += *input_value;
                    candidate.state = *prior_state;
                    // The nickname was live before the return only while the
                    // candidate was pending or active.
                    if matches!(
                        prior_state,
                        CandidateState::Pending | CandidateState::Active
                    ) {
                        let nickname = candidate.info.nickname.clone();
                        frame.nicknames.insert(nickname);
                    }
                }
            }
            StateOp::EnrollVote { refer_key, .. } => {
                frame.votes.remove(refer_key);
            }
            StateOp::CancelVote { refer_key, prior } => {
                frame.votes.insert(refer_key.clone(), prior.clone());
            }
            StateOp::EnrollDeposit { refer_key, .. } => {
                frame.deposit_outputs.remove(refer_key);
            }
        }
    }
}

#[derive(Debug, Clone)]
struct HeightBatch {
    height: u32,
    ops: Vec<StateOp>,
}

/// Bounded deque of per-height operation batches.
#[derive(Debug)]
pub struct HistoryLedger {
    capacity: usize,
    batches: VecDeque<HeightBatch>,
    open: Vec<StateOp>,
    open_height: Option<u32>,
    /// Newest committed height.
    height: u32,
}

impl HistoryLedger {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            batches: VecDeque::with_capacity(capacity + 1),
            open: Vec::new(),
            open_height: None,
            height: 0,
        }
    }

    /// Applies `op` to the key-frame immediately and records it against the
    /// open batch at `height`. A height beyond the current open one seals the
    /// open batch and starts a new one.
    pub fn append(&mut self, height: u32, op: StateOp, frame: &mut StateKeyFrame) {
        op.apply(frame);
        match self.open_height {
            None => self.open_height = Some(height),
            Some(open) if open == height => {}
            Some(open) => {
                let ops = std::mem::take(&mut self.open);
                self.batches.push_back(HeightBatch { height: open, ops });
                self.open_height = Some(height);
            }
        }
        self.open.push(op);
    }

    /// Seals the batch at `height` (an empty batch when nothing was appended)
    /// and drops the oldest batch once the capacity is exceeded.
    pub fn commit(&mut self, height: u32) {
        let ops = std::mem::take(&mut self.open);
        self.open_height = None;
        self.batches.push_back(HeightBatch { height, ops });
        while self.batches.len() > self.capacity {
            self.batches.pop_front();
        }
        self.height = height;
    }

    /// Unwinds sealed batches newest-first until the newest sealed height is
    /// at most `height`, running undo operations in reverse insertion order.
    /// Fails when the requested height is below the retained depth.
    pub fn rollback_to(
        &mut self,
        height: u32,
        frame: &mut StateKeyFrame,
    ) -> std::result::Result<(), HistoryError> {
        if height >= self.height {
            return Ok(());
        }
        let oldest = self.batches.front().map(|b| b.height).unwrap_or(0);
        if self.batches.is_empty() || height < oldest.saturating_sub(1) {
            return Err(HistoryError::InsufficientHistory {
                requested: height,
                oldest,
            });
        }
        // Uncommitted operations are unwound first; they are newer than any
        // sealed batch.
        for op in std::mem::take(&mut self.open).iter().rev() {
            op.revert(frame);
        }
        self.open_height = None;
        while let Some(batch) = self.batches.pop_back() {
            if batch.height <= height {
                self.batches.push_back(batch);
                break;
            }
            for op in batch.ops.iter().rev() {
                op.revert(frame);
            }
        }
        self.height = height;
        Ok(())
    }

    /// Number of sealed heights currently retained.
    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Newest committed height, 0 before the first commit.
    pub fn height(&self) -> u32 {
        self.height
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::amount::Fixed64;
    use crate::core::transaction::OutputType;

    fn output(value: i64) -> Output {
        Output {
            value: Fixed64(value),
            program_hash: Default::default(),
            output_type: OutputType::Default,
            payload: None,
        }
    }

    fn enroll(key: &str, value: i64) -> StateOp {
        StateOp::EnrollVote {
            refer_key: key.to_string(),
            output: output(value),
        }
    }

    fn cancel(key: &str, value: i64) -> StateOp {
        StateOp::CancelVote {
            refer_key: key.to_string(),
            prior: Some(output(value)),
        }
    }

    #[test]
    fn test_append_applies_immediately() {
        let mut frame = StateKeyFrame::new();
        let mut history = HistoryLedger::new(MAX_HISTORY_CAPACITY);
        history.append(1, enroll("k1", 10), &mut frame);
        assert_eq!(frame.votes().get("k1"), Some(&Some(output(10))));
    }

    #[test]
    fn test_rollback_reverses_insertion_order() {
        // Enroll then cancel the same key within one height: undoing in
        // reverse order must land back on "absent", not on "present".
        let mut frame = StateKeyFrame::new();
        let mut history = HistoryLedger::new(MAX_HISTORY_CAPACITY);
        history.commit(1);
        history.append(2, enroll("k1", 10), &mut frame);
        history.append(2, cancel("k1", 10), &mut frame);
        history.commit(2);
        assert_eq!(frame.votes().get("k1"), Some(&None));

        history.rollback_to(1, &mut frame).unwrap();
        assert!(!frame.votes().contains_key("k1"));
    }

    #[test]
    fn test_rollback_to_intermediate_height() {
        let mut frame = StateKeyFrame::new();
        let mut history = HistoryLedger::new(MAX_HISTORY_CAPACITY);
        for h in 1..=5u32 {
            history.append(h, enroll(&format!("k{}", h), h as i64), &mut frame);
            history.commit(h);
        }
        history.rollback_to(3, &mut frame).unwrap();
        assert_eq!(history.height(), 3);
        assert!(frame.votes().contains_key("k3"));
        assert!(!frame.votes().contains_key("k4"));
        assert!(!frame.votes().contains_key("k5"));
    }

    #[test]
    fn test_capacity_bound() {
        let mut frame = StateKeyFrame::new();
        let mut history = HistoryLedger::new(MAX_HISTORY_CAPACITY);
        for h in 1..=25u32 {
            history.append(h, enroll(&format!("k{}", h), 1), &mut frame);
            history.commit(h);
            assert!(history.len() <= MAX_HISTORY_CAPACITY);
        }
        assert_eq!(history.len(), MAX_HISTORY_CAPACITY);
    }

    #[test]
    fn test_rollback_beyond_depth_fails() {
        let mut frame = StateKeyFrame::new();
        let mut history = HistoryLedger::new(MAX_HISTORY_CAPACITY);
        for h in 1..=15u32 {
            history.commit(h);
        }
        // Oldest retained batch is height 6: height 5 is reachable, 4 is not.
        assert!(history.rollback_to(5, &mut frame).is_ok());
        let err = history.rollback_to(3, &mut frame).unwrap_err();
        assert!(matches!(err, HistoryError::InsufficientHistory { .. }));
    }

    #[test]
    fn test_rollback_to_current_height_is_noop() {
        let mut frame = StateKeyFrame::new();
        let mut history = HistoryLedger::new(MAX_HISTORY_CAPACITY);
        history.append(1, enroll("k1", 1), &mut frame);
        history.commit(1);
        assert!(history.rollback_to(1, &mut frame).is_ok());
        assert!(history.rollback_to(9, &mut frame).is_ok());
        assert!(frame.votes().contains_key("k1"));
    }

    #[test]
    fn test_empty_commits_still_tracked() {
        let mut frame = StateKeyFrame::new();
        let mut history = HistoryLedger::new(MAX_HISTORY_CAPACITY);
        history.commit(1);
        history.commit(2);
        assert_eq!(history.len(), 2);
        assert_eq!(history.height(), 2);
        history.rollback_to(1, &mut frame).unwrap();
        assert_eq!(history.height(), 1);
    }
}
