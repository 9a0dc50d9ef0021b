//! State key-frame: the complete, self-contained CR state at a height.
//!
//! The key-frame bundles the candidate maps, the secondary indexes, and the
//! UTXO index. A snapshot of it is a structural deep copy, safe to hold
//! across subsequent mutations, persist, or export.
//!
//! # Invariants
//! - The candidate maps are pairwise disjoint by cid. `Canceled` and
//!   `Returned` candidates share the canceled map and are distinguished by
//!   each candidate's `state` field.
//! - `nicknames` holds exactly the nicknames of pending and active
//!   candidates.
//! - A `votes` entry that is present but `None` means the vote output was
//!   observed and then spent; absence means it was never observed. The two
//!   are not interchangeable.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::core::candidate::Candidate;
use crate::core::transaction::{Output, ReferKey};
use crate::identity::U168;

/// Which physical candidate map holds a record. Not always derivable from
/// the candidate's state: a deposit return flips the state in place without
/// moving the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CandidateMap {
    Pending,
    Activity,
    Canceled,
}

/// Full engine state: candidate maps, secondary indexes, and UTXO index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateKeyFrame {
    /// Freshly registered candidates awaiting activation depth.
    pub(crate) pending_candidates: HashMap<U168, Candidate>,
    /// Activated candidates eligible to receive votes.
    pub(crate) activity_candidates: HashMap<U168, Candidate>,
    /// Canceled and returned candidates, distinguished by their state field.
    pub(crate) canceled_candidates: HashMap<U168, Candidate>,
    /// Nicknames of pending and active candidates.
    pub(crate) nicknames: HashSet<String>,
    /// Hex-encoded program code -> cid, across all candidate maps.
    pub(crate) code_cid_map: HashMap<String, U168>,
    /// Deposit program hashes of every candidate that has registered.
    pub(crate) deposit_hash_map: HashSet<U168>,
    /// Vote-carrying outputs by refer key. `None` marks a spent entry.
    pub(crate) votes: HashMap<ReferKey, Option<Output>>,
    /// Deposit-carrying outputs by refer key.
    pub(crate) deposit_outputs: HashMap<ReferKey, Output>,
}

impl StateKeyFrame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Produces a deep, immutable copy of the key-frame. The copy shares no
    /// structure with the live state.
    pub fn snapshot(&self) -> StateKeyFrame {
        self.clone()
    }

    pub fn pending_candidates(&self) -> &HashMap<U168, Candidate> {
        &self.pending_candidates
    }

    pub fn activity_candidates(&self) -> &HashMap<U168, Candidate> {
        &self.activity_candidates
    }

    pub fn canceled_candidates(&self) -> &HashMap<U168, Candidate> {
        &self.canceled_candidates
    }

    pub fn nicknames(&self) -> &HashSet<String> {
        &self.nicknames
    }

    pub fn code_cid_map(&self) -> &HashMap<String, U168> {
        &self.code_cid_map
    }

    pub fn deposit_hash_map(&self) -> &HashSet<U168> {
        &self.deposit_hash_map
    }

    pub fn votes(&self) -> &HashMap<ReferKey, Option<Output>> {
        &self.votes
    }

    pub fn deposit_outputs(&self) -> &HashMap<ReferKey, Output> {
        &self.deposit_outputs
    }

    /// Looks a candidate up by cid across the pending, active, and canceled
    /// maps, in that order.
    pub fn candidate(&self, cid: &U168) -> Option<&Candidate> {
        self.pending_candidates
            .get(cid)
            .or_else(|| self.activity_candidates.get(cid))
            .or_else(|| self.canceled_candidates.get(cid))
    }

    /// Reports which map currently holds the candidate, searching in the
    /// same order as [`StateKeyFrame::candidate`].
    pub(crate) fn candidate_map_of(&self, cid: &U168) -> Option<CandidateMap> {
        if self.pending_candidates.contains_key(cid) {
            return Some(CandidateMap::Pending);
        }
        if self.activity_candidates.contains_key(cid) {
            return Some(CandidateMap::Activity);
        }
        if self.canceled_candidates.contains_key(cid) {
            return Some(CandidateMap::Canceled);
        }
        None
    }

    pub(crate) fn candidate_mut(&mut self, cid: &U168) -> Option<&mut Candidate> {
        if let Some(c) = self.pending_candidates.get_mut(cid) {
            return Some(c);
        }
        if let Some(c) = self.activity_candidates.get_mut(cid) {
            return Some(c);
        }
        self.canceled_candidates.get_mut(cid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::amount::Fixed64;
    use crate::core::transaction::CrInfo;
    use crate::identity;

    fn candidate(nickname: &str) -> Candidate {
        let code = vec![nickname.len() as u8, 0x55, identity::OP_CHECKSIG];
        let info = CrInfo {
            cid: identity::cid_of(&code).unwrap(),
            did: identity::did_of(&code).unwrap(),
            code,
            nickname: nickname.to_string(),
            url: String::new(),
            location: 0,
            signature: Vec::new(),
            payload_version: 0,
        };
        let deposit_hash = identity::deposit_hash_of(&info.code).unwrap();
        Candidate::new(info, 1, deposit_hash, Fixed64::ZERO)
    }

    #[test]
    fn test_snapshot_is_independent() {
        let mut frame = StateKeyFrame::new();
        let c = candidate("a");
        let cid = c.info().cid;
        frame.pending_candidates.insert(cid, c);
        frame.nicknames.insert("a".to_string());

        let snap = frame.snapshot();
        assert_eq!(snap, frame);

        frame.pending_candidates.remove(&cid);
        frame.nicknames.remove("a");
        assert_ne!(snap, frame);
        assert!(snap.pending_candidates().contains_key(&cid));
        assert!(snap.nicknames().contains("a"));
    }

    #[test]
    fn test_candidate_lookup_order() {
        let mut frame = StateKeyFrame::new();
        let c = candidate("b");
        let cid = c.info().cid;
        frame.canceled_candidates.insert(cid, c);
        assert!(frame.candidate(&cid).is_some());
        assert!(frame.candidate_mut(&cid).is_some());
        assert!(frame.candidate(&Default::default()).is_none());
    }
}
