//! CR candidate state engine: single source of truth for candidate
//! lifecycle, votes, and deposits, advanced block by block.
//!
//! # Determinism
//! Same block sequence yields the same state. Transactions are processed in
//! block order; within a transaction, votes are processed before deposits and
//! vote cancellations run last. No randomness or system time.
//!
//! # Invariants
//! - The pending, active, and canceled candidate maps are pairwise disjoint
//!   by cid; `Returned` candidates share the canceled map.
//! - Every key-frame mutation is appended to the history ledger, so any
//!   committed height within the retained depth can be restored exactly.
//! - A pending candidate activates on the first block where it has been
//!   confirmed for [`ACTIVATE_DURATION`] blocks.

use std::collections::HashMap;
use std::sync::RwLock;

use thiserror::Error;
use tracing::{error, warn};

use crate::core::amount::Fixed64;
use crate::core::candidate::{Candidate, CandidateState};
use crate::core::history::{HistoryLedger, StateOp, MAX_HISTORY_CAPACITY};
use crate::core::keyframe::StateKeyFrame;
use crate::core::transaction::{
    Block, Confirm, CrInfo, Output, OutputType, PayloadError, ReferKey, Transaction, TxType,
    UnregisterCr, VoteType, TX_VERSION_09, VOTE_PRODUCER_AND_CR_VERSION,
};
use crate::error::{CrStateError, Result};
use crate::identity::{self, Prefix, U168};

/// Number of confirmations a pending candidate needs before activation.
pub const ACTIVATE_DURATION: u32 = 6;

/// Number of recent heights for which spent vote outputs stay cached.
pub const CACHE_CR_VOTES_SIZE: u32 = 6;

/// Errors produced by transaction processing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

impl From<StateError> for CrStateError {
    fn from(e: StateError) -> Self {
        CrStateError::State(e.to_string())
    }
}

/// Engine state guarded by the [`CrState`] lock: the key-frame, its history,
/// and the short-lived cache of spent vote outputs.
#[derive(Debug)]
struct CrStateInner {
    key_frame: StateKeyFrame,
    history: HistoryLedger,
    /// Refer keys of vote outputs spent at each height, for cache pruning.
    votes_cache_keys: HashMap<u32, Vec<ReferKey>>,
    /// Spent vote outputs still inside the reorg window.
    votes_cache: HashMap<ReferKey, Output>,
}

/// Thread-safe CR candidate state engine. One writer at a time mutates the
/// state through blocks; readers query concurrently.
#[derive(Debug)]
pub struct CrState {
    inner: RwLock<CrStateInner>,
}

impl CrState {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(CrStateInner {
                key_frame: StateKeyFrame::new(),
                history: HistoryLedger::new(MAX_HISTORY_CAPACITY),
                votes_cache_keys: HashMap::new(),
                votes_cache: HashMap::new(),
            }),
        }
    }

    /// Returns the candidate with the given program code, if any.
    pub fn get_candidate(&self, program_code: &[u8]) -> Option<Candidate> {
        let inner = self.inner.read().unwrap();
        inner.candidate_by_code(program_code).cloned()
    }

    /// Returns the candidate with the given cid, if any.
    pub fn get_candidate_by_cid(&self, cid: &U168) -> Option<Candidate> {
        let inner = self.inner.read().unwrap();
        inner.key_frame.candidate(cid).cloned()
    }

    /// Returns the candidate matching the given cid or did, if any. The did
    /// of each stored code is derived and compared when the cid misses.
    pub fn get_candidate_by_id(&self, id: &U168) -> Option<Candidate> {
        let inner = self.inner.read().unwrap();
        for (code_key, cid) in &inner.key_frame.code_cid_map {
            if cid == id {
                return inner.key_frame.candidate(cid).cloned();
            }
            let Ok(code) = hex::decode(code_key) else {
                continue;
            };
            match identity::did_of(&code) {
                Ok(did) if did == *id => return inner.key_frame.candidate(cid).cloned(),
                _ => {}
            }
        }
        None
    }

    /// Returns the candidate registered with the given hex-encoded public
    /// key, if any.
    pub fn get_candidate_by_public_key(&self, public_key: &str) -> Option<Candidate> {
        let pubkey = hex::decode(public_key).ok()?;
        let code = identity::code_of(&pubkey).ok()?;
        let cid = identity::cid_of(&code).ok()?;
        let inner = self.inner.read().unwrap();
        inner.key_frame.candidate(&cid).cloned()
    }

    /// Returns the candidate whose deposit program hash matches, if any.
    pub fn get_candidate_by_deposit_hash(&self, hash: &U168) -> Option<Candidate> {
        let inner = self.inner.read().unwrap();
        inner
            .candidate_cid_by_deposit_hash(hash)
            .and_then(|cid| inner.key_frame.candidate(&cid).cloned())
    }

    /// Returns a snapshot list of candidates in the given lifecycle state,
    /// sorted by cid for deterministic ordering.
    pub fn get_candidates(&self, state: CandidateState) -> Vec<Candidate> {
        let inner = self.inner.read().unwrap();
        inner.candidates_in(state)
    }

    /// Returns every candidate known to the engine: pending, active,
    /// canceled, then returned.
    pub fn get_all_candidates(&self) -> Vec<Candidate> {
        let inner = self.inner.read().unwrap();
        let mut result = inner.candidates_in(CandidateState::Pending);
        result.extend(inner.candidates_in(CandidateState::Active));
        result.extend(inner.candidates_in(CandidateState::Canceled));
        result.extend(inner.candidates_in(CandidateState::Returned));
        result
    }

    /// Judges if a candidate with the given program code exists.
    pub fn exist_candidate(&self, program_code: &[u8]) -> bool {
        let inner = self.inner.read().unwrap();
        inner
            .key_frame
            .code_cid_map
            .contains_key(&hex::encode(program_code))
    }

    /// Judges if a candidate with the given cid exists.
    pub fn exist_candidate_by_cid(&self, cid: &U168) -> bool {
        let inner = self.inner.read().unwrap();
        let frame = &inner.key_frame;
        frame.pending_candidates.contains_key(cid)
            || frame.activity_candidates.contains_key(cid)
            || frame.canceled_candidates.contains_key(cid)
    }

    /// Judges if any candidate registered the given deposit program hash.
    pub fn exist_candidate_by_deposit_hash(&self, hash: &U168) -> bool {
        let inner = self.inner.read().unwrap();
        inner.key_frame.deposit_hash_map.contains(hash)
    }

    /// Judges if a pending or active candidate holds the given nickname.
    pub fn exist_candidate_by_nickname(&self, nickname: &str) -> bool {
        let inner = self.inner.read().unwrap();
        inner.key_frame.nicknames.contains(nickname)
    }

    /// Returns true if the transaction would change candidate or vote state:
    /// a CR lifecycle transaction, a vote-carrying transfer with CR content,
    /// or a spend of a tracked vote output.
    pub fn is_cr_transaction(&self, tx: &Transaction) -> bool {
        match tx.tx_type {
            TxType::RegisterCr
            | TxType::UpdateCr
            | TxType::UnregisterCr
            | TxType::ReturnCrDepositCoin => return true,
            TxType::TransferAsset if tx.version >= TX_VERSION_09 => {
                for output in &tx.outputs {
                    if output.output_type != OutputType::Vote {
                        continue;
                    }
                    let Some(payload) = output.payload.as_ref() else {
                        continue;
                    };
                    if payload.version < VOTE_PRODUCER_AND_CR_VERSION {
                        continue;
                    }
                    if payload.has_cr_content() {
                        return true;
                    }
                }
            }
            _ => {}
        }

        let inner = self.inner.read().unwrap();
        tx.inputs
            .iter()
            .any(|input| inner.key_frame.votes.contains_key(&input.refer_key()))
    }

    /// Returns a deep copy of the current key-frame.
    pub fn get_snapshot(&self) -> StateKeyFrame {
        let inner = self.inner.read().unwrap();
        inner.key_frame.snapshot()
    }

    /// Number of sealed heights currently retained by the history ledger.
    pub fn history_len(&self) -> usize {
        let inner = self.inner.read().unwrap();
        inner.history.len()
    }

    /// Applies a committed block: prunes the stale votes cache, processes
    /// every transaction, activates pending candidates that reached the
    /// activation depth, and commits the height to history.
    pub fn process_block(&self, block: &Block, _confirm: Option<&Confirm>) {
        let mut inner = self.inner.write().unwrap();
        inner.process_transactions(&block.transactions, block.height);
        inner.history.commit(block.height);
    }

    /// Catch-up path that replays only the deposit-return transactions of a
    /// block, then commits the height.
    pub fn process_return_deposit_txs(&self, block: &Block) {
        let mut inner = self.inner.write().unwrap();
        for tx in &block.transactions {
            if tx.tx_type == TxType::ReturnCrDepositCoin {
                inner.return_deposit(tx, block.height);
            }
        }
        inner.history.commit(block.height);
    }

    /// Restores the state to the given height. Fails with an insufficient
    /// history error when the height is below the retained depth.
    pub fn rollback_to(&self, height: u32) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        let CrStateInner {
            key_frame, history, ..
        } = &mut *inner;
        history.rollback_to(height, key_frame)?;
        Ok(())
    }

    /// Closes the voting round: retires the given active candidates, resets
    /// the history ledger, and returns a deep key-frame snapshot.
    pub fn finish_voting(&self, ids: &[U168]) -> StateKeyFrame {
        let mut inner = self.inner.write().unwrap();
        for id in ids {
            if !inner.key_frame.activity_candidates.contains_key(id) {
                warn!(id = %id, "active candidate not found when finishing voting");
            }
            inner.key_frame.activity_candidates.remove(id);
        }
        inner.history = HistoryLedger::new(MAX_HISTORY_CAPACITY);
        inner.key_frame.snapshot()
    }
}

impl Default for CrState {
    fn default() -> Self {
        Self::new()
    }
}

impl CrStateInner {
    fn append(&mut self, height: u32, op: StateOp) {
        self.history.append(height, op, &mut self.key_frame);
    }

    fn candidate_by_code(&self, program_code: &[u8]) -> Option<&Candidate> {
        let cid = self.key_frame.code_cid_map.get(&hex::encode(program_code))?;
        self.key_frame.candidate(cid)
    }

    /// Finds the cid of the candidate with the given deposit program hash,
    /// searching pending, then active, then canceled.
    fn candidate_cid_by_deposit_hash(&self, hash: &U168) -> Option<U168> {
        let frame = &self.key_frame;
        frame
            .pending_candidates
            .iter()
            .chain(frame.activity_candidates.iter())
            .chain(frame.canceled_candidates.iter())
            .find(|(_, c)| c.deposit_hash() == *hash)
            .map(|(cid, _)| *cid)
    }

    fn candidates_in(&self, state: CandidateState) -> Vec<Candidate> {
        let frame = &self.key_frame;
        let mut result: Vec<Candidate> = match state {
            CandidateState::Pending => frame.pending_candidates.values().cloned().collect(),
            CandidateState::Active => frame.activity_candidates.values().cloned().collect(),
            CandidateState::Canceled | CandidateState::Returned => frame
                .canceled_candidates
                .values()
                .filter(|c| c.state() == state)
                .cloned()
                .collect(),
        };
        result.sort_by_key(|c| c.info().cid);
        result
    }

    /// Processes a block's transactions at `height` and activates pending
    /// candidates that reached the activation depth.
    fn process_transactions(&mut self, txs: &[Transaction], height: u32) {
        self.purge_votes_cache(height);

        for tx in txs {
            if let Err(e) = self.process_transaction(tx, height) {
                error!(tx = %tx.hash, "abandoning transaction: {}", e);
            }
        }

        let mut eligible: Vec<U168> = self
            .key_frame
            .pending_candidates
            .iter()
            .filter(|(_, c)| height - c.register_height() + 1 >= ACTIVATE_DURATION)
            .map(|(cid, _)| *cid)
            .collect();
        eligible.sort();
        for cid in eligible {
            self.append(height, StateOp::ActivateCandidate { cid });
        }
    }

    /// Drops cached vote outputs that slid out of the reorg window. The purge
    /// only runs once the cache spans at least [`CACHE_CR_VOTES_SIZE`]
    /// heights.
    fn purge_votes_cache(&mut self, height: u32) {
        if self.votes_cache_keys.len() < CACHE_CR_VOTES_SIZE as usize {
            return;
        }
        let cutoff = height.saturating_sub(CACHE_CR_VOTES_SIZE);
        let stale: Vec<u32> = self
            .votes_cache_keys
            .keys()
            .copied()
            .filter(|k| *k <= cutoff)
            .collect();
        for k in stale {
            if let Some(keys) = self.votes_cache_keys.remove(&k) {
                for refer_key in keys {
                    self.votes_cache.remove(&refer_key);
                }
            }
        }
    }

    /// Dispatches one transaction. A returned error abandons the transaction
    /// (already-applied operations stay, subject to block-level rollback);
    /// the rest of the block keeps processing.
    fn process_transaction(&mut self, tx: &Transaction, height: u32) -> Result<()> {
        match tx.tx_type {
            TxType::RegisterCr => self.register_cr(tx, height)?,
            TxType::UpdateCr => {
                let info = tx.payload.as_cr_info().ok_or(PayloadError::Mismatch {
                    tx_type: tx.tx_type,
                    expected: "CRInfo",
                })?;
                self.update_cr(info, height);
            }
            TxType::UnregisterCr => {
                let payload = tx.payload.as_unregister_cr().ok_or(PayloadError::Mismatch {
                    tx_type: tx.tx_type,
                    expected: "UnregisterCR",
                })?;
                self.unregister_cr(payload, height);
            }
            TxType::TransferAsset => {
                self.process_votes(tx, height);
                self.process_deposit(tx, height);
            }
            TxType::ReturnCrDepositCoin => {
                self.return_deposit(tx, height);
                self.process_deposit(tx, height);
            }
            _ => {}
        }

        self.process_cancel_votes(tx, height)
    }

    /// Handles a register transaction: enrolls the deposit outputs, then
    /// inserts a fresh pending candidate, or re-registers a canceled cid
    /// carrying its votes over.
    fn register_cr(&mut self, tx: &Transaction, height: u32) -> Result<()> {
        let info = tx
            .payload
            .as_cr_info()
            .ok_or(PayloadError::Mismatch {
                tx_type: tx.tx_type,
                expected: "CRInfo",
            })?
            .clone();
        let code_key = hex::encode(&info.code);
        let deposit_hash = identity::deposit_hash_of(&info.code)?;

        let mut amount = Fixed64::ZERO;
        for (i, output) in tx.outputs.iter().enumerate() {
            if output.program_hash == deposit_hash {
                amount += output.value;
                self.append(
                    height,
                    StateOp::EnrollDeposit {
                        refer_key: tx.outpoint(i as u16).refer_key(),
                        output: output.clone(),
                    },
                );
            }
        }

        let mut candidate = Candidate::new(info.clone(), height, deposit_hash, amount);
        match self.key_frame.candidate(&info.cid).cloned() {
            None => {
                self.append(
                    height,
                    StateOp::InsertCandidate {
                        code_key,
                        candidate,
                    },
                );
            }
            Some(prior) => {
                // Re-register: the new record inherits the votes still
                // credited to the canceled one. The code and deposit-hash
                // indexes are not re-inserted; they survive from the
                // original registration.
                candidate.votes = prior.votes();
                self.append(
                    height,
                    StateOp::ReregisterCandidate {
                        fresh: candidate,
                        prior: Box::new(prior),
                    },
                );
            }
        }
        Ok(())
    }

    /// Replaces a candidate's info wholesale. Unknown cids are skipped.
    fn update_cr(&mut self, info: &CrInfo, height: u32) {
        let Some(candidate) = self.key_frame.candidate(&info.cid) else {
            return;
        };
        let origin = candidate.info().clone();
        self.append(
            height,
            StateOp::UpdateCandidateInfo {
                origin,
                update: info.clone(),
            },
        );
    }

    /// Transitions the located candidate to `Canceled`. Unknown cids are
    /// skipped; a candidate already canceled or returned is re-canceled,
    /// re-stamping its cancel height.
    fn unregister_cr(&mut self, payload: &UnregisterCr, height: u32) {
        let Some(candidate) = self.key_frame.candidate(&payload.cid) else {
            return;
        };
        let prior_state = candidate.state();
        let prior_cancel_height = candidate.cancel_height();
        let Some(prior_map) = self.key_frame.candidate_map_of(&payload.cid) else {
            return;
        };
        self.append(
            height,
            StateOp::CancelCandidate {
                cid: payload.cid,
                height,
                prior_state,
                prior_cancel_height,
                prior_map,
            },
        );
    }

    /// Enrolls CR vote outputs and credits the referenced candidates.
    fn process_votes(&mut self, tx: &Transaction, height: u32) {
        if tx.version < TX_VERSION_09 {
            return;
        }
        for (i, output) in tx.outputs.iter().enumerate() {
            if output.output_type != OutputType::Vote {
                continue;
            }
            let Some(payload) = output.payload.as_ref() else {
                continue;
            };
            if payload.version < VOTE_PRODUCER_AND_CR_VERSION {
                continue;
            }
            if !payload.has_cr_content() {
                continue;
            }
            self.append(
                height,
                StateOp::EnrollVote {
                    refer_key: tx.outpoint(i as u16).refer_key(),
                    output: output.clone(),
                },
            );
            self.process_vote_output(output, height);
        }
    }

    /// Credits every CR candidate referenced by a vote output. Unknown ids
    /// are silently skipped.
    fn process_vote_output(&mut self, output: &Output, height: u32) {
        let Some(payload) = output.payload.as_ref() else {
            return;
        };
        for content in &payload.contents {
            if content.vote_type != VoteType::Crc {
                continue;
            }
            for cv in &content.candidate_votes {
                let Some(cid) = U168::from_bytes(&cv.candidate) else {
                    continue;
                };
                if self.key_frame.candidate(&cid).is_none() {
                    continue;
                }
                self.append(
                    height,
                    StateOp::AddVotes {
                        cid,
                        delta: cv.votes,
                    },
                );
            }
        }
    }

    /// Credits deposit outputs paying into a known candidate's deposit
    /// address and enrolls them into the deposit index.
    fn process_deposit(&mut self, tx: &Transaction, height: u32) {
        for (i, output) in tx.outputs.iter().enumerate() {
            if output.program_hash.prefix() != Some(Prefix::Deposit) {
                continue;
            }
            let Some(cid) = self.candidate_cid_by_deposit_hash(&output.program_hash) else {
                continue;
            };
            self.append(
                height,
                StateOp::AddDeposit {
                    cid,
                    value: output.value,
                },
            );
            self.append(
                height,
                StateOp::EnrollDeposit {
                    refer_key: tx.outpoint(i as u16).refer_key(),
                    output: output.clone(),
                },
            );
        }
    }

    /// Handles a deposit-return transaction: the summed input value is
    /// deducted once per matching program, and each matched candidate flips
    /// to `Returned` in place.
    fn return_deposit(&mut self, tx: &Transaction, height: u32) {
        let input_value: Fixed64 = tx
            .inputs
            .iter()
            .filter_map(|input| self.key_frame.deposit_outputs.get(&input.refer_key()))
            .map(|output| output.value)
            .sum();

        for program in &tx.programs {
            let Some(candidate) = self.candidate_by_code(&program.code) else {
                continue;
            };
            let cid = candidate.info().cid;
            let prior_state = candidate.state();
            self.append(
                height,
                StateOp::ReturnDeposit {
                    cid,
                    input_value,
                    prior_state,
                },
            );
        }
    }

    /// Subtracts the votes recorded by every spent vote output and nulls its
    /// entry, keeping the output in the short-lived cache for the reorg
    /// window. A spent entry missing from the cache abandons the transaction.
    fn process_cancel_votes(&mut self, tx: &Transaction, height: u32) -> Result<()> {
        for input in &tx.inputs {
            let refer_key = input.refer_key();
            let Some(entry) = self.key_frame.votes.get(&refer_key) else {
                continue;
            };
            let prior = entry.clone();
            let output = match &prior {
                Some(output) => output.clone(),
                None => match self.votes_cache.get(&refer_key) {
                    Some(output) => output.clone(),
                    None => {
                        error!(refer_key = %refer_key, "invalid votes output");
                        return Err(StateError::InvariantViolation(format!(
                            "spent vote output {} not found in cache",
                            refer_key
                        ))
                        .into());
                    }
                },
            };
            self.process_vote_cancel(&output, height);
            self.votes_cache_keys
                .entry(height)
                .or_default()
                .push(refer_key.clone());
            self.votes_cache.insert(refer_key.clone(), output);
            self.append(height, StateOp::CancelVote { refer_key, prior });
        }
        Ok(())
    }

    /// Subtracts the CR votes recorded by a previously live vote output.
    fn process_vote_cancel(&mut self, output: &Output, height: u32) {
        let Some(payload) = output.payload.as_ref() else {
            return;
        };
        for content in &payload.contents {
            if content.vote_type != VoteType::Crc {
                continue;
            }
            for cv in &content.candidate_votes {
                let Some(cid) = U168::from_bytes(&cv.candidate) else {
                    continue;
                };
                if self.key_frame.candidate(&cid).is_none() {
                    continue;
                }
                self.append(
                    height,
                    StateOp::AddVotes {
                        cid,
                        delta: -cv.votes,
                    },
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transaction::{
        CandidateVotes, Input, OutPoint, Payload, Program, VoteContent, VoteOutput,
    };

    fn make_info(seed: u8, nickname: &str) -> CrInfo {
        let code = vec![3, seed, seed.wrapping_add(1), identity::OP_CHECKSIG];
        CrInfo {
            cid: identity::cid_of(&code).unwrap(),
            did: identity::did_of(&code).unwrap(),
            code,
            nickname: nickname.to_string(),
            url: format!("http://cr-{}.example.org", nickname),
            location: 86,
            signature: Vec::new(),
            payload_version: 0,
        }
    }

    fn deposit_output(info: &CrInfo, coins: i64) -> Output {
        Output {
            value: Fixed64::from_coins(coins),
            program_hash: identity::deposit_hash_of(&info.code).unwrap(),
            output_type: OutputType::Default,
            payload: None,
        }
    }

    fn register_tx(info: &CrInfo, coins: i64) -> Transaction {
        Transaction::new(
            TxType::RegisterCr,
            0,
            Payload::CrInfo(info.clone()),
            Vec::new(),
            vec![deposit_output(info, coins)],
            Vec::new(),
        )
        .unwrap()
    }

    fn unregister_tx(info: &CrInfo) -> Transaction {
        Transaction::new(
            TxType::UnregisterCr,
            0,
            Payload::UnregisterCr(UnregisterCr {
                cid: info.cid,
                signature: Vec::new(),
            }),
            Vec::new(),
            Vec::new(),
            Vec::new(),
        )
        .unwrap()
    }

    fn vote_tx(targets: &[(&CrInfo, i64)]) -> Transaction {
        let candidate_votes = targets
            .iter()
            .map(|(info, coins)| CandidateVotes {
                candidate: info.cid.as_bytes().to_vec(),
                votes: Fixed64::from_coins(*coins),
            })
            .collect();
        Transaction::new(
            TxType::TransferAsset,
            TX_VERSION_09,
            Payload::None,
            Vec::new(),
            vec![Output {
                value: Fixed64::from_coins(1),
                program_hash: Default::default(),
                output_type: OutputType::Vote,
                payload: Some(VoteOutput {
                    version: VOTE_PRODUCER_AND_CR_VERSION,
                    contents: vec![VoteContent {
                        vote_type: VoteType::Crc,
                        candidate_votes,
                    }],
                }),
            }],
            Vec::new(),
        )
        .unwrap()
    }

    fn block(height: u32, transactions: Vec<Transaction>) -> Block {
        Block {
            height,
            transactions,
        }
    }

    #[test]
    fn test_register_inserts_pending_and_indexes() {
        let state = CrState::new();
        let info = make_info(1, "alice");
        state.process_block(&block(1, vec![register_tx(&info, 5000)]), None);

        let candidate = state.get_candidate_by_cid(&info.cid).unwrap();
        assert_eq!(candidate.state(), CandidateState::Pending);
        assert_eq!(candidate.deposit_amount(), Fixed64::from_coins(5000));
        assert_eq!(candidate.register_height(), 1);
        assert!(state.exist_candidate(&info.code));
        assert!(state.exist_candidate_by_nickname("alice"));
        assert!(state.exist_candidate_by_deposit_hash(
            &identity::deposit_hash_of(&info.code).unwrap()
        ));
        assert_eq!(state.get_candidates(CandidateState::Pending).len(), 1);
    }

    #[test]
    fn test_lookup_by_id_code_and_public_key() {
        let secp = secp256k1::Secp256k1::new();
        let sk = secp256k1::SecretKey::from_slice(&[9u8; 32]).unwrap();
        let pk = secp256k1::PublicKey::from_secret_key(&secp, &sk);
        let pk_hex = hex::encode(pk.serialize());

        let code = identity::code_of(&pk.serialize()).unwrap();
        let info = CrInfo {
            cid: identity::cid_of(&code).unwrap(),
            did: identity::did_of(&code).unwrap(),
            code,
            nickname: "bob".to_string(),
            url: String::new(),
            location: 0,
            signature: Vec::new(),
            payload_version: 0,
        };

        let state = CrState::new();
        state.process_block(&block(1, vec![register_tx(&info, 5000)]), None);

        assert!(state.get_candidate(&info.code).is_some());
        assert!(state.get_candidate_by_id(&info.cid).is_some());
        assert!(state.get_candidate_by_id(&info.did).is_some());
        assert!(state.get_candidate_by_public_key(&pk_hex).is_some());
        assert!(state.get_candidate_by_public_key("zz").is_none());
    }

    #[test]
    fn test_update_replaces_info_and_nickname() {
        let state = CrState::new();
        let info = make_info(2, "carol");
        state.process_block(&block(1, vec![register_tx(&info, 5000)]), None);

        let mut updated = info.clone();
        updated.nickname = "carol-2".to_string();
        updated.url = "http://new.example.org".to_string();
        let update = Transaction::new(
            TxType::UpdateCr,
            0,
            Payload::CrInfo(updated.clone()),
            Vec::new(),
            Vec::new(),
            Vec::new(),
        )
        .unwrap();
        state.process_block(&block(2, vec![update]), None);

        let candidate = state.get_candidate_by_cid(&info.cid).unwrap();
        assert_eq!(candidate.info().nickname, "carol-2");
        assert_eq!(candidate.info().url, "http://new.example.org");
        assert!(!state.exist_candidate_by_nickname("carol"));
        assert!(state.exist_candidate_by_nickname("carol-2"));
    }

    #[test]
    fn test_unregister_unknown_cid_is_noop() {
        let state = CrState::new();
        let info = make_info(3, "dave");
        state.process_block(&block(1, vec![unregister_tx(&info)]), None);
        assert!(state.get_all_candidates().is_empty());
    }

    #[test]
    fn test_activation_at_exact_depth() {
        let state = CrState::new();
        let info = make_info(4, "erin");
        state.process_block(&block(1, vec![register_tx(&info, 5000)]), None);
        for h in 2..=5u32 {
            state.process_block(&block(h, Vec::new()), None);
            assert_eq!(
                state.get_candidate_by_cid(&info.cid).unwrap().state(),
                CandidateState::Pending,
                "still pending at height {}",
                h
            );
        }
        state.process_block(&block(6, Vec::new()), None);
        assert_eq!(
            state.get_candidate_by_cid(&info.cid).unwrap().state(),
            CandidateState::Active
        );
    }

    #[test]
    fn test_votes_credited_and_is_cr_transaction() {
        let state = CrState::new();
        let info = make_info(5, "frank");
        state.process_block(&block(1, vec![register_tx(&info, 5000)]), None);

        let vote = vote_tx(&[(&info, 100)]);
        assert!(state.is_cr_transaction(&vote));
        state.process_block(&block(2, vec![vote.clone()]), None);
        assert_eq!(
            state.get_candidate_by_cid(&info.cid).unwrap().votes(),
            Fixed64::from_coins(100)
        );

        // Spending the tracked vote output makes an otherwise plain transfer
        // a CR transaction.
        let spend = Transaction::new(
            TxType::TransferAsset,
            0,
            Payload::None,
            vec![Input {
                previous: vote.outpoint(0),
            }],
            Vec::new(),
            Vec::new(),
        )
        .unwrap();
        assert!(state.is_cr_transaction(&spend));

        let unrelated = Transaction::new(
            TxType::TransferAsset,
            0,
            Payload::None,
            vec![Input {
                previous: OutPoint {
                    tx_hash: "00".repeat(32),
                    index: 0,
                },
            }],
            Vec::new(),
            Vec::new(),
        )
        .unwrap();
        assert!(!state.is_cr_transaction(&unrelated));
    }

    #[test]
    fn test_vote_for_unknown_candidate_skipped() {
        let state = CrState::new();
        let known = make_info(6, "grace");
        let unknown = make_info(7, "heidi");
        state.process_block(&block(1, vec![register_tx(&known, 5000)]), None);
        state.process_block(&block(2, vec![vote_tx(&[(&known, 10), (&unknown, 20)])]), None);

        assert_eq!(
            state.get_candidate_by_cid(&known.cid).unwrap().votes(),
            Fixed64::from_coins(10)
        );
        assert!(state.get_candidate_by_cid(&unknown.cid).is_none());
    }

    #[test]
    fn test_return_deposit_flips_state_in_place() {
        let state = CrState::new();
        let info = make_info(8, "ivan");
        let register = register_tx(&info, 5000);
        state.process_block(&block(1, vec![register.clone()]), None);

        let ret = Transaction::new(
            TxType::ReturnCrDepositCoin,
            0,
            Payload::None,
            vec![Input {
                previous: register.outpoint(0),
            }],
            Vec::new(),
            vec![Program {
                code: info.code.clone(),
                parameter: Vec::new(),
            }],
        )
        .unwrap();
        state.process_block(&block(2, vec![ret]), None);

        let candidate = state.get_candidate_by_cid(&info.cid).unwrap();
        assert_eq!(candidate.state(), CandidateState::Returned);
        assert_eq!(candidate.deposit_amount(), Fixed64::ZERO);
        assert!(!state.exist_candidate_by_nickname("ivan"));
        // The record never moves maps on return: it still sits in the pending
        // map, and the Returned view (which reads the canceled map) skips it.
        assert_eq!(state.get_candidates(CandidateState::Returned).len(), 0);
        assert_eq!(state.get_candidates(CandidateState::Pending).len(), 1);
    }

    #[test]
    fn test_finish_voting_returns_snapshot_and_warns_on_unknown() {
        let state = CrState::new();
        let info = make_info(9, "judy");
        state.process_block(&block(1, vec![register_tx(&info, 5000)]), None);
        for h in 2..=6u32 {
            state.process_block(&block(h, Vec::new()), None);
        }
        assert_eq!(state.get_candidates(CandidateState::Active).len(), 1);

        let stranger = make_info(10, "mallory");
        let snapshot = state.finish_voting(&[info.cid, stranger.cid]);
        assert!(state.get_candidates(CandidateState::Active).is_empty());
        assert!(snapshot.activity_candidates().is_empty());
        assert_eq!(state.history_len(), 0);
    }
}
