//! Core module: the block-driven CR candidate state machine.
//!
//! # Determinism
//! Processing is deterministic: the same block sequence yields the same
//! key-frame, the same history contents, and the same query results. There is
//! no randomness or system time anywhere in the processing path.
//!
//! # Invariants
//! - Every key-frame mutation is recorded in the history ledger as a
//!   reversible operation; rollback within the retained depth is exact.
//! - Candidate maps and secondary indexes are updated inside a single
//!   history entry, never split across two.

pub mod amount;
pub mod candidate;
pub mod history;
pub mod keyframe;
pub mod state;
pub mod transaction;
