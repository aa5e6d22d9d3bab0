//! Incremental known/new classification
//!
//! Splits the UID candidates discovered by the cheap first pass into the set
//! to fully fetch and a skip count, against the snapshot of UIDs already in
//! the target store. Skipped messages never incur the heavyweight fetch.

use std::collections::HashSet;

use crate::models::UidCandidate;

/// Partition candidates into to-process and skipped
///
/// A candidate is skipped iff its UID string is present in `known` for the
/// current mailbox; comparison is exact string equality on server-issued
/// values, with no normalization. In full (non-incremental) mode `known` is
/// empty and every candidate passes through.
///
/// The partition is pure and exhaustive: every input candidate either
/// appears in the returned vector or is counted in the skip total.
pub fn classify(
    candidates: Vec<UidCandidate>,
    known: &HashSet<String>,
) -> (Vec<UidCandidate>, u64) {
    let mut to_process = Vec::with_capacity(candidates.len());
    let mut skipped = 0u64;
    for candidate in candidates {
        if known.contains(&candidate.key.uid) {
            skipped += 1;
        } else {
            to_process.push(candidate);
        }
    }
    (to_process, skipped)
}
