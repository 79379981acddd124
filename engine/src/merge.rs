//! Last-writer-wins building blocks for entity merge functions.
//!
//! Entities split their fields into independently versioned attribute
//! groups, each keyed by a last-changed timestamp, plus an optional
//! tombstone. Merging is pure: the same `(existing, incoming)` pair always
//! resolves to the same value, and re-merging a resolved value with the same
//! incoming side changes nothing.

use crate::Timestamp;

/// Pick the side of an attribute group with the strictly greater
/// last-changed time. Ties keep `existing`.
pub fn resolve_versioned<T: Clone>(
    existing: (&T, Timestamp),
    incoming: (&T, Timestamp),
) -> (T, Timestamp) {
    if incoming.1 > existing.1 {
        (incoming.0.clone(), incoming.1)
    } else {
        (existing.0.clone(), existing.1)
    }
}

/// Resolve a tombstone against the attribute group it supersedes.
///
/// The later of the two tombstones survives only if it is strictly after
/// `resolved_changed_at`; otherwise the document counts as not deleted.
pub fn resolve_tombstone(
    existing: Option<Timestamp>,
    incoming: Option<Timestamp>,
    resolved_changed_at: Timestamp,
) -> Option<Timestamp> {
    existing
        .max(incoming)
        .filter(|deleted_at| *deleted_at > resolved_changed_at)
}
