//! Priority matching for the reconciliation engine.
//!
//! Each function implements one rung of the fixed match ladder and scans
//! the working entries in registration order, so results are
//! deterministic across runs for identical inputs.

use crate::connection::ResourceSetConnection;

use super::Entry;

/// Priority 2: equality or reversed-equality against a connection already
/// owned by some placeholder. Returns the entry index and whether the
/// match was through reversal.
pub(crate) fn find_same_connection(
    entries: &[Entry],
    conn: &ResourceSetConnection,
) -> Option<(usize, bool)> {
    for (idx, entry) in entries.iter().enumerate() {
        let Some(own) = entry.placeholder.connection(conn.kind) else {
            continue;
        };
        if own == conn {
            return Some((idx, false));
        }
        if own.equals_although_reversed(conn) {
            return Some((idx, true));
        }
    }
    None
}

/// Priority 3: same-constraint-id carry-over. The placeholder's existing
/// connection shares the incoming record's (non-empty) constraint id and
/// either one is a pure member-subset of the other, or the placeholder is
/// still flagged new.
pub(crate) fn find_carry_over(entries: &[Entry], conn: &ResourceSetConnection) -> Option<usize> {
    if !conn.has_constraint_id() {
        return None;
    }
    entries.iter().position(|entry| {
        let Some(own) = entry.placeholder.connection(conn.kind) else {
            return false;
        };
        own.has_constraint_id()
            && own.constraint_id == conn.constraint_id
            && (conn.is_subset_of(own) || own.is_subset_of(conn) || entry.placeholder.is_new)
    })
}

/// Priority 4: the next unused new placeholder with no connection of this
/// kind assigned yet.
pub(crate) fn find_adoptable(entries: &[Entry], conn: &ResourceSetConnection) -> Option<usize> {
    entries.iter().position(|entry| {
        entry.placeholder.is_new && entry.placeholder.connection(conn.kind).is_none()
    })
}
