//! The placeholder registry.
//!
//! An arena of placeholders addressed by stable integer handles, guarded
//! by a readers-writer lock. Readers take point-in-time snapshots; the
//! reconciliation engine computes a diff against a snapshot and a single
//! writer applies it. Per-placeholder commit sections serialize compose-
//! through-emit against concurrent reconciliation of the same placeholder.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use serde::{Deserialize, Serialize};

use crate::chain::{GroupId, PlaceholderGroup};
use crate::error::{CrmError, CrmResult, ReconcileError};
use crate::graph::GraphEventHub;
use crate::placeholder::ConstraintPlaceholder;
use crate::reconcile::ReconcileOutcome;

fn lock_err(context: &'static str) -> CrmError {
    CrmError::Reconcile(ReconcileError::RegistryPoisoned { context })
}

/// Stable integer handle addressing one placeholder in the registry.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PlaceholderHandle(u64);

impl PlaceholderHandle {
    /// Wraps a raw handle value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// The raw handle value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PlaceholderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ph#{}", self.0)
    }
}

/// Point-in-time immutable view of the registry.
///
/// Entries iterate in registration order, which the matching priorities
/// depend on for determinism.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    entries: Vec<(PlaceholderHandle, ConstraintPlaceholder)>,
    next_handle: u64,
}

impl RegistrySnapshot {
    /// An empty snapshot whose created handles start at 1, matching a
    /// fresh registry. Mainly for tests.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
            next_handle: 1,
        }
    }

    /// Entries in registration order.
    #[must_use]
    pub fn entries(&self) -> &[(PlaceholderHandle, ConstraintPlaceholder)] {
        &self.entries
    }

    /// The handle the next created placeholder will receive.
    #[must_use]
    pub const fn next_handle(&self) -> u64 {
        self.next_handle
    }

    /// Looks up a placeholder by handle.
    #[must_use]
    pub fn get(&self, handle: PlaceholderHandle) -> Option<&ConstraintPlaceholder> {
        self.entries
            .iter()
            .find(|(h, _)| *h == handle)
            .map(|(_, ph)| ph)
    }

    /// Number of placeholders in the snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the snapshot holds no placeholders.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    arena: BTreeMap<u64, ConstraintPlaceholder>,
    commit_locks: BTreeMap<u64, Arc<Mutex<()>>>,
    groups: BTreeMap<u64, PlaceholderGroup>,
    next: u64,
}

/// Thread-safe placeholder arena.
#[derive(Debug)]
pub struct PlaceholderRegistry {
    state: RwLock<RegistryState>,
}

impl Default for PlaceholderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaceholderRegistry {
    /// Creates an empty registry. Handles start at 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(RegistryState {
                arena: BTreeMap::new(),
                commit_locks: BTreeMap::new(),
                groups: BTreeMap::new(),
                next: 1,
            }),
        }
    }

    /// Registers a placeholder, returning its handle.
    pub fn insert(&self, placeholder: ConstraintPlaceholder) -> CrmResult<PlaceholderHandle> {
        let mut state = self.state.write().map_err(|_| lock_err("registry.insert"))?;
        let handle = PlaceholderHandle::new(state.next);
        state.next += 1;
        state.arena.insert(handle.value(), placeholder);
        Ok(handle)
    }

    /// Looks up a placeholder by handle.
    pub fn get(&self, handle: PlaceholderHandle) -> CrmResult<Option<ConstraintPlaceholder>> {
        let state = self.state.read().map_err(|_| lock_err("registry.get"))?;
        Ok(state.arena.get(&handle.value()).cloned())
    }

    /// Replaces the placeholder behind a handle.
    ///
    /// # Errors
    /// `ReconcileError::UnknownHandle` when the handle is not registered.
    pub fn update(
        &self,
        handle: PlaceholderHandle,
        placeholder: ConstraintPlaceholder,
    ) -> CrmResult<()> {
        let mut state = self.state.write().map_err(|_| lock_err("registry.update"))?;
        if !state.arena.contains_key(&handle.value()) {
            return Err(CrmError::Reconcile(ReconcileError::UnknownHandle {
                handle: handle.value(),
            }));
        }
        state.arena.insert(handle.value(), placeholder);
        Ok(())
    }

    /// Removes a placeholder.
    ///
    /// # Errors
    /// `ReconcileError::UnknownHandle` when the handle is not registered.
    pub fn remove(&self, handle: PlaceholderHandle) -> CrmResult<()> {
        let mut state = self.state.write().map_err(|_| lock_err("registry.remove"))?;
        if state.arena.remove(&handle.value()).is_none() {
            return Err(CrmError::Reconcile(ReconcileError::UnknownHandle {
                handle: handle.value(),
            }));
        }
        state.commit_locks.remove(&handle.value());
        Ok(())
    }

    /// Number of registered placeholders.
    pub fn len(&self) -> CrmResult<usize> {
        let state = self.state.read().map_err(|_| lock_err("registry.len"))?;
        Ok(state.arena.len())
    }

    /// True when no placeholder is registered.
    pub fn is_empty(&self) -> CrmResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Takes a point-in-time snapshot in registration order.
    pub fn snapshot(&self) -> CrmResult<RegistrySnapshot> {
        let state = self.state.read().map_err(|_| lock_err("registry.snapshot"))?;
        Ok(RegistrySnapshot {
            entries: state
                .arena
                .iter()
                .map(|(h, ph)| (PlaceholderHandle::new(*h), ph.clone()))
                .collect(),
            next_handle: state.next,
        })
    }

    /// Applies a reconciliation diff: updates in place, inserts created
    /// placeholders under their pre-assigned handles, removes the removed.
    ///
    /// # Errors
    /// `ReconcileError::StaleSnapshot` when the registry advanced past the
    /// snapshot the outcome was computed from; the caller should re-run
    /// reconciliation against a fresh snapshot.
    pub fn apply(&self, outcome: &ReconcileOutcome) -> CrmResult<()> {
        let mut state = self.state.write().map_err(|_| lock_err("registry.apply"))?;

        if let Some((first, _)) = outcome.created.first() {
            if first.value() != state.next {
                return Err(CrmError::Reconcile(ReconcileError::StaleSnapshot {
                    expected: first.value(),
                    actual: state.next,
                }));
            }
        }

        for (handle, placeholder) in &outcome.updated {
            if !state.arena.contains_key(&handle.value()) {
                return Err(CrmError::Reconcile(ReconcileError::UnknownHandle {
                    handle: handle.value(),
                }));
            }
            state.arena.insert(handle.value(), placeholder.clone());
        }

        for (handle, placeholder) in &outcome.created {
            state.arena.insert(handle.value(), placeholder.clone());
            state.next = state.next.max(handle.value() + 1);
        }

        for handle in &outcome.removed {
            state.arena.remove(&handle.value());
            state.commit_locks.remove(&handle.value());
        }

        // Carry-over additions onto committed chain members extend their
        // persisted group instead of spawning a new one.
        if !outcome.group_joins.is_empty() {
            for group in state.groups.values_mut() {
                group.absorb_joins(&outcome.group_joins);
            }
        }

        Ok(())
    }

    /// Applies a diff and publishes its graph events in one step.
    pub fn apply_and_publish(
        &self,
        outcome: &ReconcileOutcome,
        hub: &GraphEventHub,
    ) -> CrmResult<()> {
        self.apply(outcome)?;
        hub.publish(&outcome.events)
    }

    /// Looks up a persisted chain group.
    pub fn group(&self, id: GroupId) -> CrmResult<Option<PlaceholderGroup>> {
        let state = self.state.read().map_err(|_| lock_err("registry.group"))?;
        Ok(state.groups.get(&id.value()).cloned())
    }

    /// Persists a chain group, replacing any previous state under its id.
    pub fn store_group(&self, group: PlaceholderGroup) -> CrmResult<()> {
        let mut state = self
            .state
            .write()
            .map_err(|_| lock_err("registry.store_group"))?;
        state.groups.insert(group.id().value(), group);
        Ok(())
    }

    /// The per-placeholder exclusive section used around set composition
    /// through command emission.
    pub fn commit_section(&self, handle: PlaceholderHandle) -> CrmResult<CommitSection> {
        let mut state = self
            .state
            .write()
            .map_err(|_| lock_err("registry.commit_section"))?;
        if !state.arena.contains_key(&handle.value()) {
            return Err(CrmError::Reconcile(ReconcileError::UnknownHandle {
                handle: handle.value(),
            }));
        }
        let lock = state
            .commit_locks
            .entry(handle.value())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        Ok(CommitSection { lock })
    }
}

/// Handle to a placeholder's commit lock.
#[derive(Debug)]
pub struct CommitSection {
    lock: Arc<Mutex<()>>,
}

impl CommitSection {
    /// Enters the exclusive section, blocking other committers of the
    /// same placeholder.
    pub fn enter(&self) -> CrmResult<MutexGuard<'_, ()>> {
        self.lock.lock().map_err(|_| lock_err("commit section"))
    }
}
