//! Call registry
//!
//! A concurrent mirror of every live call, kept current by the owning accounts on
//! insert, state change and removal. The accounts remain the owners of the call
//! objects; the registry only stores [`CallSummary`] snapshots so operators and
//! tests can inspect calls from any task without going through the dispatcher.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::account::AccountId;
use crate::call::{CallDirection, CallHandle, CallId, CallState};

/// Snapshot of one live call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSummary {
    pub call_id: CallId,
    pub account_id: AccountId,
    /// Engine handle; `None` while an outgoing call is being placed
    pub handle: Option<CallHandle>,
    pub direction: CallDirection,
    pub remote_uri: String,
    pub state: CallState,
    /// Active transmit edges in the call's media graph
    pub edges: usize,
    pub created_at: DateTime<Utc>,
}

/// Counters kept by the registry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    pub total_created: u64,
    pub total_removed: u64,
    pub active: usize,
}

/// Shared, cloneable view of all live calls
#[derive(Debug, Clone, Default)]
pub struct CallRegistry {
    calls: Arc<DashMap<CallId, CallSummary>>,
    total_created: Arc<AtomicU64>,
    total_removed: Arc<AtomicU64>,
}

impl CallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new call
    pub fn insert(&self, summary: CallSummary) {
        let call_id = summary.call_id;
        if self.calls.insert(call_id, summary).is_none() {
            self.total_created.fetch_add(1, Ordering::Relaxed);
        }
        tracing::debug!(%call_id, "Registered call");
    }

    /// Apply `f` to a call's summary; returns false if the call is unknown
    pub fn update<F>(&self, call_id: &CallId, f: F) -> bool
    where
        F: FnOnce(&mut CallSummary),
    {
        match self.calls.get_mut(call_id) {
            Some(mut entry) => {
                f(entry.value_mut());
                true
            }
            None => false,
        }
    }

    /// Replace a call's summary if the call is still registered
    pub fn refresh(&self, summary: CallSummary) -> bool {
        let call_id = summary.call_id;
        self.update(&call_id, move |entry| *entry = summary)
    }

    /// Forget a call
    pub fn remove(&self, call_id: &CallId) -> Option<CallSummary> {
        let removed = self.calls.remove(call_id).map(|(_, summary)| summary);
        if removed.is_some() {
            self.total_removed.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(%call_id, "Unregistered call");
        }
        removed
    }

    pub fn get(&self, call_id: &CallId) -> Option<CallSummary> {
        self.calls.get(call_id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, call_id: &CallId) -> bool {
        self.calls.contains_key(call_id)
    }

    /// Find the live call bound to an engine handle
    pub fn find_by_handle(&self, handle: CallHandle) -> Option<CallSummary> {
        self.calls
            .iter()
            .find(|entry| entry.handle == Some(handle))
            .map(|entry| entry.value().clone())
    }

    pub fn contains_handle(&self, handle: CallHandle) -> bool {
        self.calls.iter().any(|entry| entry.handle == Some(handle))
    }

    /// Number of live calls owned by `account_id`
    pub fn count_for_account(&self, account_id: AccountId) -> usize {
        self.calls
            .iter()
            .filter(|entry| entry.account_id == account_id)
            .count()
    }

    /// All live calls, oldest first
    pub fn snapshot(&self) -> Vec<CallSummary> {
        let mut calls: Vec<CallSummary> = self
            .calls
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        calls.sort_by_key(|c| c.created_at);
        calls
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            total_created: self.total_created.load(Ordering::Relaxed),
            total_removed: self.total_removed.load(Ordering::Relaxed),
            active: self.calls.len(),
        }
    }
}
