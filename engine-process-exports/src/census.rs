// Copyright (c) 2022 MASSA LABS <info@massa.net>

use crate::types::ProcessState;
use engine_models::ContractKey;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Counts of live processes at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CensusSnapshot {
    /// live origin processes
    pub live_orig: usize,
    /// live cross processes
    pub live_cross: usize,
    /// live processes by assigned contract, both pools
    pub by_key: HashMap<ContractKey, usize>,
    /// live processes by state, both pools
    pub by_state: HashMap<ProcessState, usize>,
}

impl CensusSnapshot {
    /// live processes of a pool
    pub fn live(&self, is_orig: bool) -> usize {
        if is_orig {
            self.live_orig
        } else {
            self.live_cross
        }
    }

    /// live processes assigned to `key`
    pub fn count_for_key(&self, key: &ContractKey) -> usize {
        self.by_key.get(key).copied().unwrap_or(0)
    }

    /// live processes in `state`
    pub fn count_in_state(&self, state: ProcessState) -> usize {
        self.by_state.get(&state).copied().unwrap_or(0)
    }

    /// live processes of both pools
    pub fn total(&self) -> usize {
        self.live_orig + self.live_cross
    }
}

/// Read side of the census, for the scheduler and diagnostics.
#[derive(Debug, Clone, Default)]
pub struct PoolCensus(Arc<RwLock<CensusSnapshot>>);

/// Write side of the census, held by the process manager alone.
#[derive(Debug)]
pub struct CensusWriter(Arc<RwLock<CensusSnapshot>>);

impl PoolCensus {
    /// Creates an empty census and its only writer.
    pub fn pair() -> (CensusWriter, PoolCensus) {
        let inner = Arc::new(RwLock::new(CensusSnapshot::default()));
        (CensusWriter(inner.clone()), PoolCensus(inner))
    }

    /// copy of the latest census
    pub fn snapshot(&self) -> CensusSnapshot {
        self.0.read().clone()
    }

    /// live processes assigned to `key`
    pub fn count_for_key(&self, key: &ContractKey) -> usize {
        self.0.read().count_for_key(key)
    }

    /// live processes of a pool
    pub fn live(&self, is_orig: bool) -> usize {
        self.0.read().live(is_orig)
    }
}

impl CensusWriter {
    /// Replaces the published census.
    pub fn publish(&self, snapshot: CensusSnapshot) {
        *self.0.write() = snapshot;
    }
}
