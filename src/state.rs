// Copyright (c) SimpleStaking, Viable Systems and Tezedge Contributors
// SPDX-License-Identifier: MIT

use std::{collections::TryReserveError, fmt};
use serde::Serialize;
use thiserror::Error;
use super::{
    call_site::{CallSite, CallSiteTable},
    live::LiveTable,
    report::Report,
};

#[derive(Debug, Error)]
pub enum StateError {
    #[error("out of memory while growing bookkeeping tables: {0}")]
    OutOfMemory(#[from] TryReserveError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub site: CallSite,
    pub pointer: u64,
    pub requested: u64,
    pub granted: u64,
}

/// A trace event after classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemEvent {
    Alloc(Allocation),
    Free { pointer: u64 },
    Unknown,
}

/// How many events of each class were applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counters {
    pub allocs: u64,
    pub frees: u64,
    pub untracked_frees: u64,
    pub overwrites: u64,
    pub unknown: u64,
}

impl fmt::Display for Counters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "allocs: {}, frees: {} (untracked: {}), overwritten pointers: {}, unknown events: {}",
            self.allocs, self.frees, self.untracked_frees, self.overwrites, self.unknown,
        )
    }
}

/// Everything accumulated over one trace.
#[derive(Default)]
pub struct AggregationState {
    call_sites: CallSiteTable,
    live: LiveTable,
    counters: Counters,
}

impl AggregationState {
    pub fn new() -> Self {
        AggregationState::default()
    }

    pub fn apply_event(&mut self, event: MemEvent) -> Result<(), StateError> {
        match event {
            MemEvent::Alloc(Allocation { site, pointer, requested, granted }) => {
                self.counters.allocs = self.counters.allocs.wrapping_add(1);
                self.call_sites.find_or_create(&site)?.alloc(requested, granted);
                if let Some(old) = self.live.insert_or_replace(pointer, site, requested, granted)? {
                    self.counters.overwrites = self.counters.overwrites.wrapping_add(1);
                    log::trace!(
                        "pointer {:016x} allocated again, previous owner {} keeps {} bytes",
                        pointer,
                        old.owner,
                        old.granted,
                    );
                }
            },
            MemEvent::Free { pointer } => {
                self.counters.frees = self.counters.frees.wrapping_add(1);
                match self.live.remove(pointer) {
                    Some(record) => {
                        if let Some(stats) = self.call_sites.get_mut(&record.owner) {
                            stats.free(record.requested, record.granted);
                        }
                    },
                    None => {
                        self.counters.untracked_frees = self.counters.untracked_frees.wrapping_add(1);
                    },
                }
            },
            MemEvent::Unknown => {
                self.counters.unknown = self.counters.unknown.wrapping_add(1);
            },
        }
        Ok(())
    }

    pub fn call_sites(&self) -> &CallSiteTable {
        &self.call_sites
    }

    pub fn live(&self) -> &LiveTable {
        &self.live
    }

    pub fn counters(&self) -> Counters {
        self.counters
    }

    /// Ends the run, the state cannot be fed after this.
    pub fn finalize_and_report(self) -> Report {
        Report::new(self.call_sites.into_stats(), self.counters)
    }
}
