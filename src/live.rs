// Copyright (c) SimpleStaking, Viable Systems and Tezedge Contributors
// SPDX-License-Identifier: MIT

use std::collections::HashMap;
use super::{call_site::CallSite, state::StateError};

/// An allocation that was seen but not yet freed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveAllocation {
    pub pointer: u64,
    pub owner: CallSite,
    pub requested: u64,
    pub granted: u64,
}

#[derive(Default)]
pub struct LiveTable {
    inner: HashMap<u64, LiveAllocation>,
}

impl LiveTable {
    pub fn new() -> Self {
        LiveTable::default()
    }

    pub fn find(&self, pointer: u64) -> Option<&LiveAllocation> {
        self.inner.get(&pointer)
    }

    /// Returns the record previously held for `pointer`, its owner is left untouched.
    pub fn insert_or_replace(
        &mut self,
        pointer: u64,
        owner: CallSite,
        requested: u64,
        granted: u64,
    ) -> Result<Option<LiveAllocation>, StateError> {
        if !self.inner.contains_key(&pointer) {
            self.inner.try_reserve(1)?;
        }
        let record = LiveAllocation {
            pointer,
            owner,
            requested,
            granted,
        };
        Ok(self.inner.insert(pointer, record))
    }

    pub fn remove(&mut self, pointer: u64) -> Option<LiveAllocation> {
        self.inner.remove(&pointer)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LiveAllocation> {
        self.inner.values()
    }
}
