// Copyright (c) SimpleStaking, Viable Systems and Tezedge Contributors
// SPDX-License-Identifier: MIT

use std::{
    collections::HashMap,
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
};
use super::state::StateError;

/// A resolved call site. Two values are the same call site only if they share
/// the same interned string, equal contents are not enough.
#[derive(Clone)]
pub struct CallSite(Arc<str>);

impl CallSite {
    /// Mint a new call site identity. Use [`crate::symbols::Resolver`] to get
    /// the same identity for the same function.
    pub fn new(name: &str) -> Self {
        CallSite(Arc::from(name))
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    pub(crate) fn shared_name(&self) -> Arc<str> {
        self.0.clone()
    }

    fn address(&self) -> usize {
        Arc::as_ptr(&self.0) as *const u8 as usize
    }
}

impl PartialEq for CallSite {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for CallSite {}

impl Hash for CallSite {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address().hash(state)
    }
}

impl fmt::Debug for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CallSite({:?} @ {:x})", self.name(), self.address())
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Running statistics of one call site. Counters wrap instead of trapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSiteStats {
    pub site: CallSite,
    pub total_alloc: u64,
    pub total_requested: u64,
    pub current_alloc: u64,
    pub current_requested: u64,
    pub max_alloc: u64,
    pub max_requested: u64,
}

impl CallSiteStats {
    pub fn new(site: CallSite) -> Self {
        CallSiteStats {
            site,
            total_alloc: 0,
            total_requested: 0,
            current_alloc: 0,
            current_requested: 0,
            max_alloc: 0,
            max_requested: 0,
        }
    }

    pub(crate) fn alloc(&mut self, requested: u64, granted: u64) {
        self.total_alloc = self.total_alloc.wrapping_add(granted);
        self.total_requested = self.total_requested.wrapping_add(requested);
        self.current_alloc = self.current_alloc.wrapping_add(granted);
        self.current_requested = self.current_requested.wrapping_add(requested);
        self.max_alloc = self.max_alloc.max(self.current_alloc);
        self.max_requested = self.max_requested.max(self.current_requested);
    }

    pub(crate) fn free(&mut self, requested: u64, granted: u64) {
        self.current_alloc = self.current_alloc.wrapping_sub(granted);
        self.current_requested = self.current_requested.wrapping_sub(requested);
    }

    /// Granted minus requested bytes still outstanding, may be negative.
    pub fn waste(&self) -> i64 {
        self.current_alloc.wrapping_sub(self.current_requested) as i64
    }

    pub fn max_waste(&self) -> i64 {
        self.max_alloc.wrapping_sub(self.max_requested) as i64
    }
}

/// Statistics per call site. Entries are never removed during a run.
#[derive(Default)]
pub struct CallSiteTable {
    inner: HashMap<CallSite, CallSiteStats>,
}

impl CallSiteTable {
    pub fn new() -> Self {
        CallSiteTable::default()
    }

    pub fn find_or_create(&mut self, site: &CallSite) -> Result<&mut CallSiteStats, StateError> {
        if !self.inner.contains_key(site) {
            self.inner.try_reserve(1)?;
        }
        Ok(self
            .inner
            .entry(site.clone())
            .or_insert_with(|| CallSiteStats::new(site.clone())))
    }

    pub fn get(&self, site: &CallSite) -> Option<&CallSiteStats> {
        self.inner.get(site)
    }

    pub(crate) fn get_mut(&mut self, site: &CallSite) -> Option<&mut CallSiteStats> {
        self.inner.get_mut(site)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CallSiteStats> {
        self.inner.values()
    }

    pub(crate) fn into_stats(self) -> impl Iterator<Item = CallSiteStats> {
        self.inner.into_iter().map(|(_, stats)| stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_not_content() {
        let a = CallSite::new("kmalloc_user");
        let b = CallSite::new("kmalloc_user");
        assert_ne!(a, b);
        assert_eq!(a, a.clone());

        let mut table = CallSiteTable::new();
        table.find_or_create(&a).unwrap().alloc(1, 8);
        table.find_or_create(&b).unwrap().alloc(1, 8);
        table.find_or_create(&a.clone()).unwrap().alloc(1, 8);
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(&a).unwrap().total_alloc, 16);
        assert_eq!(table.get(&b).unwrap().total_alloc, 8);
    }

    #[test]
    fn high_water_marks() {
        let mut stats = CallSiteStats::new(CallSite::new("f"));
        stats.alloc(10, 16);
        stats.alloc(20, 32);
        stats.free(10, 16);
        stats.alloc(5, 8);
        assert_eq!(stats.current_alloc, 40);
        assert_eq!(stats.current_requested, 25);
        assert_eq!(stats.max_alloc, 48);
        assert_eq!(stats.max_requested, 30);
        assert_eq!(stats.total_alloc, 56);
        assert_eq!(stats.total_requested, 35);
        assert_eq!(stats.waste(), 15);
        assert_eq!(stats.max_waste(), 18);
    }

    #[test]
    fn negative_waste_is_kept() {
        let mut stats = CallSiteStats::new(CallSite::new("f"));
        stats.alloc(100, 64);
        assert_eq!(stats.waste(), -36);
        assert_eq!(stats.max_waste(), -36);
    }
}
