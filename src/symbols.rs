// Copyright (c) SimpleStaking, Viable Systems and Tezedge Contributors
// SPDX-License-Identifier: MIT

//! Mapping of call site addresses to function names.
//!
//! The symbol list is read in `/proc/kallsyms` format, one symbol per line:
//! `<hex address> <type> <name> [module]`. Only text symbols are kept.
//! Every name handed out by the [`Resolver`] is interned, so the call site
//! table sees one identity per function.

use std::{
    collections::{HashMap, HashSet},
    fs,
    io::{self, BufRead, BufReader},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use super::call_site::CallSite;

#[derive(Debug, Error)]
pub enum SymbolError {
    #[error("cannot open symbol file {}: {source}", .path.display())]
    Open { path: PathBuf, source: io::Error },
    #[error("cannot read symbols: {0}")]
    Io(#[from] io::Error),
}

impl SymbolError {
    pub fn is_not_found(&self) -> bool {
        match self {
            SymbolError::Open { source, .. } => source.kind() == io::ErrorKind::NotFound,
            SymbolError::Io(_) => false,
        }
    }
}

struct Symbol {
    address: u64,
    site: CallSite,
}

/// Function start addresses, sorted. Every entry is its own call site, even
/// when several static functions share a name.
#[derive(Default)]
pub struct SymbolTable {
    inner: Vec<Symbol>,
}

impl SymbolTable {
    pub fn load<P>(path: P) -> Result<Self, SymbolError>
    where
        P: AsRef<Path>,
    {
        let file = fs::File::open(&path).map_err(|source| SymbolError::Open {
            path: path.as_ref().to_path_buf(),
            source,
        })?;
        Self::parse(BufReader::new(file))
    }

    pub fn parse<R>(reader: R) -> Result<Self, SymbolError>
    where
        R: BufRead,
    {
        let mut inner = Vec::new();
        let mut restricted = 0usize;
        for (n, line) in reader.lines().enumerate() {
            let line = line?;
            let mut words = line.split_whitespace();
            let (address, ty, name) = match (words.next(), words.next(), words.next()) {
                (Some(a), Some(t), Some(n)) => (a, t, n),
                (None, ..) => continue,
                _ => {
                    log::warn!("symbols: line {} is malformed: {:?}", n + 1, line);
                    continue;
                },
            };
            if !matches!(ty, "t" | "T" | "w" | "W") {
                continue;
            }
            let address = match u64::from_str_radix(address, 16) {
                Ok(a) => a,
                Err(_) => {
                    log::warn!("symbols: line {} has bad address: {:?}", n + 1, address);
                    continue;
                },
            };
            if address == 0 {
                restricted += 1;
                continue;
            }
            inner.push(Symbol {
                address,
                site: CallSite::new(name),
            });
        }
        if restricted != 0 && inner.is_empty() {
            log::warn!("symbols: all {} addresses are zero, kptr_restrict is probably set", restricted);
        }
        inner.sort_by_key(|s| s.address);
        log::debug!("symbols: loaded {} text symbols", inner.len());

        Ok(SymbolTable { inner })
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// The symbol with the greatest start address not above `address`.
    pub fn find(&self, address: u64) -> Option<&CallSite> {
        let pos = self.inner.partition_point(|s| s.address <= address);
        pos.checked_sub(1).map(|i| &self.inner[i].site)
    }

    /// The symbol called `name`, if exactly one has that name.
    pub fn find_unique(&self, name: &str) -> Option<&CallSite> {
        let mut found = self.inner.iter().filter(|s| s.site.name() == name);
        match (found.next(), found.next()) {
            (Some(symbol), None) => Some(&symbol.site),
            _ => None,
        }
    }
}

/// Turns addresses and names into interned call sites.
#[derive(Default)]
pub struct Resolver {
    table: Option<SymbolTable>,
    by_name: HashMap<Arc<str>, CallSite>,
    by_address: HashMap<u64, CallSite>,
    sites: HashSet<CallSite>,
}

impl Resolver {
    pub fn new(table: Option<SymbolTable>) -> Self {
        Resolver {
            table,
            by_name: HashMap::new(),
            by_address: HashMap::new(),
            sites: HashSet::new(),
        }
    }

    pub fn resolve_address(&mut self, address: u64) -> CallSite {
        if let Some(site) = self.by_address.get(&address) {
            return site.clone();
        }
        let found = self.table.as_ref().and_then(|t| t.find(address)).cloned();
        let site = match found {
            Some(site) => site,
            None => self.intern(&format!("0x{:x}", address)),
        };
        self.sites.insert(site.clone());
        self.by_address.insert(address, site.clone());
        site
    }

    /// Call site of a symbolic text trace entry. A name that denotes exactly
    /// one kallsyms function shares that function's call site.
    pub fn resolve_name(&mut self, name: &str) -> CallSite {
        if let Some(site) = self.by_name.get(name) {
            return site.clone();
        }
        let site = self
            .table
            .as_ref()
            .and_then(|t| t.find_unique(name))
            .cloned()
            .unwrap_or_else(|| CallSite::new(name));
        self.by_name.insert(site.shared_name(), site.clone());
        self.sites.insert(site.clone());
        site
    }

    fn intern(&mut self, label: &str) -> CallSite {
        if let Some(site) = self.by_name.get(label) {
            return site.clone();
        }
        let site = CallSite::new(label);
        self.by_name.insert(site.shared_name(), site.clone());
        site
    }

    /// Number of distinct call sites handed out so far.
    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }
}
