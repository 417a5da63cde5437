// Copyright (c) SimpleStaking, Viable Systems and Tezedge Contributors
// SPDX-License-Identifier: MIT

use std::fmt;
use itertools::Itertools;
use serde::Serialize;
use super::{call_site::CallSiteStats, state::Counters};

const HEADER: &str = "                Function            \tWaste\tAlloc\treq\t\tTotAlloc     TotReq\t\tMaxAlloc     MaxReq\tMaxWaste\n";
const RULER: &str = "                --------            \t-----\t-----\t---\t\t--------     ------\t\t--------     ------\t--------\n";

/// One call site, as printed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportRow {
    pub function: String,
    pub waste: i64,
    pub current_alloc: u64,
    pub current_requested: u64,
    pub total_alloc: u64,
    pub total_requested: u64,
    pub max_alloc: u64,
    pub max_requested: u64,
    pub max_waste: i64,
}

impl From<CallSiteStats> for ReportRow {
    fn from(stats: CallSiteStats) -> Self {
        ReportRow {
            function: stats.site.name().to_string(),
            waste: stats.waste(),
            current_alloc: stats.current_alloc,
            current_requested: stats.current_requested,
            total_alloc: stats.total_alloc,
            total_requested: stats.total_requested,
            max_alloc: stats.max_alloc,
            max_requested: stats.max_requested,
            max_waste: stats.max_waste(),
        }
    }
}

impl fmt::Display for ReportRow {
    // counters are printed signed, a wrapped counter shows up negative
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:>32}\t{}\t{}\t{}\t\t{:>8}   {:>8}\t\t{:>8}   {:>8}\t{}\n",
            self.function,
            self.waste,
            self.current_alloc as i64,
            self.current_requested as i64,
            self.total_alloc as i64,
            self.total_requested as i64,
            self.max_alloc as i64,
            self.max_requested as i64,
            self.max_waste,
        )
    }
}

/// Final per call site table, ordered by descending current waste.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    rows: Vec<ReportRow>,
    counters: Counters,
}

impl Report {
    pub(crate) fn new<I>(stats: I, counters: Counters) -> Self
    where
        I: IntoIterator<Item = CallSiteStats>,
    {
        let rows = stats
            .into_iter()
            .map(ReportRow::from)
            .sorted_by(|a, b| b.waste.cmp(&a.waste))
            .collect();
        Report { rows, counters }
    }

    pub fn rows(&self) -> &[ReportRow] {
        &self.rows
    }

    pub fn counters(&self) -> Counters {
        self.counters
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn find(&self, function: &str) -> Option<&ReportRow> {
        self.rows.iter().find(|row| row.function == function)
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(HEADER)?;
        f.write_str(RULER)?;
        for row in &self.rows {
            write!(f, "{}", row)?;
        }
        Ok(())
    }
}
