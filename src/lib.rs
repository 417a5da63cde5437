// Copyright (c) SimpleStaking, Viable Systems and Tezedge Contributors
// SPDX-License-Identifier: MIT

#![forbid(unsafe_code)]

mod call_site;
pub use self::call_site::{CallSite, CallSiteStats, CallSiteTable};

mod live;
pub use self::live::{LiveAllocation, LiveTable};

mod state;
pub use self::state::{AggregationState, Allocation, Counters, MemEvent, StateError};

mod report;
pub use self::report::{Report, ReportRow};

mod symbols;
pub use self::symbols::{Resolver, SymbolError, SymbolTable};

mod ingest;
pub use self::ingest::{Ingest, IngestError};

pub mod configuration;
