// Copyright (c) SimpleStaking, Viable Systems and Tezedge Contributors
// SPDX-License-Identifier: MIT

use std::io::{self, BufRead, Read};
use thiserror::Error;
use kmem_event::{
    text::{self, CallSiteRef, TextEvent},
    DecodeError, Event, EventClass, EventTypes, Record, RecordReader,
};
use super::{
    report::Report,
    state::{AggregationState, Allocation, MemEvent, StateError},
    symbols::Resolver,
};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("{0}")]
    State(#[from] StateError),
    #[error("cannot read input: {0}")]
    Io(#[from] io::Error),
    #[error("no records found")]
    Empty,
}

/// Feeds decoded records into an [`AggregationState`], resolving call sites on the way.
pub struct Ingest {
    resolver: Resolver,
    state: AggregationState,
    records: u64,
    lost: u64,
    lost_events: u64,
    malformed: u64,
}

impl Ingest {
    pub fn new(resolver: Resolver) -> Self {
        Ingest {
            resolver,
            state: AggregationState::new(),
            records: 0,
            lost: 0,
            lost_events: 0,
            malformed: 0,
        }
    }

    pub fn apply_record(&mut self, event: &Event) -> Result<(), StateError> {
        self.records += 1;
        let event = match event.event.class() {
            EventClass::Alloc(fields) => MemEvent::Alloc(Allocation {
                site: self.resolver.resolve_address(fields.call_site.0),
                pointer: fields.ptr.0,
                requested: fields.bytes_req,
                granted: fields.bytes_alloc,
            }),
            EventClass::Free(ptr) => MemEvent::Free { pointer: ptr.0 },
            EventClass::Unknown => MemEvent::Unknown,
        };
        self.state.apply_event(event)
    }

    pub fn apply_text(&mut self, event: &TextEvent<'_>) -> Result<(), StateError> {
        let event = match *event {
            TextEvent::Alloc { call_site, ptr, bytes_req, bytes_alloc, .. } => {
                let site = match call_site {
                    CallSiteRef::Address(address) => self.resolver.resolve_address(address.0),
                    CallSiteRef::Symbol(name) => self.resolver.resolve_name(name),
                };
                MemEvent::Alloc(Allocation {
                    site,
                    pointer: ptr.0,
                    requested: bytes_req,
                    granted: bytes_alloc,
                })
            },
            TextEvent::Free { ptr, .. } => MemEvent::Free { pointer: ptr.0 },
            TextEvent::Lost { count, .. } => {
                self.lost(count);
                return Ok(());
            },
            TextEvent::Other(_) => MemEvent::Unknown,
        };
        self.records += 1;
        self.state.apply_event(event)
    }

    /// The tracer dropped `count` events, or an unknown number of them.
    pub fn lost(&mut self, count: Option<u64>) {
        if self.lost == 0 {
            log::warn!("events were lost, frees may be missing and pointers may be reported live");
        }
        self.lost += 1;
        self.lost_events = self.lost_events.wrapping_add(count.unwrap_or(0));
    }

    fn malformed(&mut self, error: &DecodeError) {
        if self.malformed == 0 {
            log::warn!("skipping malformed record: {}", error);
        } else {
            log::debug!("skipping malformed record: {}", error);
        }
        self.malformed += 1;
    }

    /// Drain length prefixed binary records.
    pub fn run_binary<R>(&mut self, reader: R, types: &EventTypes) -> Result<(), IngestError>
    where
        R: Read,
    {
        for record in RecordReader::new(reader) {
            match record {
                Ok(Record::Data(payload)) => match Event::from_slice(&payload, types) {
                    Ok(event) => self.apply_record(&event)?,
                    Err(error) => self.malformed(&error),
                },
                Ok(Record::Lost) => self.lost(None),
                Err(DecodeError::Io(error)) => return Err(error.into()),
                Err(error) => self.malformed(&error),
            }
        }
        self.check_empty()
    }

    /// Drain ftrace text, one event per line.
    pub fn run_text<R>(&mut self, reader: R) -> Result<(), IngestError>
    where
        R: BufRead,
    {
        for line in reader.lines() {
            let line = line?;
            match text::parse_line(&line) {
                Ok(Some(event)) => self.apply_text(&event)?,
                Ok(None) => (),
                Err(error) => self.malformed(&error),
            }
        }
        self.check_empty()
    }

    fn check_empty(&self) -> Result<(), IngestError> {
        if self.records == 0 && self.lost == 0 && self.malformed == 0 {
            Err(IngestError::Empty)
        } else {
            Ok(())
        }
    }

    pub fn state(&self) -> &AggregationState {
        &self.state
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn finish(self) -> Report {
        let counters = self.state.counters();
        log::info!(
            "processed {} records, {} call sites, {} allocations still live",
            self.records,
            self.state.call_sites().len(),
            self.state.live().len(),
        );
        log::debug!("{}", counters);
        if self.lost != 0 {
            log::warn!("{} lost event markers, at least {} events lost", self.lost, self.lost_events);
        }
        if self.malformed != 0 {
            log::warn!("{} malformed records skipped", self.malformed);
        }
        self.state.finalize_and_report()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRACE: &str = "\
# tracer: nop
#
            bash-1234  [002] ....  100.000001: kmalloc: call_site=load_elf_binary+0x1f5/0x1640 ptr=ffff888003a4c000 bytes_req=100 bytes_alloc=128 gfp_flags=GFP_KERNEL
            bash-1234  [002] ....  100.000002: kmalloc: call_site=load_elf_binary+0x2a0/0x1640 ptr=ffff888003a4d000 bytes_req=10 bytes_alloc=16 gfp_flags=GFP_KERNEL
            bash-1234  [002] ....  100.000003: kfree: call_site=load_elf_binary+0x300/0x1640 ptr=ffff888003a4c000
            bash-1234  [002] ....  100.000004: sched_switch: prev_comm=bash
CPU:2 [LOST 12 EVENTS]
CPU:1 [3 EVENTS DROPPED]
            bash-1234  [002] ....  100.000005: kmalloc: call_site=load_elf_binary+0x1f5/0x1640 ptr=zzzz bytes_req=1 bytes_alloc=8 gfp_flags=GFP_KERNEL
";

    #[test]
    fn text_trace() {
        let mut ingest = Ingest::new(Resolver::new(None));
        ingest.run_text(TRACE.as_bytes()).unwrap();
        assert_eq!(ingest.malformed, 1);
        assert_eq!(ingest.lost, 2);
        assert_eq!(ingest.lost_events, 15);
        assert_eq!(ingest.state().counters().unknown, 1);
        assert_eq!(ingest.resolver().len(), 1);

        let report = ingest.finish();
        let row = report.find("load_elf_binary").unwrap();
        assert_eq!((row.current_alloc, row.current_requested), (16, 10));
        assert_eq!((row.total_alloc, row.total_requested), (144, 110));
        assert_eq!(row.waste, 6);
    }

    #[test]
    fn empty_input() {
        let mut ingest = Ingest::new(Resolver::new(None));
        let error = ingest.run_text("# tracer: nop\n\n".as_bytes()).err().unwrap();
        assert!(matches!(error, IngestError::Empty));
        assert_eq!(error.to_string(), "no records found");

        let mut ingest = Ingest::new(Resolver::new(None));
        let error = ingest.run_binary(&[][..], &EventTypes::new()).err().unwrap();
        assert!(matches!(error, IngestError::Empty));
    }
}
