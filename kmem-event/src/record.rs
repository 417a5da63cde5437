// Copyright (c) SimpleStaking, Viable Systems and Tezedge Contributors
// SPDX-License-Identifier: MIT

use std::{
    collections::{BTreeMap, HashMap},
    convert::TryFrom,
    fs,
    io::{self, Read, Write},
    path::Path,
};
use serde::{Serialize, Deserialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};
use thiserror::Error;
use super::event::{
    Pod, Hex64, CommonHeader, KFree, KMAlloc, KMAllocNode, CacheAlloc, CacheAllocNode, CacheFree,
};

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("truncated {event} record, need {expected} bytes, have {actual}")]
    Truncated {
        event: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("{event} event without `{field}` field")]
    MissingField {
        event: EventName,
        field: &'static str,
    },
    #[error("record of {length} bytes exceeds {max} bytes, skipped")]
    Oversized { length: usize, max: usize },
    #[error("cannot parse `{field}` from {value:?}")]
    BadField { field: &'static str, value: String },
    #[error("unknown kmem event {0:?}")]
    UnknownEventName(String),
}

/// The kmem tracepoints this crate understands, named as in tracefs.
#[derive(
    Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
    Display, EnumString, EnumIter, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventName {
    Kmalloc,
    KmallocNode,
    KmemCacheAlloc,
    KmemCacheAllocNode,
    Kfree,
    KmemCacheFree,
}

impl EventName {
    pub fn is_alloc(&self) -> bool {
        !self.is_free()
    }

    pub fn is_free(&self) -> bool {
        matches!(self, EventName::Kfree | EventName::KmemCacheFree)
    }
}

/// Maps the per-boot numeric event type (`common_type`) to the event it denotes.
/// Types that are not registered decode as [`EventKind::Unknown`].
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(try_from = "BTreeMap<String, u16>", into = "BTreeMap<String, u16>")]
pub struct EventTypes {
    inner: HashMap<u16, EventName>,
}

impl EventTypes {
    pub fn new() -> Self {
        EventTypes::default()
    }

    pub fn insert(&mut self, ty: u16, name: EventName) -> Option<EventName> {
        self.inner.insert(ty, name)
    }

    pub fn get(&self, ty: u16) -> Option<EventName> {
        self.inner.get(&ty).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Merge `other` into `self`, entries of `other` win.
    pub fn extend(&mut self, other: EventTypes) {
        self.inner.extend(other.inner)
    }

    /// Read `events/kmem/<name>/id` for every known event under the tracefs mount.
    /// Events the running kernel does not provide are skipped.
    pub fn from_tracefs<P>(tracefs: P) -> Result<Self, DecodeError>
    where
        P: AsRef<Path>,
    {
        let kmem = tracefs.as_ref().join("events").join("kmem");
        let mut types = EventTypes::new();
        for name in EventName::iter() {
            let path = kmem.join(name.to_string()).join("id");
            let id = match fs::read_to_string(&path) {
                Ok(id) => id,
                Err(error) if error.kind() == io::ErrorKind::NotFound => {
                    log::debug!("no such event: {}", path.display());
                    continue;
                },
                Err(error) => return Err(error.into()),
            };
            let id = id.trim();
            let ty = id.parse::<u16>().map_err(|_| DecodeError::BadField {
                field: "id",
                value: id.to_string(),
            })?;
            types.insert(ty, name);
        }
        Ok(types)
    }
}

impl TryFrom<BTreeMap<String, u16>> for EventTypes {
    type Error = DecodeError;

    fn try_from(map: BTreeMap<String, u16>) -> Result<Self, Self::Error> {
        let mut types = EventTypes::new();
        for (name, ty) in map {
            let name = name
                .parse::<EventName>()
                .map_err(|_| DecodeError::UnknownEventName(name.clone()))?;
            types.insert(ty, name);
        }
        Ok(types)
    }
}

impl From<EventTypes> for BTreeMap<String, u16> {
    fn from(types: EventTypes) -> Self {
        types
            .inner
            .into_iter()
            .map(|(ty, name)| (name.to_string(), ty))
            .collect()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    KMAlloc(KMAlloc),
    KMAllocNode(KMAllocNode),
    CacheAlloc(CacheAlloc),
    CacheAllocNode(CacheAllocNode),
    KFree(KFree),
    CacheFree(CacheFree),
    Unknown(u16),
}

/// Fields every allocate-class event supplies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocFields {
    pub call_site: Hex64,
    pub ptr: Hex64,
    pub bytes_req: u64,
    pub bytes_alloc: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventClass {
    Alloc(AllocFields),
    Free(Hex64),
    Unknown,
}

impl EventKind {
    pub fn name(&self) -> Option<EventName> {
        match self {
            EventKind::KMAlloc(_) => Some(EventName::Kmalloc),
            EventKind::KMAllocNode(_) => Some(EventName::KmallocNode),
            EventKind::CacheAlloc(_) => Some(EventName::KmemCacheAlloc),
            EventKind::CacheAllocNode(_) => Some(EventName::KmemCacheAllocNode),
            EventKind::KFree(_) => Some(EventName::Kfree),
            EventKind::CacheFree(_) => Some(EventName::KmemCacheFree),
            EventKind::Unknown(_) => None,
        }
    }

    pub fn class(&self) -> EventClass {
        let alloc = |call_site: Hex64, ptr: Hex64, bytes_req: Hex64, bytes_alloc: Hex64| {
            EventClass::Alloc(AllocFields {
                call_site,
                ptr,
                bytes_req: bytes_req.0,
                bytes_alloc: bytes_alloc.0,
            })
        };
        match self {
            EventKind::KMAlloc(v) => alloc(v.call_site, v.ptr, v.bytes_req, v.bytes_alloc),
            EventKind::KMAllocNode(v) => alloc(v.call_site, v.ptr, v.bytes_req, v.bytes_alloc),
            EventKind::CacheAlloc(v) => alloc(v.call_site, v.ptr, v.bytes_req, v.bytes_alloc),
            EventKind::CacheAllocNode(v) => alloc(v.call_site, v.ptr, v.bytes_req, v.bytes_alloc),
            EventKind::KFree(v) => EventClass::Free(v.ptr),
            EventKind::CacheFree(v) => EventClass::Free(v.ptr),
            EventKind::Unknown(_) => EventClass::Unknown,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub header: CommonHeader,
    pub event: EventKind,
}

fn body<T>(event: EventName, slice: &[u8]) -> Result<T, DecodeError>
where
    T: Pod,
{
    T::from_slice(slice).ok_or(DecodeError::Truncated {
        event: event.into(),
        expected: T::SIZE,
        actual: slice.len(),
    })
}

impl Event {
    /// Decode `[CommonHeader][body]`, the body layout chosen by the header's type.
    pub fn from_slice(slice: &[u8], types: &EventTypes) -> Result<Self, DecodeError> {
        let header = CommonHeader::from_slice(slice).ok_or(DecodeError::Truncated {
            event: "common",
            expected: CommonHeader::SIZE,
            actual: slice.len(),
        })?;
        let slice = &slice[CommonHeader::SIZE..];
        let event = match types.get(header.ty) {
            Some(name @ EventName::Kmalloc) => EventKind::KMAlloc(body(name, slice)?),
            Some(name @ EventName::KmallocNode) => EventKind::KMAllocNode(body(name, slice)?),
            Some(name @ EventName::KmemCacheAlloc) => EventKind::CacheAlloc(body(name, slice)?),
            Some(name @ EventName::KmemCacheAllocNode) => {
                EventKind::CacheAllocNode(body(name, slice)?)
            },
            Some(name @ EventName::Kfree) => EventKind::KFree(body(name, slice)?),
            Some(name @ EventName::KmemCacheFree) => EventKind::CacheFree(body(name, slice)?),
            None => EventKind::Unknown(header.ty),
        };

        Ok(Event { header, event })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Data(Vec<u8>),
    /// The tracer dropped events before this point.
    Lost,
}

/// A single trace event never spans more than one ring buffer page.
pub const MAX_RECORD: usize = 0x1000;

/// Reads records framed as native endian `u32` length followed by the payload.
/// A zero length marks lost events. Records longer than [`MAX_RECORD`] are
/// skipped without being buffered.
pub struct RecordReader<R> {
    inner: R,
    done: bool,
}

impl<R> RecordReader<R>
where
    R: Read,
{
    pub fn new(inner: R) -> Self {
        RecordReader { inner, done: false }
    }

    fn read_length(&mut self) -> Result<Option<usize>, DecodeError> {
        let mut length = [0; 4];
        let mut have = 0;
        while have < length.len() {
            match self.inner.read(&mut length[have..]) {
                Ok(0) if have == 0 => return Ok(None),
                Ok(0) => {
                    return Err(DecodeError::Truncated {
                        event: "length",
                        expected: length.len(),
                        actual: have,
                    })
                },
                Ok(n) => have += n,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => (),
                Err(error) => return Err(error.into()),
            }
        }
        Ok(Some(u32::from_ne_bytes(length) as usize))
    }

    fn read_record(&mut self) -> Result<Option<Record>, DecodeError> {
        let length = match self.read_length()? {
            None => return Ok(None),
            Some(0) => return Ok(Some(Record::Lost)),
            Some(length) => length,
        };
        if length > MAX_RECORD {
            let skipped = io::copy(&mut (&mut self.inner).take(length as u64), &mut io::sink())?;
            if skipped < length as u64 {
                return Err(DecodeError::Truncated {
                    event: "record",
                    expected: length,
                    actual: skipped as usize,
                });
            }
            return Err(DecodeError::Oversized {
                length,
                max: MAX_RECORD,
            });
        }
        let mut payload = vec![0; length];
        self.inner.read_exact(&mut payload).map_err(|error| {
            if error.kind() == io::ErrorKind::UnexpectedEof {
                DecodeError::Truncated {
                    event: "record",
                    expected: length,
                    actual: 0,
                }
            } else {
                error.into()
            }
        })?;
        Ok(Some(Record::Data(payload)))
    }
}

impl<R> Iterator for RecordReader<R>
where
    R: Read,
{
    type Item = Result<Record, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            },
            Err(error @ DecodeError::Oversized { .. }) => Some(Err(error)),
            Err(error) => {
                self.done = true;
                Some(Err(error))
            },
        }
    }
}

/// Frame `payload` the way [`RecordReader`] expects it, an empty payload is a lost marker.
pub fn write_record<W>(writer: &mut W, payload: &[u8]) -> io::Result<()>
where
    W: Write,
{
    writer.write_all(&(payload.len() as u32).to_ne_bytes())?;
    writer.write_all(payload)
}
