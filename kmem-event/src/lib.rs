// Copyright (c) SimpleStaking, Viable Systems and Tezedge Contributors
// SPDX-License-Identifier: MIT

#![forbid(unsafe_code)]

mod event;
pub use self::event::{Pod, Hex32, Hex64, CommonHeader};
pub use self::event::{KFree, KMAlloc, KMAllocNode, CacheAlloc, CacheAllocNode, CacheFree};

mod record;
pub use self::record::{
    DecodeError, EventName, EventTypes, EventKind, EventClass, AllocFields, Event, Record,
    RecordReader, MAX_RECORD, write_record,
};

pub mod text;
