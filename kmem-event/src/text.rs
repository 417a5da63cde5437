// Copyright (c) SimpleStaking, Viable Systems and Tezedge Contributors
// SPDX-License-Identifier: MIT

//! Decoding of kmem events from the text the kernel writes to
//! `/sys/kernel/tracing/trace`, or from `trace-cmd report`. A line looks like
//!
//! ```text
//! <idle>-0 [001] ..s. 2335.123456: kmalloc: call_site=__alloc_skb+0x8e/0x1d0 ptr=00000000b2a9c5d1 bytes_req=640 bytes_alloc=1024 gfp_flags=GFP_ATOMIC
//! ```
//!
//! Older kernels print the call site as a bare address instead of a symbol.

use super::{
    event::Hex64,
    record::{DecodeError, EventName},
};

/// Call site as written in the trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallSiteRef<'a> {
    Address(Hex64),
    /// Function name without the `+offset/size` suffix.
    Symbol(&'a str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEvent<'a> {
    Alloc {
        name: EventName,
        call_site: CallSiteRef<'a>,
        ptr: Hex64,
        bytes_req: u64,
        bytes_alloc: u64,
    },
    Free {
        name: EventName,
        ptr: Hex64,
    },
    /// `CPU:<cpu> [LOST <count> EVENTS]` or `CPU:<cpu> [<count> EVENTS DROPPED]`,
    /// the count is absent when the tracer did not know it.
    Lost { cpu: u32, count: Option<u64> },
    /// An event line of some other tracepoint.
    Other(&'a str),
}

/// Decode one line. Blank lines, comments and anything that is not an event
/// line give `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<TextEvent<'_>>, DecodeError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    if let Some(lost) = line.strip_prefix("CPU:") {
        return parse_lost(lost).map(Some);
    }

    // task-pid [cpu] [flags] timestamp: event: fields
    let after_cpu = match line.find("] ") {
        Some(i) => &line[(i + 2)..],
        None => return Ok(None),
    };
    let (prefix, rest) = match after_cpu.split_once(": ") {
        Some(v) => v,
        None => return Ok(None),
    };
    let is_timestamp = prefix
        .split_whitespace()
        .last()
        .map(|t| t.parse::<f64>().is_ok())
        .unwrap_or(false);
    if !is_timestamp {
        return Ok(None);
    }
    // the event name may carry its system, `kmem:kmalloc:`
    let rest = rest.trim_start();
    let (name, fields) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
    let name = name.trim_end_matches(':');
    let name = name.rsplit(':').next().unwrap_or(name);

    let name = match name.parse::<EventName>() {
        Ok(name) => name,
        Err(_) => return Ok(Some(TextEvent::Other(name))),
    };
    let fields = Fields::new(fields);

    if name.is_free() {
        return Ok(Some(TextEvent::Free {
            name,
            ptr: fields.hex(name, "ptr")?,
        }));
    }

    Ok(Some(TextEvent::Alloc {
        name,
        call_site: fields.call_site(name)?,
        ptr: fields.hex(name, "ptr")?,
        bytes_req: fields.decimal(name, "bytes_req")?,
        bytes_alloc: fields.decimal(name, "bytes_alloc")?,
    }))
}

fn parse_lost(s: &str) -> Result<TextEvent<'static>, DecodeError> {
    let bad = || DecodeError::BadField {
        field: "lost",
        value: s.to_string(),
    };
    let (cpu, rest) = s.split_once(" [").ok_or_else(bad)?;
    let cpu = cpu.trim().parse::<u32>().map_err(|_| bad())?;
    let rest = rest.trim_end().strip_suffix(']').ok_or_else(bad)?;
    // ftrace writes `[LOST <k> EVENTS]`, trace-cmd writes `[<k> EVENTS DROPPED]`
    let count = match rest.strip_prefix("LOST") {
        Some(rest) => rest.strip_suffix("EVENTS"),
        None => rest.strip_suffix("EVENTS DROPPED"),
    };
    let count = count.ok_or_else(bad)?.trim();
    let count = if count.is_empty() {
        None
    } else {
        Some(count.parse::<u64>().map_err(|_| bad())?)
    };
    Ok(TextEvent::Lost { cpu, count })
}

struct Fields<'a> {
    inner: Vec<(&'a str, &'a str)>,
}

impl<'a> Fields<'a> {
    fn new(s: &'a str) -> Self {
        Fields {
            inner: s
                .split_whitespace()
                .filter_map(|token| token.split_once('='))
                .collect(),
        }
    }

    fn get(&self, name: EventName, field: &'static str) -> Result<&'a str, DecodeError> {
        self.inner
            .iter()
            .find(|(k, _)| *k == field)
            .map(|(_, v)| *v)
            .ok_or(DecodeError::MissingField { event: name, field })
    }

    fn hex(&self, name: EventName, field: &'static str) -> Result<Hex64, DecodeError> {
        let value = self.get(name, field)?;
        parse_hex(value).ok_or_else(|| DecodeError::BadField {
            field,
            value: value.to_string(),
        })
    }

    fn decimal(&self, name: EventName, field: &'static str) -> Result<u64, DecodeError> {
        let value = self.get(name, field)?;
        value.parse().map_err(|_| DecodeError::BadField {
            field,
            value: value.to_string(),
        })
    }

    fn call_site(&self, name: EventName) -> Result<CallSiteRef<'a>, DecodeError> {
        let value = self.get(name, "call_site")?;
        let explicit_hex = value.starts_with("0x");
        let looks_like_address = value.len() >= 8 && value.bytes().all(|b| b.is_ascii_hexdigit());
        if explicit_hex || looks_like_address {
            if let Some(address) = parse_hex(value) {
                return Ok(CallSiteRef::Address(address));
            }
        }
        let symbol = value.split('+').next().unwrap_or(value);
        if symbol.is_empty() {
            return Err(DecodeError::BadField {
                field: "call_site",
                value: value.to_string(),
            });
        }
        Ok(CallSiteRef::Symbol(symbol))
    }
}

fn parse_hex(s: &str) -> Option<Hex64> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(s, 16).ok().map(Hex64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kmalloc_with_symbol() {
        let line = "          <idle>-0       [001] ..s.  2335.123456: kmalloc: call_site=__alloc_skb+0x8e/0x1d0 ptr=00000000b2a9c5d1 bytes_req=640 bytes_alloc=1024 gfp_flags=GFP_ATOMIC|__GFP_NOWARN node=-1 accounted=false";
        let event = parse_line(line).unwrap().unwrap();
        assert_eq!(
            event,
            TextEvent::Alloc {
                name: EventName::Kmalloc,
                call_site: CallSiteRef::Symbol("__alloc_skb"),
                ptr: Hex64(0xb2a9c5d1),
                bytes_req: 640,
                bytes_alloc: 1024,
            },
        );
    }

    #[test]
    fn cache_alloc_with_address() {
        let line = "bash-1234 [002] 10.000001: kmem_cache_alloc: call_site=ffffffff8150a4be ptr=0xffff888003a1b000 bytes_req=200 bytes_alloc=256 gfp_flags=GFP_KERNEL";
        match parse_line(line).unwrap().unwrap() {
            TextEvent::Alloc { name, call_site, ptr, .. } => {
                assert_eq!(name, EventName::KmemCacheAlloc);
                assert_eq!(call_site, CallSiteRef::Address(Hex64(0xffffffff8150a4be)));
                assert_eq!(ptr, Hex64(0xffff888003a1b000));
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn node_variants_and_system_prefix() {
        let line = "kworker/0:1-12 [000] d..1. 5.5: kmem:kmalloc_node: call_site=alloc_thread_stack_node+0x1c/0x60 ptr=ffff8881 bytes_req=16384 bytes_alloc=16384 gfp_flags=GFP_KERNEL node=0";
        match parse_line(line).unwrap().unwrap() {
            TextEvent::Alloc { name, call_site, .. } => {
                assert_eq!(name, EventName::KmallocNode);
                assert_eq!(call_site, CallSiteRef::Symbol("alloc_thread_stack_node"));
            },
            other => panic!("unexpected {:?}", other),
        }

        let line = "sh-9 [003] 5.6: kmem_cache_alloc_node: call_site=0xffffffff81000010 ptr=ffff8882 bytes_req=64 bytes_alloc=64 gfp_flags=GFP_KERNEL node=1";
        assert!(matches!(
            parse_line(line).unwrap(),
            Some(TextEvent::Alloc { name: EventName::KmemCacheAllocNode, .. }),
        ));
    }

    #[test]
    fn frees() {
        let line = "kworker/0:1-12    [000]  2335.123457: kfree:                call_site=ffffffff8150a4be ptr=0xffff888003a1b000";
        assert_eq!(
            parse_line(line).unwrap(),
            Some(TextEvent::Free {
                name: EventName::Kfree,
                ptr: Hex64(0xffff888003a1b000),
            }),
        );

        let line = "bash-1234 [002] d..1. 10.2: kmem_cache_free: call_site=do_exit+0x3f2/0xb00 ptr=ffff888100 name=task_struct";
        assert_eq!(
            parse_line(line).unwrap(),
            Some(TextEvent::Free {
                name: EventName::KmemCacheFree,
                ptr: Hex64(0xffff888100),
            }),
        );
    }

    #[test]
    fn lost_events() {
        assert_eq!(
            parse_line("CPU:2 [LOST 123 EVENTS]").unwrap(),
            Some(TextEvent::Lost { cpu: 2, count: Some(123) }),
        );
        assert_eq!(
            parse_line("CPU:0 [LOST EVENTS]").unwrap(),
            Some(TextEvent::Lost { cpu: 0, count: None }),
        );
        assert_eq!(
            parse_line("CPU:2 [12 EVENTS DROPPED]").unwrap(),
            Some(TextEvent::Lost { cpu: 2, count: Some(12) }),
        );
        assert_eq!(
            parse_line("CPU:3 [EVENTS DROPPED]").unwrap(),
            Some(TextEvent::Lost { cpu: 3, count: None }),
        );
        assert!(parse_line("CPU:x [LOST 1 EVENTS]").is_err());
        assert!(parse_line("CPU:1 [12 EVENTS]").is_err());
    }

    #[test]
    fn other_lines() {
        assert_eq!(parse_line("").unwrap(), None);
        assert_eq!(parse_line("# tracer: nop").unwrap(), None);
        assert_eq!(parse_line("cpus=4").unwrap(), None);
        assert_eq!(
            parse_line("sh-9 [003] 5.6: mm_page_alloc: page=0x1 pfn=0x1 order=0").unwrap(),
            Some(TextEvent::Other("mm_page_alloc")),
        );
    }

    #[test]
    fn malformed_fields() {
        let line = "sh-9 [003] 5.6: kmalloc: call_site=foo+0x1/0x2 ptr=zz bytes_req=1 bytes_alloc=8";
        assert!(matches!(
            parse_line(line),
            Err(DecodeError::BadField { field: "ptr", .. }),
        ));

        let line = "sh-9 [003] 5.6: kmalloc: call_site=foo+0x1/0x2 ptr=1 bytes_alloc=8";
        assert!(matches!(
            parse_line(line),
            Err(DecodeError::MissingField { field: "bytes_req", .. }),
        ));
    }
}
