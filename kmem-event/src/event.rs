// Copyright (c) SimpleStaking, Viable Systems and Tezedge Contributors
// SPDX-License-Identifier: MIT

use std::fmt;
use serde::{Serialize, ser, Deserialize, de};

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Hex64(pub u64);

impl fmt::Debug for Hex64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", &self.0)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Hex32(pub u32);

impl fmt::Debug for Hex32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", &self.0)
    }
}

impl<'de> Deserialize<'de> for Hex32 {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        use self::de::Error;

        let s = String::deserialize(deserializer)?;
        u32::from_str_radix(s.trim_start_matches("0x"), 16)
            .map_err(Error::custom)
            .map(Hex32)
    }
}

impl Serialize for Hex32 {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: ser::Serializer,
    {
        serializer.serialize_str(&format!("{:08x}", &self.0))
    }
}

impl<'de> Deserialize<'de> for Hex64 {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        use self::de::Error;

        let s = String::deserialize(deserializer)?;
        u64::from_str_radix(s.trim_start_matches("0x"), 16)
            .map_err(Error::custom)
            .map(Hex64)
    }
}

impl Serialize for Hex64 {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: ser::Serializer,
    {
        serializer.serialize_str(&format!("{:016x}", &self.0))
    }
}

/// Fixed layout of a trace record body, native endian.
pub trait Pod
where
    Self: Sized,
{
    const SIZE: usize;

    fn from_slice(s: &[u8]) -> Option<Self>;
}

#[inline(always)]
fn u16_at(s: &[u8], offset: usize) -> u16 {
    let mut b = [0; 2];
    b.copy_from_slice(&s[offset..(offset + 2)]);
    u16::from_ne_bytes(b)
}

#[inline(always)]
fn u32_at(s: &[u8], offset: usize) -> u32 {
    let mut b = [0; 4];
    b.copy_from_slice(&s[offset..(offset + 4)]);
    u32::from_ne_bytes(b)
}

#[inline(always)]
fn u64_at(s: &[u8], offset: usize) -> u64 {
    let mut b = [0; 8];
    b.copy_from_slice(&s[offset..(offset + 8)]);
    u64::from_ne_bytes(b)
}

/// The common fields every kernel trace record starts with.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CommonHeader {
    pub ty: u16,
    pub flags: u8,
    pub preempt_count: u8,
    pub pid: u32,
}

impl Pod for CommonHeader {
    const SIZE: usize = 0x08;

    #[inline(always)]
    fn from_slice(s: &[u8]) -> Option<Self> {
        if s.len() < Self::SIZE {
            return None;
        }
        Some(CommonHeader {
            ty: u16_at(s, 0x00),
            flags: s[0x02],
            preempt_count: s[0x03],
            pid: u32_at(s, 0x04),
        })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct KFree {
    pub call_site: Hex64,
    pub ptr: Hex64,
}

impl Pod for KFree {
    const SIZE: usize = 0x10;

    #[inline(always)]
    fn from_slice(s: &[u8]) -> Option<Self> {
        if s.len() < Self::SIZE {
            return None;
        }
        Some(KFree {
            call_site: Hex64(u64_at(s, 0x00)),
            ptr: Hex64(u64_at(s, 0x08)),
        })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct KMAlloc {
    pub call_site: Hex64,
    pub ptr: Hex64,
    pub bytes_req: Hex64,
    pub bytes_alloc: Hex64,
    pub gfp_flags: Hex32,
}

impl Pod for KMAlloc {
    const SIZE: usize = 0x24;

    #[inline(always)]
    fn from_slice(s: &[u8]) -> Option<Self> {
        if s.len() < Self::SIZE {
            return None;
        }
        Some(KMAlloc {
            call_site: Hex64(u64_at(s, 0x00)),
            ptr: Hex64(u64_at(s, 0x08)),
            bytes_req: Hex64(u64_at(s, 0x10)),
            bytes_alloc: Hex64(u64_at(s, 0x18)),
            gfp_flags: Hex32(u32_at(s, 0x20)),
        })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct KMAllocNode {
    pub call_site: Hex64,
    pub ptr: Hex64,
    pub bytes_req: Hex64,
    pub bytes_alloc: Hex64,
    pub gfp_flags: Hex32,
    pub node: Hex32,
}

impl Pod for KMAllocNode {
    const SIZE: usize = 0x28;

    #[inline(always)]
    fn from_slice(s: &[u8]) -> Option<Self> {
        if s.len() < Self::SIZE {
            return None;
        }
        Some(KMAllocNode {
            call_site: Hex64(u64_at(s, 0x00)),
            ptr: Hex64(u64_at(s, 0x08)),
            bytes_req: Hex64(u64_at(s, 0x10)),
            bytes_alloc: Hex64(u64_at(s, 0x18)),
            gfp_flags: Hex32(u32_at(s, 0x20)),
            node: Hex32(u32_at(s, 0x24)),
        })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CacheAlloc {
    pub call_site: Hex64,
    pub ptr: Hex64,
    pub bytes_req: Hex64,
    pub bytes_alloc: Hex64,
    pub gfp_flags: Hex32,
}

impl Pod for CacheAlloc {
    const SIZE: usize = 0x24;

    #[inline(always)]
    fn from_slice(s: &[u8]) -> Option<Self> {
        if s.len() < Self::SIZE {
            return None;
        }
        Some(CacheAlloc {
            call_site: Hex64(u64_at(s, 0x00)),
            ptr: Hex64(u64_at(s, 0x08)),
            bytes_req: Hex64(u64_at(s, 0x10)),
            bytes_alloc: Hex64(u64_at(s, 0x18)),
            gfp_flags: Hex32(u32_at(s, 0x20)),
        })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CacheAllocNode {
    pub call_site: Hex64,
    pub ptr: Hex64,
    pub bytes_req: Hex64,
    pub bytes_alloc: Hex64,
    pub gfp_flags: Hex32,
    pub node: Hex32,
}

impl Pod for CacheAllocNode {
    const SIZE: usize = 0x28;

    #[inline(always)]
    fn from_slice(s: &[u8]) -> Option<Self> {
        if s.len() < Self::SIZE {
            return None;
        }
        Some(CacheAllocNode {
            call_site: Hex64(u64_at(s, 0x00)),
            ptr: Hex64(u64_at(s, 0x08)),
            bytes_req: Hex64(u64_at(s, 0x10)),
            bytes_alloc: Hex64(u64_at(s, 0x18)),
            gfp_flags: Hex32(u32_at(s, 0x20)),
            node: Hex32(u32_at(s, 0x24)),
        })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CacheFree {
    pub call_site: Hex64,
    pub ptr: Hex64,
}

impl Pod for CacheFree {
    const SIZE: usize = 0x10;

    #[inline(always)]
    fn from_slice(s: &[u8]) -> Option<Self> {
        if s.len() < Self::SIZE {
            return None;
        }
        Some(CacheFree {
            call_site: Hex64(u64_at(s, 0x00)),
            ptr: Hex64(u64_at(s, 0x08)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(words: &[u64], tail: &[u32]) -> Vec<u8> {
        let mut v = Vec::new();
        for w in words {
            v.extend_from_slice(&w.to_ne_bytes());
        }
        for t in tail {
            v.extend_from_slice(&t.to_ne_bytes());
        }
        v
    }

    #[test]
    fn header() {
        let mut s = Vec::new();
        s.extend_from_slice(&42u16.to_ne_bytes());
        s.push(1);
        s.push(2);
        s.extend_from_slice(&1234u32.to_ne_bytes());
        let h = CommonHeader::from_slice(&s).unwrap();
        assert_eq!(h.ty, 42);
        assert_eq!(h.flags, 1);
        assert_eq!(h.preempt_count, 2);
        assert_eq!(h.pid, 1234);
    }

    #[test]
    fn kmalloc_node() {
        let s = body(&[0xffff_ffff_8100_0000, 0x1000, 100, 128], &[0xcc0, 1]);
        assert_eq!(s.len(), KMAllocNode::SIZE);
        let v = KMAllocNode::from_slice(&s).unwrap();
        assert_eq!(v.call_site, Hex64(0xffff_ffff_8100_0000));
        assert_eq!(v.ptr, Hex64(0x1000));
        assert_eq!(v.bytes_req, Hex64(100));
        assert_eq!(v.bytes_alloc, Hex64(128));
        assert_eq!(v.gfp_flags, Hex32(0xcc0));
        assert_eq!(v.node, Hex32(1));
    }

    #[test]
    fn short_body() {
        let s = body(&[1, 2, 3], &[]);
        assert!(KMAlloc::from_slice(&s).is_none());
        assert!(CacheFree::from_slice(&s[..0x0f]).is_none());
        assert!(CacheFree::from_slice(&s).is_some());
    }

    #[test]
    fn hex_serde() {
        #[derive(Serialize, Deserialize)]
        struct W {
            ptr: Hex64,
        }

        let w: W = toml::from_str("ptr = \"0xffff8881\"").unwrap();
        assert_eq!(w.ptr, Hex64(0xffff8881));
        assert_eq!(toml::to_string(&w).unwrap().trim(), "ptr = \"00000000ffff8881\"");
    }
}
