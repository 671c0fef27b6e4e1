//! Transparent translation registers
//!
//! A TTR maps a range of 16 MiB logical blocks one-to-one, bypassing the
//! ATC and the table walk. Raw layout (68040):
//!
//! ```text
//! 31      24 23      16 15 14 13     6 5  4     2
//! | base    | mask     | E| S-field |  | CM |  | W |
//! ```

use serde::{Deserialize, Serialize};

pub const TTR_LOGICAL_BASE: u32 = 0xff00_0000;
pub const TTR_LOGICAL_MASK: u32 = 0x00ff_0000;
pub const TTR_ENABLED: u32 = 1 << 15;
/// S-field bit 1: match regardless of privilege
pub const TTR_SFIELD_IGNORE: u32 = 1 << 14;
/// S-field bit 0: supervisor-only when set, user-only when clear
pub const TTR_SFIELD_SUPER: u32 = 1 << 13;
pub const TTR_CACHE_MASK: u32 = 0x60;
pub const TTR_CACHE_SHIFT: u32 = 5;
pub const TTR_WRITE_PROTECT: u32 = 1 << 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtrMatch {
    NoMatch,
    Match { write_protect: bool },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtrRule(pub u32);

impl TtrRule {
    pub fn logical_base(self) -> u8 {
        ((self.0 & TTR_LOGICAL_BASE) >> 24) as u8
    }

    /// Address bits 31..24 set here are ignored when matching
    pub fn logical_mask(self) -> u8 {
        ((self.0 & TTR_LOGICAL_MASK) >> 16) as u8
    }

    pub fn enabled(self) -> bool {
        self.0 & TTR_ENABLED != 0
    }

    /// `None` when the rule matches both privilege levels
    pub fn supervisor_only(self) -> Option<bool> {
        if self.0 & TTR_SFIELD_IGNORE != 0 {
            None
        } else {
            Some(self.0 & TTR_SFIELD_SUPER != 0)
        }
    }

    pub fn cache_mode(self) -> u32 {
        (self.0 & TTR_CACHE_MASK) >> TTR_CACHE_SHIFT
    }

    pub fn write_protect(self) -> bool {
        self.0 & TTR_WRITE_PROTECT != 0
    }

    #[inline]
    pub fn matches(self, addr: u32, privileged: bool) -> TtrMatch {
        if !self.enabled() {
            return TtrMatch::NoMatch;
        }
        let differing = ((addr ^ self.0) & TTR_LOGICAL_BASE) >> 24;
        if differing & !(self.logical_mask() as u32) != 0 {
            return TtrMatch::NoMatch;
        }
        if let Some(super_only) = self.supervisor_only() {
            if super_only != privileged {
                return TtrMatch::NoMatch;
            }
        }
        TtrMatch::Match { write_protect: self.write_protect() }
    }

    /// Identity mapping covering `[base, base + size)`, rounded out to
    /// 16 MiB blocks, for both privilege levels
    pub fn transparent(base: u32, size: u32) -> TtrRule {
        let first = base >> 24;
        let last = (base as u64 + size.max(1) as u64 - 1).min(u32::MAX as u64) as u32 >> 24;
        let mut mask = 0u32;
        // smallest power-of-two aligned mask covering first..=last
        while (first & !mask) != (last & !mask) {
            mask = (mask << 1) | 1;
        }
        TtrRule(((first & !mask) << 24) | (mask << 16) | TTR_ENABLED | TTR_SFIELD_IGNORE)
    }
}
