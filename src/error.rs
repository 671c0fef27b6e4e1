//! Host-facing error types
//!
//! Guest faults never show up here: they are delivered to the guest as
//! exceptions. `CoreError` covers what the embedding host can get wrong or
//! what aborts a host call.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("image of {len} bytes at {addr:#010x} does not fit in {region}")]
    ImageOutOfRange {
        addr: u32,
        len: usize,
        region: &'static str,
    },

    #[error("MMIO range {base:#010x}+{size:#x} {reason}")]
    MmioConflict {
        base: u32,
        size: u32,
        reason: &'static str,
    },

    #[error("guest trap {vector:#x} aborted: {reason}")]
    TrapAborted { vector: u32, reason: &'static str },

    #[error("state snapshot: {0}")]
    Snapshot(String),

    #[error("internal invariant violated: {0}")]
    Fatal(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
