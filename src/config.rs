//! Core configuration
//!
//! Front-ends usually build a `CoreConfig` from their own preferences and
//! hand it to `Machine::new`. For the CLI and quick experiments the same
//! knobs can be set through `OTOPPC_*` environment variables.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Code emitter used by the block translator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Backend {
    /// Pre-decoded handler threading, available on every target
    Threaded,
    /// x86-64 machine code via dynasm (needs the `jit-dynasm` feature)
    Native,
}

impl Backend {
    pub fn parse(s: &str) -> Option<Backend> {
        match s.to_ascii_lowercase().as_str() {
            "threaded" | "threading" => Some(Backend::Threaded),
            "native" | "dynasm" => Some(Backend::Native),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Guest RAM size in MiB, mapped at physical address 0
    pub ram_size_mb: u32,
    /// Run translated blocks instead of the interpreter
    pub jit: bool,
    pub backend: Backend,
    /// Capacity of the translated-code cache in bytes
    pub code_cache_bytes: usize,
    /// Maximum number of guest instructions per block
    pub max_block_insns: usize,
    /// Test special flags after every interpreted instruction
    pub check_interrupts: bool,
}

/// Default translated-code budget
pub const DEFAULT_CODE_CACHE_BYTES: usize = 4 * 1024 * 1024;
pub const DEFAULT_MAX_BLOCK_INSNS: usize = 64;

impl Default for CoreConfig {
    fn default() -> Self {
        CoreConfig {
            ram_size_mb: 16,
            jit: true,
            backend: Backend::Threaded,
            code_cache_bytes: DEFAULT_CODE_CACHE_BYTES,
            max_block_insns: DEFAULT_MAX_BLOCK_INSNS,
            check_interrupts: true,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_flag(key: &str) -> Option<bool> {
    std::env::var(key).ok().map(|v| {
        let v = v.trim().to_ascii_lowercase();
        !(v.is_empty() || v == "0" || v == "false" || v == "off" || v == "no")
    })
}

impl CoreConfig {
    /// Defaults overridden by `OTOPPC_RAM_MB`, `OTOPPC_JIT`, `OTOPPC_BACKEND`,
    /// `OTOPPC_CODE_CACHE`, `OTOPPC_BLOCK_CAP` and `OTOPPC_CHECK_INTERRUPTS`.
    pub fn from_env() -> Self {
        let mut cfg = CoreConfig::default();
        if let Some(mb) = env_parse("OTOPPC_RAM_MB") {
            cfg.ram_size_mb = mb;
        }
        if let Some(jit) = env_flag("OTOPPC_JIT") {
            cfg.jit = jit;
        }
        if let Some(backend) = std::env::var("OTOPPC_BACKEND")
            .ok()
            .and_then(|s| Backend::parse(&s))
        {
            cfg.backend = backend;
        }
        if let Some(bytes) = env_parse("OTOPPC_CODE_CACHE") {
            cfg.code_cache_bytes = bytes;
        }
        if let Some(cap) = env_parse("OTOPPC_BLOCK_CAP") {
            cfg.max_block_insns = cap;
        }
        if let Some(check) = env_flag("OTOPPC_CHECK_INTERRUPTS") {
            cfg.check_interrupts = check;
        }
        cfg
    }

    pub fn validate(&self) -> Result<()> {
        if self.ram_size_mb == 0 || self.ram_size_mb > 3072 {
            return Err(CoreError::InvalidConfig(format!(
                "ram_size_mb must be within 1..=3072, got {}",
                self.ram_size_mb
            )));
        }
        if self.max_block_insns == 0 || self.max_block_insns > 1024 {
            return Err(CoreError::InvalidConfig(format!(
                "max_block_insns must be within 1..=1024, got {}",
                self.max_block_insns
            )));
        }
        if self.code_cache_bytes < 4096 {
            return Err(CoreError::InvalidConfig(format!(
                "code_cache_bytes too small: {}",
                self.code_cache_bytes
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(CoreConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_block_cap() {
        let cfg = CoreConfig { max_block_insns: 0, ..CoreConfig::default() };
        assert!(matches!(cfg.validate(), Err(CoreError::InvalidConfig(_))));
    }

    #[test]
    fn test_backend_parse() {
        assert_eq!(Backend::parse("Dynasm"), Some(Backend::Native));
        assert_eq!(Backend::parse("threaded"), Some(Backend::Threaded));
        assert_eq!(Backend::parse("llvm"), None);
    }
}
