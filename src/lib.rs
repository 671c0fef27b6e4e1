//! PowerPC guest CPU core
//!
//! A 32-bit PowerPC execution core with a 68040-style software MMU and a
//! block translator, targeting WebAssembly and native hosts.

use wasm_bindgen::prelude::*;

pub mod config;
pub mod cpu;
pub mod error;
pub mod memory;
mod system;

pub use config::{Backend, CoreConfig};
pub use error::{CoreError, Result};
pub use system::{Machine, RunExit, TrapRegs};

/// Initialize panic hook for better error messages in browser console
#[wasm_bindgen(start)]
pub fn init() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

/// Log to browser console
#[cfg(target_arch = "wasm32")]
#[wasm_bindgen]
extern "C" {
    #[wasm_bindgen(js_namespace = console)]
    fn log(s: &str);

    #[wasm_bindgen(js_namespace = console)]
    fn error(s: &str);
}

#[cfg(not(target_arch = "wasm32"))]
pub fn log(s: &str) {
    tracing::info!("{}", s);
}

#[cfg(not(target_arch = "wasm32"))]
pub fn error(s: &str) {
    tracing::error!("{}", s);
}

/// Helper macro for console logging
#[macro_export]
macro_rules! console_log {
    ($($t:tt)*) => ($crate::log(&format!($($t)*)))
}

#[macro_export]
macro_rules! console_error {
    ($($t:tt)*) => ($crate::error(&format!($($t)*)))
}

fn js_error(e: CoreError) -> JsValue {
    console_error!("{}", e);
    JsValue::from_str(&e.to_string())
}

/// Main emulator interface exposed to JavaScript
#[wasm_bindgen]
pub struct Emulator {
    machine: Machine,
}

#[wasm_bindgen]
impl Emulator {
    /// Create a new emulator instance
    #[wasm_bindgen(constructor)]
    pub fn new(memory_size_mb: u32) -> std::result::Result<Emulator, JsValue> {
        Self::with_config(CoreConfig { ram_size_mb: memory_size_mb, ..CoreConfig::default() }).map_err(js_error)
    }

    /// Load a raw image into RAM at a physical address
    pub fn load_image(&mut self, data: &[u8], load_addr: u32) -> std::result::Result<(), JsValue> {
        self.machine.load_image(load_addr, data).map_err(js_error)
    }

    /// Load the boot ROM
    pub fn load_rom(&mut self, data: &[u8]) -> std::result::Result<(), JsValue> {
        self.machine.load_rom(data).map_err(js_error)
    }

    pub fn set_pc(&mut self, pc: u32) {
        self.machine.regs_mut().pc = pc;
    }

    /// Run for about `max_insns` instructions.
    /// Returns 0 when the budget ran out, 1 on stop, 2 on monitor entry.
    pub fn run(&mut self, max_insns: u32) -> u32 {
        match self.machine.run(max_insns as u64) {
            RunExit::BudgetExhausted | RunExit::TrapReturn => 0,
            RunExit::Stopped => 1,
            RunExit::Monitor => 2,
        }
    }

    /// Use translated blocks or the interpreter only
    pub fn enable_jit(&mut self, enable: bool) {
        self.machine.set_jit(enable);
    }

    pub fn set_interrupt_flag(&self, bits: u32) {
        self.machine.set_interrupt_flag(bits);
    }

    pub fn clear_interrupt_flag(&self, bits: u32) {
        self.machine.clear_interrupt_flag(bits);
    }

    pub fn request_stop(&self) {
        self.machine.interrupt_line().request_stop();
    }

    /// Get current PC for debugging
    pub fn get_pc(&self) -> u32 {
        self.machine.regs().pc
    }

    pub fn get_instruction_count(&self) -> f64 {
        self.machine.instruction_count() as f64
    }

    /// GPRs followed by PC, LR, CTR, CR, XER and MSR
    pub fn get_registers(&self) -> Vec<u32> {
        let regs = self.machine.regs();
        let mut out = regs.gpr.to_vec();
        out.extend_from_slice(&[regs.pc, regs.lr, regs.ctr, regs.cr, regs.xer, regs.msr]);
        out
    }

    pub fn read_memory(&mut self, addr: u32, size: u32) -> Vec<u8> {
        self.machine.memory_mut().read_bytes(addr, size)
    }

    /// Code cache hit rate since creation
    pub fn jit_hit_rate(&self) -> f64 {
        self.machine.jit_stats().hit_rate()
    }

    pub fn reset(&mut self) {
        self.machine.reset();
    }

    /// Serialize CPU state and RAM to a binary blob (compressed with zstd)
    pub fn get_state(&self) -> std::result::Result<Vec<u8>, JsValue> {
        self.machine.save_state().map_err(js_error)
    }

    /// Restore CPU state and RAM from a blob produced by `get_state`
    pub fn set_state(&mut self, state: &[u8]) -> std::result::Result<(), JsValue> {
        self.machine.restore_state(state).map_err(js_error)
    }
}

impl Emulator {
    pub fn with_config(config: CoreConfig) -> Result<Emulator> {
        console_log!("Creating PowerPC core with {}MB RAM", config.ram_size_mb);
        Ok(Emulator { machine: Machine::new(config)? })
    }

    pub fn machine(&mut self) -> &mut Machine {
        &mut self.machine
    }
}

/// Decompress zstd-compressed data
/// Useful for loading compressed images in the browser
#[wasm_bindgen]
pub fn decompress_zstd(data: &[u8]) -> std::result::Result<Vec<u8>, JsValue> {
    zstd::stream::decode_all(data).map_err(|e| JsValue::from_str(&format!("Zstd decompression error: {}", e)))
}

/// Decompress gzip-compressed data
#[wasm_bindgen]
pub fn decompress_gzip(data: &[u8]) -> std::result::Result<Vec<u8>, JsValue> {
    gunzip(data).map_err(|e| JsValue::from_str(&format!("Gzip decompression error: {}", e)))
}

/// Inflate `data` if it carries a gzip header, otherwise return it as is
pub fn gunzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    use std::io::Read;

    if data.len() < 2 || data[0] != 0x1f || data[1] != 0x8b {
        return Ok(data.to_vec());
    }
    let mut decoder = flate2::read::GzDecoder::new(data);
    let mut result = Vec::new();
    decoder.read_to_end(&mut result)?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::asm;
    use std::io::Write;

    #[test]
    fn test_emulator_creation() {
        let _emu = Emulator::new(1).unwrap();
    }

    #[test]
    fn test_serialization_round_trip() {
        let mut emu = Emulator::new(1).unwrap();
        emu.load_image(&asm::assemble(&[asm::li(3, 7), asm::b(0)]), 0x1000).unwrap();
        emu.set_pc(0x1000);
        emu.run(20);

        let state = emu.get_state().unwrap();
        assert!(!state.is_empty());

        let mut emu2 = Emulator::new(1).unwrap();
        emu2.set_state(&state).unwrap();
        assert_eq!(emu.get_registers(), emu2.get_registers());
        assert_eq!(emu.get_pc(), emu2.get_pc());
        assert_eq!(emu.read_memory(0x1000, 8), emu2.read_memory(0x1000, 8));
    }

    #[test]
    fn test_gunzip() {
        let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(b"guest image").unwrap();
        let packed = enc.finish().unwrap();
        assert_eq!(gunzip(&packed).unwrap(), b"guest image");
        assert_eq!(gunzip(b"raw").unwrap(), b"raw");
    }
}
