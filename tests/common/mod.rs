//! Shared helpers for the integration tests

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use otoppc::cpu::asm;
use otoppc::cpu::mmu::builder::TableBuilder;
use otoppc::cpu::mmu::TC_ENABLE;
use otoppc::memory::{MmioHandler, Size};
use otoppc::{Backend, CoreConfig, Machine};

/// Where test programs are loaded and entered
pub const CODE_BASE: u32 = 0x1000;
/// Exception vectors live at EVPR + offset
pub const VECTORS: u32 = 0x4_0000;
/// Page tables are built from here
pub const TABLES: u32 = 0x8_0000;

pub fn config(jit: bool) -> CoreConfig {
    CoreConfig { ram_size_mb: 2, jit, ..CoreConfig::default() }
}

pub fn machine_with(config: CoreConfig, code: &[u32]) -> Machine {
    let mut m = Machine::new(config).unwrap();
    m.load_image(CODE_BASE, &asm::assemble(code)).unwrap();
    m.regs_mut().pc = CODE_BASE;
    m.regs_mut().evpr = VECTORS;
    m
}

pub fn machine(jit: bool, code: &[u32]) -> Machine {
    machine_with(config(jit), code)
}

/// Put `code` at exception vector `offset`
pub fn install_handler(m: &mut Machine, offset: u32, code: &[u32]) {
    m.load_image(VECTORS + offset, &asm::assemble(code)).unwrap();
}

/// Every mode the dispatcher can run a program in
pub fn all_modes() -> Vec<(&'static str, CoreConfig)> {
    vec![
        ("interpreter", config(false)),
        ("threaded", CoreConfig { backend: Backend::Threaded, ..config(true) }),
        ("native", CoreConfig { backend: Backend::Native, ..config(true) }),
        ("interpreter-batched", CoreConfig { check_interrupts: false, ..config(false) }),
    ]
}

/// Identity-map the first `len` bytes of RAM for both privilege levels and
/// turn translation on. Returns the builder for further mappings.
pub fn enable_identity_mmu(m: &mut Machine, len: u32, flags: u32) -> TableBuilder {
    let mut tables = TableBuilder::new(m.memory_mut(), TABLES).unwrap();
    tables.map_range(m.memory_mut(), 0, 0, len, flags).unwrap();
    let root = tables.root();
    m.cpu.mmu.set_urp(root);
    m.cpu.mmu.set_srp(root);
    m.cpu.mmu.set_tc(TC_ENABLE);
    tables
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MmioAccess {
    Read(u32, Size),
    Write(u32, Size, u32),
}

/// MMIO device logging every access; reads return offset + 0x100
#[derive(Clone, Default)]
pub struct RecordingDevice {
    pub log: Arc<Mutex<Vec<MmioAccess>>>,
}

impl MmioHandler for RecordingDevice {
    fn read(&mut self, offset: u32, size: Size) -> u32 {
        self.log.lock().unwrap().push(MmioAccess::Read(offset, size));
        offset + 0x100
    }

    fn write(&mut self, offset: u32, size: Size, value: u32) {
        self.log.lock().unwrap().push(MmioAccess::Write(offset, size, value));
    }
}
