//! Memory-mapped device dispatch

mod common;

use common::*;
use otoppc::cpu::asm;
use otoppc::cpu::exception::{DSISR_BUS_ERROR, VEC_DSI};
use otoppc::memory::{Size, MMIO_BASE};
use otoppc::CoreError;

const DEVICE: u32 = MMIO_BASE + 0x1000;

/// r4 = DEVICE, then store r5 at +8, load +4 into r6, store a byte at +1
fn device_program() -> Vec<u32> {
    let mut code = asm::load_imm32(4, DEVICE).to_vec();
    code.extend_from_slice(&[
        asm::li(5, 0x77),
        asm::stw(5, 4, 8),
        asm::lwz(6, 4, 4),
        asm::stb(5, 4, 1),
        asm::b(0),
    ]);
    code
}

#[test]
fn test_guest_accesses_reach_handler() {
    for (name, cfg) in all_modes() {
        let mut m = machine_with(cfg, &device_program());
        let dev = RecordingDevice::default();
        m.map_mmio(DEVICE, 0x100, Box::new(dev.clone())).unwrap();

        m.run(100);
        assert_eq!(m.regs().gpr[6], 0x104, "{}", name);
        let log = dev.log.lock().unwrap();
        assert_eq!(
            *log,
            vec![
                MmioAccess::Write(8, Size::Word, 0x77),
                MmioAccess::Read(4, Size::Word),
                MmioAccess::Write(1, Size::Byte, 0x77),
            ],
            "{}",
            name
        );
    }
}

#[test]
fn test_unhooked_window_is_bus_error() {
    for (name, cfg) in all_modes() {
        let mut m = machine_with(cfg, &device_program());
        install_handler(&mut m, VEC_DSI, &[asm::b(0)]);

        m.run(100);
        let regs = m.regs();
        assert_eq!(regs.pc, VECTORS + VEC_DSI, "{}", name);
        assert_eq!(regs.dar, DEVICE + 8, "{}", name);
        assert_ne!(regs.dsisr & DSISR_BUS_ERROR, 0, "{}", name);
        assert_eq!(regs.srr0, CODE_BASE + 12, "{}", name);
    }
}

#[test]
fn test_overlapping_mapping_rejected() {
    let mut m = machine(true, &[]);
    m.map_mmio(DEVICE, 0x100, Box::new(RecordingDevice::default())).unwrap();
    let err = m.map_mmio(DEVICE + 0x80, 0x100, Box::new(RecordingDevice::default()));
    assert!(matches!(err, Err(CoreError::MmioConflict { .. })));
    let err = m.map_mmio(0x1000, 0x100, Box::new(RecordingDevice::default()));
    assert!(matches!(err, Err(CoreError::MmioConflict { .. })));
}

#[test]
fn test_code_in_mmio_is_interpreted() {
    // a device that returns `li r3, 9` for every word, except the second
    // one which is `b 0`
    struct CodeRom;
    impl otoppc::memory::MmioHandler for CodeRom {
        fn read(&mut self, offset: u32, _size: Size) -> u32 {
            if offset == 4 {
                asm::b(0)
            } else {
                asm::li(3, 9)
            }
        }
        fn write(&mut self, _offset: u32, _size: Size, _value: u32) {}
    }

    let mut m = machine(true, &[]);
    m.map_mmio(DEVICE, 0x100, Box::new(CodeRom)).unwrap();
    m.regs_mut().pc = DEVICE;
    m.run(50);
    assert_eq!(m.regs().gpr[3], 9);
    assert_eq!(m.regs().pc, DEVICE + 4);
    assert_eq!(m.jit_stats().compiles, 0);
}
