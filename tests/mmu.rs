//! Guest-visible translation behavior through the whole dispatch path

mod common;

use common::*;
use otoppc::cpu::asm;
use otoppc::cpu::exception::{DSISR_PROTECT, DSISR_STORE, VEC_DSI};
use otoppc::cpu::mmu::walker::{DES_SUPER, DES_WP};
use otoppc::cpu::regs::MSR_PR;

const RAM_MAPPED: u32 = 0x10_0000;

#[test]
fn test_user_load_from_supervisor_page() {
    let code = [asm::li(4, 0x5000), asm::lwz(3, 4, 0), asm::li(5, 1), asm::b(0)];
    for (name, cfg) in all_modes() {
        let mut m = machine_with(cfg, &code);
        install_handler(&mut m, VEC_DSI, &[asm::b(0)]);
        let mut tables = enable_identity_mmu(&mut m, RAM_MAPPED, 0);
        tables.map_page(m.memory_mut(), 0x5000, 0x5000, DES_SUPER).unwrap();
        m.regs_mut().msr |= MSR_PR;

        m.run(100);
        let regs = m.regs();
        assert_eq!(regs.pc, VECTORS + VEC_DSI, "{}", name);
        assert_eq!(regs.srr0, CODE_BASE + 4, "{}", name);
        assert_eq!(regs.dar, 0x5000, "{}", name);
        assert_ne!(regs.dsisr & DSISR_PROTECT, 0, "{}", name);
        assert_ne!(regs.srr1 & MSR_PR, 0, "{}", name);
        assert_eq!(regs.msr & MSR_PR, 0, "{}", name);
        assert_eq!(regs.gpr[5], 0, "{}", name);
    }
}

#[test]
fn test_supervisor_load_from_supervisor_page() {
    let code = [asm::li(4, 0x5000), asm::lwz(3, 4, 0), asm::b(0)];
    let mut m = machine(true, &code);
    m.load_image(0x5000, &0x1234_5678u32.to_be_bytes()).unwrap();
    let mut tables = enable_identity_mmu(&mut m, RAM_MAPPED, 0);
    tables.map_page(m.memory_mut(), 0x5000, 0x5000, DES_SUPER).unwrap();
    m.run(100);
    assert_eq!(m.regs().gpr[3], 0x1234_5678);
}

#[test]
fn test_store_to_write_protected_page() {
    let code = [asm::li(4, 0x6000), asm::lwz(3, 4, 0), asm::stw(3, 4, 0), asm::b(0)];
    for (name, cfg) in all_modes() {
        let mut m = machine_with(cfg, &code);
        install_handler(&mut m, VEC_DSI, &[asm::b(0)]);
        let mut tables = enable_identity_mmu(&mut m, RAM_MAPPED, 0);
        tables.map_page(m.memory_mut(), 0x6000, 0x6000, DES_WP).unwrap();

        m.run(100);
        let regs = m.regs();
        assert_eq!(regs.pc, VECTORS + VEC_DSI, "{}", name);
        assert_eq!(regs.srr0, CODE_BASE + 8, "{}", name);
        assert_eq!(regs.dsisr & (DSISR_PROTECT | DSISR_STORE), DSISR_PROTECT | DSISR_STORE, "{}", name);
    }
}

#[test]
fn test_remap_unlinks_chained_blocks() {
    // loop calling virtual 0x10000
    let code = [asm::bl(0x10000 - 0x1000), asm::b(-4)];
    let mut m = machine(true, &code);
    m.load_image(0x2_0000, &asm::assemble(&[asm::addi(3, 3, 1), asm::blr()])).unwrap();
    m.load_image(0x3_0000, &asm::assemble(&[asm::addi(4, 4, 1), asm::blr()])).unwrap();
    let mut tables = enable_identity_mmu(&mut m, RAM_MAPPED, 0);
    tables.map_page(m.memory_mut(), 0x1_0000, 0x2_0000, 0).unwrap();

    m.run(1000);
    let calls = m.regs().gpr[3];
    assert!(calls > 100);
    assert!(m.jit_stats().chained > 100);

    tables.map_page(m.memory_mut(), 0x1_0000, 0x3_0000, 0).unwrap();
    m.cpu.mmu.flush_all(true);
    m.run(1000);
    assert_eq!(m.regs().gpr[3], calls);
    assert!(m.regs().gpr[4] > 100);
}

#[test]
fn test_transparent_region_overrides_tables() {
    let code = [asm::li(4, 0x5000), asm::lwz(3, 4, 0), asm::b(0)];
    let mut m = machine(true, &code);
    m.load_image(0x5000, &0x1111_1111u32.to_be_bytes()).unwrap();
    m.load_image(0x7000, &0x2222_2222u32.to_be_bytes()).unwrap();
    let mut tables = enable_identity_mmu(&mut m, RAM_MAPPED, 0);
    tables.map_page(m.memory_mut(), 0x5000, 0x7000, 0).unwrap();

    m.run(100);
    assert_eq!(m.regs().gpr[3], 0x2222_2222);

    assert!(m.cpu.mmu.make_transparent_region(0, 0x100_0000, true));
    m.regs_mut().pc = CODE_BASE;
    m.run(100);
    assert_eq!(m.regs().gpr[3], 0x1111_1111);
}
