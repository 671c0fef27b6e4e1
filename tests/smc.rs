//! Self-modifying code and host-side code replacement

mod common;

use common::*;
use otoppc::cpu::asm;

/// Eight instructions at 0x1000; the fifth overwrites the fourth with
/// `li r3, 2` and the loop re-enters at the patched instruction once.
fn patching_loop() -> Vec<u32> {
    let patch = asm::li(3, 2);
    vec![
        asm::li(6, CODE_BASE as i32),
        asm::lis(5, (patch >> 16) as i32),
        asm::ori(5, 5, patch & 0xffff),
        asm::li(3, 1),
        asm::stw(5, 6, 12),
        asm::addi(7, 7, 1),
        asm::cmpwi(0, 7, 2),
        asm::blt(-16),
        asm::b(0),
    ]
}

/// Same patch, but every pass re-enters the block at 0x1000 and adds r3
/// into r8: 1 on the first pass, 2 once the fourth instruction is patched.
fn reentering_loop() -> Vec<u32> {
    let patch = asm::li(3, 2);
    vec![
        asm::li(6, CODE_BASE as i32),
        asm::lis(5, (patch >> 16) as i32),
        asm::ori(5, 5, patch & 0xffff),
        asm::li(3, 1),
        asm::add(8, 8, 3),
        asm::stw(5, 6, 12),
        asm::addi(7, 7, 1),
        asm::cmpwi(0, 7, 2),
        asm::blt(-32),
        asm::b(0),
    ]
}

#[test]
fn test_reentered_block_runs_patched_instruction() {
    for (name, cfg) in all_modes() {
        let jit = cfg.jit;
        let mut m = machine_with(cfg, &reentering_loop());
        m.run(1000);
        assert_eq!(m.regs().gpr[7], 2, "{}", name);
        assert_eq!(m.regs().gpr[8], 3, "{} re-ran the stale block", name);
        assert_eq!(m.regs().pc, CODE_BASE + 36, "{}", name);
        if jit {
            assert!(m.jit_stats().invalidations >= 1, "{}", name);
        }
    }
}

#[test]
fn test_store_into_running_block() {
    for (name, cfg) in all_modes() {
        let mut m = machine_with(cfg, &patching_loop());
        m.run(1000);
        assert_eq!(m.regs().gpr[7], 2, "{}", name);
        assert_eq!(m.regs().gpr[3], 2, "{} executed the stale instruction", name);
        assert_eq!(m.regs().pc, CODE_BASE + 32, "{}", name);
    }
}

#[test]
fn test_smc_invalidates_page() {
    let mut m = machine(true, &patching_loop());
    m.run(1000);
    let stats = m.jit_stats();
    assert!(stats.invalidations >= 1);
    assert!(stats.compiles >= 3);
}

#[test]
fn test_host_rewrite_needs_flush() {
    let mut m = machine(true, &[asm::li(3, 1), asm::b(0)]);
    m.run(100);
    assert_eq!(m.regs().gpr[3], 1);

    // replace the code behind the translator's back, then report it
    m.memory_mut().load(CODE_BASE, &asm::assemble(&[asm::li(3, 5), asm::b(0)])).unwrap();
    m.flush_code_cache(CODE_BASE..CODE_BASE + 8);
    m.regs_mut().pc = CODE_BASE;
    m.run(100);
    assert_eq!(m.regs().gpr[3], 5);
}

#[test]
fn test_icbi_drops_translated_code() {
    // call a routine on another page, then icbi it without storing to it
    let code = [asm::li(8, 0x2000), asm::bl(0x2000 - 0x1004), asm::icbi(0, 8), asm::b(0)];
    let mut m = machine(true, &code);
    m.load_image(0x2000, &asm::assemble(&[asm::li(9, 7), asm::blr()])).unwrap();
    m.run(100);
    assert_eq!(m.regs().gpr[9], 7);
    assert_eq!(m.regs().pc, CODE_BASE + 12);
    assert!(m.jit_stats().invalidations >= 1);
    assert!(!m.memory().is_code_page(2));
}
