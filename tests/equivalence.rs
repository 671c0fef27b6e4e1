//! Interpreted and translated runs of the same program must agree

mod common;

use common::*;
use otoppc::cpu::asm;
use otoppc::cpu::exception::VEC_SYSCALL;
use otoppc::cpu::RegisterFile;
use otoppc::CoreConfig;

/// Loop with loads/stores, a call, a conditional skip and a system call,
/// ending in a spin at CODE_BASE + 0x54
fn workload() -> Vec<u32> {
    vec![
        asm::li(3, 0),
        asm::li(4, 50),
        asm::mtctr(4),
        asm::li(10, 0x2000),
        // loop
        asm::stw(4, 10, 0),
        asm::addi(10, 10, 4),
        asm::add(3, 3, 4),
        asm::slwi(5, 3, 3),
        asm::xor(6, 6, 5),
        asm::mullw(7, 4, 4),
        asm::subf(8, 7, 3),
        asm::cmpwi(0, 8, 0),
        asm::blt(8),
        asm::addi(9, 9, 1),
        asm::bl(32),
        asm::addi(4, 4, -1),
        asm::bdnz(-48),
        asm::sc(),
        asm::mfcr(11),
        asm::li(12, 0x2000),
        asm::lwz(13, 12, 8),
        asm::b(0),
        // subroutine
        asm::addic(14, 14, 7),
        asm::srawi(15, 8, 2),
        asm::adde(16, 16, 14),
        asm::blr(),
    ]
}

const SPIN: u32 = CODE_BASE + 21 * 4;

fn run_workload(config: CoreConfig, with_mmu: bool) -> (RegisterFile, Vec<u8>) {
    let mut m = machine_with(config, &workload());
    install_handler(&mut m, VEC_SYSCALL, &[asm::addi(20, 20, 1), asm::rfi()]);
    if with_mmu {
        enable_identity_mmu(&mut m, 0x10_0000, 0);
    }
    m.run(100_000);
    let ram = m.memory().ram()[0x2000..0x2100].to_vec();
    (m.regs().clone(), ram)
}

#[test]
fn test_modes_produce_identical_state() {
    let (reference, ref_ram) = run_workload(config(false), false);
    assert_eq!(reference.pc, SPIN);
    assert_eq!(reference.gpr[20], 1);
    assert_eq!(reference.gpr[3], (1..=50).sum::<u32>());
    assert_eq!(reference.gpr[13], 48);

    for (name, cfg) in all_modes() {
        let (regs, ram) = run_workload(cfg, false);
        assert_eq!(regs, reference, "{} diverged", name);
        assert_eq!(ram, ref_ram, "{} memory diverged", name);
    }
}

#[test]
fn test_modes_agree_under_translation() {
    let (reference, ref_ram) = run_workload(config(false), true);
    assert_eq!(reference.pc, SPIN);

    for (name, cfg) in all_modes() {
        let (regs, ram) = run_workload(cfg, true);
        assert_eq!(regs, reference, "{} diverged with the MMU on", name);
        assert_eq!(ram, ref_ram, "{} memory diverged with the MMU on", name);
    }
    // same results as untranslated
    let (flat, _) = run_workload(config(true), false);
    assert_eq!(flat.gpr, reference.gpr);
}

#[test]
fn test_illegal_instruction_in_block() {
    // the word 0 is not an instruction; both modes take a program exception
    let code = [asm::li(3, 1), asm::li(4, 2), 0, asm::li(5, 3)];
    let mut results = Vec::new();
    for (name, cfg) in all_modes() {
        let mut m = machine_with(cfg, &code);
        install_handler(&mut m, 0x700, &[asm::b(0)]);
        m.run(1000);
        assert_eq!(m.regs().pc, VECTORS + 0x700, "{}", name);
        assert_eq!(m.regs().srr0, CODE_BASE + 8, "{}", name);
        assert_eq!(m.regs().gpr[5], 0, "{}", name);
        results.push(m.regs().clone());
    }
    assert!(results.windows(2).all(|w| w[0] == w[1]));
}
