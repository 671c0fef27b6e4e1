//! Special flags, interrupt lines and host-initiated guest calls

mod common;

use std::thread;
use std::time::Duration;

use common::*;
use otoppc::cpu::asm;
use otoppc::cpu::exception::VEC_EXTERNAL;
use otoppc::cpu::flags::{SPCFLAG_INTERRUPT_PENDING, SPCFLAG_STOP};
use otoppc::cpu::regs::{MSR_EE, MSR_PR};
use otoppc::cpu::execute::SPR_INTSRC;
use otoppc::{CoreError, RunExit, TrapRegs};

#[test]
fn test_pending_flag_follows_set_and_clear() {
    let m = machine(false, &[]);
    let flags = m.cpu.flags().clone();
    m.set_interrupt_flag(0x4);
    assert!(flags.test(SPCFLAG_INTERRUPT_PENDING));
    m.clear_interrupt_flag(0x4);
    assert!(!flags.test(SPCFLAG_INTERRUPT_PENDING));
    assert!(!flags.test(SPCFLAG_INTERRUPT_PENDING));
    m.set_interrupt_flag(0x1);
    assert!(flags.test(SPCFLAG_INTERRUPT_PENDING));
}

#[test]
fn test_concurrent_producers_lose_nothing() {
    let m = machine(false, &[]);
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let line = m.interrupt_line();
            thread::spawn(move || {
                for _ in 0..1000 {
                    line.set_interrupt_flag(1 << i);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(m.interrupt_line().pending(), 0xff);
    assert!(m.cpu.flags().test(SPCFLAG_INTERRUPT_PENDING));
}

#[test]
fn test_stop_from_another_thread() {
    for (name, cfg) in all_modes() {
        let mut m = machine_with(cfg, &[asm::addi(3, 3, 1), asm::b(-4)]);
        let line = m.interrupt_line();
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            line.request_stop();
        });
        assert_eq!(m.run(u64::MAX), RunExit::Stopped, "{}", name);
        stopper.join().unwrap();
        assert!(m.regs().gpr[3] > 0, "{}", name);
    }
}

#[test]
fn test_guest_acknowledges_interrupt() {
    // handler reads INTSRC, writes it back to acknowledge, then spins
    let handler = [asm::mfspr(10, SPR_INTSRC), asm::mtspr(SPR_INTSRC, 10), asm::b(0)];
    for (name, cfg) in all_modes() {
        let mut m = machine_with(cfg, &[asm::addi(3, 3, 1), asm::b(-4)]);
        install_handler(&mut m, VEC_EXTERNAL, &handler);
        m.regs_mut().msr |= MSR_EE;
        m.run(50);
        m.set_interrupt_flag(0x20);
        // delivery waits for the checkpoint after the one that saw the
        // line, which can be a whole interpreter batch away
        m.run(200);
        assert_eq!(m.regs().pc, VECTORS + VEC_EXTERNAL + 8, "{}", name);
        assert_eq!(m.regs().gpr[10], 0x20, "{}", name);
        assert_eq!(m.interrupt_line().pending(), 0, "{}", name);
        assert!(!m.cpu.flags().test(SPCFLAG_INTERRUPT_PENDING), "{}", name);
    }
}

#[test]
fn test_guest_trap_in_user_context() {
    // the handler calls a subroutine and returns through the sentinel
    let mut m = machine(true, &[asm::addi(3, 3, 1), asm::b(-4)]);
    install_handler(
        &mut m,
        0x1000,
        &[
            asm::mflr(31),
            asm::bl(16),
            asm::mtlr(31),
            asm::mfmsr(6),
            asm::blr(),
            // subroutine
            asm::mullw(3, 3, 4),
            asm::blr(),
        ],
    );
    m.run(20);
    m.regs_mut().msr |= MSR_PR;
    let before = m.regs().clone();

    let mut input = TrapRegs::default();
    input.gpr[3] = 6;
    input.gpr[4] = 7;
    let out = m.execute_guest_trap(0x10, input).unwrap();
    assert_eq!(out.gpr[3], 42);
    // handler ran privileged
    assert_eq!(out.gpr[6] & MSR_PR, 0);
    assert_eq!(m.regs(), &before);

    // the interrupted program carries on
    assert_eq!(m.run(20), RunExit::BudgetExhausted);
    assert!(m.regs().gpr[3] > before.gpr[3]);
}

#[test]
fn test_repeated_guest_traps() {
    let mut m = machine(true, &[asm::b(0)]);
    install_handler(&mut m, 0x2000, &[asm::addi(3, 3, 1), asm::blr()]);
    let mut regs = TrapRegs::default();
    for _ in 0..10 {
        regs = m.execute_guest_trap(0x20, regs).unwrap();
    }
    assert_eq!(regs.gpr[3], 10);
    assert!(m.jit_stats().hits >= 9);
}

#[test]
fn test_stop_aborts_guest_trap() {
    let mut m = machine(true, &[asm::b(0)]);
    // handler never returns
    install_handler(&mut m, 0x1000, &[asm::addi(3, 3, 1), asm::b(-4)]);
    let line = m.interrupt_line();
    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        line.request_stop();
    });
    let result = m.execute_guest_trap(0x10, TrapRegs::default());
    stopper.join().unwrap();
    assert!(matches!(result, Err(CoreError::TrapAborted { vector: 0x10, .. })));
    assert_eq!(m.regs().pc, CODE_BASE);

    // STOP is left for the outer loop
    assert!(m.cpu.flags().test(SPCFLAG_STOP));
    assert_eq!(m.run(100), RunExit::Stopped);
    assert!(!m.cpu.flags().test(SPCFLAG_STOP));
}
