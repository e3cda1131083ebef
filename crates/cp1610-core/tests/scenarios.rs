//! End-to-end CPU, bus and memory scenarios.

#![allow(clippy::pedantic, clippy::nursery, clippy::cast_possible_truncation)]

use bitflags as _;
use cp1610_core::{
    Anomaly, BreakpointFlags, BreakpointKind, Bus, BusConfig, Cpu, CpuConfig, Device,
    GeneralRegister, HookAction, HookEvent, Memory, MemoryPort, PagedMemory, RequestKind,
    RequestState, Registers, StatusFlags, TrapOutcome, BAD_CALL_RESULT, DEFAULT_INTERRUPT_VECTOR,
    DEFAULT_RESET_VECTOR, REQ_Q_HISTORY, TRAP_SIGNATURE,
};
use proptest as _;
use rand_chacha as _;
use rstest::rstest;
#[cfg(feature = "serde")]
use serde as _;
use thiserror as _;
use tracing as _;

const HLT: u16 = 0x0000;
const EIS: u16 = 0x0002;
const NOP: u16 = 0x0034;
const SIN: u16 = 0x0036;
const MVII_R0: u16 = 0x02B8;
const MVII_R1: u16 = 0x02B9;
const MVII_R2: u16 = 0x02BA;
const MVI_R0: u16 = 0x0280;

fn ram_bus(program: &[u16]) -> Bus {
    let mut bus = Bus::new(BusConfig::default()).expect("default geometry");
    bus.register(Box::new(Memory::ram(16, 0, 0x1_0000)), 0, 0xFFFF, "ram")
        .expect("register ram");
    for (addr, &word) in (u32::from(DEFAULT_RESET_VECTOR)..).zip(program) {
        bus.poke(addr, u32::from(word));
    }
    bus
}

/// Unconditional branch at `at` back to `target`.
fn branch_back(at: u16, target: u16) -> [u16; 2] {
    [0x0220, at.wrapping_add(2).wrapping_sub(target).wrapping_sub(1)]
}

fn r0(cpu: &Cpu) -> u16 {
    cpu.registers().gpr(GeneralRegister::R0)
}

fn carry(cpu: &Cpu) -> bool {
    cpu.registers().flags().contains(StatusFlags::C)
}

#[test]
fn interrupt_vectors_and_pushes_the_return_address() {
    let [b, disp] = branch_back(0x1002, 0x1001);
    let mut bus = ram_bus(&[EIS, NOP, b, disp, HLT]);
    let mut cpu = Cpu::new(CpuConfig::default());
    cpu.registers_mut().set_gpr(GeneralRegister::R6, 0x0200);
    let cpu_id = bus.attach(Box::new(cpu), "cpu");
    bus.req_q_mut()
        .push(RequestKind::Interrupt, 100, 120)
        .expect("queue interrupt");

    let result = bus.tick(200);
    assert_eq!(result.consumed, 200);
    assert!(!result.suspended);

    let cpu = bus.device::<Cpu>(cpu_id).expect("cpu");
    assert_eq!(cpu.registers().pc(), DEFAULT_INTERRUPT_VECTOR);
    assert_eq!(cpu.registers().sp(), 0x0201);
    // EIS at 4, then NOP/B pairs every 15 cycles: the NOP ending at 100
    // is the first boundary inside the span.
    assert_eq!(bus.peek(0x0200), 0x1002);

    let history = bus.req_q().history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].state, RequestState::Acked);
    assert_eq!(history[0].ack_cycle, 102);
    assert_eq!(bus.req_q().acked_count(), 1);
    assert!(bus.req_q().is_empty());
    assert!(bus.device_now(cpu_id).expect("cpu clock") >= 132);
}

#[test]
fn shared_read_range_combines_with_wired_and() {
    let mut bus = Bus::new(BusConfig::default()).expect("default geometry");
    bus.register(Box::new(Memory::rom(16, 0x3000, vec![0x00FF])), 0x3000, 0x3000, "low")
        .expect("low byte");
    bus.register(Box::new(Memory::rom(16, 0x3000, vec![0xFF00])), 0x3000, 0x3000, "high")
        .expect("high byte");
    assert_eq!(bus.read(None, 0x3000), 0x0000);
    assert_eq!(bus.peek(0x3000), 0x0000);
    // One-word images alias across their decode granule.
    assert_eq!(bus.read(None, 0x300F), 0x0000);
    assert_eq!(bus.read(None, 0x3010), 0xFFFF);
}

#[rstest]
#[case(1)]
#[case(5)]
#[case(10)]
fn short_runs_finish_the_whole_instruction(#[case] len: u64) {
    // MVI $0200, R0 costs 10 cycles.
    let mut bus = ram_bus(&[MVI_R0, 0x0200]);
    let mut cpu = Cpu::new(CpuConfig::default());
    let result = Device::tick(&mut cpu, &mut bus, 0, len);
    assert_eq!(result.consumed, 10);
    assert_eq!(cpu.registers().pc(), 0x1002);
    assert_eq!(cpu.counters().cycles, 10);
}

#[test]
fn host_calls_round_trip_through_sin() {
    let mut bus = ram_bus(&[
        MVII_R0,
        TRAP_SIGNATURE,
        MVII_R1,
        7,
        MVII_R2,
        21,
        SIN,
        MVII_R0,
        TRAP_SIGNATURE,
        MVII_R1,
        9,
        SIN,
        HLT,
    ]);
    let mut cpu = Cpu::new(CpuConfig::default());
    cpu.register_call(7, |regs: &mut Registers, _: &mut dyn MemoryPort| {
        TrapOutcome::ok(regs.gpr(GeneralRegister::R2) * 2)
    });

    cpu.run(&mut bus, 0, 30);
    assert_eq!(r0(&cpu), 42);
    assert!(!carry(&cpu));

    cpu.run(&mut bus, 30, 22);
    assert_eq!(r0(&cpu), BAD_CALL_RESULT);
    assert!(carry(&cpu));
    assert_eq!(cpu.anomaly_count(Anomaly::BadTrapCall), 1);
}

#[test]
fn breakpoint_suspends_the_bus_and_resumes_in_place() {
    let mut bus = ram_bus(&[NOP, NOP, MVII_R0, 0x0055, HLT]);
    let mut cpu = Cpu::new(CpuConfig::default());
    cpu.set_breakpoint(0x1002, BreakpointFlags::PERSISTENT);
    cpu.set_hook(|event: &HookEvent, _: &Registers| {
        if event.breakpoint.is_some() {
            HookAction::Suspend
        } else {
            HookAction::Continue
        }
    });
    let cpu_id = bus.attach(Box::new(cpu), "cpu");

    let first = bus.tick(1000);
    assert!(first.suspended);
    {
        let cpu = bus.device::<Cpu>(cpu_id).expect("cpu");
        assert_eq!(cpu.registers().pc(), 0x1002);
        assert_eq!(r0(cpu), 0);
        assert_eq!(cpu.hit_breakpoint(), Some(BreakpointKind::Breakpoint));
    }
    assert_eq!(bus.device_now(cpu_id).expect("cpu clock"), 12);

    let second = bus.tick(1000);
    assert!(!second.suspended);
    let cpu = bus.device::<Cpu>(cpu_id).expect("cpu");
    assert_eq!(r0(cpu), 0x0055);
    assert_eq!(cpu.registers().pc(), 0x1004);
    assert_eq!(cpu.breakpoint(0x1002), BreakpointFlags::PERSISTENT);
}

#[test]
fn bank_switch_drops_stale_decodes() {
    let [b, disp] = branch_back(0x5002, 0x5000);
    let mut bus = Bus::new(BusConfig::default()).expect("default geometry");
    let mut cpu = Cpu::new(CpuConfig {
        reset_vector: 0x5000,
        ..CpuConfig::default()
    });

    let page0 = PagedMemory::rom(16, 0x5000, 0, &[MVII_R0, 0x0011, b, disp])
        .expect("aligned window")
        .with_snoop(cpu.snoop().clone());
    let page1 = PagedMemory::rom(16, 0x5000, 1, &[MVII_R0, 0x0022, b, disp])
        .expect("aligned window")
        .with_snoop(cpu.snoop().clone());
    bus.register(Box::new(page0), 0x5000, 0x5FFF, "page0")
        .expect("page 0");
    bus.register(Box::new(page1), 0x5000, 0x5FFF, "page1")
        .expect("page 1");
    cpu.set_cacheable(&mut bus, 0x5000, 0x5FFF)
        .expect("snoop attaches");

    let t = cpu.run(&mut bus, 0, 50).consumed;
    assert_eq!(r0(&cpu), 0x0011);
    assert!(cpu.cached(0x5000).is_some());

    bus.write(None, 0x5FFF, 0x5A51);
    cpu.run(&mut bus, t, 50);
    assert_eq!(r0(&cpu), 0x0022);
}

#[test]
fn settled_requests_are_counted_without_growing_history() {
    const FRAMES: u64 = 2_000;
    // EIS; loop: NOP; B loop. The interrupt vector branches back into it.
    let [b, disp] = branch_back(0x1002, 0x1001);
    let [isr_b, isr_disp] = branch_back(0x1004, 0x1001);
    let mut bus = ram_bus(&[EIS, NOP, b, disp, isr_b, isr_disp]);
    let mut cpu = Cpu::new(CpuConfig::default());
    cpu.registers_mut().set_gpr(GeneralRegister::R6, 0x4000);
    bus.attach(Box::new(cpu), "cpu");

    for frame in 0..FRAMES {
        let vblank = frame * 1000 + 100;
        bus.req_q_mut()
            .push(RequestKind::Interrupt, vblank, vblank + 20)
            .expect("queue interrupt");
        bus.tick(1000);
    }

    let queue = bus.req_q();
    assert_eq!(queue.history().len(), REQ_Q_HISTORY);
    assert_eq!(queue.acked_count() + queue.dropped_count(), FRAMES);
    assert!(queue.acked_count() > 0);
}

#[test]
fn uninitialized_ram_is_reproducible() {
    let a = Memory::ram(16, 0, 256).with_random_fill(99);
    let b = Memory::ram(16, 0, 256).with_random_fill(99);
    let c = Memory::ram(16, 0, 256).with_random_fill(100);
    assert_eq!(a.image(), b.image());
    assert_ne!(a.image(), c.image());
}
