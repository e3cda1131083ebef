//! Property coverage for decode caching, invalidation, tick negotiation,
//! interrupt arbitration and breakpoints.

#![allow(clippy::pedantic, clippy::nursery, clippy::cast_possible_truncation)]

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use bitflags as _;
use cp1610_core::{
    BreakpointFlags, Bus, BusConfig, Capabilities, Cpu, CpuConfig, Decoder, Device,
    GeneralRegister, Memory, RequestKind, TickResult,
};
use proptest::prelude::*;
use rand_chacha as _;
use rstest as _;
#[cfg(feature = "serde")]
use serde as _;
use thiserror as _;
use tracing as _;

const EIS: u16 = 0x0002;
const NOP: u16 = 0x0034;
const HLT: u16 = 0x0000;
const MVII_R0: u16 = 0x02B8;
const MVO_R0: u16 = 0x0240;

fn ram_bus_at(at: u16, program: &[u16]) -> Bus {
    let mut bus = Bus::new(BusConfig::default()).expect("default geometry");
    bus.register(Box::new(Memory::ram(16, 0, 0x1_0000)), 0, 0xFFFF, "ram")
        .expect("register ram");
    for (addr, &word) in (u32::from(at)..).zip(program) {
        bus.poke(addr, u32::from(word));
    }
    bus
}

fn branch_back(at: u16, target: u16) -> [u16; 2] {
    [0x0220, at.wrapping_add(2).wrapping_sub(target).wrapping_sub(1)]
}

type TickLog = Rc<RefCell<Vec<(usize, u64, u64)>>>;

/// A clocked device that records every tick it receives.
struct Clocked {
    index: usize,
    min: u64,
    max: u64,
    stalled: bool,
    log: TickLog,
}

impl Device for Clocked {
    fn capabilities(&self) -> Capabilities {
        Capabilities::TICK
    }

    fn tick(&mut self, _bus: &mut Bus, now: u64, len: u64) -> TickResult {
        self.log.borrow_mut().push((self.index, now, len));
        TickResult::advanced(if self.stalled { 0 } else { len })
    }

    fn min_tick(&self) -> u64 {
        self.min
    }

    fn max_tick(&self) -> u64 {
        self.max
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Runs one instruction per call.
fn stepping_cpu(at: u16) -> Cpu {
    Cpu::new(CpuConfig {
        reset_vector: at,
        step_count: 1,
        ..CpuConfig::default()
    })
}

proptest! {
    #[test]
    fn property_decode_is_deterministic(
        address in any::<u16>(),
        words in any::<[u16; 3]>(),
        prev_is_sdbd in any::<bool>(),
        extended_isa in any::<bool>(),
    ) {
        let decoder = Decoder::new(extended_isa);
        prop_assert_eq!(
            decoder.decode(address, words, prev_is_sdbd),
            decoder.decode(address, words, prev_is_sdbd)
        );
    }

    #[test]
    fn property_cached_decode_is_stable_across_passes(value in any::<u16>()) {
        let [b, disp] = branch_back(0x1012, 0x1010);
        let mut bus = ram_bus_at(0x1010, &[MVII_R0, value, b, disp]);
        let mut cpu = stepping_cpu(0x1010);
        cpu.set_cacheable(&mut bus, 0x1000, 0x10FF).expect("snoop attaches");

        cpu.run(&mut bus, 0, 100);
        let first = cpu.cached(0x1010);
        prop_assert!(first.is_some());
        cpu.run(&mut bus, 100, 100);
        cpu.run(&mut bus, 200, 100);
        prop_assert_eq!(cpu.cached(0x1010), first);
        prop_assert_eq!(cpu.counters().cache_fills, 2);
        prop_assert_eq!(cpu.registers().gpr(GeneralRegister::R0), value);
    }

    #[test]
    fn property_writes_near_an_instruction_force_redecode(offset in 0u16..=3) {
        let a = 0x1010u16;
        let [b, disp] = branch_back(0x1012, a);
        let mut bus = ram_bus_at(a, &[MVII_R0, 0x0042, b, disp]);
        let mut cpu = stepping_cpu(a);
        cpu.set_cacheable(&mut bus, 0x1000, 0x10FF).expect("snoop attaches");

        let mut now = cpu.run(&mut bus, 0, 100).consumed;
        now += cpu.run(&mut bus, now, 100).consumed;
        prop_assert_eq!(cpu.registers().pc(), a);
        prop_assert_eq!(cpu.counters().cache_fills, 2);

        let target = a - offset;
        let data = if target == a { MVII_R0 } else { NOP };
        bus.write(None, u32::from(target), u32::from(data));
        prop_assert!(cpu.snoop().is_dirty());

        cpu.run(&mut bus, now, 100);
        prop_assert_eq!(cpu.counters().cache_fills, 3);
        prop_assert!(cpu.cached(a).is_some());
    }

    #[test]
    fn property_tick_rounds_respect_max_tick_and_target(
        limits in prop::collection::vec((1u64..20, 0u64..200), 1..4),
        len in 1u64..2000,
    ) {
        let log: TickLog = Rc::default();
        let mut bus = Bus::new(BusConfig::default()).expect("default geometry");
        let mut maxes = Vec::new();
        for (index, &(min, extra)) in limits.iter().enumerate() {
            let max = min + extra;
            maxes.push(max);
            bus.attach(
                Box::new(Clocked { index, min, max, stalled: false, log: Rc::clone(&log) }),
                "clocked",
            );
        }

        let result = bus.tick(len);
        prop_assert!(result.consumed <= len);
        prop_assert_eq!(bus.now(), result.consumed);
        for &(index, now, step) in log.borrow().iter() {
            prop_assert!(step <= maxes[index]);
            prop_assert!(now + step <= len);
        }
    }

    #[test]
    fn property_interrupts_wait_for_interruptible_boundaries(start in 20u64..300) {
        // EIS; loop { NOP; MVO R0,$0300; NOP; MVO R0,$0300; B loop }
        let [b, disp] = branch_back(0x1007, 0x1001);
        let mut bus = ram_bus_at(0x1000, &[
            EIS, NOP, MVO_R0, 0x0300, NOP, MVO_R0, 0x0300, b, disp,
        ]);
        bus.poke(0x2000, u32::from(HLT));
        let mut cpu = Cpu::new(CpuConfig {
            interrupt_vector: 0x2000,
            ..CpuConfig::default()
        });
        cpu.registers_mut().set_gpr(GeneralRegister::R6, 0x0200);
        bus.req_q_mut()
            .push(RequestKind::Interrupt, start, start + 40)
            .expect("queue interrupt");

        cpu.run(&mut bus, 0, 400);
        prop_assert_eq!(bus.req_q().acked_count(), 1);
        prop_assert_eq!(cpu.registers().pc(), 0x2000);
        // Only NOP and the branch are interruptible.
        let pushed = bus.peek(0x0200) as u16;
        prop_assert!(
            [0x1001, 0x1002, 0x1005].contains(&pushed),
            "interrupt taken before {:#06x}", pushed
        );
    }

    #[test]
    fn property_breakpoint_set_twice_clear_once_restores_decode(
        addr in any::<u16>(),
        bits in 1u8..=3,
    ) {
        let flags = BreakpointFlags::from_bits_truncate(bits);
        let mut cpu = Cpu::new(CpuConfig::default());
        prop_assert!(!cpu.set_breakpoint(addr, flags));
        prop_assert!(cpu.set_breakpoint(addr, flags));
        prop_assert!(cpu.clear_breakpoint(addr, flags));
        prop_assert!(cpu.breakpoint(addr).is_empty());
        prop_assert!(cpu.list_breakpoints(BreakpointFlags::empty()).is_empty());
        prop_assert_eq!(cpu.cached(addr), None);
    }
}

#[test]
fn tick_without_clocked_devices_never_advances() {
    let mut bus = Bus::new(BusConfig::default()).expect("default geometry");
    bus.register(Box::new(Memory::ram(16, 0, 16)), 0, 15, "ram")
        .expect("register ram");
    let result = bus.tick(500);
    assert_eq!(result.consumed, 0);
    assert_eq!(bus.now(), 0);
}

#[test]
fn stalled_device_ends_the_tick_after_one_round() {
    let log: TickLog = Rc::default();
    let mut bus = Bus::new(BusConfig::default()).expect("default geometry");
    bus.attach(
        Box::new(Clocked {
            index: 0,
            min: 1,
            max: 50,
            stalled: true,
            log: Rc::clone(&log),
        }),
        "stalled",
    );
    let result = bus.tick(1000);
    assert_eq!(log.borrow().len(), 1);
    assert!(result.consumed <= 50);
}

#[test]
fn coarse_device_shares_time_with_the_cpu() {
    let log: TickLog = Rc::default();
    let [b, disp] = branch_back(0x1000, 0x1000);
    let mut bus = ram_bus_at(0x1000, &[b, disp]);
    let cpu_id = bus.attach(Box::new(Cpu::new(CpuConfig::default())), "cpu");
    bus.attach(
        Box::new(Clocked {
            index: 0,
            min: 50,
            max: 100,
            stalled: false,
            log: Rc::clone(&log),
        }),
        "sampler",
    );

    let result = bus.tick(1000);
    assert_eq!(result.consumed, 1000);
    let ticked: u64 = log.borrow().iter().map(|&(_, _, len)| len).sum();
    assert!((900..=1000).contains(&ticked), "sampler ran {ticked}");
    assert!(log.borrow().iter().all(|&(_, _, len)| (50..=100).contains(&len)));
    assert!(bus.device_now(cpu_id).expect("cpu clock") >= 1000);
    assert_eq!(bus.device::<Cpu>(cpu_id).expect("cpu").cached(0x1000), None);
}
