//! The CP-1610 as a bus device: run loop, decode cache and request
//! arbitration.
//!
//! Each call to [`Cpu::run`] executes whole instructions until the
//! requested time is reached. Bus requests are only acknowledged between
//! instructions; the tight loop stops at the next request boundary so an
//! edge is never skipped.

#![allow(clippy::cast_possible_truncation)]

mod breakpoint;
mod port;

pub use breakpoint::BreakpointFlags;

use std::any::Any;
use std::collections::HashMap;

use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, trace};

use crate::api::{BreakpointKind, CpuConfig, HookAction, HookEvent, InstructionHook, MemoryPort};
use crate::bus::{Bus, CacheSnoop, Capabilities, Device, RequestKind, TickResult};
use crate::decoder::{is_sdbd, DecodedInstruction, Decoder, Handler};
use crate::disasm::disassemble_one;
use crate::execute::{execute, record_anomaly, ExecContext, ExecuteOutcome};
use crate::fault::{Anomaly, BusError, SnapshotError};
use crate::snapshot::{join, FieldFlags, Radix, SnapshotRegistry};
use crate::state::{IntrGate, Registers, EXTENDED_REGISTER_COUNT, GENERAL_REGISTER_COUNT};
use crate::timing::{cycles, CycleCostKind};
use crate::trap::{HostCall, TrapTable};

use port::BusPort;

/// Addressable instruction slots.
const ADDRESS_SPACE: usize = 1 << 16;

/// log2 of the cacheable-page size in storage units.
pub const CACHE_PAGE_SHIFT: u32 = 4;

const CACHE_PAGES: usize = ADDRESS_SPACE >> CACHE_PAGE_SHIFT;

/// Running totals kept by the CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct CpuCounters {
    /// Instructions retired, including the reset sequence.
    pub instructions: u64,
    /// Cycles consumed across all runs.
    pub cycles: u64,
    /// Decodes that populated the cache.
    pub cache_fills: u64,
    /// Decodes of addresses outside the cacheable pages.
    pub uncached_decodes: u64,
}

enum Round {
    /// Queue state changed; look again before running anything.
    Requeue,
    /// An instruction boundary was reached.
    Boundary {
        /// Cycles of the last step, `None` if it suspended.
        cycles: Option<u32>,
        /// The single-step budget ran out.
        step_done: bool,
    },
}

/// The CPU device.
pub struct Cpu {
    regs: Registers,
    config: CpuConfig,
    decoder: Decoder,
    handles: Vec<Handler>,
    decoded: Vec<DecodedInstruction>,
    breakpoints: Vec<BreakpointFlags>,
    disasm: HashMap<u16, String>,
    cacheable: [u32; CACHE_PAGES / 32],
    snoop: CacheSnoop,
    traps: TrapTable,
    hook: Option<Box<dyn InstructionHook>>,
    rng: Option<ChaCha8Rng>,
    pend_reset: bool,
    steps_remaining: u32,
    hit: Option<BreakpointKind>,
    ext_lines: u8,
    counters: CpuCounters,
    anomalies: [u64; Anomaly::COUNT],
    max_tick: u64,
}

impl std::fmt::Debug for Cpu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cpu")
            .field("regs", &self.regs)
            .field("config", &self.config)
            .field("counters", &self.counters)
            .field("hook", &self.hook.is_some())
            .finish_non_exhaustive()
    }
}

impl Cpu {
    /// Creates a CPU that will run its reset sequence on the first tick.
    #[must_use]
    pub fn new(config: CpuConfig) -> Self {
        let mut rng = config.randomize_seed.map(ChaCha8Rng::seed_from_u64);
        let mut regs = Registers::default();
        if let Some(rng) = rng.as_mut() {
            regs.randomize(rng);
        }
        Self {
            regs,
            decoder: Decoder::new(config.extended_isa),
            config,
            handles: vec![Handler::Decode; ADDRESS_SPACE],
            decoded: vec![DecodedInstruction::default(); ADDRESS_SPACE],
            breakpoints: vec![BreakpointFlags::empty(); ADDRESS_SPACE],
            disasm: HashMap::new(),
            cacheable: [0; CACHE_PAGES / 32],
            snoop: CacheSnoop::new(),
            traps: TrapTable::new(),
            hook: None,
            rng,
            pend_reset: true,
            steps_remaining: 0,
            hit: None,
            ext_lines: 0,
            counters: CpuCounters::default(),
            anomalies: [0; Anomaly::COUNT],
            max_tick: 4,
        }
    }

    /// Configuration the CPU was built with.
    #[must_use]
    pub const fn config(&self) -> &CpuConfig {
        &self.config
    }

    /// Register file.
    #[must_use]
    pub const fn registers(&self) -> &Registers {
        &self.regs
    }

    /// Mutable register file, for debuggers and test setup.
    pub const fn registers_mut(&mut self) -> &mut Registers {
        &mut self.regs
    }

    /// Running totals.
    #[must_use]
    pub const fn counters(&self) -> &CpuCounters {
        &self.counters
    }

    /// How many times `anomaly` has been observed.
    #[must_use]
    pub const fn anomaly_count(&self, anomaly: Anomaly) -> u64 {
        self.anomalies[anomaly.index()]
    }

    /// The invalidation log this CPU drains before each fetch. Devices
    /// that remap cacheable memory hold clones of it.
    #[must_use]
    pub const fn snoop(&self) -> &CacheSnoop {
        &self.snoop
    }

    /// Installs the per-instruction hook, replacing any previous one.
    pub fn set_hook(&mut self, hook: impl InstructionHook + 'static) {
        self.hook = Some(Box::new(hook));
    }

    /// Removes the per-instruction hook.
    pub fn clear_hook(&mut self) {
        self.hook = None;
    }

    /// Registers host call `callno` for `SIN`.
    pub fn register_call(&mut self, callno: u16, call: impl HostCall + 'static) {
        self.traps.register(callno, call);
    }

    /// Drives the external condition lines sampled by `BEXT`.
    pub const fn set_ext_lines(&mut self, lines: u8) {
        self.ext_lines = lines & 0xF;
    }

    /// Changes the single-step budget. Zero disables stepping.
    pub const fn set_step_count(&mut self, count: u32) {
        self.config.step_count = count;
        self.steps_remaining = 0;
    }

    /// Marks the pages covering `lo..=hi` cacheable and subscribes the
    /// CPU to bus writes over them.
    ///
    /// Only whole pages are marked: `lo` rounds up and `hi` rounds down to
    /// page boundaries. Returns the range actually covered, or `None` when
    /// it holds no whole page.
    ///
    /// # Errors
    ///
    /// Propagates [`Bus::attach_snoop`] failures, including an attempt to
    /// snoop a second bus.
    pub fn set_cacheable(
        &mut self,
        bus: &mut Bus,
        lo: u16,
        hi: u16,
    ) -> Result<Option<(u16, u16)>, BusError> {
        let page = 1u32 << CACHE_PAGE_SHIFT;
        let lo = (u32::from(lo) + page - 1) & !(page - 1);
        let Some(hi) = ((u32::from(hi) + 1) & !(page - 1)).checked_sub(1) else {
            return Ok(None);
        };
        if lo > hi {
            return Ok(None);
        }
        bus.attach_snoop(&self.snoop, lo, hi)?;
        for pg in (lo >> CACHE_PAGE_SHIFT)..=(hi >> CACHE_PAGE_SHIFT) {
            self.cacheable[(pg >> 5) as usize] |= 1 << (pg & 31);
        }
        debug!(lo, hi, "cacheable range");
        Ok(Some((lo as u16, hi as u16)))
    }

    /// Whether `addr` lies in a cacheable page.
    #[must_use]
    pub const fn is_cacheable(&self, addr: u16) -> bool {
        let pg = (addr as usize) >> CACHE_PAGE_SHIFT;
        self.cacheable[pg >> 5] & (1 << (pg & 31)) != 0
    }

    /// Cached handle and operands for `addr`, if decode is memoized there.
    /// Entries a pending snooped write will drop are reported as absent.
    #[must_use]
    pub fn cached(&self, addr: u16) -> Option<(Handler, DecodedInstruction)> {
        if self.snoop.covers(u32::from(addr)) {
            return None;
        }
        let slot = usize::from(addr);
        match self.handles[slot] {
            Handler::Decode | Handler::Breakpoint | Handler::DecodeBreakpoint => None,
            handler => Some((handler, self.decoded[slot])),
        }
    }

    /// Drops cached decodes over `lo..=hi`. Armed breakpoints keep their
    /// trap handles.
    pub fn invalidate(&mut self, lo: u32, hi: u32) {
        let hi = hi.min(u32::from(u16::MAX));
        for addr in lo..=hi {
            let slot = addr as usize;
            if !self.handles[slot].is_breakpoint() {
                self.handles[slot] = Handler::Decode;
            }
            self.disasm.remove(&(addr as u16));
        }
    }

    /// Disassembly of the instruction at `addr`, memoized until the
    /// address is invalidated or re-decoded.
    pub fn disassemble(&mut self, bus: &Bus, addr: u16) -> &str {
        let extended_isa = self.config.extended_isa;
        self.disasm.entry(addr).or_insert_with(|| {
            let peek = |a: u16| (bus.peek(u32::from(a)) & 0xFFFF) as u16;
            let prev_is_sdbd = is_sdbd(peek(addr.wrapping_sub(1)));
            disassemble_one(addr, peek, prev_is_sdbd, extended_isa).to_string()
        })
    }

    /// Runs from `now` for at least `len` cycles, or until the request
    /// horizon, a single-step boundary or a hook suspension.
    ///
    /// Only whole instructions execute, so the elapsed time may overshoot
    /// `len` by part of one instruction.
    pub fn run(&mut self, bus: &mut Bus, start: u64, len: u64) -> TickResult {
        let future = start.saturating_add(len).min(bus.req_q().horizon());
        let mut now = start;

        while now < future {
            if self.pend_reset {
                now += self.reset_sequence(now);
                continue;
            }
            let Round::Boundary { cycles: spent, step_done } = self.round(bus, &mut now, future)
            else {
                continue;
            };
            if let Some(hook) = self.hook.as_mut() {
                let event = HookEvent {
                    pc: self.regs.pc(),
                    now,
                    cycles: spent,
                    breakpoint: if spent.is_none() { self.hit } else { None },
                };
                if hook.on_instruction(&event, &self.regs) == HookAction::Suspend {
                    self.finish(bus, start, now);
                    return TickResult::suspended(now - start);
                }
            }
            if step_done {
                break;
            }
        }

        self.finish(bus, start, now);
        TickResult::advanced(now - start)
    }

    fn reset_sequence(&mut self, now: u64) -> u64 {
        if let Some(rng) = self.rng.as_mut() {
            self.regs.randomize(rng);
        }
        self.regs.set_pc(self.config.reset_vector);
        self.regs.intr = IntrGate::empty();
        self.pend_reset = false;
        self.steps_remaining = self.steps_remaining.saturating_sub(1);
        self.counters.instructions += 1;
        debug!(now, vector = self.config.reset_vector, "reset");
        if now == 0 {
            0
        } else {
            u64::from(cycles(CycleCostKind::Reset))
        }
    }

    fn finish(&mut self, bus: &Bus, start: u64, now: u64) {
        self.counters.cycles += now - start;
        let horizon = bus.req_q().horizon();
        self.max_tick = if now >= horizon { 1 } else { horizon - now };
    }

    fn round(&mut self, bus: &mut Bus, now: &mut u64, future: u64) -> Round {
        let front = bus.req_q().front().copied();

        if let Some(req) = front {
            if req.covers(*now) {
                let gate = self.regs.intr;
                match req.kind {
                    RequestKind::BusGrant if gate.contains(IntrGate::INSTR) => {
                        let queue = bus.req_q_mut();
                        queue.ack(*now);
                        queue.pop();
                        let span = req.end - *now;
                        trace!(now = *now, end = req.end, "bus grant acknowledged");
                        *now = req.end;
                        return Round::Boundary {
                            cycles: Some(u32::try_from(span).unwrap_or(u32::MAX)),
                            step_done: false,
                        };
                    }
                    RequestKind::Interrupt
                        if gate.contains(IntrGate::ENABLE | IntrGate::INSTR) =>
                    {
                        return Round::Boundary {
                            cycles: Some(self.take_interrupt(bus, now)),
                            step_done: false,
                        };
                    }
                    _ => {}
                }
            } else if *now >= req.end {
                let queue = bus.req_q_mut();
                queue.drop_front(*now);
                queue.pop();
                record_anomaly(&mut self.anomalies, Anomaly::MissedRequest, self.regs.pc());
                return Round::Requeue;
            }
        }

        if self.steps_remaining == 0 {
            self.steps_remaining = self.config.step_count;
        }
        let near = match front {
            Some(req) if *now < req.start => future.min(req.start),
            Some(_) => *now + 1,
            None => future,
        };

        let mut last = None;
        let mut step_done = false;
        while *now < near {
            if self.snoop.is_dirty() {
                for (lo, hi) in self.snoop.drain() {
                    self.invalidate(lo, hi);
                }
            }
            self.hit = None;
            let pc = self.regs.pc();
            match self.dispatch(bus, pc) {
                ExecuteOutcome::Suspended { cycles } => {
                    if cycles > 0 {
                        *now += u64::from(cycles);
                        self.counters.instructions += 1;
                        step_done = self.count_step();
                    }
                    last = None;
                    break;
                }
                ExecuteOutcome::Retired { cycles } => {
                    *now += u64::from(cycles);
                    self.counters.instructions += 1;
                    last = Some(cycles);
                    if self.count_step() {
                        step_done = true;
                        break;
                    }
                }
            }
            if self.hook.is_some() {
                break;
            }
        }

        Round::Boundary {
            cycles: last,
            step_done,
        }
    }

    fn take_interrupt(&mut self, bus: &mut Bus, now: &mut u64) -> u32 {
        let acknowledge = cycles(CycleCostKind::InterruptAcknowledge);
        *now += u64::from(acknowledge);
        let queue = bus.req_q_mut();
        queue.ack(*now);
        queue.pop();

        let sp = self.regs.r[6];
        BusPort::new(bus).write(sp, self.regs.pc());
        self.regs.r[6] = sp.wrapping_add(1);

        let vector = cycles(CycleCostKind::InterruptVector);
        *now += u64::from(vector);
        self.regs.set_pc(self.config.interrupt_vector);
        self.regs.intr = IntrGate::empty();
        trace!(now = *now, return_to = self.regs.r[7], sp, "interrupt acknowledged");
        acknowledge + vector
    }

    const fn count_step(&mut self) -> bool {
        if self.config.step_count == 0 {
            return false;
        }
        self.steps_remaining = self.steps_remaining.saturating_sub(1);
        self.steps_remaining == 0
    }

    fn dispatch(&mut self, bus: &mut Bus, pc: u16) -> ExecuteOutcome {
        let slot = usize::from(pc);
        match self.handles[slot] {
            Handler::Breakpoint => self.trap_breakpoint(pc),
            Handler::DecodeBreakpoint => {
                self.handles[slot] = Handler::Breakpoint;
                let (handler, instr) = self.fetch_decode(bus, pc);
                self.exec(bus, handler, &instr)
            }
            Handler::Decode => {
                let (handler, instr) = self.fetch_decode(bus, pc);
                self.exec(bus, handler, &instr)
            }
            handler => {
                let instr = self.decoded[slot];
                self.exec(bus, handler, &instr)
            }
        }
    }

    fn fetch_decode(&mut self, bus: &mut Bus, pc: u16) -> (Handler, DecodedInstruction) {
        let mut port = BusPort::new(bus);
        let w0 = port.read(pc);
        let prev_is_sdbd = self.regs.double_byte_pending() || is_sdbd(port.peek(pc.wrapping_sub(1)));
        let len = Decoder::length(w0, prev_is_sdbd);
        let mut words = [w0, 0, 0];
        for (offset, word) in (1..len).zip(words.iter_mut().skip(1)) {
            *word = port.read(pc.wrapping_add(offset));
        }
        let (handler, instr) = self.decoder.decode(pc, words, prev_is_sdbd);

        let slot = usize::from(pc);
        if self.handles[slot] != Handler::Breakpoint {
            let last = pc.wrapping_add(len.saturating_sub(1));
            if self.is_cacheable(pc) && self.is_cacheable(last) {
                self.handles[slot] = handler;
                self.decoded[slot] = instr;
                self.counters.cache_fills += 1;
            } else {
                self.handles[slot] = Handler::Decode;
                self.counters.uncached_decodes += 1;
            }
        }
        self.disasm.remove(&pc);
        (handler, instr)
    }

    fn exec(&mut self, bus: &mut Bus, handler: Handler, instr: &DecodedInstruction) -> ExecuteOutcome {
        self.regs.intr = if self.regs.i {
            IntrGate::ENABLE | IntrGate::INSTR
        } else {
            IntrGate::INSTR
        };
        let mut port = BusPort::new(bus);
        let mut ctx = ExecContext {
            regs: &mut self.regs,
            mem: &mut port,
            traps: &mut self.traps,
            extended_isa: self.config.extended_isa,
            has_hook: self.hook.is_some(),
            ext_lines: self.ext_lines,
            anomalies: &mut self.anomalies,
        };
        let outcome = execute(handler, instr, &mut ctx);
        self.regs.d >>= 1;
        outcome
    }

    /// Publishes the CPU state under `prefix`.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError`] if `prefix` is malformed or its fields
    /// are already registered.
    pub fn register_snapshot(
        &self,
        registry: &mut SnapshotRegistry,
        prefix: &str,
    ) -> Result<(), SnapshotError> {
        let mandatory = FieldFlags::MANDATORY;
        registry.register_array(
            &join(prefix, "r"),
            self.regs.r.iter().map(|&v| u64::from(v)),
            Radix::Hex,
            mandatory,
        )?;
        registry.register_array(
            &join(prefix, "xr"),
            self.regs.xr.iter().map(|&v| u64::from(v)),
            Radix::Hex,
            mandatory,
        )?;
        registry.register_scalar(
            &join(prefix, "flags"),
            u64::from(self.regs.status_word() & 0xFF),
            Radix::Hex,
            mandatory,
        )?;
        registry.register_scalar(&join(prefix, "i"), u64::from(self.regs.i), Radix::Decimal, mandatory)?;
        registry.register_scalar(&join(prefix, "d"), u64::from(self.regs.d), Radix::Decimal, mandatory)?;
        registry.register_scalar(
            &join(prefix, "intr"),
            u64::from(self.regs.intr.bits()),
            Radix::Decimal,
            mandatory,
        )?;
        registry.register_scalar(
            &join(prefix, "pend_reset"),
            u64::from(self.pend_reset),
            Radix::Decimal,
            mandatory,
        )?;
        registry.register_scalar(
            &join(prefix, "reset_vector"),
            u64::from(self.config.reset_vector),
            Radix::Hex,
            FieldFlags::INIT_ONLY,
        )?;
        registry.register_scalar(
            &join(prefix, "interrupt_vector"),
            u64::from(self.config.interrupt_vector),
            Radix::Hex,
            FieldFlags::INIT_ONLY,
        )?;
        registry.register_scalar(
            &join(prefix, "instructions"),
            self.counters.instructions,
            Radix::Decimal,
            FieldFlags::INFORMATIVE,
        )?;
        registry.register_scalar(
            &join(prefix, "cycles"),
            self.counters.cycles,
            Radix::Decimal,
            FieldFlags::INFORMATIVE,
        )
    }

    /// Loads the mandatory fields published by
    /// [`Cpu::register_snapshot`]. Informative and init-only fields are
    /// left alone.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::UnknownField`] or
    /// [`SnapshotError::ShapeMismatch`] when a field is missing or has the
    /// wrong shape. Nothing is modified in that case.
    pub fn restore_snapshot(
        &mut self,
        registry: &SnapshotRegistry,
        prefix: &str,
    ) -> Result<(), SnapshotError> {
        let r = registry.array(&join(prefix, "r"))?;
        let xr = registry.array(&join(prefix, "xr"))?;
        if r.len() != GENERAL_REGISTER_COUNT {
            return Err(SnapshotError::ShapeMismatch(join(prefix, "r")));
        }
        if xr.len() != EXTENDED_REGISTER_COUNT {
            return Err(SnapshotError::ShapeMismatch(join(prefix, "xr")));
        }
        let flags = registry.scalar(&join(prefix, "flags"))?;
        let i = registry.scalar(&join(prefix, "i"))?;
        let d = registry.scalar(&join(prefix, "d"))?;
        let intr = registry.scalar(&join(prefix, "intr"))?;
        let pend_reset = registry.scalar(&join(prefix, "pend_reset"))?;

        for (reg, &v) in self.regs.r.iter_mut().zip(r) {
            *reg = v as u16;
        }
        for (reg, &v) in self.regs.xr.iter_mut().zip(xr) {
            *reg = v as u16;
        }
        self.regs.load_status_word(flags as u16);
        self.regs.i = i != 0;
        self.regs.d = d as u8;
        self.regs.intr = IntrGate::from_bits_truncate(intr as u8);
        self.pend_reset = pend_reset != 0;
        Ok(())
    }
}

impl Device for Cpu {
    fn capabilities(&self) -> Capabilities {
        Capabilities::TICK
    }

    fn tick(&mut self, bus: &mut Bus, now: u64, len: u64) -> TickResult {
        self.run(bus, now, len)
    }

    fn max_tick(&self) -> u64 {
        self.max_tick
    }

    fn reset(&mut self) {
        self.pend_reset = true;
        self.steps_remaining = 0;
        debug!("cpu reset requested");
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::{BreakpointFlags, Cpu};
    use crate::api::{BreakpointKind, CpuConfig, HookAction, HookEvent};
    use crate::bus::{Bus, BusConfig, Device, RequestKind, RequestState};
    use crate::decoder::Handler;
    use crate::fault::Anomaly;
    use crate::memory::Memory;
    use crate::snapshot::SnapshotRegistry;
    use crate::state::Registers;

    const MVII_R0: u16 = 0x02B8;
    const NOP: u16 = 0x0034;
    const EIS: u16 = 0x0002;
    const HLT: u16 = 0x0000;

    fn rig(program: &[u16]) -> (Cpu, Bus) {
        rig_with(CpuConfig::default(), program)
    }

    fn rig_with(config: CpuConfig, program: &[u16]) -> (Cpu, Bus) {
        let mut bus = Bus::new(BusConfig::default()).expect("default geometry");
        bus.register(Box::new(Memory::ram(16, 0, 0x1_0000)), 0, 0xFFFF, "ram")
            .expect("register ram");
        for (addr, &word) in (0x1000u32..).zip(program) {
            bus.poke(addr, u32::from(word));
        }
        (Cpu::new(config), bus)
    }

    /// `B` back to `target` from the branch at `at`.
    fn branch_back(at: u16, target: u16) -> [u16; 2] {
        [0x0220, at.wrapping_add(2).wrapping_sub(target).wrapping_sub(1)]
    }

    #[test]
    fn first_reset_is_free_and_counts_as_an_instruction() {
        let (mut cpu, mut bus) = rig(&[MVII_R0, 5]);
        let result = cpu.run(&mut bus, 0, 1);
        assert_eq!(result.consumed, 8);
        assert!(!result.suspended);
        assert_eq!(cpu.registers().gpr(crate::state::GeneralRegister::R0), 5);
        assert_eq!(cpu.registers().pc(), 0x1002);
        assert_eq!(cpu.counters().instructions, 2);
        assert_eq!(cpu.counters().cycles, 8);
    }

    #[test]
    fn later_resets_cost_five_cycles() {
        let (mut cpu, mut bus) = rig(&[NOP, NOP, NOP]);
        cpu.run(&mut bus, 0, 6);
        Device::reset(&mut cpu);
        let result = cpu.run(&mut bus, 6, 1);
        assert_eq!(result.consumed, 5);
        assert_eq!(cpu.registers().pc(), 0x1000);
    }

    #[test]
    fn cacheable_pages_memoize_and_snooped_writes_invalidate() {
        let mut program = vec![MVII_R0, 5];
        program.extend(branch_back(0x1002, 0x1000));
        let (mut cpu, mut bus) = rig(&program);
        let covered = cpu
            .set_cacheable(&mut bus, 0x1000, 0x1FFF)
            .expect("attach snoop");
        assert_eq!(covered, Some((0x1000, 0x1FFF)));

        cpu.run(&mut bus, 0, 100);
        assert_eq!(cpu.counters().cache_fills, 2);
        assert!(cpu.cached(0x1000).is_some());

        bus.write(None, 0x1001, 7);
        assert!(cpu.cached(0x1000).is_none());
        cpu.run(&mut bus, 100, 20);
        assert_eq!(cpu.registers().r[0], 7);
        assert_eq!(cpu.counters().cache_fills, 4);
        assert_eq!(cpu.counters().uncached_decodes, 0);
    }

    #[test]
    fn partial_pages_are_not_cacheable() {
        let (mut cpu, mut bus) = rig(&[]);
        assert_eq!(cpu.set_cacheable(&mut bus, 0x1001, 0x100F).expect("attach"), None);
        assert_eq!(
            cpu.set_cacheable(&mut bus, 0x1001, 0x102E).expect("attach"),
            Some((0x1010, 0x101F))
        );
        assert!(!cpu.is_cacheable(0x1000));
        assert!(cpu.is_cacheable(0x1010));
        assert!(!cpu.is_cacheable(0x1020));
    }

    #[test]
    fn uncacheable_code_decodes_every_time() {
        let (mut cpu, mut bus) = rig(&[NOP, NOP, NOP, NOP]);
        cpu.run(&mut bus, 0, 24);
        assert_eq!(cpu.counters().uncached_decodes, 4);
        assert_eq!(cpu.counters().cache_fills, 0);
        assert!(cpu.cached(0x1000).is_none());
    }

    #[test]
    fn interrupt_pushes_pc_and_vectors() {
        let mut program = vec![EIS];
        program.extend(branch_back(0x1001, 0x1001));
        let (mut cpu, mut bus) = rig(&program);
        cpu.registers_mut().r[6] = 0x02F0;
        bus.req_q_mut()
            .push(RequestKind::Interrupt, 100, 120)
            .expect("queue interrupt");

        cpu.run(&mut bus, 0, 200);

        assert_eq!(bus.peek(0x02F0), 0x1001);
        assert_eq!(cpu.registers().r[6], 0x02F1);
        assert_eq!(bus.req_q().acked_count(), 1);
        let acked = bus.req_q().history()[0];
        assert_eq!(acked.state, RequestState::Acked);
        assert!(acked.ack_cycle >= 100 && acked.ack_cycle < 120);
    }

    #[test]
    fn disabled_interrupts_miss_the_request() {
        let (mut cpu, mut bus) = rig(&branch_back(0x1000, 0x1000));
        bus.req_q_mut()
            .push(RequestKind::Interrupt, 20, 30)
            .expect("queue interrupt");
        cpu.run(&mut bus, 0, 100);
        assert_eq!(bus.req_q().dropped_count(), 1);
        assert_eq!(cpu.anomaly_count(Anomaly::MissedRequest), 1);
        assert_eq!(cpu.registers().pc(), 0x1000);
    }

    #[test]
    fn bus_grant_stalls_until_span_end() {
        let (mut cpu, mut bus) = rig(&branch_back(0x1000, 0x1000));
        bus.req_q_mut()
            .push(RequestKind::BusGrant, 18, 400)
            .expect("queue grant");
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        cpu.set_hook(move |event: &HookEvent, _: &Registers| {
            sink.borrow_mut().push((event.now, event.cycles));
            HookAction::Continue
        });
        cpu.run(&mut bus, 0, 410);
        assert_eq!(
            log.borrow()[..3],
            [(9, Some(9)), (18, Some(9)), (400, Some(382))]
        );
        assert_eq!(bus.req_q().acked_count(), 1);
    }

    #[test]
    fn hook_suspends_at_the_next_boundary() {
        let (mut cpu, mut bus) = rig(&[NOP, NOP, NOP, NOP]);
        cpu.set_hook(|event: &HookEvent, _: &Registers| {
            if event.pc == 0x1002 {
                HookAction::Suspend
            } else {
                HookAction::Continue
            }
        });
        let result = cpu.run(&mut bus, 0, 1000);
        assert!(result.suspended);
        assert_eq!(result.consumed, 12);
        assert_eq!(cpu.registers().pc(), 0x1002);
    }

    #[test]
    fn halt_spins_in_place() {
        let (mut cpu, mut bus) = rig(&[HLT]);
        cpu.run(&mut bus, 0, 40);
        assert_eq!(cpu.registers().pc(), 0x1000);
        assert_eq!(cpu.anomaly_count(Anomaly::Halted), 10);

        cpu.set_hook(|event: &HookEvent, _: &Registers| {
            assert_eq!(event.cycles, None);
            HookAction::Suspend
        });
        let result = cpu.run(&mut bus, 40, 40);
        assert!(result.suspended);
        assert_eq!(result.consumed, 4);
    }

    #[test]
    fn breakpoint_reports_then_resumes_through_the_instruction() {
        let (mut cpu, mut bus) = rig(&[NOP, NOP, NOP]);
        cpu.set_breakpoint(0x1001, BreakpointFlags::PERSISTENT);
        let hits = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&hits);
        cpu.set_hook(move |event: &HookEvent, _: &Registers| {
            if let Some(kind) = event.breakpoint {
                sink.borrow_mut().push((event.pc, kind));
                return HookAction::Suspend;
            }
            HookAction::Continue
        });

        let first = cpu.run(&mut bus, 0, 100);
        assert!(first.suspended);
        assert_eq!(first.consumed, 6);
        assert_eq!(cpu.hit_breakpoint(), Some(BreakpointKind::Breakpoint));

        cpu.set_step_count(1);
        let second = cpu.run(&mut bus, 6, 100);
        assert!(!second.suspended);
        assert_eq!(second.consumed, 6);
        assert_eq!(cpu.registers().pc(), 0x1002);
        assert_eq!(cpu.handles[0x1001], Handler::Breakpoint);
        assert_eq!(*hits.borrow(), [(0x1001, BreakpointKind::Breakpoint)]);
    }

    #[test]
    fn tracepoints_fire_once() {
        let mut program = vec![NOP];
        program.extend(branch_back(0x1001, 0x1000));
        let (mut cpu, mut bus) = rig(&program);
        cpu.set_breakpoint(0x1000, BreakpointFlags::ONCE);
        let hits = Rc::new(RefCell::new(0u32));
        let sink = Rc::clone(&hits);
        cpu.set_hook(move |event: &HookEvent, _: &Registers| {
            if event.breakpoint == Some(BreakpointKind::Tracepoint) {
                *sink.borrow_mut() += 1;
            }
            HookAction::Continue
        });
        cpu.run(&mut bus, 0, 200);
        assert_eq!(*hits.borrow(), 1);
        assert!(cpu.breakpoint(0x1000).is_empty());
    }

    #[test]
    fn step_count_ends_the_run_at_a_boundary() {
        let (mut cpu, mut bus) = rig_with(
            CpuConfig {
                step_count: 3,
                ..CpuConfig::default()
            },
            &[NOP, NOP, NOP, NOP, NOP],
        );
        let result = cpu.run(&mut bus, 0, 1000);
        assert!(!result.suspended);
        assert_eq!(result.consumed, 18);
        assert_eq!(cpu.registers().pc(), 0x1003);
    }

    #[test]
    fn randomized_power_up_is_reproducible() {
        let config = CpuConfig {
            randomize_seed: Some(42),
            ..CpuConfig::default()
        };
        let a = Cpu::new(config.clone());
        let b = Cpu::new(config);
        assert_eq!(a.registers(), b.registers());
        assert_ne!(a.registers(), &Registers::default());
    }

    #[test]
    fn disassembly_is_memoized_until_invalidated() {
        let (mut cpu, bus) = rig(&[MVII_R0, 0x0042]);
        let text = cpu.disassemble(&bus, 0x1000).to_owned();
        assert!(text.contains("MVII"), "{text}");
        assert!(cpu.disasm.contains_key(&0x1000));
        cpu.invalidate(0x0FFD, 0x1000);
        assert!(!cpu.disasm.contains_key(&0x1000));
    }

    #[test]
    fn invalidation_keeps_armed_breakpoints() {
        let (mut cpu, _bus) = rig(&[]);
        cpu.set_breakpoint(0x2000, BreakpointFlags::PERSISTENT);
        cpu.registers_mut().set_pc(0x2001);
        cpu.set_breakpoint(0x2001, BreakpointFlags::PERSISTENT);
        cpu.invalidate(0x1FF0, 0x2010);
        assert_eq!(cpu.handles[0x2000], Handler::Breakpoint);
        assert_eq!(cpu.handles[0x2001], Handler::DecodeBreakpoint);
    }

    #[test]
    fn snapshot_round_trips_architectural_state() {
        let (mut cpu, mut bus) = rig(&[MVII_R0, 0x1234, EIS]);
        cpu.run(&mut bus, 0, 12);
        let mut registry = SnapshotRegistry::new();
        cpu.register_snapshot(&mut registry, "cpu").expect("register");
        assert_eq!(registry.scalar("cpu.reset_vector"), Ok(0x1000));
        assert!(registry.paths_under("cpu").count() >= 10);

        let mut other = Cpu::new(CpuConfig::default());
        other.restore_snapshot(&registry, "cpu").expect("restore");
        assert_eq!(other.registers(), cpu.registers());
        assert!(!other.pend_reset);
    }
}
