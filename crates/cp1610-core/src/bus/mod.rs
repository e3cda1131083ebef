//! Peripheral bus: device registration, address decode and the
//! tick-negotiation scheduler that advances global virtual time.
//!
//! Devices are owned by the bus. While a device is being ticked it is
//! detached from its slot; every access path skips detached devices, which
//! is how re-entrant access to a busy device is prevented.

#![allow(clippy::cast_possible_truncation)]

mod device;
mod req_q;
mod snoop;

pub use device::{Capabilities, Device, DeviceId, TickResult};
pub use req_q::{BusRequest, ReqQueue, RequestKind, RequestState, REQ_Q_DEPTH, REQ_Q_HISTORY};
pub use snoop::{CacheSnoop, SNOOP_WINDOW};

use std::sync::atomic::{AtomicU32, Ordering};

use tracing::{debug, trace};

use crate::fault::BusError;

/// Most devices (and snoops) that may share one decode granule.
pub const MAX_PERIPH_BIN: usize = 32;

/// Largest decode table the bus will build, in granules (log2).
pub const MAX_DECODE_BITS: u32 = 20;

static NEXT_BUS_ID: AtomicU32 = AtomicU32::new(1);

/// Address/data geometry of a bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct BusConfig {
    /// Address width in bits.
    pub addr_size: u32,
    /// Data width in bits.
    pub data_size: u32,
    /// log2 of the address-decode granule.
    pub decode_shift: u32,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            addr_size: 16,
            data_size: 16,
            decode_shift: 4,
        }
    }
}

impl BusConfig {
    /// Checks that the geometry can be represented.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::InvalidGeometry`] for zero or over-wide sizes,
    /// a decode shift that swallows the whole address, or a decode table
    /// larger than `1 << MAX_DECODE_BITS` granules.
    pub const fn validate(&self) -> Result<(), BusError> {
        let ok = self.addr_size >= 1
            && self.addr_size <= 32
            && self.data_size >= 1
            && self.data_size <= 32
            && self.decode_shift < self.addr_size
            && self.addr_size - self.decode_shift <= MAX_DECODE_BITS;
        if ok {
            Ok(())
        } else {
            Err(BusError::InvalidGeometry {
                addr_size: self.addr_size,
                data_size: self.data_size,
                decode_shift: self.decode_shift,
            })
        }
    }
}

const fn width_mask(bits: u32) -> u32 {
    u32::MAX >> (32 - bits)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tap {
    Device(usize),
    Snoop(usize),
}

struct Slot {
    name: String,
    dev: Option<Box<dyn Device>>,
    caps: Capabilities,
    base: u32,
    mask: u32,
    now: u64,
}

impl Slot {
    const fn rel(&self, addr: u32) -> u32 {
        addr.wrapping_sub(self.base) & self.mask
    }
}

/// The peripheral bus.
pub struct Bus {
    id: u32,
    addr_mask: u32,
    data_mask: u32,
    decode_shift: u32,
    read_bins: Vec<Vec<usize>>,
    write_bins: Vec<Vec<Tap>>,
    slots: Vec<Slot>,
    tickable: Vec<usize>,
    snoops: Vec<CacheSnoop>,
    now: u64,
    ticking: bool,
    pending_reset: bool,
    req_q: ReqQueue,
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus")
            .field("id", &self.id)
            .field("devices", &self.slots.iter().map(|s| &s.name).collect::<Vec<_>>())
            .field("now", &self.now)
            .finish_non_exhaustive()
    }
}

impl Bus {
    /// Creates an empty bus.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::InvalidGeometry`] when `config` fails
    /// [`BusConfig::validate`].
    pub fn new(config: BusConfig) -> Result<Self, BusError> {
        config.validate()?;
        let bins = 1usize << (config.addr_size - config.decode_shift);
        Ok(Self {
            id: NEXT_BUS_ID.fetch_add(1, Ordering::Relaxed),
            addr_mask: width_mask(config.addr_size),
            data_mask: width_mask(config.data_size),
            decode_shift: config.decode_shift,
            read_bins: vec![Vec::new(); bins],
            write_bins: vec![Vec::new(); bins],
            slots: Vec::new(),
            tickable: Vec::new(),
            snoops: Vec::new(),
            now: 0,
            ticking: false,
            pending_reset: false,
            req_q: ReqQueue::new(),
        })
    }

    /// Global virtual time.
    #[must_use]
    pub const fn now(&self) -> u64 {
        self.now
    }

    /// Mask of valid data bits.
    #[must_use]
    pub const fn data_mask(&self) -> u32 {
        self.data_mask
    }

    /// Number of registered devices.
    #[must_use]
    pub fn device_count(&self) -> usize {
        self.slots.len()
    }

    /// The interrupt/bus-grant request queue feeding the CPU.
    #[must_use]
    pub const fn req_q(&self) -> &ReqQueue {
        &self.req_q
    }

    /// Mutable access to the request queue.
    pub const fn req_q_mut(&mut self) -> &mut ReqQueue {
        &mut self.req_q
    }

    fn granules(&self, lo: u32, hi: u32) -> std::ops::RangeInclusive<usize> {
        (lo >> self.decode_shift) as usize..=(hi >> self.decode_shift) as usize
    }

    fn check_range(&self, lo: u32, hi: u32) -> Result<(), BusError> {
        if lo > hi || hi > self.addr_mask {
            return Err(BusError::InvalidRange { lo, hi });
        }
        Ok(())
    }

    /// Registers an address-mapped device over `lo..=hi`.
    ///
    /// The device lands in the read table if it can read or peek, in the
    /// write table if it can write or poke, and in the tick list if it
    /// ticks. Nothing is modified when an error is returned.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::InvalidRange`] for an empty or out-of-space range
    /// and [`BusError::BinOverflow`] when a granule would exceed
    /// [`MAX_PERIPH_BIN`] entries.
    pub fn register(
        &mut self,
        dev: Box<dyn Device>,
        lo: u32,
        hi: u32,
        name: &str,
    ) -> Result<DeviceId, BusError> {
        self.check_range(lo, hi)?;
        let caps = dev.capabilities();
        let reads = caps.intersects(Capabilities::READ | Capabilities::PEEK);
        let writes = caps.intersects(Capabilities::WRITE | Capabilities::POKE);

        for bin in self.granules(lo, hi) {
            let full = (reads && self.read_bins[bin].len() >= MAX_PERIPH_BIN)
                || (writes && self.write_bins[bin].len() >= MAX_PERIPH_BIN);
            if full {
                return Err(BusError::BinOverflow {
                    addr: (bin as u32) << self.decode_shift,
                    capacity: MAX_PERIPH_BIN,
                });
            }
        }

        let index = self.slots.len();
        for bin in self.granules(lo, hi) {
            if reads {
                self.read_bins[bin].push(index);
            }
            if writes {
                self.write_bins[bin].push(Tap::Device(index));
            }
        }
        self.push_slot(dev, caps, name);
        debug!(device = name, lo, hi, ?caps, "registered device");
        Ok(DeviceId { bus: self.id, index })
    }

    /// Registers a clocked device with no address range.
    pub fn attach(&mut self, dev: Box<dyn Device>, name: &str) -> DeviceId {
        let caps = dev.capabilities();
        let index = self.slots.len();
        self.push_slot(dev, caps, name);
        debug!(device = name, ?caps, "attached device");
        DeviceId { bus: self.id, index }
    }

    fn push_slot(&mut self, dev: Box<dyn Device>, caps: Capabilities, name: &str) {
        let index = self.slots.len();
        if caps.contains(Capabilities::TICK) {
            self.tickable.push(index);
        }
        self.slots.push(Slot {
            name: name.to_owned(),
            base: dev.addr_base(),
            mask: dev.addr_mask(),
            dev: Some(dev),
            caps,
            now: self.now,
        });
    }

    /// Subscribes `snoop` to writes and pokes over `lo..=hi`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::AlreadyRegistered`] if the snoop log is attached
    /// to a different bus, plus the range and overflow errors of
    /// [`Bus::register`].
    pub fn attach_snoop(&mut self, snoop: &CacheSnoop, lo: u32, hi: u32) -> Result<(), BusError> {
        self.check_range(lo, hi)?;
        if !snoop.bind_bus(self.id) {
            return Err(BusError::AlreadyRegistered {
                name: "cache snoop".to_owned(),
            });
        }
        let index = self
            .snoops
            .iter()
            .position(|s| s.same_log(snoop))
            .unwrap_or(self.snoops.len());
        let tap = Tap::Snoop(index);
        for bin in self.granules(lo, hi) {
            if self.write_bins[bin].len() >= MAX_PERIPH_BIN && !self.write_bins[bin].contains(&tap) {
                return Err(BusError::BinOverflow {
                    addr: (bin as u32) << self.decode_shift,
                    capacity: MAX_PERIPH_BIN,
                });
            }
        }
        if index == self.snoops.len() {
            self.snoops.push(snoop.clone());
        }
        for bin in self.granules(lo, hi) {
            if !self.write_bins[bin].contains(&tap) {
                self.write_bins[bin].push(tap);
            }
        }
        debug!(lo, hi, "attached cache snoop");
        Ok(())
    }

    const fn bin_of(&self, addr: u32) -> usize {
        (addr >> self.decode_shift) as usize
    }

    /// Reads `addr`, AND-combining every responding device.
    pub fn read(&mut self, requester: Option<DeviceId>, addr: u32) -> u32 {
        let addr = addr & self.addr_mask;
        let mut data = self.data_mask;
        for &idx in &self.read_bins[self.bin_of(addr)] {
            let slot = &mut self.slots[idx];
            if !slot.caps.contains(Capabilities::READ) {
                continue;
            }
            let rel = slot.rel(addr);
            if let Some(dev) = slot.dev.as_mut() {
                data &= dev.read(rel, requester);
            }
        }
        data & self.data_mask
    }

    /// Writes `data` (masked to the bus width) to every responding device.
    pub fn write(&mut self, requester: Option<DeviceId>, addr: u32, data: u32) {
        let addr = addr & self.addr_mask;
        let data = data & self.data_mask;
        for &tap in &self.write_bins[self.bin_of(addr)] {
            match tap {
                Tap::Device(idx) => {
                    let slot = &mut self.slots[idx];
                    if !slot.caps.contains(Capabilities::WRITE) {
                        continue;
                    }
                    let rel = slot.rel(addr);
                    if let Some(dev) = slot.dev.as_mut() {
                        dev.write(rel, data, requester);
                    }
                }
                Tap::Snoop(idx) => self.snoops[idx].note_write(addr),
            }
        }
    }

    /// Debug read with no side effects.
    #[must_use]
    pub fn peek(&self, addr: u32) -> u32 {
        let addr = addr & self.addr_mask;
        let mut data = self.data_mask;
        for &idx in &self.read_bins[self.bin_of(addr)] {
            let slot = &self.slots[idx];
            if !slot.caps.contains(Capabilities::PEEK) {
                continue;
            }
            if let Some(dev) = slot.dev.as_ref() {
                data &= dev.peek(slot.rel(addr));
            }
        }
        data & self.data_mask
    }

    /// Forced debug write, reaching otherwise read-only devices.
    pub fn poke(&mut self, addr: u32, data: u32) {
        let addr = addr & self.addr_mask;
        let data = data & self.data_mask;
        for &tap in &self.write_bins[self.bin_of(addr)] {
            match tap {
                Tap::Device(idx) => {
                    let slot = &mut self.slots[idx];
                    if !slot.caps.contains(Capabilities::POKE) {
                        continue;
                    }
                    let rel = slot.rel(addr);
                    if let Some(dev) = slot.dev.as_mut() {
                        dev.poke(rel, data);
                    }
                }
                Tap::Snoop(idx) => self.snoops[idx].note_write(addr),
            }
        }
    }

    /// Advances global time by up to `len` cycles.
    ///
    /// Each round, the tightest constraint among candidate devices sets the
    /// step horizon; every eligible device is ticked toward it and its
    /// private clock advances by what it reports consuming. Rounds repeat
    /// until the target is reached or a round makes no progress. The
    /// elapsed time is returned; it is zero when no device was eligible.
    pub fn tick(&mut self, len: u64) -> TickResult {
        let start = self.now;
        let soon = start.saturating_add(len);
        let mut now = start;
        let mut suspended = false;
        self.ticking = true;

        loop {
            let Some(until) = self.step_horizon(soon) else {
                break;
            };
            let mut ticked = false;

            for i in 0..self.tickable.len() {
                let idx = self.tickable[i];
                let slot = &mut self.slots[idx];
                let dev_now = slot.now;
                let Some(mut dev) = slot.dev.take() else {
                    continue;
                };
                let step = until.saturating_sub(dev_now);
                if dev_now > soon || dev.min_tick() > step {
                    slot.dev = Some(dev);
                    continue;
                }
                let step = step.min(dev.max_tick());
                let result = dev.tick(self, dev_now, step);
                let slot = &mut self.slots[idx];
                slot.dev = Some(dev);
                slot.now = slot.now.saturating_add(result.consumed);
                ticked |= result.consumed != 0;
                if result.suspended {
                    trace!(device = %slot.name, now = slot.now, "device suspended tick");
                    suspended = true;
                    break;
                }
            }

            if suspended {
                break;
            }
            now = until;
            if now >= soon || !ticked {
                break;
            }
        }

        self.now = now;
        self.ticking = false;
        if self.pending_reset {
            self.reset();
        }
        TickResult {
            consumed: now - start,
            suspended,
        }
    }

    /// Returns the round horizon, or `None` when no device is a candidate.
    fn step_horizon(&self, soon: u64) -> Option<u64> {
        let mut until = soon;
        let mut candidates = 0usize;
        for &idx in &self.tickable {
            let slot = &self.slots[idx];
            let Some(dev) = slot.dev.as_ref() else {
                continue;
            };
            if slot.now.saturating_add(dev.min_tick()) >= until {
                continue;
            }
            until = until.min(slot.now.saturating_add(dev.max_tick()));
            candidates += 1;
        }
        (candidates != 0).then_some(until)
    }

    /// Resets every device in registration order and clears the request
    /// queue. A reset requested during a tick is deferred to its end.
    pub fn reset(&mut self) {
        if self.ticking {
            self.pending_reset = true;
            return;
        }
        for slot in &mut self.slots {
            if let Some(dev) = slot.dev.as_mut() {
                dev.reset();
            }
        }
        self.req_q.clear();
        self.pending_reset = false;
        debug!(now = self.now, "bus reset");
    }

    /// Whether a reset is waiting for the current tick to finish.
    #[must_use]
    pub const fn reset_pending(&self) -> bool {
        self.pending_reset
    }

    fn slot(&self, id: DeviceId) -> Result<&Slot, BusError> {
        if id.bus != self.id {
            return Err(BusError::ForeignDevice);
        }
        self.slots.get(id.index).ok_or(BusError::UnknownDevice(id.index))
    }

    /// Registration name of a device.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::ForeignDevice`] or [`BusError::UnknownDevice`]
    /// for ids that do not name a device on this bus.
    pub fn name(&self, id: DeviceId) -> Result<&str, BusError> {
        self.slot(id).map(|slot| slot.name.as_str())
    }

    /// Private clock of a device.
    ///
    /// # Errors
    ///
    /// Same as [`Bus::name`].
    pub fn device_now(&self, id: DeviceId) -> Result<u64, BusError> {
        self.slot(id).map(|slot| slot.now)
    }

    /// Borrows a device as its concrete type.
    ///
    /// # Errors
    ///
    /// Same as [`Bus::name`], plus [`BusError::DeviceBusy`] while the
    /// device is being ticked and [`BusError::TypeMismatch`] when it is
    /// not a `T`.
    pub fn device<T: Device>(&self, id: DeviceId) -> Result<&T, BusError> {
        let slot = self.slot(id)?;
        let dev = slot
            .dev
            .as_ref()
            .ok_or_else(|| BusError::DeviceBusy(slot.name.clone()))?;
        dev.as_any()
            .downcast_ref::<T>()
            .ok_or_else(|| BusError::TypeMismatch(slot.name.clone()))
    }

    /// Mutably borrows a device as its concrete type.
    ///
    /// # Errors
    ///
    /// Same as [`Bus::device`].
    pub fn device_mut<T: Device>(&mut self, id: DeviceId) -> Result<&mut T, BusError> {
        if id.bus != self.id {
            return Err(BusError::ForeignDevice);
        }
        let slot = self
            .slots
            .get_mut(id.index)
            .ok_or(BusError::UnknownDevice(id.index))?;
        let name = &slot.name;
        let dev = slot
            .dev
            .as_mut()
            .ok_or_else(|| BusError::DeviceBusy(name.clone()))?;
        dev.as_any_mut()
            .downcast_mut::<T>()
            .ok_or_else(|| BusError::TypeMismatch(name.clone()))
    }

    /// Detaches a device and runs `f` with both the device and the bus,
    /// the way a tick does. Accesses `f` makes through the bus skip the
    /// detached device.
    ///
    /// # Errors
    ///
    /// Same as [`Bus::device`]. The device is restored either way.
    pub fn with_device<T: Device, R>(
        &mut self,
        id: DeviceId,
        f: impl FnOnce(&mut T, &mut Self) -> R,
    ) -> Result<R, BusError> {
        let slot = self.slot(id)?;
        let name = slot.name.clone();
        let mut dev = self.slots[id.index]
            .dev
            .take()
            .ok_or_else(|| BusError::DeviceBusy(name.clone()))?;
        let result = dev
            .as_any_mut()
            .downcast_mut::<T>()
            .map(|typed| f(typed, self));
        self.slots[id.index].dev = Some(dev);
        result.ok_or(BusError::TypeMismatch(name))
    }
}

impl Drop for Bus {
    fn drop(&mut self) {
        for slot in &mut self.slots {
            if let Some(dev) = slot.dev.as_mut() {
                dev.destroy();
            }
        }
    }
}
