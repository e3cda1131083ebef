//! Page-switched 4K memory windows.
//!
//! Several devices may share one 4K window, each answering only while its
//! page is selected. Writing `0xRA5P` to the last address of a window
//! whose upper nibble is `R` selects page `P` across that window; every
//! switch drops the CPU's cached decodes for the affected range.

#![allow(clippy::cast_possible_truncation)]

use std::any::Any;

use tracing::trace;

use super::{width_mask, MemoryKind};
use crate::bus::{CacheSnoop, Capabilities, Device, DeviceId};
use crate::fault::{BusError, SnapshotError};
use crate::snapshot::{join, FieldFlags, Radix, SnapshotRegistry};

/// Words in one switchable window.
pub const PAGE_WINDOW: u32 = 0x1000;

const WINDOW_MASK: u32 = PAGE_WINDOW - 1;

/// One page of a switchable window.
#[derive(Debug, Clone)]
pub struct PagedMemory {
    kind: MemoryKind,
    base: u32,
    page: u8,
    page_sel: u8,
    data_mask: u16,
    image: Vec<u16>,
    snoop: Option<CacheSnoop>,
}

impl PagedMemory {
    /// Read-only page `page` of the window at `base`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::InvalidRange`] when `base` is not 4K aligned.
    pub fn rom(width: u8, base: u32, page: u8, image: &[u16]) -> Result<Self, BusError> {
        let mut mem = Self::build(MemoryKind::Rom, width, base, page)?;
        for (dst, &src) in mem.image.iter_mut().zip(image) {
            *dst = src & mem.data_mask;
        }
        Ok(mem)
    }

    /// Zero-filled read-write page `page` of the window at `base`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::InvalidRange`] when `base` is not 4K aligned.
    pub fn ram(width: u8, base: u32, page: u8) -> Result<Self, BusError> {
        Self::build(MemoryKind::Ram, width, base, page)
    }

    fn build(kind: MemoryKind, width: u8, base: u32, page: u8) -> Result<Self, BusError> {
        if base & WINDOW_MASK != 0 {
            return Err(BusError::InvalidRange {
                lo: base,
                hi: base | WINDOW_MASK,
            });
        }
        Ok(Self {
            kind,
            base,
            page: page & 0xF,
            page_sel: 0,
            data_mask: width_mask(width),
            image: vec![0; PAGE_WINDOW as usize],
            snoop: None,
        })
    }

    /// Reports bank switches and writes to `snoop`, normally a clone of
    /// [`Cpu::snoop`](crate::cpu::Cpu::snoop).
    #[must_use]
    pub fn with_snoop(mut self, snoop: CacheSnoop) -> Self {
        self.snoop = Some(snoop);
        self
    }

    /// First and last bus address of the window.
    #[must_use]
    pub const fn span(&self) -> (u32, u32) {
        (self.base, self.base | WINDOW_MASK)
    }

    /// Page this device holds.
    #[must_use]
    pub const fn page(&self) -> u8 {
        self.page
    }

    /// Page currently selected in the window.
    #[must_use]
    pub const fn selected(&self) -> u8 {
        self.page_sel
    }

    const fn is_selected(&self) -> bool {
        self.page == self.page_sel
    }

    fn invalidate(&self, lo: u32, hi: u32) {
        if let Some(snoop) = &self.snoop {
            snoop.invalidate(lo, hi);
        }
    }

    /// Handles the page-select magic, returning whether `data` was one.
    fn switch(&mut self, addr: u32, data: u32) -> bool {
        if addr & WINDOW_MASK != WINDOW_MASK || ((addr | self.base) & 0xFA50) != (data & 0xFFF0) {
            return false;
        }
        let range = (data >> 12) & 0xF;
        self.page_sel = (data & 0xF) as u8;
        self.invalidate(range << 12, (range << 12) | WINDOW_MASK);
        trace!(range, page = self.page_sel, "page switch");
        true
    }

    fn store(&mut self, addr: u32, data: u32) {
        if !self.is_selected() {
            return;
        }
        let rel = addr & WINDOW_MASK;
        self.image[rel as usize] = (data as u16) & self.data_mask;
        let full = self.base | rel;
        self.invalidate(full, full);
    }

    /// Publishes the page selection and, for RAM, the contents.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError`] for a malformed or taken path.
    pub fn register_snapshot(
        &self,
        registry: &mut SnapshotRegistry,
        prefix: &str,
    ) -> Result<(), SnapshotError> {
        registry.register_scalar(
            &join(prefix, "page_sel"),
            u64::from(self.page_sel),
            Radix::Decimal,
            FieldFlags::MANDATORY,
        )?;
        registry.register_scalar(
            &join(prefix, "page"),
            u64::from(self.page),
            Radix::Decimal,
            FieldFlags::INIT_ONLY,
        )?;
        if self.kind == MemoryKind::Ram {
            registry.register_array(
                &join(prefix, "image"),
                self.image.iter().map(|&w| u64::from(w)),
                Radix::Hex,
                FieldFlags::MANDATORY,
            )?;
        }
        Ok(())
    }
}

impl Device for PagedMemory {
    fn capabilities(&self) -> Capabilities {
        Capabilities::MEMORY
    }

    fn addr_base(&self) -> u32 {
        self.base
    }

    fn addr_mask(&self) -> u32 {
        WINDOW_MASK
    }

    fn read(&mut self, addr: u32, _requester: Option<DeviceId>) -> u32 {
        self.peek(addr)
    }

    fn write(&mut self, addr: u32, data: u32, _requester: Option<DeviceId>) {
        if self.switch(addr, data) {
            return;
        }
        if self.kind == MemoryKind::Ram {
            self.store(addr, data);
        }
    }

    fn peek(&self, addr: u32) -> u32 {
        if self.is_selected() {
            u32::from(self.image[(addr & WINDOW_MASK) as usize] & self.data_mask)
        } else {
            u32::MAX
        }
    }

    fn poke(&mut self, addr: u32, data: u32) {
        self.store(addr, data);
    }

    fn reset(&mut self) {
        self.page_sel = 0;
        self.invalidate(self.base, self.base | WINDOW_MASK);
    }

    fn min_tick(&self) -> u64 {
        u64::MAX
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
