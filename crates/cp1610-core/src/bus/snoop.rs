//! Write-snoop channel used to keep the CPU decode cache coherent.
//!
//! The bus and paged memory devices hold clones of the CPU's
//! [`CacheSnoop`]. They record invalidation ranges; the CPU applies them
//! before its next fetch.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Storage units before and after a written address whose cached decode
/// may overlap it.
pub const SNOOP_WINDOW: u32 = 3;

#[derive(Debug, Default)]
struct SnoopLog {
    dirty: Cell<bool>,
    pending: RefCell<Vec<(u32, u32)>>,
    bus: Cell<Option<u32>>,
    limit: Cell<u32>,
}

/// Shared handle onto a pending-invalidation log.
#[derive(Debug, Clone)]
pub struct CacheSnoop {
    log: Rc<SnoopLog>,
}

impl Default for CacheSnoop {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheSnoop {
    /// Creates an empty log covering a 16-bit address space.
    #[must_use]
    pub fn new() -> Self {
        let log = SnoopLog::default();
        log.limit.set(0xFFFF);
        Self { log: Rc::new(log) }
    }

    /// Records a write at `addr`, invalidating the surrounding window.
    pub fn note_write(&self, addr: u32) {
        let lo = addr.saturating_sub(SNOOP_WINDOW);
        let hi = addr.saturating_add(SNOOP_WINDOW);
        self.invalidate(lo, hi);
    }

    /// Records an invalidation of `lo..=hi`.
    pub fn invalidate(&self, lo: u32, hi: u32) {
        let limit = self.log.limit.get();
        if lo > limit || lo > hi {
            return;
        }
        self.log.pending.borrow_mut().push((lo, hi.min(limit)));
        self.log.dirty.set(true);
    }

    /// Whether invalidations are waiting to be applied.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.log.dirty.get()
    }

    /// Whether a pending range covers `addr`.
    #[must_use]
    pub fn covers(&self, addr: u32) -> bool {
        self.is_dirty()
            && self
                .log
                .pending
                .borrow()
                .iter()
                .any(|&(lo, hi)| lo <= addr && addr <= hi)
    }

    /// Takes every pending range.
    pub fn drain(&self) -> Vec<(u32, u32)> {
        self.log.dirty.set(false);
        std::mem::take(&mut *self.log.pending.borrow_mut())
    }

    /// Whether both handles share one log.
    #[must_use]
    pub fn same_log(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.log, &other.log)
    }

    pub(crate) fn bind_bus(&self, bus_id: u32) -> bool {
        match self.log.bus.get() {
            Some(bound) => bound == bus_id,
            None => {
                self.log.bus.set(Some(bus_id));
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::CacheSnoop;

    #[test]
    fn writes_record_a_window_around_the_address() {
        let snoop = CacheSnoop::new();
        assert!(!snoop.is_dirty());
        snoop.note_write(0x1000);
        assert!(snoop.is_dirty());
        assert!(snoop.covers(0x0FFD) && snoop.covers(0x1003));
        assert!(!snoop.covers(0x1004));
        assert_eq!(snoop.drain(), vec![(0x0FFD, 0x1003)]);
        assert!(!snoop.covers(0x1000));
        assert!(!snoop.is_dirty());
    }

    #[test]
    fn window_is_clamped_to_the_address_space() {
        let snoop = CacheSnoop::new();
        snoop.note_write(1);
        snoop.note_write(0xFFFF);
        assert_eq!(snoop.drain(), vec![(0, 4), (0xFFFC, 0xFFFF)]);
    }

    #[test]
    fn clones_share_one_log() {
        let cpu_side = CacheSnoop::new();
        let mem_side = cpu_side.clone();
        mem_side.invalidate(0x5000, 0x5FFF);
        assert!(cpu_side.same_log(&mem_side));
        assert_eq!(cpu_side.drain(), vec![(0x5000, 0x5FFF)]);
    }

    #[test]
    fn a_log_binds_to_one_bus_only() {
        let snoop = CacheSnoop::new();
        assert!(snoop.bind_bus(1));
        assert!(snoop.bind_bus(1));
        assert!(!snoop.bind_bus(2));
    }
}
