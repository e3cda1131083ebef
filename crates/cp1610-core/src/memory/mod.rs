//! Plain RAM and ROM devices.
//!
//! Contents are stored as 16-bit words and masked to the device width
//! (8, 10 and 16 bits are the common cases, any width up to 16 works).
//! ROM ignores bus writes but accepts pokes, so debuggers can patch it.

#![allow(clippy::cast_possible_truncation)]

mod paged;

pub use paged::{PagedMemory, PAGE_WINDOW};

use std::any::Any;

use rand_chacha::rand_core::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::bus::{Capabilities, Device, DeviceId};
use crate::fault::SnapshotError;
use crate::snapshot::{join, FieldFlags, FieldValue, Radix, SnapshotRegistry};

/// Whether normal bus writes reach the contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum MemoryKind {
    /// Read-only; pokes still land.
    Rom,
    /// Read-write.
    Ram,
}

/// Mask selecting the low `width` bits, with `width` clamped to `1..=16`.
#[must_use]
pub const fn width_mask(width: u8) -> u16 {
    let width = if width == 0 {
        1
    } else if width > 16 {
        16
    } else {
        width
    };
    (u32::MAX >> (32 - width as u32)) as u16
}

/// A linear block of memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Memory {
    kind: MemoryKind,
    base: u32,
    addr_mask: u32,
    data_mask: u16,
    image: Vec<u16>,
}

impl Memory {
    /// ROM holding `image` at `base`. Addresses past the end of the image
    /// float high.
    #[must_use]
    pub fn rom(width: u8, base: u32, image: Vec<u16>) -> Self {
        let data_mask = width_mask(width);
        let image = image.into_iter().map(|w| w & data_mask).collect();
        Self::build(MemoryKind::Rom, base, data_mask, image)
    }

    /// Zero-filled RAM of `len` words at `base`.
    #[must_use]
    pub fn ram(width: u8, base: u32, len: usize) -> Self {
        Self::build(MemoryKind::Ram, base, width_mask(width), vec![0; len])
    }

    fn build(kind: MemoryKind, base: u32, data_mask: u16, image: Vec<u16>) -> Self {
        let addr_mask = image
            .len()
            .max(1)
            .next_power_of_two()
            .saturating_sub(1)
            .try_into()
            .unwrap_or(u32::MAX);
        Self {
            kind,
            base,
            addr_mask,
            data_mask,
            image,
        }
    }

    /// Fills the contents with a reproducible garbage pattern, modelling
    /// uninitialized RAM at power-up.
    #[must_use]
    pub fn with_random_fill(mut self, seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        for word in &mut self.image {
            *word = (rng.next_u32() as u16) & self.data_mask;
        }
        self
    }

    /// ROM or RAM.
    #[must_use]
    pub const fn kind(&self) -> MemoryKind {
        self.kind
    }

    /// Mask of stored data bits.
    #[must_use]
    pub const fn data_mask(&self) -> u16 {
        self.data_mask
    }

    /// First and last bus address covered by the image.
    #[must_use]
    pub fn span(&self) -> (u32, u32) {
        let len = u32::try_from(self.image.len().max(1)).unwrap_or(u32::MAX);
        (self.base, self.base.saturating_add(len - 1))
    }

    /// Current contents.
    #[must_use]
    pub fn image(&self) -> &[u16] {
        &self.image
    }

    fn load(&self, addr: u32) -> u32 {
        self.image
            .get(addr as usize)
            .map_or(u32::MAX, |&w| u32::from(w & self.data_mask))
    }

    fn store(&mut self, addr: u32, data: u32) {
        if let Some(word) = self.image.get_mut(addr as usize) {
            *word = (data as u16) & self.data_mask;
        }
    }

    /// Publishes RAM contents under `prefix`. ROM images are supplied by
    /// the host on construction and are not recorded.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError`] for a malformed or taken path.
    pub fn register_snapshot(
        &self,
        registry: &mut SnapshotRegistry,
        prefix: &str,
    ) -> Result<(), SnapshotError> {
        if self.kind == MemoryKind::Rom {
            return Ok(());
        }
        registry.register_array(
            &join(prefix, "image"),
            self.image.iter().map(|&w| u64::from(w)),
            Radix::Hex,
            FieldFlags::MANDATORY,
        )
    }

    /// Loads RAM contents published by [`Memory::register_snapshot`].
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::UnknownField`] when the image is missing
    /// and [`SnapshotError::ShapeMismatch`] when its length differs.
    pub fn restore_snapshot(
        &mut self,
        registry: &SnapshotRegistry,
        prefix: &str,
    ) -> Result<(), SnapshotError> {
        if self.kind == MemoryKind::Rom {
            return Ok(());
        }
        let path = join(prefix, "image");
        let field = registry.get(&path)?;
        let FieldValue::Array(words) = &field.value else {
            return Err(SnapshotError::ShapeMismatch(path));
        };
        if words.len() != self.image.len() {
            return Err(SnapshotError::ShapeMismatch(path));
        }
        for (dst, &src) in self.image.iter_mut().zip(words) {
            *dst = (src as u16) & self.data_mask;
        }
        Ok(())
    }
}

impl Device for Memory {
    fn capabilities(&self) -> Capabilities {
        match self.kind {
            MemoryKind::Rom => Capabilities::READ | Capabilities::PEEK | Capabilities::POKE,
            MemoryKind::Ram => Capabilities::MEMORY,
        }
    }

    fn addr_base(&self) -> u32 {
        self.base
    }

    fn addr_mask(&self) -> u32 {
        self.addr_mask
    }

    fn read(&mut self, addr: u32, _requester: Option<DeviceId>) -> u32 {
        self.load(addr)
    }

    fn write(&mut self, addr: u32, data: u32, _requester: Option<DeviceId>) {
        if self.kind == MemoryKind::Ram {
            self.store(addr, data);
        }
    }

    fn peek(&self, addr: u32) -> u32 {
        self.load(addr)
    }

    fn poke(&mut self, addr: u32, data: u32) {
        self.store(addr, data);
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

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::{width_mask, Memory, MemoryKind};
    use crate::bus::{Bus, BusConfig};
    use crate::snapshot::SnapshotRegistry;

    fn bus() -> Bus {
        Bus::new(BusConfig::default()).expect("default geometry")
    }

    #[rstest]
    #[case(8, 0x00FF)]
    #[case(10, 0x03FF)]
    #[case(12, 0x0FFF)]
    #[case(16, 0xFFFF)]
    #[case(0, 0x0001)]
    #[case(40, 0xFFFF)]
    fn widths_mask_stored_data(#[case] width: u8, #[case] mask: u16) {
        assert_eq!(width_mask(width), mask);
        let mut bus = bus();
        let ram = Memory::ram(width, 0x0100, 0x100);
        let (lo, hi) = ram.span();
        bus.register(Box::new(ram), lo, hi, "ram").expect("register");
        bus.write(None, 0x0123, 0xFFFF);
        assert_eq!(bus.read(None, 0x0123), u32::from(mask));
    }

    #[test]
    fn rom_ignores_writes_but_takes_pokes() {
        let mut bus = bus();
        let rom = Memory::rom(10, 0x5000, vec![0x0123, 0x0FFF]);
        assert_eq!(rom.kind(), MemoryKind::Rom);
        assert_eq!(rom.image(), [0x0123, 0x03FF]);
        let (lo, hi) = rom.span();
        assert_eq!((lo, hi), (0x5000, 0x5001));
        bus.register(Box::new(rom), lo, hi, "rom").expect("register");

        bus.write(None, 0x5000, 0x0001);
        assert_eq!(bus.read(None, 0x5000), 0x0123);
        bus.poke(0x5000, 0x0001);
        assert_eq!(bus.peek(0x5000), 0x0001);
    }

    #[test]
    fn random_fill_is_reproducible_and_masked() {
        let a = Memory::ram(8, 0, 64).with_random_fill(3);
        let b = Memory::ram(8, 0, 64).with_random_fill(3);
        assert_eq!(a, b);
        assert!(a.image().iter().all(|&w| w <= 0xFF));
        assert!(a.image().iter().any(|&w| w != 0));
    }

    #[test]
    fn ram_snapshot_restores_contents() {
        let mut ram = Memory::ram(16, 0, 4);
        ram.poke_words(&[1, 2, 3, 4]);
        let mut registry = SnapshotRegistry::new();
        ram.register_snapshot(&mut registry, "sys.ram").expect("register");

        let mut other = Memory::ram(16, 0, 4);
        other.restore_snapshot(&registry, "sys.ram").expect("restore");
        assert_eq!(other.image(), [1, 2, 3, 4]);

        let mut short = Memory::ram(16, 0, 2);
        assert!(short.restore_snapshot(&registry, "sys.ram").is_err());
    }

    impl Memory {
        fn poke_words(&mut self, words: &[u16]) {
            for (addr, &w) in (0u32..).zip(words) {
                self.store(addr, u32::from(w));
            }
        }
    }
}
