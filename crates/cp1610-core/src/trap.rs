//! Host-call dispatch triggered by `SIN`.
//!
//! Guest code loads [`TRAP_SIGNATURE`] into `R0` and a call number into
//! `R1`, puts arguments in `R2..R5`, then executes `SIN`. A registered
//! call returns its result in `R0` and reports failure through `C`.
//! Without the signature `SIN` stays a no-op.

use tracing::{debug, warn};

use crate::api::MemoryPort;
use crate::fault::TrapError;
use crate::state::Registers;

/// Magic value `R0` must hold for `SIN` to dispatch.
pub const TRAP_SIGNATURE: u16 = 0x4A5A;

/// Result `R0` receives when the call number is not registered.
pub const BAD_CALL_RESULT: u16 = 0xFFFF;

/// Call number of the built-in presence check.
pub const PING_CALL: u16 = 0;

/// Value returned by a host call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrapOutcome {
    /// Written to `R0`.
    pub result: u16,
    /// Written to `C`.
    pub fail: bool,
}

impl TrapOutcome {
    /// A successful call.
    #[must_use]
    pub const fn ok(result: u16) -> Self {
        Self {
            result,
            fail: false,
        }
    }

    /// A failed call.
    #[must_use]
    pub const fn failed(result: u16) -> Self {
        Self { result, fail: true }
    }
}

/// A host function reachable from guest code.
pub trait HostCall {
    /// Runs the call. Arguments and secondary results travel in `regs`.
    fn call(&mut self, regs: &mut Registers, mem: &mut dyn MemoryPort) -> TrapOutcome;
}

impl<F> HostCall for F
where
    F: FnMut(&mut Registers, &mut dyn MemoryPort) -> TrapOutcome,
{
    fn call(&mut self, regs: &mut Registers, mem: &mut dyn MemoryPort) -> TrapOutcome {
        self(regs, mem)
    }
}

fn ping(_: &mut Registers, _: &mut dyn MemoryPort) -> TrapOutcome {
    TrapOutcome::ok(0)
}

/// Numbered host-call table owned by one CPU.
pub struct TrapTable {
    slots: Vec<Option<Box<dyn HostCall>>>,
}

impl std::fmt::Debug for TrapTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registered: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|_| i))
            .collect();
        f.debug_struct("TrapTable")
            .field("registered", &registered)
            .finish()
    }
}

impl Default for TrapTable {
    fn default() -> Self {
        Self::new()
    }
}

impl TrapTable {
    /// Creates a table holding only the ping call.
    #[must_use]
    pub fn new() -> Self {
        let mut slots: Vec<Option<Box<dyn HostCall>>> = Vec::with_capacity(16);
        slots.push(Some(Box::new(ping)));
        Self { slots }
    }

    /// Installs `call` as number `callno`, growing the table as needed.
    /// Replacing an existing call is allowed but logged.
    pub fn register(&mut self, callno: u16, call: impl HostCall + 'static) {
        let slot = usize::from(callno);
        if slot >= self.slots.len() {
            self.slots.resize_with(slot + 1, || None);
        }
        if self.slots[slot].is_some() {
            warn!(callno, "host call reassigned");
        } else {
            debug!(callno, "host call registered");
        }
        self.slots[slot] = Some(Box::new(call));
    }

    /// Whether a call is registered under `callno`.
    #[must_use]
    pub fn is_registered(&self, callno: u16) -> bool {
        self.slots
            .get(usize::from(callno))
            .is_some_and(Option::is_some)
    }

    /// Runs the call selected by `R1`, if `R0` carries the signature.
    ///
    /// Returns `Ok(false)` when the signature is absent and `SIN` is a
    /// no-op. An unknown call number sets `C`, loads
    /// [`BAD_CALL_RESULT`] into `R0` and reports the error.
    ///
    /// # Errors
    ///
    /// Returns [`TrapError::BadCall`] when no call is registered under
    /// `R1`. The guest-visible registers have already been updated.
    pub fn dispatch(
        &mut self,
        regs: &mut Registers,
        mem: &mut dyn MemoryPort,
    ) -> Result<bool, TrapError> {
        if regs.r[0] != TRAP_SIGNATURE {
            return Ok(false);
        }
        let callno = regs.r[1];
        let Some(Some(call)) = self.slots.get_mut(usize::from(callno)) else {
            regs.c = true;
            regs.r[0] = BAD_CALL_RESULT;
            return Err(TrapError::BadCall(callno));
        };
        let outcome = call.call(regs, mem);
        regs.r[0] = outcome.result;
        regs.c = outcome.fail;
        Ok(true)
    }
}
