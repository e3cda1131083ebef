use thiserror::Error;

/// Broad classes used when counting and reporting anomalies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum FaultClass {
    /// Bus or device setup was rejected.
    Configuration,
    /// The decoder saw a word it could not turn into an instruction.
    Decode,
    /// Timing or request-queue bookkeeping went out of order.
    Timing,
    /// Guest code misused a host-facing convention.
    Guest,
}

/// Soft anomalies observed while the core runs.
///
/// None of these stop the simulation. The CPU logs each one through
/// `tracing` and keeps a per-code counter so hosts and tests can observe
/// them without scraping logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u8)]
pub enum Anomaly {
    /// Decode produced no valid execute handler.
    #[error("invalid instruction encoding")]
    InvalidOpcode = 0x01,
    /// Fetch returned the all-ones pattern of an undriven bus.
    #[error("instruction fetch from unmapped memory")]
    UnmappedFetch = 0x02,
    /// A queued request expired before the CPU could observe it.
    #[error("bus request dropped after its span ended")]
    MissedRequest = 0x03,
    /// `MVO` was executed directly after `SDBD`.
    #[error("store issued with double-byte-data prefix")]
    PrefixedStore = 0x04,
    /// `HLT` was executed.
    #[error("processor halted")]
    Halted = 0x05,
    /// A host call was issued with an unknown call number.
    #[error("unknown host call number")]
    BadTrapCall = 0x06,
}

impl Anomaly {
    /// Number of distinct anomaly codes.
    pub const COUNT: usize = 6;

    /// Every anomaly in code order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::InvalidOpcode,
        Self::UnmappedFetch,
        Self::MissedRequest,
        Self::PrefixedStore,
        Self::Halted,
        Self::BadTrapCall,
    ];

    /// Stable numeric code.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Converts a stable numeric code back into an anomaly.
    #[must_use]
    pub const fn from_u8(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Self::InvalidOpcode),
            0x02 => Some(Self::UnmappedFetch),
            0x03 => Some(Self::MissedRequest),
            0x04 => Some(Self::PrefixedStore),
            0x05 => Some(Self::Halted),
            0x06 => Some(Self::BadTrapCall),
            _ => None,
        }
    }

    /// Zero-based slot used by per-code counters.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize - 1
    }

    /// Returns the class this anomaly is reported under.
    #[must_use]
    pub const fn class(self) -> FaultClass {
        match self {
            Self::InvalidOpcode | Self::UnmappedFetch => FaultClass::Decode,
            Self::MissedRequest => FaultClass::Timing,
            Self::PrefixedStore | Self::Halted | Self::BadTrapCall => FaultClass::Guest,
        }
    }
}

/// Errors raised while building or wiring a bus.
///
/// These are configuration mistakes. Hosts are expected to treat them as
/// fatal and abort setup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
pub enum BusError {
    /// Too many devices overlap on one address-decode granule.
    #[error("decode bin for address {addr:#06x} is full ({capacity} entries)")]
    BinOverflow {
        /// First address of the overflowing granule.
        addr: u32,
        /// Fixed bin capacity.
        capacity: usize,
    },
    /// A device or snoop handle already belongs to a different bus.
    #[error("'{name}' is already registered on another bus")]
    AlreadyRegistered {
        /// Registration name.
        name: String,
    },
    /// A device id minted by another bus was used on this one.
    #[error("device id belongs to another bus")]
    ForeignDevice,
    /// A device id does not name a registered device.
    #[error("no device registered with index {0}")]
    UnknownDevice(usize),
    /// The device is detached while it is being ticked.
    #[error("device '{0}' is busy")]
    DeviceBusy(String),
    /// The device is not of the requested type.
    #[error("device '{0}' has a different type")]
    TypeMismatch(String),
    /// The requested bus geometry cannot be represented.
    #[error(
        "invalid bus geometry: addr_size={addr_size} data_size={data_size} decode_shift={decode_shift}"
    )]
    InvalidGeometry {
        /// Address width in bits.
        addr_size: u32,
        /// Data width in bits.
        data_size: u32,
        /// log2 of the decode granule.
        decode_shift: u32,
    },
    /// The registration range is empty or outside the address space.
    #[error("invalid address range {lo:#x}..={hi:#x}")]
    InvalidRange {
        /// Low address.
        lo: u32,
        /// High address.
        hi: u32,
    },
}

impl BusError {
    /// All bus errors are configuration errors.
    #[must_use]
    pub const fn class(&self) -> FaultClass {
        FaultClass::Configuration
    }
}

/// Errors raised by the bus-request queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum RequestError {
    /// The fixed-depth queue has no free entry.
    #[error("request queue is full")]
    QueueFull,
    /// The request starts before the last queued request.
    #[error("request at {start} precedes queued request at {last}")]
    OutOfOrder {
        /// Start cycle of the rejected request.
        start: u64,
        /// Start cycle of the newest queued request.
        last: u64,
    },
    /// The request ends before it starts.
    #[error("request span {start}..{end} is empty")]
    EmptySpan {
        /// Start cycle.
        start: u64,
        /// End cycle.
        end: u64,
    },
}

/// Host-call dispatch failures. The guest sees these as `C = 1`,
/// `R0 = 0xFFFF`; they never reach the host as errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum TrapError {
    /// No host call is registered under the requested number.
    #[error("no host call registered as #{0}")]
    BadCall(u16),
}

impl TrapError {
    /// Anomaly recorded for this failure.
    #[must_use]
    pub const fn anomaly(self) -> Anomaly {
        match self {
            Self::BadCall(_) => Anomaly::BadTrapCall,
        }
    }
}

/// Errors raised while registering snapshot fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
pub enum SnapshotError {
    /// The same path was registered twice.
    #[error("snapshot field '{0}' is already registered")]
    DuplicateField(String),
    /// The path is empty or contains an empty component.
    #[error("invalid snapshot path '{0}'")]
    InvalidPath(String),
    /// No field with this path exists.
    #[error("no snapshot field '{0}'")]
    UnknownField(String),
    /// The value shape does not match the registered field.
    #[error("snapshot field '{0}' expects a different shape")]
    ShapeMismatch(String),
}
