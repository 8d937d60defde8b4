use nic_buffers::BufferError;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Error {
    /// DMA memory, or a device-reachable address for it, was unavailable.
    Allocation,
    /// A buffer that must be one physical segment was not.
    FragmentedBuffer,
    /// A packet had more segments than the transmit path allows and could not be coalesced.
    Segmentation,
    /// A self-clearing bit or status condition did not settle in time.
    HardwareTimeout(&'static str),
    /// The medium index is outside the medium table.
    InvalidMedium,
    /// A configuration value is out of range.
    InvalidConfig(&'static str),
    /// The device or the requested feature is not supported.
    Unsupported(&'static str),
    /// The operation needs the hardware to be active.
    NotActive,
    /// The PCI function is held by another client.
    DeviceBusy,
    /// Registering an interrupt or timer callback failed.
    EventSource(&'static str),
}

impl From<BufferError> for Error {
    fn from(e: BufferError) -> Self {
        match e {
            BufferError::Fragmented => Error::FragmentedBuffer,
            BufferError::TooManySegments => Error::Segmentation,
            BufferError::OutOfMemory
            | BufferError::AddressUnreachable
            | BufferError::InvalidSize => Error::Allocation,
        }
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::Allocation => f.write_str("couldn't allocate DMA memory"),
            Error::FragmentedBuffer => f.write_str("buffer is not physically contiguous"),
            Error::Segmentation => f.write_str("packet has too many segments"),
            Error::HardwareTimeout(what) => write!(f, "timed out waiting for {}", what),
            Error::InvalidMedium => f.write_str("no such medium"),
            Error::InvalidConfig(what) => write!(f, "invalid configuration: {}", what),
            Error::Unsupported(what) => write!(f, "unsupported: {}", what),
            Error::NotActive => f.write_str("hardware is not active"),
            Error::DeviceBusy => f.write_str("PCI device is held by another client"),
            Error::EventSource(what) => write!(f, "couldn't register event source: {}", what),
        }
    }
}
