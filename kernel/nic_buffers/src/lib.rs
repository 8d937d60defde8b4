//! Defines buffers that are used to send and receive packets,
//! along with the DMA memory contract those buffers are carved from.
//!
//! A NIC driver never maps memory itself. It asks a [`DmaAllocator`] for
//! physically-contiguous, device-visible regions ([`DmaMemory`]) and wraps them
//! in [`PacketBuffer`]s, which may span several such regions (fragments).

#![no_std]

extern crate alloc;
#[macro_use] extern crate log;

#[cfg(any(test, feature = "fake"))]
pub mod fake;


use core::fmt;
use core::ops::Add;
use alloc::{boxed::Box, vec::Vec};

/// A physical memory address as seen by a bus-mastering device.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct PhysicalAddress(usize);

impl PhysicalAddress {
    pub const fn new(addr: usize) -> PhysicalAddress {
        PhysicalAddress(addr)
    }

    pub const fn zero() -> PhysicalAddress {
        PhysicalAddress(0)
    }

    pub const fn value(&self) -> usize {
        self.0
    }

    /// Returns this address as a 32-bit bus address,
    /// or `None` if a 32-bit DMA engine cannot reach it.
    pub fn as_u32(&self) -> Option<u32> {
        u32::try_from(self.0).ok()
    }
}

impl Add<usize> for PhysicalAddress {
    type Output = PhysicalAddress;

    fn add(self, rhs: usize) -> PhysicalAddress {
        PhysicalAddress(self.0 + rhs)
    }
}

impl fmt::Debug for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "p{:#X}", self.0)
    }
}

impl fmt::Display for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl fmt::LowerHex for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl fmt::UpperHex for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::UpperHex::fmt(&self.0, f)
    }
}

/// The ways in which DMA memory and packet buffers can fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferError {
    /// The allocator could not provide the requested memory.
    OutOfMemory,
    /// The memory lies outside of what the device can address.
    AddressUnreachable,
    /// A single physically-contiguous segment was required, but the buffer has several.
    Fragmented,
    /// The buffer has more segments than the consumer supports and could not be coalesced.
    TooManySegments,
    /// A length or size argument was out of range.
    InvalidSize,
}

impl fmt::Display for BufferError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let msg = match self {
            BufferError::OutOfMemory => "out of DMA memory",
            BufferError::AddressUnreachable => "DMA memory is not reachable by the device",
            BufferError::Fragmented => "buffer is not physically contiguous",
            BufferError::TooManySegments => "buffer has too many physical segments",
            BufferError::InvalidSize => "invalid buffer size",
        };
        f.write_str(msg)
    }
}

pub type Result<T> = core::result::Result<T, BufferError>;

/// A region of memory that is physically contiguous and visible to a bus-mastering device.
///
/// Dropping the object returns the region to whoever allocated it.
pub trait DmaMemory: Send {
    /// The physical address of the first byte of this region.
    fn phys_addr(&self) -> PhysicalAddress;

    fn as_slice(&self) -> &[u8];

    fn as_slice_mut(&mut self) -> &mut [u8];

    fn size_in_bytes(&self) -> usize {
        self.as_slice().len()
    }
}

/// Hands out [`DmaMemory`] regions.
pub trait DmaAllocator: Send + Sync {
    /// Allocates a zeroed, physically contiguous region of at least `size_in_bytes`
    /// whose physical start address is a multiple of `alignment`.
    fn allocate(&self, size_in_bytes: usize, alignment: usize) -> Result<Box<dyn DmaMemory>>;
}

/// One physically-contiguous piece of a packet, as a device sees it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PhysicalSegment {
    pub addr: PhysicalAddress,
    pub length: usize,
}

struct Fragment {
    memory: Box<dyn DmaMemory>,
    length: usize,
}

/// A packet stored in one or more DMA regions.
///
/// Buffers obtained from [`PacketBuffer::new`] have exactly one fragment;
/// buffers handed down by a network stack may have several.
pub struct PacketBuffer {
    fragments: Vec<Fragment>,
}

impl PacketBuffer {
    /// Allocates a single-fragment buffer whose length and capacity are both `size_in_bytes`.
    pub fn new(allocator: &dyn DmaAllocator, size_in_bytes: usize) -> Result<PacketBuffer> {
        if size_in_bytes == 0 {
            return Err(BufferError::InvalidSize);
        }
        let memory = allocator.allocate(size_in_bytes, core::mem::size_of::<u32>())?;
        PacketBuffer::from_fragments(alloc::vec![(memory, size_in_bytes)])
    }

    /// Builds a buffer from existing regions, each paired with the number of valid bytes it holds.
    pub fn from_fragments(fragments: Vec<(Box<dyn DmaMemory>, usize)>) -> Result<PacketBuffer> {
        if fragments.is_empty() {
            return Err(BufferError::InvalidSize);
        }
        let mut frags = Vec::with_capacity(fragments.len());
        for (memory, length) in fragments {
            if length == 0 || length > memory.size_in_bytes() {
                return Err(BufferError::InvalidSize);
            }
            frags.push(Fragment { memory, length });
        }
        Ok(PacketBuffer { fragments: frags })
    }

    /// The total number of valid bytes across all fragments.
    pub fn len(&self) -> usize {
        self.fragments.iter().map(|f| f.length).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn fragment_count(&self) -> usize {
        self.fragments.len()
    }

    /// The number of bytes this buffer could hold if every fragment were full.
    pub fn capacity(&self) -> usize {
        self.fragments.iter().map(|f| f.memory.size_in_bytes()).sum()
    }

    /// Sets the length of a single-fragment buffer.
    ///
    /// Returns an error if the buffer is fragmented or `length` exceeds its capacity.
    pub fn set_length(&mut self, length: usize) -> Result<()> {
        match self.fragments.as_mut_slice() {
            [only] if length != 0 && length <= only.memory.size_in_bytes() => {
                only.length = length;
                Ok(())
            }
            [_] => Err(BufferError::InvalidSize),
            _ => Err(BufferError::Fragmented),
        }
    }

    /// The physical layout of this packet, one entry per fragment.
    pub fn physical_segments(&self) -> Vec<PhysicalSegment> {
        self.fragments.iter()
            .map(|f| PhysicalSegment { addr: f.memory.phys_addr(), length: f.length })
            .collect()
    }

    /// Returns the only physical segment of this buffer,
    /// or [`BufferError::Fragmented`] if there is more than one.
    pub fn single_segment(&self) -> Result<PhysicalSegment> {
        match self.fragments.as_slice() {
            [only] => Ok(PhysicalSegment { addr: only.memory.phys_addr(), length: only.length }),
            _ => Err(BufferError::Fragmented),
        }
    }

    /// Iterates over the valid bytes of each fragment in order.
    pub fn fragments(&self) -> impl Iterator<Item = &[u8]> + '_ {
        self.fragments.iter().map(|f| &f.memory.as_slice()[..f.length])
    }

    /// The valid bytes of a single-fragment buffer.
    pub fn as_slice(&self) -> Result<&[u8]> {
        match self.fragments.as_slice() {
            [only] => Ok(&only.memory.as_slice()[..only.length]),
            _ => Err(BufferError::Fragmented),
        }
    }

    /// The valid bytes of a single-fragment buffer, mutably.
    pub fn as_slice_mut(&mut self) -> Result<&mut [u8]> {
        match self.fragments.as_mut_slice() {
            [only] => {
                let length = only.length;
                Ok(&mut only.memory.as_slice_mut()[..length])
            }
            _ => Err(BufferError::Fragmented),
        }
    }

    /// Copies as much of this packet as fits into `dst`, returning the number of bytes copied.
    pub fn copy_to(&self, dst: &mut [u8]) -> usize {
        let mut copied = 0;
        for frag in self.fragments() {
            let n = core::cmp::min(frag.len(), dst.len() - copied);
            dst[copied..copied + n].copy_from_slice(&frag[..n]);
            copied += n;
            if copied == dst.len() {
                break;
            }
        }
        copied
    }

    /// Returns a buffer with at most `max_segments` fragments.
    ///
    /// If `self` already fits it is returned unchanged; otherwise its contents
    /// are copied into one freshly allocated contiguous region and `self` is freed.
    /// On failure the packet is consumed and dropped.
    pub fn coalesce(self, allocator: &dyn DmaAllocator, max_segments: usize) -> Result<PacketBuffer> {
        if self.fragment_count() <= max_segments {
            return Ok(self);
        }
        if max_segments == 0 {
            return Err(BufferError::TooManySegments);
        }
        let mut contiguous = PacketBuffer::new(allocator, self.len()).map_err(|e| {
            debug!("PacketBuffer::coalesce(): couldn't allocate {} contiguous bytes: {}", self.len(), e);
            BufferError::TooManySegments
        })?;
        let dst = contiguous.as_slice_mut()?;
        self.copy_to(dst);
        Ok(contiguous)
    }
}

impl fmt::Debug for PacketBuffer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PacketBuffer")
            .field("len", &self.len())
            .field("segments", &self.physical_segments())
            .finish()
    }
}

/// A network (e.g., Ethernet) frame that has been received by the NIC.
#[derive(Debug)]
pub struct ReceivedFrame(pub PacketBuffer);

impl ReceivedFrame {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
