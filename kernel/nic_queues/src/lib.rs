//! Receive and transmit queues: a descriptor ring plus the driver's
//! bookkeeping about which buffers and packets each descriptor refers to.
//!
//! Ring sizes are powers of two so that every index wraps with a mask.

#![no_std]

extern crate alloc;
#[macro_use] extern crate log;
extern crate nic_buffers;
extern crate nic_descriptors;


use core::marker::PhantomData;
use core::mem::size_of;
use alloc::{boxed::Box, vec::Vec};
use nic_buffers::{BufferError, DmaMemory, PacketBuffer, PhysicalAddress};
use nic_descriptors::{RingDescriptor, RxDescriptor, TxDescriptor};

/// An array of descriptors laid out in one DMA region.
pub struct DescriptorRing<T: RingDescriptor> {
    memory: Box<dyn DmaMemory>,
    count: usize,
    phys_base: u32,
    _descriptor: PhantomData<T>,
}

impl<T: RingDescriptor> DescriptorRing<T> {
    /// Wraps `memory` as a ring of `count` descriptors.
    ///
    /// `count` must be a power of two, and the whole ring must fit below 4 GiB
    /// because descriptors hold 32-bit bus addresses.
    pub fn new(memory: Box<dyn DmaMemory>, count: usize) -> Result<DescriptorRing<T>, BufferError> {
        if count < 2 || !count.is_power_of_two() {
            error!("DescriptorRing::new(): descriptor count {} is not a power of two", count);
            return Err(BufferError::InvalidSize);
        }
        let size_in_bytes = count * size_of::<T>();
        if memory.size_in_bytes() < size_in_bytes {
            return Err(BufferError::InvalidSize);
        }
        let phys_base = memory.phys_addr().as_u32()
            .filter(|base| base.checked_add(size_in_bytes as u32 - 1).is_some())
            .ok_or(BufferError::AddressUnreachable)?;
        if T::slice_from(&memory.as_slice()[..size_in_bytes]).is_none() {
            error!("DescriptorRing::new(): ring memory at {} is misaligned", memory.phys_addr());
            return Err(BufferError::InvalidSize);
        }
        Ok(DescriptorRing { memory, count, phys_base, _descriptor: PhantomData })
    }

    pub fn len(&self) -> usize {
        self.count
    }

    /// Bus address of the first descriptor.
    pub fn phys_base(&self) -> u32 {
        self.phys_base
    }

    /// Bus address of the descriptor at `index`.
    pub fn phys_addr_of(&self, index: usize) -> u32 {
        self.phys_base + (index * size_of::<T>()) as u32
    }

    /// The index that follows `index`, wrapping at the end of the ring.
    pub fn next_index(&self, index: usize) -> usize {
        (index + 1) & (self.count - 1)
    }

    pub fn descs(&self) -> &[T] {
        // We checked the size and alignment of the memory during initialisation.
        T::slice_from(&self.memory.as_slice()[..self.count * size_of::<T>()]).unwrap()
    }

    pub fn descs_mut(&mut self) -> &mut [T] {
        // We checked the size and alignment of the memory during initialisation.
        let size_in_bytes = self.count * size_of::<T>();
        T::mut_slice_from(&mut self.memory.as_slice_mut()[..size_in_bytes]).unwrap()
    }
}


/// A struct that holds all information for the receive queue.
pub struct RxQueue {
    /// Receive descriptors
    pub rx_descs: DescriptorRing<RxDescriptor>,
    /// Index of the next descriptor the driver expects the NIC to complete
    pub rx_cur: usize,
    /// The list of rx buffers, in which the index in the vector corresponds to the index in `rx_descs`.
    /// A slot is `None` only transiently while its buffer is being replaced.
    pub rx_bufs_in_use: Vec<Option<PacketBuffer>>,
    /// The bus address each descriptor was last armed with, kept apart from buffer ownership.
    pub rx_buf_phys: Vec<PhysicalAddress>,
    /// Size in bytes of every receive buffer
    pub buffer_size: u16,
}

impl RxQueue {
    pub fn len(&self) -> usize {
        self.rx_descs.len()
    }

    /// Points descriptor `index` at `buffer` and hands it to the NIC,
    /// returning whatever buffer previously occupied the slot.
    pub fn arm(&mut self, index: usize, buffer: PacketBuffer) -> Result<Option<PacketBuffer>, BufferError> {
        let segment = buffer.single_segment()?;
        let addr = segment.addr.as_u32().ok_or(BufferError::AddressUnreachable)?;
        if segment.length < self.buffer_size as usize {
            return Err(BufferError::InvalidSize);
        }
        let size = self.buffer_size;
        self.rx_descs.descs_mut()[index].arm(addr, size);
        self.rx_buf_phys[index] = segment.addr;
        Ok(self.rx_bufs_in_use[index].replace(buffer))
    }

    /// Hands descriptor `index` back to the NIC with the buffer it already holds.
    pub fn rearm(&mut self, index: usize) {
        let size = self.buffer_size;
        self.rx_descs.descs_mut()[index].rearm(size);
    }

    /// True if the bookkeeping for `index` agrees with what the descriptor points to.
    pub fn slot_is_consistent(&self, index: usize) -> bool {
        self.rx_bufs_in_use[index].is_some()
            && self.rx_buf_phys[index].as_u32() == Some(self.rx_descs.descs()[index].buffer_ptr())
    }
}


/// Bookkeeping for one packet on the transmit ring.
///
/// Only the slot at a packet's first descriptor holds anything;
/// the other slots of a multi-descriptor chain stay empty.
#[derive(Debug, Default)]
pub struct TxSlot {
    /// The packet being sent. `None` for packets whose memory the driver keeps itself.
    pub packet: Option<PacketBuffer>,
    /// Index of the last descriptor in this packet's chain
    pub desc_last: Option<usize>,
    /// Number of descriptors in the chain
    pub desc_count: usize,
    /// Index of the descriptor following the chain
    pub next_index: usize,
}

impl TxSlot {
    pub fn is_in_use(&self) -> bool {
        self.desc_count != 0
    }
}

/// A struct that holds all information for the transmit queue.
///
/// Descriptors from `tx_head` up to (not including) `tx_tail` belong to
/// packets that have been queued and not yet retired.
pub struct TxQueue {
    /// Transmit descriptors
    pub tx_descs: DescriptorRing<TxDescriptor>,
    /// First descriptor of the oldest packet not yet retired
    pub tx_head: usize,
    /// Next descriptor to fill
    pub tx_tail: usize,
    /// Per-descriptor packet bookkeeping
    pub tx_slots: Vec<TxSlot>,
    /// Packets queued since the last one that asked for a completion interrupt
    pub packets_since_interrupt: usize,
}

impl TxQueue {
    pub fn len(&self) -> usize {
        self.tx_descs.len()
    }

    /// The number of descriptors that can be filled right now.
    /// One descriptor always stays empty so that a full ring is distinguishable from an empty one.
    pub fn free_count(&self) -> usize {
        let n = self.len();
        (self.tx_head + n - self.tx_tail - 1) & (n - 1)
    }

    /// True if no packets are waiting to be retired.
    pub fn is_idle(&self) -> bool {
        self.tx_head == self.tx_tail
    }
}
