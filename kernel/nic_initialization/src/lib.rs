//! Functions that are used in a NIC initialization procedure.
//!
//! They allocate descriptor rings from DMA memory, link each ring into a cycle,
//! and fill the receive ring with buffers.

#![no_std]

extern crate alloc;
#[macro_use] extern crate log;
extern crate nic_buffers;
extern crate nic_descriptors;
extern crate nic_queues;


use core::mem::size_of;
use alloc::vec::Vec;
use nic_buffers::{BufferError, DmaAllocator, PacketBuffer, PhysicalAddress};
use nic_descriptors::RingDescriptor;
use nic_queues::{DescriptorRing, RxQueue, TxQueue, TxSlot};

/// Allocates zeroed memory for `num_desc` descriptors and wraps it as a ring.
///
/// # Arguments
/// * `allocator`: where the ring memory comes from
/// * `num_desc`: number of descriptors in the ring, a power of two
/// * `alignment`: required alignment of the ring's physical start address
pub fn build_ring<T: RingDescriptor>(allocator: &dyn DmaAllocator, num_desc: usize, alignment: usize)
    -> Result<DescriptorRing<T>, BufferError>
{
    let size_in_bytes = num_desc * size_of::<T>();
    let memory = allocator.allocate(size_in_bytes, alignment)?;
    let mut ring: DescriptorRing<T> = DescriptorRing::new(memory, num_desc)?;
    for desc in ring.descs_mut() {
        desc.clear();
    }
    Ok(ring)
}

/// Points every descriptor's link at its successor, and the last one back at the first.
pub fn link_ring<T: RingDescriptor>(ring: &mut DescriptorRing<T>) {
    let links: Vec<u32> = (0..ring.len())
        .map(|i| ring.phys_addr_of(ring.next_index(i)))
        .collect();
    for (desc, link) in ring.descs_mut().iter_mut().zip(links) {
        desc.set_link(link);
    }
}

/// Steps to create and initialize the receive descriptor queue.
///
/// # Arguments
/// * `allocator`: where the ring and its buffers come from
/// * `num_desc`: number of descriptors in the queue
/// * `alignment`: required alignment of the ring
/// * `buffer_size`: size of each receive buffer in bytes
pub fn init_rx_queue(allocator: &dyn DmaAllocator, num_desc: usize, alignment: usize, buffer_size: u16)
    -> Result<RxQueue, BufferError>
{
    let mut rx_descs = build_ring(allocator, num_desc, alignment)?;
    link_ring(&mut rx_descs);

    let mut rxq = RxQueue {
        rx_descs,
        rx_cur: 0,
        rx_bufs_in_use: (0..num_desc).map(|_| None).collect(),
        rx_buf_phys: alloc::vec![PhysicalAddress::zero(); num_desc],
        buffer_size,
    };

    for i in 0..num_desc {
        let rx_buf = PacketBuffer::new(allocator, buffer_size as usize).map_err(|e| {
            error!("nic_initialization::init_rx_queue(): couldn't allocate receive buffer {} of {}: {}", i, num_desc, e);
            e
        })?;
        rxq.arm(i, rx_buf)?;
    }

    debug!("nic_initialization::init_rx_queue(): {} descriptors at {:#X}", num_desc, rxq.rx_descs.phys_base());
    Ok(rxq)
}

/// Steps to create and initialize the transmit descriptor queue.
///
/// # Arguments
/// * `allocator`: where the ring comes from
/// * `num_desc`: number of descriptors in the queue
/// * `alignment`: required alignment of the ring
pub fn init_tx_queue(allocator: &dyn DmaAllocator, num_desc: usize, alignment: usize)
    -> Result<TxQueue, BufferError>
{
    let mut tx_descs = build_ring(allocator, num_desc, alignment)?;
    link_ring(&mut tx_descs);

    debug!("nic_initialization::init_tx_queue(): {} descriptors at {:#X}", num_desc, tx_descs.phys_base());
    Ok(TxQueue {
        tx_descs,
        tx_head: 0,
        tx_tail: 0,
        tx_slots: (0..num_desc).map(|_| TxSlot::default()).collect(),
        packets_since_interrupt: 0,
    })
}
