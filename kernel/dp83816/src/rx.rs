//! The receive path: draining completed descriptors and re-arming them.

use core::sync::atomic::{fence, Ordering};
use alloc::vec::Vec;
use nic_buffers::{PacketBuffer, ReceivedFrame};
use nic_descriptors::*;
use network_interface_card::{EthernetStatistics, NetworkStatistics};
use crate::regs::*;
use crate::{Dp83816Nic, MAX_RX_FRAME_SIZE, MIN_RX_FRAME_SIZE};

/// Decides whether a completed receive descriptor holds a deliverable frame.
///
/// Returns the frame length if so. Otherwise counts the reasons it isn't
/// and returns `None`.
pub(crate) fn check_rx_status(desc: &RxDescriptor, net: &mut NetworkStatistics, ether: &mut EthernetStatistics) -> Option<usize> {
    let length = desc.frame_length() as usize;
    let status = desc.error_status();
    let good = desc.is_ok()
        && !desc.more()
        && status == 0
        && (MIN_RX_FRAME_SIZE..=MAX_RX_FRAME_SIZE).contains(&length);
    if good {
        return Some(length);
    }

    net.input_errors += 1;
    if status & (RX_STATUS_RXO | RX_STATUS_RXA) != 0 {
        ether.internal_mac_receive_errors += 1;
    }
    if status & RX_STATUS_LONG != 0 || desc.more() || length > MAX_RX_FRAME_SIZE {
        ether.frame_too_longs += 1;
    }
    if status & RX_STATUS_RUNT != 0 || length < MIN_RX_FRAME_SIZE {
        ether.runt_frames += 1;
    }
    if status & RX_STATUS_ISE != 0 {
        ether.symbol_errors += 1;
    }
    if status & RX_STATUS_CRCE != 0 {
        ether.fcs_errors += 1;
    }
    if status & RX_STATUS_FAE != 0 {
        ether.alignment_errors += 1;
    }
    if status & RX_STATUS_COL != 0 {
        net.collisions += 1;
    }
    None
}

impl Dp83816Nic {
    /// Walks the receive ring from `rx_cur`, delivering good frames and
    /// re-arming every descriptor the NIC has handed back.
    ///
    /// Delivered frames are appended to the received queue in one batch.
    /// Returns the number of frames delivered.
    pub(crate) fn service_rx_ring(&mut self) -> usize {
        let Some(rxq) = self.rx_queue.as_mut() else {
            return 0;
        };
        let buffer_size = rxq.buffer_size as usize;

        let mut delivered = Vec::new();
        for _ in 0..rxq.len() {
            let index = rxq.rx_cur;
            if rxq.rx_descs.descs()[index].ownership() == Ownership::Nic {
                break;
            }
            fence(Ordering::Acquire);

            let frame = check_rx_status(&rxq.rx_descs.descs()[index], &mut self.net_stats, &mut self.ether_stats);
            if let Some(length) = frame {
                // first choice: hand up the filled buffer and arm a fresh one
                let swapped = PacketBuffer::new(&*self.allocator, buffer_size).ok()
                    .and_then(|fresh| rxq.arm(index, fresh).ok());
                match swapped {
                    Some(Some(mut filled)) => {
                        match filled.set_length(length) {
                            Ok(()) => delivered.push(ReceivedFrame(filled)),
                            Err(_) => self.net_stats.input_errors += 1,
                        }
                    }
                    Some(None) => {
                        error!("BUG: dp83816::service_rx_ring(): descriptor {} had no buffer attached", index);
                        self.net_stats.input_errors += 1;
                    }
                    None => {
                        // short on buffers: copy the frame out and keep the ring's buffer
                        self.ether_stats.resource_errors += 1;
                        let copied = rxq.rx_bufs_in_use[index].as_ref()
                            .and_then(|buf| copy_frame(&*self.allocator, buf, length));
                        match copied {
                            Some(copy) => delivered.push(ReceivedFrame(copy)),
                            None => self.net_stats.input_errors += 1,
                        }
                        rxq.rearm(index);
                    }
                }
            } else {
                rxq.rearm(index);
            }
            rxq.rx_cur = rxq.rx_descs.next_index(index);
        }

        let count = delivered.len();
        self.net_stats.input_packets += count as u64;
        self.received_frames.extend(delivered);

        // the receiver idles once it runs out of descriptors
        self.regs.write32(REG_CR, CR_RXE);
        count
    }
}

/// Copies the first `length` bytes of `src` into a new buffer of exactly that size.
fn copy_frame(allocator: &dyn nic_buffers::DmaAllocator, src: &PacketBuffer, length: usize) -> Option<PacketBuffer> {
    let bytes = src.fragments().next()?.get(..length)?;
    let mut copy = PacketBuffer::new(allocator, length).ok()?;
    copy.as_slice_mut().ok()?.copy_from_slice(bytes);
    Some(copy)
}
