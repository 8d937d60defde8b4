//! The transmit path: placing packets on the ring and retiring them once sent.

use core::fmt;
use alloc::vec::Vec;
use core::sync::atomic::{fence, Ordering};
use nic_buffers::PacketBuffer;
use nic_descriptors::{
    Ownership, RingDescriptor, TxDescriptor, TX_STATUS_CRS, TX_STATUS_EC, TX_STATUS_ED,
    TX_STATUS_OWC, TX_STATUS_TD, TX_STATUS_TFU, TX_STATUS_TXA,
};
use nic_queues::TxSlot;
use network_interface_card::{EthernetStatistics, NetworkStatistics};
use crate::error::Error;
use crate::regs::*;
use crate::{Dp83816Nic, MAX_FRAME_SIZE};

/// Why a packet did not make it onto the transmit ring.
pub(crate) enum TxError {
    /// Too few free descriptors; the caller keeps the packet.
    Stall(PacketBuffer),
    /// The packet was unusable and has been freed.
    Dropped(Error),
}

impl fmt::Debug for TxError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TxError::Stall(packet) => write!(f, "Stall({} bytes)", packet.len()),
            TxError::Dropped(e) => write!(f, "Dropped({})", e),
        }
    }
}

impl Dp83816Nic {
    /// Puts `packet` on the transmit ring as a chain of up to `tx_max_segments` descriptors
    /// and tells the chip to transmit.
    pub(crate) fn enqueue_packet(&mut self, packet: PacketBuffer) -> Result<(), TxError> {
        let max_segments = self.config.tx_max_segments;
        let interval = self.config.tx_interrupt_interval();
        let Some(txq) = self.tx_queue.as_mut() else {
            self.net_stats.output_errors += 1;
            return Err(TxError::Dropped(Error::NotActive));
        };

        if txq.free_count() < max_segments {
            return Err(TxError::Stall(packet));
        }

        if packet.is_empty() || packet.len() > MAX_FRAME_SIZE {
            self.net_stats.output_errors += 1;
            return Err(TxError::Dropped(Error::Segmentation));
        }
        let packet = match packet.coalesce(&*self.allocator, max_segments) {
            Ok(p) => p,
            Err(e) => {
                self.net_stats.output_errors += 1;
                return Err(TxError::Dropped(e.into()));
            }
        };

        let segments = packet.physical_segments();
        let Some(addrs) = segments.iter().map(|s| s.addr.as_u32()).collect::<Option<Vec<u32>>>() else {
            self.net_stats.output_errors += 1;
            return Err(TxError::Dropped(Error::Allocation));
        };

        txq.packets_since_interrupt += 1;
        let request_interrupt = txq.packets_since_interrupt >= interval;
        if request_interrupt {
            txq.packets_since_interrupt = 0;
        }

        // Fill the chain back to front of ownership: every descriptor but the
        // first goes to the NIC right away, the first only once all are written.
        let first = txq.tx_tail;
        let mut index = first;
        let mut last = first;
        for (i, segment) in segments.iter().enumerate() {
            let is_last = i + 1 == segments.len();
            let desc = &mut txq.tx_descs.descs_mut()[index];
            desc.set_segment(addrs[i], segment.length as u16, !is_last, is_last && request_interrupt);
            if i != 0 {
                desc.grant_to_nic();
            }
            last = index;
            index = txq.tx_descs.next_index(index);
        }
        fence(Ordering::Release);
        txq.tx_descs.descs_mut()[first].grant_to_nic();

        txq.tx_slots[first] = TxSlot {
            packet: Some(packet),
            desc_last: Some(last),
            desc_count: segments.len(),
            next_index: index,
        };
        txq.tx_tail = index;

        self.regs.write32(REG_CR, CR_TXE);
        Ok(())
    }

    /// Retires every packet the chip has finished with, then lets the output
    /// queue refill the ring. Returns how many packets were retired.
    ///
    /// Retired packets are dropped only after the output queue has been serviced.
    pub(crate) fn service_tx_ring(&mut self) -> usize {
        let retired = self.reclaim_tx_descriptors();
        if retired > 0 {
            self.output_queue.service();
            self.deferred_free.clear();
        }
        retired
    }

    /// Walks the transmit ring from `tx_head`, stopping at the first packet whose
    /// last descriptor the NIC still owns, and moves retired packets to `deferred_free`.
    pub(crate) fn reclaim_tx_descriptors(&mut self) -> usize {
        let Some(txq) = self.tx_queue.as_mut() else {
            return 0;
        };

        let mut retired = 0;
        while !txq.is_idle() {
            let head = txq.tx_head;
            let (desc_last, desc_count, next_index) = {
                let slot = &txq.tx_slots[head];
                (slot.desc_last, slot.desc_count, slot.next_index)
            };
            let Some(last) = desc_last.filter(|_| desc_count != 0) else {
                error!("BUG: dp83816::reclaim_tx_descriptors(): no packet recorded at descriptor {}", head);
                break;
            };

            if txq.tx_descs.descs()[last].ownership() == Ownership::Nic {
                break;
            }
            fence(Ordering::Acquire);
            account_tx_status(&txq.tx_descs.descs()[last], &mut self.net_stats, &mut self.ether_stats);

            let mut index = head;
            for _ in 0..desc_count {
                txq.tx_descs.descs_mut()[index].clear();
                index = txq.tx_descs.next_index(index);
            }
            let slot = core::mem::take(&mut txq.tx_slots[head]);
            if let Some(packet) = slot.packet {
                self.deferred_free.push(packet);
            }
            txq.tx_head = next_index;
            retired += 1;
        }
        retired
    }
}

/// Tallies the terminal status of one transmitted packet.
fn account_tx_status(desc: &TxDescriptor, net: &mut NetworkStatistics, ether: &mut EthernetStatistics) {
    let collisions = desc.collision_count();
    ether.record_collisions(collisions);
    net.collisions += collisions as u64;

    if desc.is_ok() {
        net.output_packets += 1;
    } else {
        net.output_errors += 1;
    }

    let status = desc.abnormal_status();
    if status == 0 {
        return;
    }

    if status & TX_STATUS_TXA != 0 {
        ether.transmit_aborts += 1;
    }
    if status & TX_STATUS_TFU != 0 {
        ether.internal_mac_transmit_errors += 1;
    }
    if status & TX_STATUS_CRS != 0 {
        ether.carrier_sense_errors += 1;
    }
    if status & (TX_STATUS_TD | TX_STATUS_ED) != 0 {
        ether.deferred_transmissions += 1;
    }
    if status & TX_STATUS_OWC != 0 {
        ether.late_collisions += 1;
    }
    if status & TX_STATUS_EC != 0 {
        ether.excessive_collisions += 1;
    }
}
