//! The polled send and receive paths used by the kernel debugger.
//!
//! These run with interrupts possibly unavailable, so every wait is a
//! bounded busy-wait of `polled_spin_us` microseconds per spin and never a sleep.
//! They share the rings with the interrupt path; the device lock held by the
//! caller keeps the two apart.

use core::cmp::min;
use core::sync::atomic::{fence, Ordering};
use nic_descriptors::{Ownership, RingDescriptor};
use nic_queues::TxSlot;
use crate::error::{Error, Result};
use crate::regs::*;
use crate::rx::check_rx_status;
use crate::{ActivationLevel, Dp83816Nic, MAX_FRAME_SIZE};

impl Dp83816Nic {
    /// Sends `data` synchronously through the debug buffer.
    ///
    /// Frames longer than the debug buffer or a maximum frame are truncated.
    /// The descriptor is retired later by the regular transmit service.
    pub(crate) fn poll_send(&mut self, data: &[u8]) -> Result<()> {
        if self.activation_level == ActivationLevel::None {
            return Err(Error::NotActive);
        }
        if data.is_empty() {
            return Ok(());
        }

        let spin_limit = self.config.polled_spin_limit;
        let spin_us = self.config.polled_spin_us;

        let mut spins = 0;
        while self.tx_queue.as_ref().map_or(0, |txq| txq.free_count()) == 0 {
            if spins == spin_limit {
                error!("dp83816::poll_send(): no free transmit descriptor");
                return Err(Error::HardwareTimeout("free transmit descriptor"));
            }
            self.reclaim_tx_descriptors();
            self.delay.delay_us(spin_us);
            spins += 1;
        }

        let (Some(txq), Some(debug_buffer)) = (self.tx_queue.as_mut(), self.debug_buffer.as_mut()) else {
            return Err(Error::NotActive);
        };
        let length = min(min(data.len(), debug_buffer.size_in_bytes()), MAX_FRAME_SIZE);
        debug_buffer.as_slice_mut()[..length].copy_from_slice(&data[..length]);
        let addr = debug_buffer.phys_addr().as_u32().ok_or(Error::Allocation)?;

        let index = txq.tx_tail;
        let next_index = txq.tx_descs.next_index(index);
        {
            let desc = &mut txq.tx_descs.descs_mut()[index];
            desc.set_segment(addr, length as u16, false, true);
            fence(Ordering::Release);
            desc.grant_to_nic();
        }
        txq.tx_slots[index] = TxSlot { packet: None, desc_last: Some(index), desc_count: 1, next_index };
        txq.tx_tail = next_index;
        self.regs.write32(REG_CR, CR_TXE);

        let mut spins = 0;
        loop {
            let done = self.tx_queue.as_ref()
                .map_or(true, |txq| txq.tx_descs.descs()[index].ownership() == Ownership::Driver);
            if done {
                return Ok(());
            }
            if spins == spin_limit {
                error!("dp83816::poll_send(): NIC never released descriptor {}", index);
                return Err(Error::HardwareTimeout("polled transmit"));
            }
            self.delay.delay_us(spin_us);
            spins += 1;
        }
    }

    /// Waits up to `timeout_us` for the next receive descriptor to complete and copies
    /// a good frame into `buffer`. Returns the number of bytes copied, zero on timeout.
    ///
    /// The wait also ends after `polled_spin_limit` spins, whatever `timeout_us` says.
    /// A completed descriptor is re-armed whether or not its frame was good.
    pub(crate) fn poll_receive(&mut self, buffer: &mut [u8], timeout_us: u32) -> usize {
        let spin_limit = self.config.polled_spin_limit;
        let spin_us = self.config.polled_spin_us;
        let mut waited = 0;
        let mut spins = 0;
        let index = loop {
            let Some(rxq) = self.rx_queue.as_ref() else {
                return 0;
            };
            if rxq.rx_descs.descs()[rxq.rx_cur].ownership() == Ownership::Driver {
                break rxq.rx_cur;
            }
            if waited >= timeout_us || spins == spin_limit {
                return 0;
            }
            self.delay.delay_us(spin_us);
            waited = waited.saturating_add(spin_us);
            spins += 1;
        };
        fence(Ordering::Acquire);

        let Some(rxq) = self.rx_queue.as_mut() else {
            return 0;
        };
        let mut copied = 0;
        if let Some(length) = check_rx_status(&rxq.rx_descs.descs()[index], &mut self.net_stats, &mut self.ether_stats) {
            if let Some(frame) = rxq.rx_bufs_in_use[index].as_ref().and_then(|buf| buf.fragments().next()) {
                copied = min(min(length, frame.len()), buffer.len());
                buffer[..copied].copy_from_slice(&frame[..copied]);
            }
        }
        rxq.rearm(index);
        rxq.rx_cur = rxq.rx_descs.next_index(index);
        self.regs.write32(REG_CR, CR_RXE);
        copied
    }
}
