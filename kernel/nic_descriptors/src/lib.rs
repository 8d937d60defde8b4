//! Descriptor layouts for NICs that walk a linked list of DMA descriptors,
//! such as the National Semiconductor DP8381x ("MacPhyter") family.
//!
//! Every descriptor is four little-endian dwords:
//! a link to the next descriptor, a command/status word, a buffer pointer,
//! and one dword reserved for software. The hardware and the driver hand a
//! descriptor back and forth by flipping the `OWN` bit in the command/status word,
//! but the meaning of that bit differs between the transmit and receive rings,
//! so ownership is only ever exposed through [`RingDescriptor::ownership`].

#![no_std]

extern crate bit_field;
extern crate zerocopy;

use core::fmt;
use core::ptr::{read_volatile, write_volatile};
use bit_field::BitField;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

/// Descriptor ownership bit.
pub const CMDSTS_OWN:       u32 = 1 << 31;
/// More descriptors follow for this packet.
pub const CMDSTS_MORE:      u32 = 1 << 30;
/// Raise an interrupt when the descriptor completes.
pub const CMDSTS_INTR:      u32 = 1 << 29;
/// TX: suppress CRC append.
pub const CMDSTS_SUPCRC:    u32 = 1 << 28;
/// RX: the frame check sequence is included in the buffer and the length.
pub const CMDSTS_INCCRC:    u32 = 1 << 28;
/// The packet completed without error.
pub const CMDSTS_OK:        u32 = 1 << 27;
/// Buffer size (driver to NIC) or frame length (NIC to driver).
pub const CMDSTS_SIZE_MASK: u32 = 0xFFF;

/// Transmit abort.
pub const TX_STATUS_TXA:  u32 = 1 << 26;
/// Transmit FIFO underrun.
pub const TX_STATUS_TFU:  u32 = 1 << 25;
/// Carrier sense lost.
pub const TX_STATUS_CRS:  u32 = 1 << 24;
/// Transmission was deferred.
pub const TX_STATUS_TD:   u32 = 1 << 23;
/// Excessive deferral.
pub const TX_STATUS_ED:   u32 = 1 << 22;
/// Out-of-window (late) collision.
pub const TX_STATUS_OWC:  u32 = 1 << 21;
/// Excessive collisions.
pub const TX_STATUS_EC:   u32 = 1 << 20;
/// Transmit status bits that mean something other than a plain successful send.
pub const TX_STATUS_ABNORMAL: u32 = TX_STATUS_TXA | TX_STATUS_TFU | TX_STATUS_CRS
    | TX_STATUS_TD | TX_STATUS_ED | TX_STATUS_OWC | TX_STATUS_EC;

/// Receive aborted.
pub const RX_STATUS_RXA:  u32 = 1 << 26;
/// Receive FIFO overrun.
pub const RX_STATUS_RXO:  u32 = 1 << 25;
/// Frame was longer than 1518 bytes.
pub const RX_STATUS_LONG: u32 = 1 << 22;
/// Frame was shorter than 64 bytes.
pub const RX_STATUS_RUNT: u32 = 1 << 21;
/// Invalid symbol error.
pub const RX_STATUS_ISE:  u32 = 1 << 20;
/// CRC error.
pub const RX_STATUS_CRCE: u32 = 1 << 19;
/// Frame alignment error.
pub const RX_STATUS_FAE:  u32 = 1 << 18;
/// Frame was looped back from our own transmitter.
pub const RX_STATUS_LBP:  u32 = 1 << 17;
/// Collision activity during reception.
pub const RX_STATUS_COL:  u32 = 1 << 16;
/// Receive status bits that make a frame unfit for delivery.
pub const RX_STATUS_ERRORS: u32 = RX_STATUS_RXA | RX_STATUS_RXO | RX_STATUS_LONG
    | RX_STATUS_RUNT | RX_STATUS_ISE | RX_STATUS_CRCE | RX_STATUS_FAE | RX_STATUS_COL;

/// Who currently may touch a descriptor and the buffer it points to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ownership {
    /// The NIC may DMA to or from the buffer; the driver must not touch it.
    Nic,
    Driver,
}

/// The in-memory layout shared by transmit and receive descriptors.
#[derive(FromZeroes, FromBytes, AsBytes)]
#[repr(C)]
pub struct RawDescriptor {
    link: u32,
    cmd_status: u32,
    buffer_ptr: u32,
    software: u32,
}

// Descriptors live in memory the NIC reads and writes behind our back,
// so every access goes through volatile reads and writes.
impl RawDescriptor {
    pub fn link(&self) -> u32 {
        unsafe { read_volatile(&self.link) }
    }

    pub fn set_link(&mut self, link: u32) {
        unsafe { write_volatile(&mut self.link, link) }
    }

    pub fn cmd_status(&self) -> u32 {
        unsafe { read_volatile(&self.cmd_status) }
    }

    pub fn set_cmd_status(&mut self, value: u32) {
        unsafe { write_volatile(&mut self.cmd_status, value) }
    }

    pub fn buffer_ptr(&self) -> u32 {
        unsafe { read_volatile(&self.buffer_ptr) }
    }

    pub fn set_buffer_ptr(&mut self, addr: u32) {
        unsafe { write_volatile(&mut self.buffer_ptr, addr) }
    }
}

impl fmt::Debug for RawDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{{link: {:#X}, cmdsts: {:#010X}, bufptr: {:#X}}}",
            self.link(), self.cmd_status(), self.buffer_ptr())
    }
}

/// Functionality common to both kinds of ring descriptor.
pub trait RingDescriptor: FromBytes + AsBytes + FromZeroes + Sized {
    fn raw(&self) -> &RawDescriptor;
    fn raw_mut(&mut self) -> &mut RawDescriptor;

    /// Decodes the `OWN` bit according to this ring's direction.
    fn ownership(&self) -> Ownership;

    /// Returns the descriptor to a blank, driver-owned state, keeping its link.
    fn clear(&mut self);

    fn link(&self) -> u32 {
        self.raw().link()
    }

    fn set_link(&mut self, link: u32) {
        self.raw_mut().set_link(link)
    }

    fn cmd_status(&self) -> u32 {
        self.raw().cmd_status()
    }

    fn buffer_ptr(&self) -> u32 {
        self.raw().buffer_ptr()
    }
}

/// A receive descriptor.
///
/// The driver arms it with `OWN` clear; the NIC sets `OWN` once it has
/// filled the buffer, handing the descriptor back to the driver.
#[derive(FromZeroes, FromBytes, AsBytes, Debug)]
#[repr(transparent)]
pub struct RxDescriptor(RawDescriptor);

impl RxDescriptor {
    /// Points the descriptor at an empty buffer of `size` bytes and gives it to the NIC.
    pub fn arm(&mut self, buffer_addr: u32, size: u16) {
        self.0.set_buffer_ptr(buffer_addr);
        self.rearm(size);
    }

    /// Gives the descriptor back to the NIC, reusing whatever buffer it already points to.
    pub fn rearm(&mut self, size: u16) {
        self.0.set_cmd_status(CMDSTS_INTR | CMDSTS_INCCRC | (size as u32 & CMDSTS_SIZE_MASK));
    }

    /// The number of bytes the NIC wrote, including the frame check sequence.
    pub fn frame_length(&self) -> u16 {
        (self.0.cmd_status() & CMDSTS_SIZE_MASK) as u16
    }

    /// True if this buffer holds only part of a frame.
    pub fn more(&self) -> bool {
        self.0.cmd_status() & CMDSTS_MORE != 0
    }

    pub fn is_ok(&self) -> bool {
        self.0.cmd_status() & CMDSTS_OK != 0
    }

    /// Receive error bits the NIC reported for this frame, if any.
    pub fn error_status(&self) -> u32 {
        self.0.cmd_status() & RX_STATUS_ERRORS
    }

    pub fn set_buffer_ptr(&mut self, addr: u32) {
        self.0.set_buffer_ptr(addr)
    }
}

impl RingDescriptor for RxDescriptor {
    fn raw(&self) -> &RawDescriptor {
        &self.0
    }

    fn raw_mut(&mut self) -> &mut RawDescriptor {
        &mut self.0
    }

    fn ownership(&self) -> Ownership {
        if self.0.cmd_status() & CMDSTS_OWN != 0 { Ownership::Driver } else { Ownership::Nic }
    }

    fn clear(&mut self) {
        // OWN set keeps an unarmed receive descriptor away from the NIC
        self.0.set_cmd_status(CMDSTS_OWN);
        self.0.set_buffer_ptr(0);
    }
}

/// A transmit descriptor.
///
/// The driver sets `OWN` to hand a filled buffer to the NIC,
/// which clears it once the buffer has been sent.
#[derive(FromZeroes, FromBytes, AsBytes, Debug)]
#[repr(transparent)]
pub struct TxDescriptor(RawDescriptor);

impl TxDescriptor {
    /// Fills in one segment of a packet without handing it to the NIC.
    pub fn set_segment(&mut self, buffer_addr: u32, length: u16, more: bool, interrupt: bool) {
        let mut cmd = length as u32 & CMDSTS_SIZE_MASK;
        if more {
            cmd |= CMDSTS_MORE;
        }
        if interrupt {
            cmd |= CMDSTS_INTR;
        }
        self.0.set_buffer_ptr(buffer_addr);
        self.0.set_cmd_status(cmd);
    }

    /// Hands the descriptor to the NIC.
    pub fn grant_to_nic(&mut self) {
        let cmd = self.0.cmd_status();
        self.0.set_cmd_status(cmd | CMDSTS_OWN);
    }

    pub fn is_ok(&self) -> bool {
        self.0.cmd_status() & CMDSTS_OK != 0
    }

    /// Abnormal status bits the NIC reported for this packet, if any.
    pub fn abnormal_status(&self) -> u32 {
        self.0.cmd_status() & TX_STATUS_ABNORMAL
    }

    /// The number of collisions the packet suffered before it was sent or abandoned.
    pub fn collision_count(&self) -> usize {
        self.0.cmd_status().get_bits(16..20) as usize
    }
}

impl RingDescriptor for TxDescriptor {
    fn raw(&self) -> &RawDescriptor {
        &self.0
    }

    fn raw_mut(&mut self) -> &mut RawDescriptor {
        &mut self.0
    }

    fn ownership(&self) -> Ownership {
        if self.0.cmd_status() & CMDSTS_OWN != 0 { Ownership::Nic } else { Ownership::Driver }
    }

    fn clear(&mut self) {
        self.0.set_cmd_status(0);
        self.0.set_buffer_ptr(0);
    }
}
