//! The contract between a NIC driver and the rest of the system.
//!
//! Upward, a driver implements [`NetworkInterfaceCard`] for the network stack and
//! [`KernelDebugger`] for a polled-mode debugger transport.
//! Downward, it relies on the platform for an [`OutputQueue`], [`EventSources`],
//! and [`Delay`], so that a driver never names a particular kernel.

#![no_std]

extern crate nic_buffers;

use core::fmt;
use nic_buffers::{PacketBuffer, ReceivedFrame};

/// A trait that defines the necessary minimum functions that all network interface card (NIC) drivers
/// should implement.
pub trait NetworkInterfaceCard {
    type Error: fmt::Display;

    /// Called when the network stack starts using this NIC.
    fn enable(&mut self) -> Result<(), Self::Error>;

    /// Called when the network stack stops using this NIC.
    fn disable(&mut self) -> Result<(), Self::Error>;

    /// Places `packet` on the transmit ring without waiting for it to be sent.
    fn output_packet(&mut self, packet: PacketBuffer) -> OutputStatus;

    /// Returns the earliest `ReceivedFrame` that hasn't been consumed yet.
    fn get_received_frame(&mut self) -> Option<ReceivedFrame>;

    /// Returns the MAC address that this NIC is configured with.
    /// If spoofed, it will return the spoofed MAC address,
    /// otherwise it will return the regular MAC address defined by the NIC hardware.
    fn mac_address(&self) -> [u8; 6];

    /// Overrides the station address the NIC answers to.
    fn set_mac_address(&mut self, mac_address: [u8; 6]) -> Result<(), Self::Error>;

    /// Every medium this NIC can be told to use.
    fn media(&self) -> &[Medium];

    /// Chooses a medium and restarts link negotiation with it.
    fn select_medium(&mut self, index: MediumIndex) -> Result<(), Self::Error>;

    /// The link state last observed, and the medium it was resolved to.
    fn link_status(&self) -> (LinkStatus, Option<MediumIndex>);

    fn set_promiscuous_mode(&mut self, enabled: bool) -> Result<(), Self::Error>;

    /// Accept every multicast frame when `enabled`, otherwise only those in the multicast list.
    fn set_multicast_mode(&mut self, enabled: bool) -> Result<(), Self::Error>;

    fn set_multicast_list(&mut self, addresses: &[[u8; 6]]) -> Result<(), Self::Error>;

    fn network_statistics(&self) -> &NetworkStatistics;

    fn ethernet_statistics(&self) -> &EthernetStatistics;
}

/// A polled-mode transport for a kernel debugger.
///
/// These calls must work with interrupts disabled and never block indefinitely.
pub trait KernelDebugger {
    type Error: fmt::Display;

    /// Called when the debugger attaches to this NIC.
    fn enable_debugger(&mut self) -> Result<(), Self::Error>;

    /// Called when the debugger detaches from this NIC.
    fn disable_debugger(&mut self) -> Result<(), Self::Error>;

    /// Sends one frame, spinning until the hardware has taken it.
    fn send_packet_polled(&mut self, data: &[u8]) -> Result<(), Self::Error>;

    /// Waits up to `timeout_us` microseconds for a frame and copies it into `buffer`.
    /// Returns the number of bytes copied, or 0 if nothing good arrived.
    fn receive_packet_polled(&mut self, buffer: &mut [u8], timeout_us: u32) -> usize;
}

/// What happened to a packet handed to [`NetworkInterfaceCard::output_packet`].
#[derive(Debug)]
pub enum OutputStatus {
    /// The packet is on the transmit ring.
    Sent,
    /// The ring is full; the caller keeps the packet and should retry later.
    Stalled(PacketBuffer),
    /// The packet could not be sent and was freed.
    Dropped,
}

/// The queue of outbound packets that feeds a driver.
pub trait OutputQueue: Send {
    /// Sets how many packets the queue may hold.
    fn set_capacity(&mut self, capacity: usize);
    /// Lets the queue start calling into the driver.
    fn start(&mut self);
    /// Stops the queue from calling into the driver.
    fn stop(&mut self);
    /// Discards every queued packet, returning how many were dropped.
    fn flush(&mut self) -> usize;
    /// Tells a stalled queue that transmit resources have been freed.
    fn service(&mut self);
}

/// Registration of a driver's interrupt and timer callbacks.
pub trait EventSources: Send {
    fn register_interrupt(&mut self, handler: fn()) -> Result<(), &'static str>;
    fn unregister_interrupt(&mut self);
    fn register_timer(&mut self, handler: fn()) -> Result<(), &'static str>;
    fn enable_interrupt(&mut self);
    fn disable_interrupt(&mut self);
    /// Arms the timer to fire once after `ms` milliseconds.
    fn set_timeout_ms(&mut self, ms: u32);
    fn cancel_timeout(&mut self);
}

/// Ways to wait.
pub trait Delay: Send {
    /// Sleeps, allowing other work to run. Not usable from polled paths.
    fn sleep_ms(&self, ms: u32);
    /// Busy-waits.
    fn delay_us(&self, us: u32);
}

/// The state of the physical link.
///
/// `valid` means the driver has an answer; `active` means the link is up.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LinkStatus {
    pub valid: bool,
    pub active: bool,
}

impl LinkStatus {
    /// Negotiation is in flight.
    pub const UNKNOWN: LinkStatus = LinkStatus { valid: false, active: false };
    pub const DOWN: LinkStatus = LinkStatus { valid: true, active: false };
    pub const UP: LinkStatus = LinkStatus { valid: true, active: true };
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match (self.valid, self.active) {
            (false, _) => f.write_str("unknown"),
            (true, false) => f.write_str("down"),
            (true, true) => f.write_str("up"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediumType {
    Ethernet10BaseT,
    Ethernet100BaseTX,
    /// Let the link partners negotiate.
    Auto,
}

/// Position of a medium in a driver's medium table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct MediumIndex(pub usize);

/// One selectable link configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Medium {
    pub index: MediumIndex,
    pub medium_type: MediumType,
    /// Zero for [`MediumType::Auto`].
    pub speed_mbps: u32,
    pub full_duplex: bool,
}

impl fmt::Display for Medium {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.medium_type {
            MediumType::Auto => f.write_str("auto"),
            _ => write!(f, "{}Mbps {}-duplex", self.speed_mbps, if self.full_duplex { "full" } else { "half" }),
        }
    }
}

/// Generic interface counters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NetworkStatistics {
    pub input_packets: u64,
    pub input_errors: u64,
    pub output_packets: u64,
    pub output_errors: u64,
    pub collisions: u64,
}

/// The number of buckets in [`EthernetStatistics::collision_histogram`].
pub const COLLISION_HISTOGRAM_BUCKETS: usize = 16;

/// Ethernet-specific counters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EthernetStatistics {
    pub alignment_errors: u64,
    pub fcs_errors: u64,
    pub single_collision_frames: u64,
    pub multiple_collision_frames: u64,
    pub deferred_transmissions: u64,
    pub late_collisions: u64,
    pub excessive_collisions: u64,
    pub internal_mac_transmit_errors: u64,
    pub carrier_sense_errors: u64,
    pub frame_too_longs: u64,
    pub internal_mac_receive_errors: u64,
    pub missed_frames: u64,
    pub symbol_errors: u64,
    pub runt_frames: u64,
    pub transmit_aborts: u64,
    pub resource_errors: u64,
    /// Transmitted packets bucketed by how many collisions each suffered.
    pub collision_histogram: [u64; COLLISION_HISTOGRAM_BUCKETS],
}

impl EthernetStatistics {
    /// Records a transmitted packet that suffered `collisions` collisions.
    pub fn record_collisions(&mut self, collisions: usize) {
        let bucket = core::cmp::min(collisions, COLLISION_HISTOGRAM_BUCKETS - 1);
        self.collision_histogram[bucket] += 1;
        match collisions {
            0 => { }
            1 => self.single_collision_frames += 1,
            _ => self.multiple_collision_frames += 1,
        }
    }
}
