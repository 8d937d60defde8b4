//! Tunables for one DP83816 instance.

use crate::error::{Error, Result};
use crate::MAX_FRAME_SIZE;

/// Number of receive descriptors, and so receive buffers, by default.
pub const DEFAULT_RX_RING_SIZE: usize = 32;
/// Number of transmit descriptors by default.
pub const DEFAULT_TX_RING_SIZE: usize = 64;
/// The most descriptors one outbound packet may occupy.
pub const DEFAULT_TX_MAX_SEGMENTS: usize = 4;
/// Size of every receive buffer: room for a maximum frame plus CRC, rounded up.
pub const DEFAULT_RX_BUFFER_SIZE: u16 = 1536;

/// Settings that shape rings, timers and wait budgets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dp83816Config {
    /// Receive descriptors; a power of two.
    pub rx_ring_size: usize,
    /// Transmit descriptors; a power of two greater than `tx_max_segments`.
    pub tx_ring_size: usize,
    pub tx_max_segments: usize,
    pub rx_buffer_size: u16,
    /// Physical alignment of descriptor rings.
    pub descriptor_alignment: usize,
    /// Packets the output queue may hold while the ring is full.
    pub output_queue_capacity: usize,
    /// Period of the watchdog timer.
    pub watchdog_period_ms: u32,
    /// Watchdog ticks to skip link polling after a medium change.
    pub link_holdoff_ticks: u32,
    /// Polls of the chip reset bit, one millisecond apart.
    pub reset_attempts: u32,
    /// Polls of the PHY reset bit, one millisecond apart.
    pub phy_reset_attempts: u32,
    /// Polls waiting for the transmit and receive engines to stop, one millisecond apart.
    pub quiesce_attempts: u32,
    /// How long a waiting medium selection allows for auto-negotiation.
    pub autoneg_timeout_ms: u32,
    /// How long a waiting medium selection allows for the link to come up afterwards.
    pub link_timeout_ms: u32,
    /// Whether bring-up waits for the initial negotiation to finish.
    pub wait_for_link_on_enable: bool,
    /// Busy-wait spins the polled paths allow before giving up.
    pub polled_spin_limit: u32,
    /// Length of one polled-path spin.
    pub polled_spin_us: u32,
}

impl Default for Dp83816Config {
    fn default() -> Self {
        Dp83816Config {
            rx_ring_size: DEFAULT_RX_RING_SIZE,
            tx_ring_size: DEFAULT_TX_RING_SIZE,
            tx_max_segments: DEFAULT_TX_MAX_SEGMENTS,
            rx_buffer_size: DEFAULT_RX_BUFFER_SIZE,
            descriptor_alignment: 32,
            output_queue_capacity: 256,
            watchdog_period_ms: 1000,
            link_holdoff_ticks: 2,
            reset_attempts: 10,
            phy_reset_attempts: 50,
            quiesce_attempts: 10,
            autoneg_timeout_ms: 5000,
            link_timeout_ms: 2000,
            wait_for_link_on_enable: false,
            polled_spin_limit: 100_000,
            polled_spin_us: 10,
        }
    }
}

impl Dp83816Config {
    pub fn validate(&self) -> Result<()> {
        if self.rx_ring_size < 2 || !self.rx_ring_size.is_power_of_two() {
            return Err(Error::InvalidConfig("rx_ring_size must be a power of two"));
        }
        if !self.tx_ring_size.is_power_of_two() {
            return Err(Error::InvalidConfig("tx_ring_size must be a power of two"));
        }
        if self.tx_max_segments == 0 || self.tx_ring_size <= self.tx_max_segments {
            return Err(Error::InvalidConfig("tx_ring_size must exceed tx_max_segments"));
        }
        if (self.rx_buffer_size as usize) < MAX_FRAME_SIZE + 4 || self.rx_buffer_size > 0xFFF {
            return Err(Error::InvalidConfig("rx_buffer_size must hold a maximum frame and fit the size field"));
        }
        if !self.descriptor_alignment.is_power_of_two() || self.descriptor_alignment < 4 {
            return Err(Error::InvalidConfig("descriptor_alignment must be a power of two of at least 4"));
        }
        if self.polled_spin_limit == 0 {
            return Err(Error::InvalidConfig("polled_spin_limit must be nonzero"));
        }
        if self.polled_spin_us == 0 {
            return Err(Error::InvalidConfig("polled_spin_us must be nonzero"));
        }
        Ok(())
    }

    /// Every this-many packets, the transmit path asks for a completion interrupt.
    pub fn tx_interrupt_interval(&self) -> usize {
        core::cmp::max(1, (self.tx_ring_size / 2) / self.tx_max_segments)
    }
}
