//! A driver for the National Semiconductor DP83816 10/100 Mb/s PCI Ethernet controller.
//!
//! The driver serves two clients at once: the network stack, through
//! [`NetworkInterfaceCard`], and a kernel debugger, through the polled
//! [`KernelDebugger`] path. Which hardware resources exist at any moment is
//! governed by an activation level derived from which clients are attached
//! (see [`activation`]).
//!
//! The platform supplies the register window, PCI config space, DMA memory,
//! delays, event sources and the output queue, so the whole driver can be
//! exercised against simulated hardware.

#![no_std]

extern crate alloc;
#[macro_use] extern crate log;
extern crate spin;
extern crate volatile;
extern crate bit_field;
extern crate bitflags;
extern crate pci;
extern crate nic_buffers;
extern crate nic_descriptors;
extern crate nic_queues;
extern crate nic_initialization;
extern crate network_interface_card;

pub mod activation;
pub mod config;
pub mod error;
pub mod filter;
mod hardware;
mod interrupts;
pub mod phy;
mod polled;
pub mod power;
pub mod regs;
mod rx;
mod tx;

#[cfg(test)]
mod test;

use core::sync::atomic::{AtomicBool, Ordering};
use alloc::{boxed::Box, collections::VecDeque, vec::Vec};
use spin::{Mutex, Once};
use pci::{PciConfigSpace, PowerManagement, PowerState, PCI_COMMAND_BUS_MASTER, PCI_COMMAND_MEMORY_SPACE};
use nic_buffers::{DmaAllocator, DmaMemory, PacketBuffer, ReceivedFrame};
use nic_queues::{RxQueue, TxQueue};
use network_interface_card::{
    Delay, EthernetStatistics, EventSources, KernelDebugger, LinkStatus, Medium, MediumIndex,
    NetworkInterfaceCard, NetworkStatistics, OutputQueue, OutputStatus,
};

pub use activation::{ActivationLevel, ClientIntents};
pub use config::Dp83816Config;
pub use error::{Error, Result};
pub use regs::{MmioRegisters, RegisterAccess};
use filter::ReceiveFilter;
use phy::Phy;
use power::WakeOnLan;
use regs::*;
use tx::TxError;

pub const NATSEMI_VEND:         u16 = 0x100B;  // Vendor ID for National Semiconductor
pub const DP83816_DEV:          u16 = 0x0020;  // Device ID for the DP83815/DP83816

/// The largest Ethernet frame we send, excluding the CRC.
pub const MAX_FRAME_SIZE:       usize = 1514;
/// The shortest frame the receive path delivers.
pub const MIN_RX_FRAME_SIZE:    usize = 60;
/// The longest frame the receive path delivers, CRC included.
pub const MAX_RX_FRAME_SIZE:    usize = MAX_FRAME_SIZE + 4;

/// The single instance of the DP83816 NIC.
static DP83816_NIC: Once<Mutex<Dp83816Nic>> = Once::new();
/// Set by the first `init` call; cleared again only if that call fails.
static DP83816_NIC_CLAIMED: AtomicBool = AtomicBool::new(false);

/// Returns a reference to the Dp83816Nic wrapped in a Mutex,
/// if it exists and has been initialized.
pub fn get_dp83816_nic() -> Option<&'static Mutex<Dp83816Nic>> {
    DP83816_NIC.get()
}

/// Everything the driver needs from the platform besides the device itself.
pub struct Dp83816Services {
    pub allocator: Box<dyn DmaAllocator>,
    pub delay: Box<dyn Delay>,
    pub events: Box<dyn EventSources>,
    pub output_queue: Box<dyn OutputQueue>,
}

/// Probes the device, registers its interrupt and watchdog callbacks,
/// and stores it as the global DP83816 instance.
///
/// The hardware stays off until a client enables it.
pub fn init(
    pci: Box<dyn PciConfigSpace>,
    regs: Box<dyn RegisterAccess>,
    services: Dp83816Services,
    config: Dp83816Config,
) -> Result<&'static Mutex<Dp83816Nic>> {
    if DP83816_NIC_CLAIMED.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
        return Err(Error::Unsupported("only one DP83816 instance is supported"));
    }
    match probe_and_register(pci, regs, services, config) {
        Ok(nic) => Ok(DP83816_NIC.call_once(|| Mutex::new(nic))),
        Err(e) => {
            DP83816_NIC_CLAIMED.store(false, Ordering::Release);
            Err(e)
        }
    }
}

/// Probes the device and registers its callbacks, registering either both or neither.
fn probe_and_register(
    pci: Box<dyn PciConfigSpace>,
    regs: Box<dyn RegisterAccess>,
    services: Dp83816Services,
    config: Dp83816Config,
) -> Result<Dp83816Nic> {
    let mut nic = Dp83816Nic::new(pci, regs, services, config)?;
    nic.events.register_interrupt(dp83816_interrupt_handler).map_err(|e| {
        error!("dp83816::init(): couldn't register interrupt handler: {}", e);
        Error::EventSource(e)
    })?;
    if let Err(e) = nic.events.register_timer(dp83816_watchdog_handler) {
        error!("dp83816::init(): couldn't register watchdog timer: {}", e);
        nic.events.unregister_interrupt();
        return Err(Error::EventSource(e));
    }
    Ok(nic)
}

/// The interrupt entry point registered with the platform.
pub fn dp83816_interrupt_handler() {
    if let Some(nic_ref) = DP83816_NIC.get() {
        let mut nic = nic_ref.lock();
        if !nic.handle_interrupt() {
            trace!("dp83816_interrupt_handler(): interrupt was not for us");
        }
    } else {
        error!("BUG: dp83816_interrupt_handler(): DP83816 NIC hasn't yet been initialized!");
    }
}

/// The watchdog timer entry point registered with the platform.
pub fn dp83816_watchdog_handler() {
    if let Some(nic_ref) = DP83816_NIC.get() {
        nic_ref.lock().watchdog_tick();
    } else {
        error!("BUG: dp83816_watchdog_handler(): DP83816 NIC hasn't yet been initialized!");
    }
}

/// Struct representing a DP83816 network interface card.
pub struct Dp83816Nic {
    config: Dp83816Config,
    pci: Box<dyn PciConfigSpace>,
    regs: Box<dyn RegisterAccess>,
    allocator: Box<dyn DmaAllocator>,
    delay: Box<dyn Delay>,
    events: Box<dyn EventSources>,
    output_queue: Box<dyn OutputQueue>,
    /// The actual MAC address burnt into the hardware of this NIC.
    mac_hardware: [u8; 6],
    /// The optional spoofed MAC address to use in place of `mac_hardware`.
    mac_spoofed: Option<[u8; 6]>,
    /// Present from `DebugOnly` upward.
    rx_queue: Option<RxQueue>,
    /// Present from `DebugOnly` upward.
    tx_queue: Option<TxQueue>,
    /// The always-resident buffer the polled send path copies frames into.
    debug_buffer: Option<Box<dyn DmaMemory>>,
    /// Frames received and not yet consumed by the network stack.
    received_frames: VecDeque<ReceivedFrame>,
    /// Retired transmit packets, freed only after the output queue has been serviced.
    deferred_free: Vec<PacketBuffer>,
    activation_level: ActivationLevel,
    clients: ClientIntents,
    phy: Phy,
    link_status: LinkStatus,
    active_medium: Option<MediumIndex>,
    filter: ReceiveFilter,
    wake: WakeOnLan,
    net_stats: NetworkStatistics,
    ether_stats: EthernetStatistics,
}

impl Dp83816Nic {
    /// Checks that the PCI function is a DP83816, enables bus mastering,
    /// and reads what the driver needs to know before any client attaches.
    pub fn new(
        mut pci: Box<dyn PciConfigSpace>,
        mut regs: Box<dyn RegisterAccess>,
        services: Dp83816Services,
        config: Dp83816Config,
    ) -> Result<Dp83816Nic> {
        config.validate()?;

        let (vendor_id, device_id) = (pci.vendor_id(), pci.device_id());
        if vendor_id != NATSEMI_VEND || device_id != DP83816_DEV {
            error!("dp83816::new(): unsupported PCI device {:04x}:{:04x}", vendor_id, device_id);
            return Err(Error::Unsupported("PCI device is not a DP83816"));
        }

        // allow the device to respond to its memory BAR and to use DMA
        pci.pci_set_command_bits(PCI_COMMAND_MEMORY_SPACE | PCI_COMMAND_BUS_MASTER);

        let pm = PowerManagement::probe(&*pci);
        let magic_supported = pm.map_or(false, |pm| {
            pm.supports_pme_from(PowerState::D3Hot) || pm.supports_pme_from(PowerState::D3Cold)
        });

        let mac_hardware = Self::read_mac_address_from_nic(&mut *regs);
        let phy = Phy::probe(&mut *regs)?;

        info!("dp83816::new(): MAC {:02x?}, {} media, wake-on-LAN {}",
            mac_hardware, phy.media.len(), if magic_supported { "supported" } else { "unsupported" });

        Ok(Dp83816Nic {
            config,
            pci,
            regs,
            allocator: services.allocator,
            delay: services.delay,
            events: services.events,
            output_queue: services.output_queue,
            mac_hardware,
            mac_spoofed: None,
            rx_queue: None,
            tx_queue: None,
            debug_buffer: None,
            received_frames: VecDeque::new(),
            deferred_free: Vec::new(),
            activation_level: ActivationLevel::None,
            clients: ClientIntents::default(),
            phy,
            link_status: LinkStatus::UNKNOWN,
            active_medium: None,
            filter: ReceiveFilter::default(),
            wake: WakeOnLan::new(pm, magic_supported),
            net_stats: NetworkStatistics::default(),
            ether_stats: EthernetStatistics::default(),
        })
    }

    /// Reads the station address the chip loaded from its EEPROM into the perfect match filter.
    fn read_mac_address_from_nic(regs: &mut dyn RegisterAccess) -> [u8; 6] {
        let mut mac_addr = [0u8; 6];
        for (i, rfaddr) in RFADDR_PMATCH.iter().enumerate() {
            regs.write32(REG_RFCR, *rfaddr);
            let word = regs.read32(REG_RFDR);
            mac_addr[2 * i] = word as u8;
            mac_addr[2 * i + 1] = (word >> 8) as u8;
        }
        debug!("dp83816: read hardware MAC address: {:02x?}", mac_addr);
        mac_addr
    }

    pub fn activation_level(&self) -> ActivationLevel {
        self.activation_level
    }

    pub fn config(&self) -> &Dp83816Config {
        &self.config
    }

    fn set_link_status(&mut self, status: LinkStatus, medium: Option<MediumIndex>) {
        if status != self.link_status || medium != self.active_medium {
            match medium.and_then(|m| self.phy.media.get(m.0)) {
                Some(m) => info!("dp83816: link {} ({})", status, m),
                None => info!("dp83816: link {}", status),
            }
        }
        self.link_status = status;
        self.active_medium = medium;
    }
}

impl NetworkInterfaceCard for Dp83816Nic {
    type Error = Error;

    fn enable(&mut self) -> Result<()> {
        self.set_client_intents(ClientIntents { network_stack: true, ..self.clients })
    }

    fn disable(&mut self) -> Result<()> {
        self.set_client_intents(ClientIntents { network_stack: false, ..self.clients })
    }

    fn output_packet(&mut self, packet: PacketBuffer) -> OutputStatus {
        match self.enqueue_packet(packet) {
            Ok(()) => OutputStatus::Sent,
            Err(TxError::Stall(packet)) => OutputStatus::Stalled(packet),
            Err(TxError::Dropped(e)) => {
                debug!("dp83816::output_packet(): dropped packet: {}", e);
                OutputStatus::Dropped
            }
        }
    }

    fn get_received_frame(&mut self) -> Option<ReceivedFrame> {
        self.received_frames.pop_front()
    }

    fn mac_address(&self) -> [u8; 6] {
        self.mac_spoofed.unwrap_or(self.mac_hardware)
    }

    fn set_mac_address(&mut self, mac_address: [u8; 6]) -> Result<()> {
        self.mac_spoofed = Some(mac_address);
        if self.activation_level > ActivationLevel::None {
            self.program_station_address();
        }
        Ok(())
    }

    fn media(&self) -> &[Medium] {
        &self.phy.media
    }

    fn select_medium(&mut self, index: MediumIndex) -> Result<()> {
        if self.activation_level == ActivationLevel::None {
            // remembered and applied at the next bring-up
            self.phy.media.get(index.0).ok_or(Error::InvalidMedium)?;
            self.phy.selected = index;
            return Ok(());
        }
        self.select_medium_and_negotiate(index, false).map(|_| ())
    }

    fn link_status(&self) -> (LinkStatus, Option<MediumIndex>) {
        (self.link_status, self.active_medium)
    }

    fn set_promiscuous_mode(&mut self, enabled: bool) -> Result<()> {
        self.filter.promiscuous = enabled;
        self.apply_receive_filter();
        Ok(())
    }

    fn set_multicast_mode(&mut self, enabled: bool) -> Result<()> {
        self.filter.all_multicast = enabled;
        self.apply_receive_filter();
        Ok(())
    }

    fn set_multicast_list(&mut self, addresses: &[[u8; 6]]) -> Result<()> {
        self.filter.set_multicast_list(addresses);
        self.apply_receive_filter();
        Ok(())
    }

    fn network_statistics(&self) -> &NetworkStatistics {
        &self.net_stats
    }

    fn ethernet_statistics(&self) -> &EthernetStatistics {
        &self.ether_stats
    }
}

impl KernelDebugger for Dp83816Nic {
    type Error = Error;

    fn enable_debugger(&mut self) -> Result<()> {
        self.set_client_intents(ClientIntents { debugger: true, ..self.clients })
    }

    fn disable_debugger(&mut self) -> Result<()> {
        self.set_client_intents(ClientIntents { debugger: false, ..self.clients })
    }

    fn send_packet_polled(&mut self, data: &[u8]) -> Result<()> {
        self.poll_send(data)
    }

    fn receive_packet_polled(&mut self, buffer: &mut [u8], timeout_us: u32) -> usize {
        self.poll_receive(buffer, timeout_us)
    }
}
