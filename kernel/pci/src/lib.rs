//! PCI Configuration Space Access
//!
//! Bus enumeration and the raw config-space access mechanism belong to the platform.
//! Drivers receive an object implementing [`PciConfigSpace`] for their own function,
//! and this crate layers the common config-space operations on top of it:
//! command bits, the capability list walk, BAR decoding, and power management.

#![no_std]

#[cfg(any(test, feature = "fake"))]
pub mod fake;


use log::*;
use bit_field::BitField;

// The below constants define the PCI configuration space.
// More info here: <http://wiki.osdev.org/PCI#PCI_Device_Structure>
pub const PCI_VENDOR_ID:             u8 = 0x0;
pub const PCI_DEVICE_ID:             u8 = 0x2;
pub const PCI_COMMAND:               u8 = 0x4;
pub const PCI_STATUS:                u8 = 0x6;
pub const PCI_REVISION_ID:           u8 = 0x8;
pub const PCI_HEADER_TYPE:           u8 = 0xE;
pub const PCI_BAR0:                  u8 = 0x10;
pub const PCI_CAPABILITIES:          u8 = 0x34;
pub const PCI_INTERRUPT_LINE:        u8 = 0x3C;
pub const PCI_INTERRUPT_PIN:         u8 = 0x3D;

/// Command register: respond to memory space accesses.
pub const PCI_COMMAND_MEMORY_SPACE:  u16 = 1 << 1;
/// Command register: allow the device to master the bus (DMA).
pub const PCI_COMMAND_BUS_MASTER:    u16 = 1 << 2;
/// Command register: disable legacy INTx interrupts.
pub const PCI_COMMAND_INTERRUPT_DISABLE: u16 = 1 << 10;

/// Status register: the capability list pointer is valid.
const PCI_STATUS_CAPABILITIES_VALID: u16 = 1 << 4;

/// If a BAR's bits [2:1] equal this value, that BAR describes a 64-bit address.
/// If not, that BAR describes a 32-bit address.
const BAR_ADDRESS_IS_64_BIT: u32 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum PciCapability {
    PowerManagement = 0x01,
    Msi  = 0x05,
    Msix = 0x11,
}

/// Access to the configuration space of one PCI function.
///
/// Offsets are byte offsets into the 256-byte config header.
pub trait PciConfigSpace: Send {
    fn pci_read_8(&self, offset: u8) -> u8;
    fn pci_read_16(&self, offset: u8) -> u16;
    fn pci_read_32(&self, offset: u8) -> u32;
    fn pci_write_16(&mut self, offset: u8, value: u16);
    fn pci_write_32(&mut self, offset: u8, value: u32);

    /// Claims the function for exclusive use by one driver instance.
    /// Returns false if someone else holds it.
    fn open(&mut self) -> bool;

    /// Releases a claim taken by [`PciConfigSpace::open`].
    fn close(&mut self);

    fn vendor_id(&self) -> u16 {
        self.pci_read_16(PCI_VENDOR_ID)
    }

    fn device_id(&self) -> u16 {
        self.pci_read_16(PCI_DEVICE_ID)
    }

    /// Sets the given bits in the command register, leaving the others untouched.
    fn pci_set_command_bits(&mut self, bits: u16) {
        let command = self.pci_read_16(PCI_COMMAND);
        trace!("pci_set_command_bits: read value: {:#x}", command);
        self.pci_write_16(PCI_COMMAND, command | bits);
    }

    /// Sets the command register's bus master bit, which is needed to activate DMA.
    fn pci_set_command_bus_master_bit(&mut self) {
        self.pci_set_command_bits(PCI_COMMAND_BUS_MASTER);
    }

    /// Explores the PCI config space and returns address of requested capability, if present.
    /// PCI capabilities are stored as a linked list in the PCI config space,
    /// with each capability storing the pointer to the next capability right after its ID.
    /// The function returns a None value if capabilities are not valid for this device
    /// or if the requested capability is not present.
    fn find_pci_capability(&self, pci_capability: PciCapability) -> Option<u8> {
        let pci_capability = pci_capability as u8;
        let status = self.pci_read_16(PCI_STATUS);

        // capabilities are only valid if bit 4 of status register is set
        if status & PCI_STATUS_CAPABILITIES_VALID == 0 {
            return None;
        }

        // mask the bottom 2 bits of the capabilities pointer to find the address of the first capability
        let mut cap_addr = self.pci_read_8(PCI_CAPABILITIES) & 0xFC;

        // a malformed list could loop forever; there is room for at most 48 capabilities
        let mut remaining = (256 - 0x40) / 4;
        while cap_addr != 0 && remaining > 0 {
            // the header holds the capability ID in its low byte and the next pointer in its high byte
            let cap_header = self.pci_read_16(cap_addr);
            let cap_id = cap_header.get_bits(0..8) as u8;

            if cap_id == pci_capability {
                debug!("Found capability: {:#X} at {:#X}", pci_capability, cap_addr);
                return Some(cap_addr);
            }

            cap_addr = cap_header.get_bits(8..16) as u8 & 0xFC;
            remaining -= 1;
        }
        None
    }

    /// Returns the base address of the memory region specified by the given BAR.
    ///
    /// If the BAR indicates it is part of a 64-bit address, it is combined with
    /// the BAR right above it (`bar + 1`), e.g., `BAR1:BAR0`.
    /// Returns an error for I/O space BARs.
    fn determine_mem_base(&self, bar_index: usize) -> Result<u64, &'static str> {
        if bar_index > 5 {
            return Err("BAR index must be between 0 and 5 inclusive");
        }
        let bar_offset = PCI_BAR0 + (bar_index as u8 * 4);
        let mut bar = self.pci_read_32(bar_offset);
        if bar.get_bit(0) {
            return Err("determine_mem_base(): BAR describes I/O space, not memory");
        }

        let mem_base = if bar.get_bits(1..3) == BAR_ADDRESS_IS_64_BIT {
            if bar_index == 5 {
                return Err("next highest BAR index is out of range");
            }
            let next_bar = self.pci_read_32(bar_offset + 4);
            // Clear the bottom 4 bits because it's a 16-byte aligned address
            *bar.set_bits(0..4, 0) as u64 | ((next_bar as u64) << 32)
        } else {
            *bar.set_bits(0..4, 0) as u64
        };
        Ok(mem_base)
    }
}

/// PCI power states a function can signal PME# from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PowerState {
    D0 = 0,
    D1 = 1,
    D2 = 2,
    D3Hot = 3,
    D3Cold = 4,
}

/// Offset of the Power Management Capabilities register within the capability.
const PM_CAPABILITIES: u8 = 2;
/// Offset of the Power Management Control/Status register within the capability.
const PM_CONTROL_STATUS: u8 = 4;
const PMCSR_PME_ENABLE: usize = 8;
const PMCSR_PME_STATUS: usize = 15;

/// The PCI power management capability of one function.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PowerManagement {
    cap_offset: u8,
    capabilities: u16,
}

impl PowerManagement {
    /// Looks up the power management capability, returning `None` if the function lacks one.
    pub fn probe(config: &dyn PciConfigSpace) -> Option<PowerManagement> {
        let cap_offset = config.find_pci_capability(PciCapability::PowerManagement)?;
        let capabilities = config.pci_read_16(cap_offset + PM_CAPABILITIES);
        Some(PowerManagement { cap_offset, capabilities })
    }

    /// Whether the function can assert PME# while in `state`.
    pub fn supports_pme_from(&self, state: PowerState) -> bool {
        // PME_Support occupies bits [15:11], one bit per state starting with D0
        self.capabilities.get_bit(11 + state as usize)
    }

    /// Enables or disables PME# generation.
    pub fn set_pme_enable(&self, config: &mut dyn PciConfigSpace, enable: bool) {
        let mut pmcsr = config.pci_read_16(self.cap_offset + PM_CONTROL_STATUS);
        // PME_Status is write-one-to-clear, so don't write back a stale 1
        pmcsr.set_bit(PMCSR_PME_STATUS, false);
        pmcsr.set_bit(PMCSR_PME_ENABLE, enable);
        config.pci_write_16(self.cap_offset + PM_CONTROL_STATUS, pmcsr);
    }

    pub fn pme_status(&self, config: &dyn PciConfigSpace) -> bool {
        config.pci_read_16(self.cap_offset + PM_CONTROL_STATUS).get_bit(PMCSR_PME_STATUS)
    }

    /// Clears a latched PME event.
    pub fn clear_pme_status(&self, config: &mut dyn PciConfigSpace) {
        let mut pmcsr = config.pci_read_16(self.cap_offset + PM_CONTROL_STATUS);
        pmcsr.set_bit(PMCSR_PME_STATUS, true);
        config.pci_write_16(self.cap_offset + PM_CONTROL_STATUS, pmcsr);
    }
}
