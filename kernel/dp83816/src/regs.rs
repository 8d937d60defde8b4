//! This file contains the register map of the DP83816 and the values written to those registers.
//!
//! The operational registers occupy the first 256 bytes of the memory BAR.
//! The internal PHY's MII registers are mapped into the same window starting at 0x80,
//! one 16-bit MII register per dword.

use bitflags::bitflags;
use volatile::Volatile;

/// Raw access to the register window, by byte offset.
///
/// Reads take `&mut self` because some registers (e.g. [`REG_ISR`]) clear on read.
pub trait RegisterAccess: Send {
    fn read32(&mut self, offset: u32) -> u32;
    fn write32(&mut self, offset: u32, value: u32);
}

/// The layout in memory of the DP83816 register window.
#[repr(C)]
pub struct Dp83816Registers {
    pub window: [Volatile<u32>; 64],                        // 0x00 - 0xFF
}

const _: () = assert!(core::mem::size_of::<Dp83816Registers>() == 256);

/// Registers reached through a memory-mapped BAR.
pub struct MmioRegisters {
    regs: &'static mut Dp83816Registers,
}

impl MmioRegisters {
    /// # Safety
    /// `virt_base` must be the virtual address at which the device's memory BAR is mapped
    /// as uncached device memory, and the mapping must outlive the returned object.
    pub unsafe fn new(virt_base: usize) -> MmioRegisters {
        MmioRegisters { regs: &mut *(virt_base as *mut Dp83816Registers) }
    }
}

impl RegisterAccess for MmioRegisters {
    fn read32(&mut self, offset: u32) -> u32 {
        self.regs.window[(offset / 4) as usize].read()
    }

    fn write32(&mut self, offset: u32, value: u32) {
        self.regs.window[(offset / 4) as usize].write(value)
    }
}

/// The memory BAR; BAR0 is the I/O space alias of the same registers.
pub const DP83816_MEMORY_BAR:   usize = 1;

// Operational registers
pub const REG_CR:               u32 = 0x00;
pub const REG_CFG:              u32 = 0x04;
pub const REG_MEAR:             u32 = 0x08;
pub const REG_PTSCR:            u32 = 0x0C;
pub const REG_ISR:              u32 = 0x10;
pub const REG_IMR:              u32 = 0x14;
pub const REG_IER:              u32 = 0x18;
pub const REG_IHR:              u32 = 0x1C;
pub const REG_TXDP:             u32 = 0x20;
pub const REG_TXCFG:            u32 = 0x24;
pub const REG_RXDP:             u32 = 0x30;
pub const REG_RXCFG:            u32 = 0x34;
pub const REG_CCSR:             u32 = 0x3C;
pub const REG_WCSR:             u32 = 0x40;
pub const REG_PCR:              u32 = 0x44;
pub const REG_RFCR:             u32 = 0x48;
pub const REG_RFDR:             u32 = 0x4C;
pub const REG_SRR:              u32 = 0x58;
pub const REG_MIBC:             u32 = 0x5C;
/// MIB counter of frames dropped for lack of receive resources.
pub const REG_RX_MISSED:        u32 = 0x68;

// Internal PHY registers
pub const REG_BMCR:             u32 = 0x80;
pub const REG_BMSR:             u32 = 0x84;
pub const REG_PHYIDR1:          u32 = 0x88;
pub const REG_PHYIDR2:          u32 = 0x8C;
pub const REG_ANAR:             u32 = 0x90;
pub const REG_ANLPAR:           u32 = 0x94;
pub const REG_ANER:             u32 = 0x98;
pub const REG_PHYSTS:           u32 = 0xC0;
pub const REG_MICR:             u32 = 0xC4;
pub const REG_MISR:             u32 = 0xC8;
pub const REG_PGSEL:            u32 = 0xCC;

// PHY test registers, visible only while PGSEL selects page 1
pub const REG_PMDCSR:           u32 = 0xE4;
pub const REG_DSPCFG:           u32 = 0xF4;
pub const REG_SDCFG:            u32 = 0xF8;
pub const REG_TSTDAT:           u32 = 0xFC;

/// Register writes that tune the PHY's DSP; needed after every PHY reset
/// for reliable 100Mb operation on silicon revisions before D.
pub const PHY_DSP_FIXUP: [(u32, u32); 6] = [
    (REG_PGSEL,  0x0001),
    (REG_PMDCSR, 0x189C),
    (REG_TSTDAT, 0x0000),
    (REG_DSPCFG, 0x5040),
    (REG_SDCFG,  0x008C),
    (REG_PGSEL,  0x0000),
];

// Command register
pub const CR_TXE:               u32 = 1 << 0;
pub const CR_TXD:               u32 = 1 << 1;
pub const CR_RXE:               u32 = 1 << 2;
pub const CR_RXD:               u32 = 1 << 3;
pub const CR_TXR:               u32 = 1 << 4;
pub const CR_RXR:               u32 = 1 << 5;
pub const CR_SWI:               u32 = 1 << 7;
pub const CR_RST:               u32 = 1 << 8;

// Configuration and media status register
pub const CFG_PESEL:            u32 = 1 << 3;
pub const CFG_PHY_DIS:          u32 = 1 << 9;
pub const CFG_PHY_RST:          u32 = 1 << 10;
pub const CFG_ANEG_DN:          u32 = 1 << 27;
pub const CFG_POL:              u32 = 1 << 28;
pub const CFG_FDUP:             u32 = 1 << 29;
pub const CFG_SPEED100:         u32 = 1 << 30;
pub const CFG_LNKSTS:           u32 = 1 << 31;
/// The three bits that together describe the resolved link.
pub const CFG_LINK_MASK:        u32 = CFG_LNKSTS | CFG_SPEED100 | CFG_FDUP;

bitflags! {
    /// Interrupt status (ISR, clear on read) and mask (IMR) bits.
    pub struct InterruptStatus: u32 {
        const RXOK   = 1 << 0;
        const RXDESC = 1 << 1;
        const RXERR  = 1 << 2;
        const RXEARLY = 1 << 3;
        const RXIDLE = 1 << 4;
        const RXORN  = 1 << 5;
        const TXOK   = 1 << 6;
        const TXDESC = 1 << 7;
        const TXERR  = 1 << 8;
        const TXIDLE = 1 << 9;
        const TXURN  = 1 << 10;
        const MIB    = 1 << 11;
        const SWI    = 1 << 12;
        const PME    = 1 << 13;
        const PHY    = 1 << 14;
        const HIBERR = 1 << 15;
        const RXSOVR = 1 << 16;
        const RTABT  = 1 << 20;
        const RMABT  = 1 << 21;
        const SSERR  = 1 << 22;
        const DPERR  = 1 << 23;

        const RX_EVENTS = Self::RXOK.bits | Self::RXDESC.bits | Self::RXERR.bits;
        const TX_EVENTS = Self::TXOK.bits | Self::TXDESC.bits | Self::TXURN.bits;
        /// Bus errors after which the chip stops its DMA engines.
        const BUS_ERRORS = Self::RTABT.bits | Self::RMABT.bits | Self::SSERR.bits | Self::DPERR.bits;
        /// Everything the interrupt handler acts on.
        const INTERESTING = Self::RX_EVENTS.bits | Self::TX_EVENTS.bits | Self::PHY.bits | Self::BUS_ERRORS.bits;
    }
}

/// Interrupt enable register: the global enable bit.
pub const IER_IE:               u32 = 1 << 0;

// Transmit configuration register
pub const TXCFG_CSI:            u32 = 1 << 31;
pub const TXCFG_HBI:            u32 = 1 << 30;
pub const TXCFG_MLB:            u32 = 1 << 29;
pub const TXCFG_ATP:            u32 = 1 << 28;
pub const TXCFG_ECRETRY:        u32 = 1 << 23;
/// Max DMA burst of 256 bytes.
pub const TXCFG_MXDMA_256:      u32 = 0b111 << 20;
/// Fill threshold field, in units of 32 bytes.
pub const TXCFG_FLTH_SHIFT:     u32 = 8;
/// Drain threshold field, in units of 32 bytes.
pub const TXCFG_DRTH_MASK:      u32 = 0x3F;
/// Start transmitting once 512 bytes are buffered.
pub const TX_FLTH_DEFAULT:      u32 = (512 / 32) << TXCFG_FLTH_SHIFT;
pub const TX_DRTH_DEFAULT:      u32 = 64 / 32;
/// Settings for full duplex: no carrier sense, no heartbeat.
pub const TXCFG_FULL_DUPLEX:    u32 = TXCFG_CSI | TXCFG_HBI;

// Receive configuration register
pub const RXCFG_AEP:            u32 = 1 << 31;
pub const RXCFG_ARP:            u32 = 1 << 30;
pub const RXCFG_ATX:            u32 = 1 << 28;
pub const RXCFG_ALP:            u32 = 1 << 27;
pub const RXCFG_MXDMA_256:      u32 = 0b111 << 20;
/// Drain threshold of 128 bytes, in units of 8 bytes, in bits [5:1].
pub const RX_DRTH_DEFAULT:      u32 = (128 / 8) << 1;

// Clock run control/status register (power management)
pub const CCSR_PMEEN:           u32 = 1 << 8;
pub const CCSR_PMESTS:          u32 = 1 << 15;

// Wake command/status register
pub const WCSR_WKPHY:           u32 = 1 << 0;
pub const WCSR_WKUCP:           u32 = 1 << 1;
pub const WCSR_WKMCP:           u32 = 1 << 2;
pub const WCSR_WKBCP:           u32 = 1 << 3;
pub const WCSR_WKARP:           u32 = 1 << 4;
pub const WCSR_WKMAG:           u32 = 1 << 9;
/// Status: a magic packet was received.
pub const WCSR_MPR:             u32 = 1 << 28;

// Receive filter/match control register
pub const RFCR_RFEN:            u32 = 1 << 31;
pub const RFCR_AAB:             u32 = 1 << 30;
pub const RFCR_AAM:             u32 = 1 << 29;
pub const RFCR_AAU:             u32 = 1 << 28;
pub const RFCR_APM:             u32 = 1 << 27;
pub const RFCR_AARP:            u32 = 1 << 22;
pub const RFCR_MHEN:            u32 = 1 << 21;
pub const RFCR_ADDR_MASK:       u32 = 0x3FF;

/// Receive filter RAM offsets of the three 16-bit perfect match words.
pub const RFADDR_PMATCH:        [u32; 3] = [0x000, 0x002, 0x004];
/// Receive filter RAM offset of the 512-bit multicast hash table.
pub const RFADDR_HASH:          u32 = 0x200;

// MIB control register
pub const MIBC_ACLR:            u32 = 1 << 2;

// MII basic mode control register
pub const BMCR_RESET:           u32 = 1 << 15;
pub const BMCR_LOOPBACK:        u32 = 1 << 14;
pub const BMCR_SPEED100:        u32 = 1 << 13;
pub const BMCR_ANEN:            u32 = 1 << 12;
pub const BMCR_POWERDOWN:       u32 = 1 << 11;
pub const BMCR_ISOLATE:         u32 = 1 << 10;
pub const BMCR_ANRESTART:       u32 = 1 << 9;
pub const BMCR_DUPLEX:          u32 = 1 << 8;

// MII basic mode status register
pub const BMSR_100TXFD:         u32 = 1 << 14;
pub const BMSR_100TXHD:         u32 = 1 << 13;
pub const BMSR_10FD:            u32 = 1 << 12;
pub const BMSR_10HD:            u32 = 1 << 11;
pub const BMSR_ANCOMPLETE:      u32 = 1 << 5;
pub const BMSR_ANABILITY:       u32 = 1 << 3;
pub const BMSR_LINK:            u32 = 1 << 2;

// MII auto-negotiation advertisement register
pub const ANAR_PAUSE:           u32 = 1 << 10;
pub const ANAR_100FD:           u32 = 1 << 8;
pub const ANAR_100HD:           u32 = 1 << 7;
pub const ANAR_10FD:            u32 = 1 << 6;
pub const ANAR_10HD:            u32 = 1 << 5;
/// Selector field for IEEE 802.3.
pub const ANAR_SELECTOR_8023:   u32 = 0x01;
