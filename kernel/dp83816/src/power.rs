//! System sleep and wake, and magic-packet wake-on-LAN.

use pci::PowerManagement;
use crate::error::{Error, Result};
use crate::regs::*;
use crate::{ActivationLevel, ClientIntents, Dp83816Nic};

/// A system power transition the driver is told about.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SystemPowerState {
    Sleep,
    Wake,
}

/// Wake-on-LAN state.
pub struct WakeOnLan {
    /// The PCI power management capability, if the function has one.
    pm: Option<PowerManagement>,
    /// Whether the function can signal PME from a low-power state.
    magic_supported: bool,
    magic_enabled: bool,
    /// Client intents to restore on wake; `Some` while asleep.
    saved_intents: Option<ClientIntents>,
}

impl WakeOnLan {
    pub fn new(pm: Option<PowerManagement>, magic_supported: bool) -> WakeOnLan {
        WakeOnLan { pm, magic_supported, magic_enabled: false, saved_intents: None }
    }

    pub fn is_magic_supported(&self) -> bool {
        self.magic_supported
    }

    pub fn is_magic_enabled(&self) -> bool {
        self.magic_enabled
    }

    pub fn is_asleep(&self) -> bool {
        self.saved_intents.is_some()
    }

    /// Replaces the intents to restore on wake. Returns false if not asleep.
    pub(crate) fn defer_intents(&mut self, intents: ClientIntents) -> bool {
        match self.saved_intents.as_mut() {
            Some(saved) => {
                *saved = intents;
                true
            }
            None => false,
        }
    }

    /// The wake control bits hardware init should program.
    fn wcsr_bits(&self) -> u32 {
        if self.magic_supported && self.magic_enabled { WCSR_WKMAG } else { 0 }
    }
}

impl Dp83816Nic {
    pub fn wake_on_lan(&self) -> &WakeOnLan {
        &self.wake
    }

    /// Writes the wake control register from the current wake-on-LAN settings.
    pub(crate) fn program_wake_settings(&mut self) {
        let wcsr = self.wake.wcsr_bits();
        self.regs.write32(REG_WCSR, wcsr);
    }

    /// Turns magic-packet wake on or off.
    pub fn set_wake_on_magic_packet(&mut self, enabled: bool) -> Result<()> {
        if enabled && !self.wake.magic_supported {
            return Err(Error::Unsupported("the PCI function can't signal PME from D3"));
        }
        self.wake.magic_enabled = enabled;
        if self.activation_level > ActivationLevel::None {
            self.program_wake_settings();
        }
        Ok(())
    }

    /// Prepares for system sleep or recovers from it.
    ///
    /// Sleep tears the hardware down to `None`, remembering which clients were
    /// attached, and leaves the receiver listening for magic packets if enabled.
    /// Wake clears any latched wake event and brings the clients back.
    pub fn set_power_state(&mut self, state: SystemPowerState) -> Result<()> {
        match state {
            SystemPowerState::Sleep => {
                if self.wake.is_asleep() {
                    return Ok(());
                }
                let intents = self.clients;
                self.set_activation_level(ActivationLevel::None)?;
                self.wake.saved_intents = Some(intents);
                if self.wake.wcsr_bits() != 0 {
                    self.arm_magic_packet_wake();
                }
                info!("dp83816: asleep, wake-on-LAN {}", if self.wake.magic_enabled { "armed" } else { "off" });
                Ok(())
            }
            SystemPowerState::Wake => {
                let Some(intents) = self.wake.saved_intents.take() else {
                    return Ok(());
                };
                self.disarm_wake();
                self.set_client_intents(intents)
            }
        }
    }

    /// Leaves the receiver running without descriptors so the chip can watch for
    /// magic packets, and lets it assert PME.
    fn arm_magic_packet_wake(&mut self) {
        self.program_station_address();
        self.program_receive_filter();
        self.program_wake_settings();
        self.regs.write32(REG_RXDP, 0);
        let ccsr = self.regs.read32(REG_CCSR);
        self.regs.write32(REG_CCSR, ccsr | CCSR_PMEEN);
        if let Some(pm) = self.wake.pm {
            pm.set_pme_enable(&mut *self.pci, true);
        }
        self.regs.write32(REG_CR, CR_RXE);
    }

    /// Undoes `arm_magic_packet_wake` and clears any latched wake event.
    fn disarm_wake(&mut self) {
        let wcsr = self.regs.read32(REG_WCSR);
        if wcsr & WCSR_MPR != 0 {
            info!("dp83816: woken by a magic packet");
        }
        self.regs.write32(REG_WCSR, 0);
        let ccsr = self.regs.read32(REG_CCSR);
        // PMESTS is write-one-to-clear
        self.regs.write32(REG_CCSR, (ccsr & !CCSR_PMEEN) | CCSR_PMESTS);
        if let Some(pm) = self.wake.pm {
            pm.set_pme_enable(&mut *self.pci, false);
            pm.clear_pme_status(&mut *self.pci);
        }
    }
}
