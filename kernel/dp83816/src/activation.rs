//! The activation level state machine.
//!
//! Hardware resources are brought up and torn down in two steps:
//!
//! * `None`: nothing allocated, PCI function closed, interrupts and watchdog off.
//! * `DebugOnly`: rings and the debug buffer exist, the chip is reset, programmed and
//!   transmitting/receiving, and the watchdog runs. Interrupts stay off; only the
//!   polled paths and the watchdog touch the rings.
//! * `FullyUp`: additionally the output queue runs and interrupts are delivered.
//!
//! The target level is a pure function of which clients are attached.
//! Levels change one step at a time; a failed step stops the walk at the
//! last level that was reached, which is not rolled back.

use crate::error::{Error, Result};
use crate::regs::*;
use crate::phy::PhyState;
use crate::Dp83816Nic;
use network_interface_card::LinkStatus;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ActivationLevel {
    None,
    DebugOnly,
    FullyUp,
}

impl ActivationLevel {
    fn step_up(self) -> ActivationLevel {
        match self {
            ActivationLevel::None => ActivationLevel::DebugOnly,
            _ => ActivationLevel::FullyUp,
        }
    }

    fn step_down(self) -> ActivationLevel {
        match self {
            ActivationLevel::FullyUp => ActivationLevel::DebugOnly,
            _ => ActivationLevel::None,
        }
    }
}

/// Which clients currently want the hardware.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClientIntents {
    pub network_stack: bool,
    pub debugger: bool,
}

impl ClientIntents {
    pub fn target_level(&self) -> ActivationLevel {
        if self.network_stack {
            ActivationLevel::FullyUp
        } else if self.debugger {
            ActivationLevel::DebugOnly
        } else {
            ActivationLevel::None
        }
    }
}

impl Dp83816Nic {
    /// Records new client intents and moves the hardware to the level they call for.
    ///
    /// The intents are kept only if the level change succeeds,
    /// except that a client detaching is always recorded.
    /// While the system is asleep the hardware is left alone and the
    /// intents are applied on wake.
    pub(crate) fn set_client_intents(&mut self, intents: ClientIntents) -> Result<()> {
        if self.wake.defer_intents(intents) {
            debug!("dp83816: asleep, deferring client intents {:?} until wake", intents);
            self.clients = intents;
            return Ok(());
        }
        let detaching = (self.clients.network_stack && !intents.network_stack)
            || (self.clients.debugger && !intents.debugger);
        let result = self.set_activation_level(intents.target_level());
        if result.is_ok() || detaching {
            self.clients = intents;
        }
        result
    }

    /// Walks the activation level toward `target` one step at a time.
    /// Does nothing, and touches no hardware, if already there.
    pub fn set_activation_level(&mut self, target: ActivationLevel) -> Result<()> {
        while self.activation_level < target {
            let next = self.activation_level.step_up();
            self.increase_activation_level(next).map_err(|e| {
                error!("dp83816::set_activation_level(): couldn't reach {:?}, staying at {:?}: {}",
                    next, self.activation_level, e);
                e
            })?;
            self.activation_level = next;
            debug!("dp83816: activation level is now {:?}", next);
        }
        while self.activation_level > target {
            let next = self.activation_level.step_down();
            self.decrease_activation_level(next).map_err(|e| {
                error!("dp83816::set_activation_level(): couldn't drop to {:?}, staying at {:?}: {}",
                    next, self.activation_level, e);
                e
            })?;
            self.activation_level = next;
            debug!("dp83816: activation level is now {:?}", next);
        }
        Ok(())
    }

    /// Performs the single step up to `level`.
    fn increase_activation_level(&mut self, level: ActivationLevel) -> Result<()> {
        match level {
            ActivationLevel::DebugOnly => {
                if !self.pci.open() {
                    return Err(Error::DeviceBusy);
                }
                if let Err(e) = self.allocate_software_resources() {
                    self.pci.close();
                    return Err(e);
                }
                if let Err(e) = self.reset_chip() {
                    self.release_software_resources();
                    self.pci.close();
                    return Err(e);
                }
                self.init_hardware();

                // link negotiation failing doesn't stop bring-up
                let selected = self.phy.selected;
                if let Err(e) = self.select_medium_and_negotiate(selected, self.config.wait_for_link_on_enable) {
                    warn!("dp83816: couldn't select initial medium: {}", e);
                }

                self.start_tx_rx();
                self.events.set_timeout_ms(self.config.watchdog_period_ms);
            }
            ActivationLevel::FullyUp => {
                self.output_queue.set_capacity(self.config.output_queue_capacity);
                self.output_queue.start();
                self.regs.write32(REG_IER, IER_IE);
                self.events.enable_interrupt();
            }
            ActivationLevel::None => { }
        }
        Ok(())
    }

    /// Performs the single step down to `level`.
    fn decrease_activation_level(&mut self, level: ActivationLevel) -> Result<()> {
        match level {
            ActivationLevel::DebugOnly => {
                self.output_queue.stop();
                self.regs.write32(REG_IER, 0);
                self.events.disable_interrupt();
            }
            ActivationLevel::None => {
                // a chip that won't stop may still be using the rings, so keep them
                self.stop_tx_rx()?;
                self.events.cancel_timeout();
                self.phy.state = PhyState::Unreset;
                self.set_link_status(LinkStatus::DOWN, None);
                let flushed = self.output_queue.flush();
                if flushed > 0 {
                    debug!("dp83816: flushed {} queued packets", flushed);
                }
                self.output_queue.set_capacity(0);
                self.pci.close();
                self.release_software_resources();
            }
            ActivationLevel::FullyUp => { }
        }
        Ok(())
    }

    /// Allocates both rings and the debug buffer. Nothing is kept on failure.
    fn allocate_software_resources(&mut self) -> Result<()> {
        let rx_queue = nic_initialization::init_rx_queue(
            &*self.allocator,
            self.config.rx_ring_size,
            self.config.descriptor_alignment,
            self.config.rx_buffer_size,
        )?;
        let tx_queue = nic_initialization::init_tx_queue(
            &*self.allocator,
            self.config.tx_ring_size,
            self.config.descriptor_alignment,
        )?;
        let debug_buffer = self.allocator.allocate(self.config.rx_buffer_size as usize, core::mem::size_of::<u32>())?;
        if debug_buffer.phys_addr().as_u32().is_none() {
            return Err(Error::Allocation);
        }

        self.rx_queue = Some(rx_queue);
        self.tx_queue = Some(tx_queue);
        self.debug_buffer = Some(debug_buffer);
        Ok(())
    }

    /// Frees every ring-resident buffer and packet along with the rings themselves.
    fn release_software_resources(&mut self) {
        self.rx_queue = None;
        self.tx_queue = None;
        self.debug_buffer = None;
        self.deferred_free.clear();
    }
}
