//! Interrupt and watchdog servicing.

use crate::regs::*;
use crate::{ActivationLevel, Dp83816Nic};

/// Passes over the interrupt status register before the handler gives the CPU back.
const MAX_INTERRUPT_PASSES: usize = 16;

impl Dp83816Nic {
    /// Services every pending event the chip reports.
    ///
    /// Does nothing below `FullyUp`, since the interrupt line may be shared.
    /// Returns true if any event was ours.
    pub fn handle_interrupt(&mut self) -> bool {
        if self.activation_level != ActivationLevel::FullyUp {
            return false;
        }

        let mut handled = false;
        for _ in 0..MAX_INTERRUPT_PASSES {
            // reading ISR acknowledges everything in it
            let status = InterruptStatus::from_bits_truncate(self.regs.read32(REG_ISR)) & InterruptStatus::INTERESTING;
            if status.is_empty() {
                break;
            }
            handled = true;

            if status.intersects(InterruptStatus::RX_EVENTS) {
                self.service_rx_ring();
            }
            if status.intersects(InterruptStatus::TX_EVENTS) {
                if status.contains(InterruptStatus::TXURN) {
                    self.raise_tx_drain_threshold();
                }
                self.service_tx_ring();
            }
            if status.contains(InterruptStatus::PHY) {
                self.report_link_status();
            }
            if status.intersects(InterruptStatus::BUS_ERRORS) {
                error!("dp83816: fatal bus error, ISR bits {:?}", status & InterruptStatus::BUS_ERRORS);
            }
        }
        handled
    }

    /// The periodic watchdog: retires transmits (including polled ones, which
    /// never raise an interrupt the driver sees), collects hardware counters,
    /// watches the link, and re-arms itself.
    pub fn watchdog_tick(&mut self) {
        if self.activation_level == ActivationLevel::None {
            return;
        }
        self.service_tx_ring();
        self.fold_hardware_counters();
        self.poll_link_status();
        self.events.set_timeout_ms(self.config.watchdog_period_ms);
    }
}
