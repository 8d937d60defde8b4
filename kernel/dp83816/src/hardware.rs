//! Chip reset and register programming.

use bit_field::BitField;
use crate::error::{Error, Result};
use crate::filter::station_address_words;
use crate::regs::*;
use crate::{ActivationLevel, Dp83816Nic};
use network_interface_card::NetworkInterfaceCard;

impl Dp83816Nic {
    /// Polls `reg` every `interval_ms`, up to `attempts` times, until `done` holds for its value.
    pub(crate) fn poll_register(&mut self, reg: u32, attempts: u32, interval_ms: u32, done: impl Fn(u32) -> bool) -> bool {
        for _ in 0..attempts {
            if done(self.regs.read32(reg)) {
                return true;
            }
            self.delay.sleep_ms(interval_ms);
        }
        done(self.regs.read32(reg))
    }

    /// Resets the MAC, waiting for the self-clearing reset bit.
    pub(crate) fn reset_chip(&mut self) -> Result<()> {
        self.regs.write32(REG_CR, CR_RST);
        if !self.poll_register(REG_CR, self.config.reset_attempts, 1, |cr| cr & CR_RST == 0) {
            error!("dp83816::reset_chip(): reset bit never cleared");
            return Err(Error::HardwareTimeout("chip reset"));
        }
        // discard whatever was pending before the reset
        let _ = self.regs.read32(REG_ISR);
        Ok(())
    }

    /// Programs everything the chip needs before its engines are enabled:
    /// ring pointers, DMA settings, receive filter, interrupt mask and wake settings.
    /// Global interrupt enable stays off.
    pub(crate) fn init_hardware(&mut self) {
        if let Some(txq) = self.tx_queue.as_ref() {
            let txdp = txq.tx_descs.phys_addr_of(txq.tx_tail);
            self.regs.write32(REG_TXDP, txdp);
        }
        if let Some(rxq) = self.rx_queue.as_ref() {
            let rxdp = rxq.rx_descs.phys_addr_of(rxq.rx_cur);
            self.regs.write32(REG_RXDP, rxdp);
        }

        let mut txcfg = TXCFG_ATP | TXCFG_MXDMA_256 | TX_FLTH_DEFAULT | TX_DRTH_DEFAULT;
        let mut rxcfg = RXCFG_MXDMA_256 | RX_DRTH_DEFAULT;
        if self.phy.full_duplex {
            txcfg |= TXCFG_FULL_DUPLEX;
            rxcfg |= RXCFG_ATX;
        }
        self.regs.write32(REG_TXCFG, txcfg);
        self.regs.write32(REG_RXCFG, rxcfg);

        self.program_station_address();
        self.program_receive_filter();

        self.regs.write32(REG_IMR, InterruptStatus::INTERESTING.bits());
        self.regs.write32(REG_IER, 0);
        self.program_wake_settings();
        let _ = self.regs.read32(REG_ISR);
    }

    pub(crate) fn start_tx_rx(&mut self) {
        self.regs.write32(REG_CR, CR_TXE | CR_RXE);
    }

    /// Disables both engines and waits for them to report idle.
    pub(crate) fn stop_tx_rx(&mut self) -> Result<()> {
        self.regs.write32(REG_CR, CR_TXD | CR_RXD);
        if !self.poll_register(REG_CR, self.config.quiesce_attempts, 1, |cr| cr & (CR_TXE | CR_RXE) == 0) {
            error!("dp83816::stop_tx_rx(): transmit/receive engines didn't stop");
            return Err(Error::HardwareTimeout("transmit/receive engines to stop"));
        }
        Ok(())
    }

    /// Writes the current station address into the perfect match filter.
    pub(crate) fn program_station_address(&mut self) {
        let mac = self.mac_address();
        let rfcr = self.regs.read32(REG_RFCR);
        // the filter must be disabled while its RAM is written
        self.regs.write32(REG_RFCR, rfcr & !RFCR_RFEN);
        for (rfaddr, word) in RFADDR_PMATCH.iter().zip(station_address_words(&mac)) {
            self.regs.write32(REG_RFCR, *rfaddr);
            self.regs.write32(REG_RFDR, word);
        }
        self.regs.write32(REG_RFCR, rfcr);
    }

    /// Writes the multicast hash table and the filter mode bits.
    pub(crate) fn program_receive_filter(&mut self) {
        self.regs.write32(REG_RFCR, 0);
        for (rfaddr, word) in self.filter.hash_words() {
            self.regs.write32(REG_RFCR, rfaddr);
            self.regs.write32(REG_RFDR, word);
        }
        self.regs.write32(REG_RFCR, self.filter.control_bits());
    }

    /// Pushes the software filter to the chip if it is running.
    pub(crate) fn apply_receive_filter(&mut self) {
        if self.activation_level > ActivationLevel::None {
            self.program_receive_filter();
        }
    }

    /// Switches the MAC between half and full duplex to match the resolved link.
    pub(crate) fn program_duplex(&mut self, full_duplex: bool) {
        let txcfg = self.regs.read32(REG_TXCFG);
        let rxcfg = self.regs.read32(REG_RXCFG);
        if full_duplex {
            self.regs.write32(REG_TXCFG, txcfg | TXCFG_FULL_DUPLEX);
            self.regs.write32(REG_RXCFG, rxcfg | RXCFG_ATX);
        } else {
            self.regs.write32(REG_TXCFG, txcfg & !TXCFG_FULL_DUPLEX);
            self.regs.write32(REG_RXCFG, rxcfg & !RXCFG_ATX);
        }
    }

    /// Raises the transmit drain threshold by 32 bytes after an underrun.
    pub(crate) fn raise_tx_drain_threshold(&mut self) {
        let mut txcfg = self.regs.read32(REG_TXCFG);
        let drth = txcfg.get_bits(0..6);
        if drth < TXCFG_DRTH_MASK {
            txcfg.set_bits(0..6, drth + 1);
            self.regs.write32(REG_TXCFG, txcfg);
            warn!("dp83816: transmit underrun, drain threshold raised to {} bytes", (drth + 1) * 32);
        }
    }

    /// Adds the chip's missed-frame counter to the statistics and clears it.
    pub(crate) fn fold_hardware_counters(&mut self) {
        let missed = self.regs.read32(REG_RX_MISSED) & 0xFFFF;
        if missed != 0 {
            self.ether_stats.missed_frames += missed as u64;
            self.net_stats.input_errors += missed as u64;
            self.regs.write32(REG_MIBC, MIBC_ACLR);
        }
    }
}
