//! The internal PHY: medium table, reset, auto-negotiation and link reporting.

use alloc::vec::Vec;
use crate::error::{Error, Result};
use crate::regs::*;
use crate::Dp83816Nic;
use network_interface_card::{LinkStatus, Medium, MediumIndex, MediumType};

/// Where the PHY is in its life cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PhyState {
    Unreset,
    Reset,
    Negotiating,
    LinkUp,
    LinkDown,
}

/// How a medium selection ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NegotiationOutcome {
    /// Negotiation was started and not waited for.
    Pending,
    /// Negotiation finished and the link came up.
    LinkValid,
    /// Negotiation or link-up didn't happen within the wait budget.
    TimedOut,
}

/// (BMSR capability, medium type, speed, full duplex, ANAR bit) for each fixed medium.
const MEDIUM_CAPABILITIES: [(u32, MediumType, u32, bool, u32); 4] = [
    (BMSR_10HD,    MediumType::Ethernet10BaseT,   10,  false, ANAR_10HD),
    (BMSR_10FD,    MediumType::Ethernet10BaseT,   10,  true,  ANAR_10FD),
    (BMSR_100TXHD, MediumType::Ethernet100BaseTX, 100, false, ANAR_100HD),
    (BMSR_100TXFD, MediumType::Ethernet100BaseTX, 100, true,  ANAR_100FD),
];

/// Builds the medium table from the PHY's capability bits:
/// one entry per supported fixed medium, then `Auto` if any exist.
pub fn build_medium_table(bmsr: u32) -> Vec<Medium> {
    let mut media = Vec::new();
    for (capability, medium_type, speed_mbps, full_duplex, _) in MEDIUM_CAPABILITIES {
        if bmsr & capability != 0 {
            media.push(Medium { index: MediumIndex(media.len()), medium_type, speed_mbps, full_duplex });
        }
    }
    if !media.is_empty() {
        media.push(Medium { index: MediumIndex(media.len()), medium_type: MediumType::Auto, speed_mbps: 0, full_duplex: false });
    }
    media
}

/// The auto-negotiation advertisement for one fixed medium; zero for `Auto`.
pub fn advertisement(medium: &Medium) -> u32 {
    MEDIUM_CAPABILITIES.iter()
        .find(|(_, t, speed, fd, _)| *t == medium.medium_type && *speed == medium.speed_mbps && *fd == medium.full_duplex)
        .map_or(0, |(_, _, _, _, anar)| *anar)
}

/// The CFG link bits the chip reports when linked on `medium`; `None` for `Auto`.
pub fn link_code(medium: &Medium) -> Option<u32> {
    match medium.medium_type {
        MediumType::Auto => None,
        _ => {
            let mut code = CFG_LNKSTS;
            if medium.speed_mbps == 100 {
                code |= CFG_SPEED100;
            }
            if medium.full_duplex {
                code |= CFG_FDUP;
            }
            Some(code)
        }
    }
}

/// The fixed medium whose link code matches `cfg`.
pub fn resolve_medium(media: &[Medium], cfg: u32) -> Option<MediumIndex> {
    let code = cfg & CFG_LINK_MASK;
    media.iter().find(|m| link_code(m) == Some(code)).map(|m| m.index)
}

/// Driver-side PHY state.
pub struct Phy {
    pub state: PhyState,
    pub media: Vec<Medium>,
    /// The medium clients asked for.
    pub selected: MediumIndex,
    /// Watchdog ticks left before link polling resumes.
    pub holdoff: u32,
    /// The duplex the MAC is currently programmed for.
    pub full_duplex: bool,
}

impl Phy {
    /// Reads the PHY's capabilities and selects `Auto`.
    pub fn probe(regs: &mut dyn RegisterAccess) -> Result<Phy> {
        let bmsr = regs.read32(REG_BMSR);
        let media = build_medium_table(bmsr);
        let auto = media.last().map(|m| m.index).ok_or_else(|| {
            error!("dp83816::Phy::probe(): PHY reports no usable media, BMSR {:#06x}", bmsr);
            Error::Unsupported("PHY reports no usable media")
        })?;
        Ok(Phy { state: PhyState::Unreset, media, selected: auto, holdoff: 0, full_duplex: false })
    }

    pub fn is_auto(&self, index: MediumIndex) -> bool {
        self.media.get(index.0).map_or(false, |m| m.medium_type == MediumType::Auto)
    }

    /// What to advertise for `index`: the one medium, or every fixed medium for `Auto`.
    pub fn advertisement_for(&self, index: MediumIndex) -> Option<u32> {
        let medium = self.media.get(index.0)?;
        Some(match medium.medium_type {
            MediumType::Auto => self.media.iter().map(advertisement).fold(0, |acc, a| acc | a),
            _ => advertisement(medium),
        })
    }
}

impl Dp83816Nic {
    /// Resets the PHY and waits for the self-clearing reset bit.
    pub(crate) fn reset_phy(&mut self) -> Result<()> {
        self.regs.write32(REG_BMCR, BMCR_RESET);
        if !self.poll_register(REG_BMCR, self.config.phy_reset_attempts, 1, |bmcr| bmcr & BMCR_RESET == 0) {
            error!("dp83816::reset_phy(): PHY reset bit never cleared");
            return Err(Error::HardwareTimeout("PHY reset"));
        }
        self.phy.state = PhyState::Reset;
        Ok(())
    }

    /// Tunes the PHY's DSP after a reset.
    fn init_phy_dsp(&mut self) {
        for (reg, value) in PHY_DSP_FIXUP {
            self.regs.write32(reg, value);
        }
    }

    /// Resets the PHY, advertises the chosen medium and restarts auto-negotiation.
    ///
    /// With `wait`, sleeps until negotiation completes and the link comes up or the
    /// wait budget runs out; running out is reported, not treated as an error.
    pub fn select_medium_and_negotiate(&mut self, index: MediumIndex, wait: bool) -> Result<NegotiationOutcome> {
        let advertise = self.phy.advertisement_for(index).ok_or(Error::InvalidMedium)?;

        self.reset_phy()?;
        self.init_phy_dsp();
        self.regs.write32(REG_ANAR, advertise | ANAR_SELECTOR_8023);
        self.regs.write32(REG_BMCR, BMCR_ANEN | BMCR_ANRESTART);

        self.phy.selected = index;
        self.phy.state = PhyState::Negotiating;
        self.phy.holdoff = self.config.link_holdoff_ticks;
        self.set_link_status(LinkStatus::UNKNOWN, None);
        debug!("dp83816: negotiating medium {:?}, advertising {:#x}", index, advertise);

        if !wait {
            return Ok(NegotiationOutcome::Pending);
        }

        const POLL_MS: u32 = 10;
        let an_attempts = self.config.autoneg_timeout_ms / POLL_MS;
        if !self.poll_register(REG_BMSR, an_attempts, POLL_MS, |bmsr| bmsr & BMSR_ANCOMPLETE != 0) {
            warn!("dp83816: auto-negotiation didn't complete within {} ms", self.config.autoneg_timeout_ms);
            return Ok(NegotiationOutcome::TimedOut);
        }
        let link_attempts = self.config.link_timeout_ms / POLL_MS;
        if !self.poll_register(REG_CFG, link_attempts, POLL_MS, |cfg| cfg & CFG_LNKSTS != 0) {
            warn!("dp83816: link didn't come up within {} ms", self.config.link_timeout_ms);
            self.report_link_status();
            return Ok(NegotiationOutcome::TimedOut);
        }
        self.report_link_status();
        Ok(NegotiationOutcome::LinkValid)
    }

    /// Reads the resolved link from the chip, publishes it, and
    /// reprograms the MAC if the duplex changed.
    pub fn report_link_status(&mut self) {
        let cfg = self.regs.read32(REG_CFG);
        if cfg & CFG_LNKSTS == 0 {
            self.phy.state = PhyState::LinkDown;
            self.set_link_status(LinkStatus::DOWN, None);
            return;
        }

        let medium = if self.phy.is_auto(self.phy.selected) {
            resolve_medium(&self.phy.media, cfg)
        } else {
            Some(self.phy.selected)
        };
        if medium.is_none() {
            warn!("dp83816: link up with CFG {:#010x} matching no known medium", cfg);
        }

        let full_duplex = cfg & CFG_FDUP != 0;
        if full_duplex != self.phy.full_duplex {
            self.phy.full_duplex = full_duplex;
            self.program_duplex(full_duplex);
        }

        self.phy.state = PhyState::LinkUp;
        self.set_link_status(LinkStatus::UP, medium);
    }

    /// Called from the watchdog: notices a link that has come up without an interrupt.
    pub(crate) fn poll_link_status(&mut self) {
        if self.phy.holdoff > 0 {
            self.phy.holdoff -= 1;
            return;
        }
        let cfg = self.regs.read32(REG_CFG);
        if cfg & CFG_LNKSTS != 0 && self.phy.state != PhyState::LinkUp {
            self.report_link_status();
        }
    }
}
