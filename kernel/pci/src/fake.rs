//! An in-memory configuration space for exercising drivers on a host.

use crate::{PciConfigSpace, PCI_CAPABILITIES, PCI_DEVICE_ID, PCI_STATUS, PCI_VENDOR_ID};

/// A 256-byte configuration header held in memory.
#[derive(Clone)]
pub struct FakeConfigSpace {
    pub bytes: [u8; 256],
    pub is_open: bool,
    /// When set, [`PciConfigSpace::open`] fails as if another client held the function.
    pub refuse_open: bool,
    /// Counts writes and claims, for asserting that nothing touched the device.
    pub accesses: usize,
}

impl FakeConfigSpace {
    pub fn new(vendor_id: u16, device_id: u16) -> FakeConfigSpace {
        let mut space = FakeConfigSpace { bytes: [0; 256], is_open: false, refuse_open: false, accesses: 0 };
        space.put_16(PCI_VENDOR_ID, vendor_id);
        space.put_16(PCI_DEVICE_ID, device_id);
        space
    }

    /// Appends a capability with the given ID at `offset`, linking it into the list.
    pub fn add_capability(&mut self, offset: u8, cap_id: u8, body: &[u8]) {
        const STATUS_CAPABILITIES_VALID: u16 = 1 << 4;
        let status = self.get_16(PCI_STATUS);
        self.put_16(PCI_STATUS, status | STATUS_CAPABILITIES_VALID);

        // walk to the tail of the existing list
        let mut link = PCI_CAPABILITIES;
        while self.bytes[link as usize] != 0 {
            link = self.bytes[link as usize] + 1;
        }
        self.bytes[link as usize] = offset;

        self.bytes[offset as usize] = cap_id;
        self.bytes[offset as usize + 1] = 0;
        let start = offset as usize + 2;
        self.bytes[start..start + body.len()].copy_from_slice(body);
    }

    pub fn get_16(&self, offset: u8) -> u16 {
        let o = offset as usize;
        u16::from_le_bytes([self.bytes[o], self.bytes[o + 1]])
    }

    pub fn put_16(&mut self, offset: u8, value: u16) {
        let o = offset as usize;
        self.bytes[o..o + 2].copy_from_slice(&value.to_le_bytes());
    }

    pub fn put_32(&mut self, offset: u8, value: u32) {
        let o = offset as usize;
        self.bytes[o..o + 4].copy_from_slice(&value.to_le_bytes());
    }
}

impl PciConfigSpace for FakeConfigSpace {
    fn pci_read_8(&self, offset: u8) -> u8 {
        self.bytes[offset as usize]
    }

    fn pci_read_16(&self, offset: u8) -> u16 {
        self.get_16(offset)
    }

    fn pci_read_32(&self, offset: u8) -> u32 {
        let o = offset as usize;
        u32::from_le_bytes([self.bytes[o], self.bytes[o + 1], self.bytes[o + 2], self.bytes[o + 3]])
    }

    fn pci_write_16(&mut self, offset: u8, value: u16) {
        self.accesses += 1;
        self.put_16(offset, value);
    }

    fn pci_write_32(&mut self, offset: u8, value: u32) {
        self.accesses += 1;
        self.put_32(offset, value);
    }

    fn open(&mut self) -> bool {
        self.accesses += 1;
        if self.refuse_open || self.is_open {
            return false;
        }
        self.is_open = true;
        true
    }

    fn close(&mut self) {
        self.accesses += 1;
        self.is_open = false;
    }
}
