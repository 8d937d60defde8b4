//! Receive filtering: the station address, the multicast hash, and the filter mode bits.

use crate::regs::*;

/// Number of bits in the multicast hash table.
pub const MULTICAST_HASH_BITS: usize = 512;

/// The Ethernet CRC-32 of `data`, computed the way the hardware does:
/// generator 0x04C11DB7, initial value all ones, each octet consumed
/// least-significant bit first, and no final inversion.
pub fn ether_crc32(data: &[u8]) -> u32 {
    const POLY: u32 = 0x04C1_1DB7;
    let mut crc = 0xFFFF_FFFFu32;
    for &octet in data {
        let mut bits = octet;
        for _ in 0..8 {
            let carry = (crc >> 31) ^ (bits as u32 & 1);
            crc <<= 1;
            bits >>= 1;
            if carry != 0 {
                crc ^= POLY;
            }
        }
    }
    crc
}

/// The hash table bit a multicast address maps to: the top nine bits of its CRC.
pub fn multicast_hash_index(addr: &[u8; 6]) -> usize {
    (ether_crc32(addr) >> 23) as usize
}

/// The software copy of the receive filter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceiveFilter {
    pub promiscuous: bool,
    pub all_multicast: bool,
    /// 512 hash bits; bit `i` lives in byte `i / 8` at bit `i % 8`.
    pub hash_table: [u8; MULTICAST_HASH_BITS / 8],
}

impl Default for ReceiveFilter {
    fn default() -> Self {
        ReceiveFilter {
            promiscuous: false,
            all_multicast: false,
            hash_table: [0; MULTICAST_HASH_BITS / 8],
        }
    }
}

impl ReceiveFilter {
    /// Rebuilds the hash table so that exactly the given groups pass.
    pub fn set_multicast_list(&mut self, addresses: &[[u8; 6]]) {
        self.hash_table = [0; MULTICAST_HASH_BITS / 8];
        for addr in addresses {
            let bit = multicast_hash_index(addr);
            self.hash_table[bit / 8] |= 1 << (bit % 8);
        }
    }

    pub fn hash_bit_is_set(&self, bit: usize) -> bool {
        self.hash_table[bit / 8] & (1 << (bit % 8)) != 0
    }

    /// The RFCR value that enables the filter in the current mode, with the address field zero.
    pub fn control_bits(&self) -> u32 {
        let mut rfcr = RFCR_RFEN | RFCR_AAB | RFCR_APM;
        if self.promiscuous {
            rfcr |= RFCR_AAU | RFCR_AAM;
        } else if self.all_multicast {
            rfcr |= RFCR_AAM;
        } else {
            rfcr |= RFCR_MHEN;
        }
        rfcr
    }

    /// The hash table as the (filter RAM address, 16-bit word) pairs written through RFDR.
    pub fn hash_words(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.hash_table.chunks(2).enumerate().map(|(i, pair)| {
            (RFADDR_HASH + 2 * i as u32, pair[0] as u32 | (pair[1] as u32) << 8)
        })
    }
}

/// The station address as the three 16-bit words of the perfect match filter, low byte first.
pub fn station_address_words(mac: &[u8; 6]) -> [u32; 3] {
    [
        mac[0] as u32 | (mac[1] as u32) << 8,
        mac[2] as u32 | (mac[3] as u32) << 8,
        mac[4] as u32 | (mac[5] as u32) << 8,
    ]
}
