//! TS-UNB fixed uplink MAC.
//!
//! Builds the MPDU for one telegram: header byte, short or long address,
//! the low 24 bits of the extended packet counter, the CTR-encrypted
//! payload (with optional MPF byte) and a 4-byte truncated CMAC tag.
//!
//! The extended packet counter is the CTR/CMAC nonce and must never
//! decrease; see [`crate::counter`] for persisting it across power cycles.

use crate::cmac::{AesCmac, BLOCK_SIZE};

/// Length of the truncated message integrity code.
pub const MIC_LEN: usize = 4;

/// Direction byte in the CMAC initialization vector (uplink).
const DATA_DIRECTION: u8 = 0x00;

/// Addressing-mode flag in the MAC header (bit 2, LSB first).
const HDR_ADDRESSING: u8 = 1 << 2;

/// MPF-present flag in the MAC header (bit 6, LSB first).
const HDR_MPF: u8 = 1 << 6;

/// Addressing mode of the MPDU.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AddressMode {
    /// 16-bit short address (default).
    Short,
    /// Full 64-bit EUI.
    Long,
}

/// Fixed uplink MAC state: network key, device identity and the extended
/// packet counter.
///
/// Mutation is confined to [`encode`](Self::encode), which advances the
/// counter exactly once per call.
pub struct FixedUplinkMac {
    network_key: [u8; 16],
    eui64: [u8; 8],
    short_addr: [u8; 2],
    ext_pkg_cnt: u32,
    header: u8,
}

impl FixedUplinkMac {
    /// MAC mode signalled in the PHY header for the fixed uplink MAC.
    pub const MMODE: u8 = 0;

    /// Creates a MAC for the given network key and EUI-64. The short
    /// address defaults to EUI-64 bytes 6 and 7.
    pub fn new(network_key: [u8; 16], eui64: [u8; 8]) -> Self {
        Self {
            network_key,
            eui64,
            short_addr: [eui64[6], eui64[7]],
            ext_pkg_cnt: 0,
            header: 0,
        }
    }

    /// Overrides the short address derived from the EUI-64.
    pub fn set_short_address(&mut self, addr: [u8; 2]) {
        self.short_addr = addr;
    }

    /// Selects short or long addressing for subsequent telegrams.
    pub fn set_address_mode(&mut self, mode: AddressMode) {
        match mode {
            AddressMode::Short => self.header &= !HDR_ADDRESSING,
            AddressMode::Long => self.header |= HDR_ADDRESSING,
        }
    }

    /// Sets the extended packet counter, e.g. from the persisted image at
    /// boot.
    pub fn set_counter(&mut self, counter: u32) {
        self.ext_pkg_cnt = counter;
    }

    /// Current extended packet counter.
    pub fn counter(&self) -> u32 {
        self.ext_pkg_cnt
    }

    /// Least significant byte of the short address, carried in the sync
    /// burst.
    pub fn lsb_short_address(&self) -> u8 {
        self.short_addr[1]
    }

    /// MPDU length in bytes for a given payload length: header, address,
    /// counter and MIC plus the optional MPF byte.
    pub fn mpdu_length(&self, payload_len: usize, mpf_present: bool) -> usize {
        let mut len = 10 + payload_len;
        if mpf_present {
            len += 1;
        }
        if self.header & HDR_ADDRESSING != 0 {
            len += 6;
        }
        len
    }

    /// Encodes `payload` (and the optional MPF byte) into `mpdu` and
    /// returns the number of bytes written.
    ///
    /// `mpdu` must hold at least [`mpdu_length`](Self::mpdu_length) bytes.
    /// The payload and MPF byte are encrypted in place with an AES-CTR
    /// style keystream derived from the CMAC IV; the MIC covers the whole
    /// MPDU with the IV restored to its tag form. The packet counter
    /// advances exactly once, whether or not the telegram is later
    /// transmitted successfully.
    pub fn encode(&mut self, mpdu: &mut [u8], payload: &[u8], mpf: Option<u8>) -> usize {
        let aes = AesCmac::new(&self.network_key);

        if mpf.is_some() {
            self.header |= HDR_MPF;
        } else {
            self.header &= !HDR_MPF;
        }

        // IV: EUI-64, zero pad, direction, full 32-bit counter, tag marker.
        let mut iv = [0u8; BLOCK_SIZE];
        iv[..8].copy_from_slice(&self.eui64);
        iv[8] = 0x00;
        iv[9] = DATA_DIRECTION;
        iv[10..14].copy_from_slice(&self.ext_pkg_cnt.to_be_bytes());
        iv[14] = 0xFF;
        iv[15] = 0xFF;

        let mut idx = 0;
        mpdu[idx] = self.header;
        idx += 1;
        if self.header & HDR_ADDRESSING != 0 {
            mpdu[idx..idx + 8].copy_from_slice(&self.eui64);
            idx += 8;
        } else {
            mpdu[idx..idx + 2].copy_from_slice(&self.short_addr);
            idx += 2;
        }
        mpdu[idx] = (self.ext_pkg_cnt >> 16) as u8;
        mpdu[idx + 1] = (self.ext_pkg_cnt >> 8) as u8;
        mpdu[idx + 2] = self.ext_pkg_cnt as u8;
        idx += 3;
        let begin_encrypted = idx;

        if let Some(value) = mpf {
            mpdu[idx] = value;
            idx += 1;
        }
        mpdu[idx..idx + payload.len()].copy_from_slice(payload);
        idx += payload.len();

        // CTR-style encryption: IV bytes 14..16 carry the block counter.
        let mut pos = begin_encrypted;
        let mut block = 0u8;
        while pos < idx {
            iv[14] = 0x00;
            iv[15] = block;
            let mut keystream = iv;
            aes.encrypt_block(&mut keystream);
            for byte in keystream.iter() {
                if pos >= idx {
                    break;
                }
                mpdu[pos] ^= byte;
                pos += 1;
            }
            block += 1;
        }

        iv[14] = 0xFF;
        iv[15] = 0xFF;
        let tag = aes.tag(&iv, &mpdu[..idx]);
        mpdu[idx..idx + MIC_LEN].copy_from_slice(&tag[..MIC_LEN]);
        idx += MIC_LEN;

        self.ext_pkg_cnt = self.ext_pkg_cnt.wrapping_add(1);
        idx
    }
}

impl core::fmt::Debug for FixedUplinkMac {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        // The network key stays out of debug output.
        f.debug_struct("FixedUplinkMac")
            .field("eui64", &self.eui64)
            .field("short_addr", &self.short_addr)
            .field("ext_pkg_cnt", &self.ext_pkg_cnt)
            .finish_non_exhaustive()
    }
}
