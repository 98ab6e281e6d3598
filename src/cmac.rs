//! AES-128 CMAC with an IV-prefixed variant for the TS-UNB MAC layer.
//!
//! The block cipher itself comes from the [`aes`] crate (FIPS-197). This
//! module adds the RFC 4493 subkey schedule and the authenticator used by
//! the fixed uplink MAC: a CMAC computed over `IV ‖ message`, where the
//! 16-byte IV is absorbed as the first block. The same keyed state also
//! provides the raw block encryption for the CTR-style payload cipher.
//!
//! Last-block handling is keyed off the *message* length (excluding the
//! IV): a non-empty, block-aligned message folds `K1` into the final full
//! block; anything else, including the empty message, folds `K2` into the
//! `10*`-padded remainder. Deployed gateways expect exactly this mapping.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes128;

/// AES block size in bytes.
pub const BLOCK_SIZE: usize = 16;

/// CMAC subkey generation constant (RFC 4493 `Rb`).
const CMAC_RB: u8 = 0x87;

/// Keyed AES-128 state with pre-derived CMAC subkeys.
pub struct AesCmac {
    cipher: Aes128,
    k1: [u8; BLOCK_SIZE],
    k2: [u8; BLOCK_SIZE],
}

impl AesCmac {
    /// Expands `key` and derives the CMAC subkeys
    /// `K1 = dbl(E_K(0))`, `K2 = dbl(K1)`.
    pub fn new(key: &[u8; BLOCK_SIZE]) -> Self {
        let cipher = Aes128::new(GenericArray::from_slice(key));

        let mut l = [0u8; BLOCK_SIZE];
        cipher.encrypt_block(GenericArray::from_mut_slice(&mut l));
        let k1 = dbl(&l);
        let k2 = dbl(&k1);

        Self { cipher, k1, k2 }
    }

    /// Encrypts one 16-byte block in place.
    #[inline]
    pub fn encrypt_block(&self, block: &mut [u8; BLOCK_SIZE]) {
        self.cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }

    /// Computes the IV-prefixed CMAC over `iv ‖ msg`.
    ///
    /// The MAC layer truncates the returned block to the 4-byte MIC.
    pub fn tag(&self, iv: &[u8; BLOCK_SIZE], msg: &[u8]) -> [u8; BLOCK_SIZE] {
        let mut blocks = (msg.len() + BLOCK_SIZE - 1) / BLOCK_SIZE;
        let aligned = if blocks == 0 {
            blocks = 1;
            false
        } else {
            msg.len() % BLOCK_SIZE == 0
        };

        // The IV is the first block of the authenticated stream.
        let mut state = *iv;
        self.encrypt_block(&mut state);

        for chunk in msg.chunks_exact(BLOCK_SIZE).take(blocks - 1) {
            xor_block(&mut state, chunk);
            self.encrypt_block(&mut state);
        }

        let last = &msg[(blocks - 1) * BLOCK_SIZE..];
        if aligned {
            xor_block(&mut state, &self.k1);
            xor_block(&mut state, last);
        } else {
            xor_block(&mut state, &self.k2);
            xor_block(&mut state, last);
            state[last.len()] ^= 0x80;
        }
        self.encrypt_block(&mut state);

        state
    }
}

impl core::fmt::Debug for AesCmac {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        // Key material stays out of debug output.
        f.write_str("AesCmac { .. }")
    }
}

/// Doubling in GF(2^128): left shift by one, conditionally folding `Rb`
/// into the last byte when the shifted-out bit was set.
fn dbl(input: &[u8; BLOCK_SIZE]) -> [u8; BLOCK_SIZE] {
    let mut out = [0u8; BLOCK_SIZE];
    let mut carry = 0;
    for i in (0..BLOCK_SIZE).rev() {
        out[i] = (input[i] << 1) | carry;
        carry = input[i] >> 7;
    }
    if carry != 0 {
        out[BLOCK_SIZE - 1] ^= CMAC_RB;
    }
    out
}

/// XORs up to 16 bytes of `src` into `state`.
#[inline]
fn xor_block(state: &mut [u8; BLOCK_SIZE], src: &[u8]) {
    for (s, b) in state.iter_mut().zip(src) {
        *s ^= b;
    }
}
