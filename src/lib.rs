//! # tsunb
//!
//! A portable, `no_std` Rust implementation of the **uplink** of ETSI
//! TS 103 357 TS-UNB ("MIOTY"), the telegram-splitting ultra-narrowband
//! protocol for low-power wide-area sensor nodes.
//!
//! A telegram is built in two bit-exact stages and then handed to a radio:
//! - the **MAC layer** authenticates and encrypts the payload (AES-128
//!   keystream, truncated AES-CMAC tag, monotonic packet counter, short or
//!   long addressing);
//! - the **PHY layer** CRCs, whitens, convolutionally encodes and
//!   interleaves the MPDU across short radio bursts, inserts midambles,
//!   applies differential MSK pre-coding and schedules every burst in time
//!   and frequency following the standardized TSMA patterns.
//!
//! The radio itself is abstracted as a [`node::BurstSink`]; a driver for
//! the HopeRF RFM69w/RFM69hw is included in [`rfm69`]. Platform concerns
//! (symbol timer, watchdog, counter persistence) are traits in [`host`].
//!
//! ## Crate features
//! | Feature | Description |
//! |---------|-------------|
//! | `std`   | Disables `#![no_std]` support and replaces `heapless::Vec`s with `std::vec::Vec`s |
//! | `defmt` | Uses `defmt` logging |
//! | `log`   | Uses `log` logging |
//!
//! ## Usage
//!
//! ```rust
//! use tsunb::burst::RadioBurst;
//! use tsunb::mac::FixedUplinkMac;
//! use tsunb::node::{BurstSink, SimpleNode};
//! use tsunb::phy::{Phy, PhyParams};
//!
//! struct Sink;
//!
//! impl BurstSink for Sink {
//!     type Error = core::convert::Infallible;
//!
//!     fn init(&mut self) -> Result<(), Self::Error> {
//!         Ok(())
//!     }
//!
//!     fn transmit(&mut self, _bursts: &[RadioBurst], _f0: u32) -> Result<(), Self::Error> {
//!         Ok(())
//!     }
//! }
//!
//! let mac = FixedUplinkMac::new(
//!     [0x00; 16],
//!     [0x70, 0xb3, 0xd5, 0x67, 0x70, 0x00, 0x12, 0x34],
//! );
//! let mut node = SimpleNode::new(Sink, mac, Phy::new(PhyParams::EU1));
//! node.init().unwrap();
//! node.send(b"hello").unwrap();
//! ```
//!
//! On hardware, replace `Sink` with [`rfm69::Rfm69`] over your HAL's
//! `SpiDevice` and implementations of [`host::SymbolTimer`] and
//! [`host::Watchdog`], and restore the packet counter at boot with
//! [`counter::restore`].
//!
//! ## Integration notes
//!
//! - Every byte order, CRC polynomial, LFSR seed, interleaver index and
//!   pattern table in this crate is dictated by the standard; the gateway
//!   will not decode a telegram that deviates in a single bit.
//! - `send()` is atomic with respect to the packet counter: the counter
//!   advances exactly once per telegram, whether or not the radio
//!   succeeds. Persist it with [`counter`] to survive power cycles.
//! - The encoder is allocation-free; worst-case stack use is the burst
//!   array of a maximum-length telegram (about 2.6 KiB).
//!
//! --
//! Designed for `#![no_std]` use in resource-constrained embedded
//! environments.

#![deny(
    bad_style,
    dead_code,
    improper_ctypes,
    non_shorthand_field_patterns,
    no_mangle_generic_items,
    overflowing_literals,
    path_statements,
    patterns_in_fns_without_body,
    unconditional_recursion,
    unused,
    while_true,
    missing_debug_implementations,
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_qualifications,
    unused_results
)]
#![cfg_attr(not(any(test, feature = "std")), no_std)]

pub mod bits;
pub mod burst;
pub mod cmac;
pub mod counter;
pub mod host;
pub mod mac;
pub mod node;
pub mod phy;
pub mod rfm69;
pub mod tsma;
