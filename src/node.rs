//! Simple uplink-only TS-UNB node.
//!
//! Glues the layers together for one telegram: MAC encode, PHY encode,
//! optional sync burst, then hand the scheduled burst array to the burst
//! sink. All buffers live on the stack (or the heap with the `std`
//! feature) and are sized from the payload; nothing survives the call.

use crate::burst::RadioBurst;
use crate::mac::FixedUplinkMac;
#[cfg(not(feature = "std"))]
use crate::phy::MAX_BURSTS;
use crate::phy::{Phy, MAX_PSDU_LENGTH};

#[cfg(not(feature = "std"))]
use heapless::Vec;
#[cfg(feature = "std")]
use std::vec::Vec;

/// Worst-case bursts per telegram, including the optional sync burst.
#[cfg(not(feature = "std"))]
const MAX_TELEGRAM_BURSTS: usize = MAX_BURSTS + 1;

/// Downstream consumer of a fully encoded telegram.
///
/// Implementations must emit the bursts in index order, tune each to
/// `base_freq + carrier_offset`, and honor every burst's `T_RB` delay.
/// This includes punctured bursts, which occupy their time slot without
/// being transmitted.
pub trait BurstSink {
    /// Sink-specific error type.
    type Error;

    /// Brings the transmitter into a defined (idle, low-power) state.
    fn init(&mut self) -> Result<(), Self::Error>;

    /// Emits one telegram at base frequency register value `base_freq`.
    fn transmit(&mut self, bursts: &[RadioBurst], base_freq: u32) -> Result<(), Self::Error>;
}

/// Errors returned by the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<E> {
    /// The channel plan parameters are unusable.
    Config,
    /// The MPDU would exceed the maximum PSDU length of 255 bytes.
    PayloadTooLong,
    /// The burst sink reported a failure.
    Sink(E),
}

/// Uplink-only node: MAC and PHY state plus the burst sink.
///
/// [`init`](Self::init) must run once before the first telegram. The MAC
/// and sink are public so the platform can provision addresses, counters
/// and transmit power directly.
pub struct SimpleNode<TX: BurstSink> {
    /// Burst sink emitting the telegrams.
    pub tx: TX,
    /// MAC state: key, identity, packet counter.
    pub mac: FixedUplinkMac,
    /// PHY encoder with its channel plan.
    pub phy: Phy,
    sync_burst: bool,
}

impl<TX: BurstSink> SimpleNode<TX> {
    /// Creates a node without a sync burst.
    pub fn new(tx: TX, mac: FixedUplinkMac, phy: Phy) -> Self {
        Self {
            tx,
            mac,
            phy,
            sync_burst: false,
        }
    }

    /// Prepends a sync burst to every telegram.
    pub fn with_sync_burst(mut self) -> Self {
        self.sync_burst = true;
        self
    }

    /// Validates the configuration and initializes the sink. Call as
    /// early as possible so the transmitter enters its low-power state.
    pub fn init(&mut self) -> Result<(), Error<TX::Error>> {
        if !self.phy.params().validate() {
            return Err(Error::Config);
        }
        self.tx.init().map_err(Error::Sink)
    }

    /// Sends `payload` as one telegram with the regular pattern rotation
    /// and no MPF field.
    pub fn send(&mut self, payload: &[u8]) -> Result<(), Error<TX::Error>> {
        self.send_with(payload, 0, false)
    }

    /// Sends `payload` with an optional MPF field (present when
    /// `mpf_value` is nonzero) and optionally the priority TSMA pattern.
    ///
    /// The packet counter advances once per successful MAC encode; a sink
    /// failure afterwards does not roll it back, so a retried telegram is
    /// never a counter reuse.
    pub fn send_with(
        &mut self,
        payload: &[u8],
        mpf_value: u8,
        priority: bool,
    ) -> Result<(), Error<TX::Error>> {
        let mpf = if mpf_value != 0 { Some(mpf_value) } else { None };

        let mpdu_len = self.mac.mpdu_length(payload.len(), mpf.is_some());
        if mpdu_len > MAX_PSDU_LENGTH {
            return Err(Error::PayloadTooLong);
        }

        #[cfg(feature = "std")]
        let mut mpdu: Vec<u8> = vec![0; mpdu_len];
        #[cfg(not(feature = "std"))]
        let mut mpdu: Vec<u8, MAX_PSDU_LENGTH> = Vec::new();
        #[cfg(not(feature = "std"))]
        mpdu.resize(mpdu_len, 0)
            .map_err(|_| Error::PayloadTooLong)?;

        let used = self.mac.encode(&mut mpdu, payload, mpf);
        debug_assert_eq!(used, mpdu_len);

        let num_data_bursts = match self.phy.num_bursts(used) {
            Some(n) => n,
            None => return Err(Error::PayloadTooLong),
        };
        let num_bursts = num_data_bursts + self.sync_burst as usize;

        #[cfg(feature = "std")]
        let mut bursts: Vec<RadioBurst> = vec![RadioBurst::new(); num_bursts];
        #[cfg(not(feature = "std"))]
        let mut bursts: Vec<RadioBurst, MAX_TELEGRAM_BURSTS> = Vec::new();
        #[cfg(not(feature = "std"))]
        bursts
            .resize(num_bursts, RadioBurst::new())
            .map_err(|_| Error::PayloadTooLong)?;

        // The MAC encode above advanced the counter, so consecutive
        // telegrams rotate through the pattern cycle.
        let pattern = if priority {
            6
        } else {
            self.phy.tsma_pattern(self.mac.counter())
        };

        let data_start = self.sync_burst as usize;
        let f0 = match self
            .phy
            .encode(&mut bursts[data_start..], &mpdu[..used], pattern, FixedUplinkMac::MMODE)
        {
            Some(f0) => f0,
            None => return Err(Error::PayloadTooLong),
        };

        if self.sync_burst {
            let lsb = self.mac.lsb_short_address();
            self.phy.encode_sync_burst(&mut bursts[0], pattern, lsb);
        }

        #[cfg(feature = "log")]
        log::debug!(
            "telegram: {} bursts, pattern {}, f0 register {}",
            num_bursts,
            pattern,
            f0
        );
        #[cfg(feature = "defmt")]
        defmt::debug!(
            "telegram: {} bursts, pattern {}, f0 register {}",
            num_bursts,
            pattern,
            f0
        );

        self.tx.transmit(&bursts, f0).map_err(Error::Sink)
    }
}

impl<TX: BurstSink> core::fmt::Debug for SimpleNode<TX> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SimpleNode")
            .field("sync_burst", &self.sync_burst)
            .finish_non_exhaustive()
    }
}
