//! Burst transmission with the HopeRF RFM69w/RFM69hw.
//!
//! The transceiver runs in continuous FSK mode with the frequency
//! deviation programmed directly; the symbol clock comes from the host
//! timer, and each burst is streamed into the FIFO right before its time
//! slot. The module wakes two symbols before every burst to refill the
//! FIFO, and a trailing dummy byte lets the transmitter starve itself into
//! idle after the last real bit.

use embedded_hal::spi::SpiDevice;
use nb::block;

use crate::burst::RadioBurst;
use crate::host::{SymbolTimer, Watchdog};
use crate::node::BurstSink;

/// Write access to the `RegOpMode` register.
const WRITE_MODE: u8 = 0x81;
/// Write access to the `RegFrfMsb` register.
const WRITE_FRF: u8 = 0x87;
/// Write access to the `RegPaLevel` register.
const WRITE_PA_LEVEL: u8 = 0x91;
/// FIFO write access.
const WRITE_FIFO: u8 = 0x80;

/// `RegOpMode` values.
const MODE_SLEEP: u8 = 0x00;
const MODE_FS: u8 = 0x02;
const MODE_TX: u8 = 0x0C;

/// `RegPaLevel` PA selection bits.
const PA0_ON: u8 = 0x80;
const PA1_ON: u8 = 0x40;
const PA2_ON: u8 = 0x20;

/// Version register address and the value identifying an RFM69.
const REG_VERSION: u8 = 0x0C;
const CHIP_VERSION: u8 = 0x02;

/// Initialization presets: continuous FSK without shaping, zero frequency
/// deviation placeholder (patched with the configured value), mapped DIO
/// and FIFO thresholds. One SPI write per register block.
const CONFIG: &[&[u8]] = &[
    &[0x81, 0x00],
    &[0x82, 0x01],
    &[0x83, 0x34, 0x83],
    &[0x85, 0x00, 0x00], // RegFdevMsb; LSB patched from `f_dev`
    &[0x92, 0x04],
    &[0x93, 0x00],
    &[0xAC, 0x00, 0x00],
    &[0xAE, 0x00],
    &[0xB7, 0x00],
    &[0xB8, 0x00],
    &[0xBB, 0xE8],
    &[0xBC, 0x80],
];

/// Errors reported by the RFM69 driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<E> {
    /// The version register did not read back as an RFM69.
    NotFound,
    /// An SPI transfer failed.
    Spi(E),
}

/// RFM69 burst sink over an SPI device, a symbol timer and a watchdog.
pub struct Rfm69<SPI, T, W> {
    spi: SPI,
    timer: T,
    watchdog: W,
    boost_pin: bool,
    f_dev: u8,
    tx_power_dbm: i8,
}

impl<SPI, T, W> Rfm69<SPI, T, W>
where
    SPI: SpiDevice,
    T: SymbolTimer,
    W: Watchdog,
{
    /// Creates a driver for a module without the PA boost pin, with the
    /// default 13 dBm transmit power and a frequency deviation register
    /// value of 10 (one step above the ideal 9.75 for the standard symbol
    /// rate, which the register granularity cannot express).
    pub fn new(spi: SPI, timer: T, watchdog: W) -> Self {
        Self {
            spi,
            timer,
            watchdog,
            boost_pin: false,
            f_dev: 10,
            tx_power_dbm: 13,
        }
    }

    /// Marks the module as wired through the PA boost pin (required for
    /// transmit powers above 13 dBm).
    pub fn with_boost_pin(mut self) -> Self {
        self.boost_pin = true;
        self
    }

    /// Overrides the frequency deviation register value.
    pub fn set_frequency_deviation(&mut self, f_dev: u8) {
        self.f_dev = f_dev;
    }

    /// Sets the transmit power in dBm; clamped to the hardware range when
    /// the power register is programmed.
    pub fn set_tx_power(&mut self, dbm: i8) {
        self.tx_power_dbm = dbm;
    }

    /// Probes the chip and loads the continuous-mode presets, leaving the
    /// transceiver in sleep. Call early so the module stops drawing
    /// post-reset current.
    pub fn init(&mut self) -> Result<(), Error<SPI::Error>> {
        let mut probe = [REG_VERSION, 0x00];
        self.spi
            .transfer_in_place(&mut probe)
            .map_err(Error::Spi)?;
        if probe[1] != CHIP_VERSION {
            return Err(Error::NotFound);
        }

        for block in CONFIG {
            if block[0] == 0x85 {
                let fdev = [0x85, 0x00, self.f_dev];
                self.spi.write(&fdev).map_err(Error::Spi)?;
            } else {
                self.spi.write(block).map_err(Error::Spi)?;
            }
        }
        self.set_mode(MODE_SLEEP)
    }

    /// Transmits a complete telegram: every burst at
    /// `base_freq + carrier_offset`, spaced by its `T_RB`, with punctured
    /// bursts consuming their slot silently.
    pub fn transmit(
        &mut self,
        bursts: &[RadioBurst],
        base_freq: u32,
    ) -> Result<(), Error<SPI::Error>> {
        self.timer.start();
        self.write_power_register()?;

        // A few symbols of settling time before the first burst.
        self.timer.arm(4);

        for (idx, burst) in bursts.iter().enumerate() {
            self.watchdog.reset();

            if burst.len_bits() == 0 {
                let _ = block!(self.timer.wait());
                if idx + 1 < bursts.len() {
                    self.timer.arm(burst.t_rb() as i32);
                }
                continue;
            }

            let carrier = base_freq + burst.carrier_offset() as u32;
            let _ = block!(self.timer.wait());
            self.write_frequency_register(carrier)?;

            for byte in &burst.bytes()[..burst.len_bytes()] {
                self.spi.write(&[WRITE_FIFO, *byte]).map_err(Error::Spi)?;
            }
            // One dummy byte: if it ever leaves the FIFO the transmitter
            // underruns into idle instead of repeating data.
            self.spi
                .write(&[WRITE_FIFO, 0x00])
                .map_err(Error::Spi)?;

            self.set_mode(MODE_FS)?;
            self.timer.arm(2);
            let _ = block!(self.timer.wait());
            self.set_mode(MODE_TX)?;

            self.timer.arm(burst.len_bits() as i32);
            let _ = block!(self.timer.wait());
            self.set_mode(MODE_SLEEP)?;

            // Wake two symbols before the next burst to refill the FIFO.
            if idx + 1 < bursts.len() {
                self.timer
                    .arm(burst.t_rb() as i32 - burst.len_bits() as i32 - 2);
            }
        }

        self.set_mode(MODE_SLEEP)?;
        self.timer.stop();
        Ok(())
    }

    fn set_mode(&mut self, mode: u8) -> Result<(), Error<SPI::Error>> {
        self.spi.write(&[WRITE_MODE, mode]).map_err(Error::Spi)
    }

    fn write_frequency_register(&mut self, frequency: u32) -> Result<(), Error<SPI::Error>> {
        let data = [
            WRITE_FRF,
            (frequency >> 16) as u8,
            (frequency >> 8) as u8,
            frequency as u8,
        ];
        self.spi.write(&data).map_err(Error::Spi)
    }

    fn write_power_register(&mut self) -> Result<(), Error<SPI::Error>> {
        let (_, reg) = pa_level(self.boost_pin, self.tx_power_dbm);
        self.spi.write(&[WRITE_PA_LEVEL, reg]).map_err(Error::Spi)
    }
}

impl<SPI, T, W> BurstSink for Rfm69<SPI, T, W>
where
    SPI: SpiDevice,
    T: SymbolTimer,
    W: Watchdog,
{
    type Error = Error<SPI::Error>;

    fn init(&mut self) -> Result<(), Self::Error> {
        Rfm69::init(self)
    }

    fn transmit(&mut self, bursts: &[RadioBurst], base_freq: u32) -> Result<(), Self::Error> {
        Rfm69::transmit(self, bursts, base_freq)
    }
}

impl<SPI, T, W> core::fmt::Debug for Rfm69<SPI, T, W> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Rfm69")
            .field("boost_pin", &self.boost_pin)
            .field("tx_power_dbm", &self.tx_power_dbm)
            .finish_non_exhaustive()
    }
}

/// Clamps the requested power to the hardware range and returns the
/// effective power together with the `RegPaLevel` value.
fn pa_level(boost_pin: bool, power_dbm: i8) -> (i8, u8) {
    if boost_pin {
        let power = power_dbm.clamp(-2, 17);
        if power <= 13 {
            (power, PA1_ON | (power + 18) as u8)
        } else {
            (power, PA1_ON | PA2_ON | (power + 14) as u8)
        }
    } else {
        let power = power_dbm.clamp(-18, 13);
        (power, PA0_ON + (power + 18) as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal_mock::eh1::spi::{Mock as SpiMock, Transaction as SpiTransaction};

    struct TestTimer {
        armed: Vec<i32>,
    }

    impl TestTimer {
        fn new() -> Self {
            Self {
                armed: Vec::new(),
            }
        }
    }

    impl SymbolTimer for TestTimer {
        fn start(&mut self) {}

        fn arm(&mut self, delay_symbols: i32) {
            self.armed.push(delay_symbols);
        }

        fn wait(&mut self) -> nb::Result<(), core::convert::Infallible> {
            Ok(())
        }

        fn stop(&mut self) {}
    }

    struct TestWatchdog {
        resets: usize,
    }

    impl Watchdog for TestWatchdog {
        fn reset(&mut self) {
            self.resets += 1;
        }
    }

    fn write_transactions(data: &[u8]) -> [SpiTransaction<u8>; 3] {
        [
            SpiTransaction::transaction_start(),
            SpiTransaction::write_vec(data.to_vec()),
            SpiTransaction::transaction_end(),
        ]
    }

    #[test]
    fn init_rejects_unknown_chip() {
        let spi = SpiMock::new(&[
            SpiTransaction::transaction_start(),
            SpiTransaction::transfer_in_place(vec![0x0C, 0x00], vec![0x00, 0x00]),
            SpiTransaction::transaction_end(),
        ]);
        let mut rfm = Rfm69::new(spi, TestTimer::new(), TestWatchdog { resets: 0 });

        assert_eq!(rfm.init(), Err(Error::NotFound));
        rfm.spi.done();
    }

    #[test]
    fn init_loads_presets_and_sleeps() {
        let mut expected = vec![
            SpiTransaction::transaction_start(),
            SpiTransaction::transfer_in_place(vec![0x0C, 0x00], vec![0x00, 0x02]),
            SpiTransaction::transaction_end(),
        ];
        for block in CONFIG {
            let bytes = if block[0] == 0x85 {
                vec![0x85, 0x00, 10]
            } else {
                block.to_vec()
            };
            expected.push(SpiTransaction::transaction_start());
            expected.push(SpiTransaction::write_vec(bytes));
            expected.push(SpiTransaction::transaction_end());
        }
        expected.extend(write_transactions(&[WRITE_MODE, MODE_SLEEP]));

        let spi = SpiMock::new(&expected);
        let mut rfm = Rfm69::new(spi, TestTimer::new(), TestWatchdog { resets: 0 });

        assert_eq!(rfm.init(), Ok(()));
        rfm.spi.done();
    }

    #[test]
    fn punctured_burst_keeps_its_time_slot() {
        let mut expected = Vec::new();
        expected.extend(write_transactions(&[WRITE_PA_LEVEL, 0x9F]));
        expected.extend(write_transactions(&[WRITE_MODE, MODE_SLEEP]));
        let spi = SpiMock::new(&expected);
        let mut rfm = Rfm69::new(spi, TestTimer::new(), TestWatchdog { resets: 0 });

        let mut punctured = RadioBurst::new();
        punctured.set_t_rb(500);
        let mut last = RadioBurst::new();
        last.set_t_rb(0);
        // Two punctured bursts: no frequency or FIFO traffic at all.
        assert_eq!(rfm.transmit(&[punctured, last], 14223793), Ok(()));
        assert_eq!(rfm.watchdog.resets, 2);
        // Settling delay, then the punctured burst's full slot.
        assert_eq!(rfm.timer.armed, vec![4, 500]);
        rfm.spi.done();
    }

    #[test]
    fn single_burst_transmit_sequence() {
        let base = 14223793u32;
        let mut burst = RadioBurst::new();
        burst.set_carrier_offset(39);
        burst.set_t_rb(0);
        let carrier = base + 39;

        let mut expected = Vec::new();
        expected.extend(write_transactions(&[WRITE_PA_LEVEL, 0x9F]));
        expected.extend(write_transactions(&[
            WRITE_FRF,
            (carrier >> 16) as u8,
            (carrier >> 8) as u8,
            carrier as u8,
        ]));
        for _ in 0..5 {
            expected.extend(write_transactions(&[WRITE_FIFO, 0x00]));
        }
        expected.extend(write_transactions(&[WRITE_FIFO, 0x00])); // dummy
        expected.extend(write_transactions(&[WRITE_MODE, MODE_FS]));
        expected.extend(write_transactions(&[WRITE_MODE, MODE_TX]));
        expected.extend(write_transactions(&[WRITE_MODE, MODE_SLEEP]));
        expected.extend(write_transactions(&[WRITE_MODE, MODE_SLEEP]));

        let spi = SpiMock::new(&expected);
        let mut rfm = Rfm69::new(spi, TestTimer::new(), TestWatchdog { resets: 0 });

        assert_eq!(rfm.transmit(&[burst], base), Ok(()));
        // Settling, FS settling, then the 40 burst symbols.
        assert_eq!(rfm.timer.armed, vec![4, 2, 40]);
        rfm.spi.done();
    }

    #[test]
    fn pa_level_clamps_and_selects_amplifiers() {
        // Without the boost pin only PA0 is available.
        assert_eq!(pa_level(false, 13), (13, PA0_ON + 31));
        assert_eq!(pa_level(false, 20), (13, PA0_ON + 31));
        assert_eq!(pa_level(false, -30), (-18, PA0_ON));

        // With the boost pin PA1 covers up to 13 dBm, PA1+PA2 beyond.
        assert_eq!(pa_level(true, 13), (13, PA1_ON | 31));
        assert_eq!(pa_level(true, 17), (17, PA1_ON | PA2_ON | 31));
        assert_eq!(pa_level(true, -5), (-2, PA1_ON | 16));
    }
}
