//! Host service abstractions: symbol timer, watchdog and counter storage.
//!
//! The encoder itself is pure, but emitting bursts needs a symbol-accurate
//! timer, and field deployments need a watchdog and a persistent home for
//! the packet counter. These traits keep the crate portable; a platform
//! implements them on top of its HAL. The [`SymbolTimerFlag`] helper covers
//! the common case of a compare-match interrupt signalling the main loop.

use core::cell::RefCell;
use core::convert::Infallible;

use critical_section::Mutex;

/// Base step of the TS-UNB symbol rate in Hz. The standard rates are
/// multiples of it: 2380.371 sym/s at multiplier 48, 396.729 sym/s at 8.
pub const SYMBOL_RATE_STEP_HZ: f64 = 49.591064453125;

/// Symbol-accurate interval timer driving the burst schedule.
///
/// The timer accumulates delays: each [`arm`](Self::arm) call schedules the
/// next expiry `delay_symbols` after the previous one, so rounding errors
/// do not drift over a telegram.
pub trait SymbolTimer {
    /// Brings the timer into a defined state and starts it counting.
    fn start(&mut self);

    /// Schedules the next expiry `delay_symbols` symbol periods after the
    /// previously scheduled one.
    fn arm(&mut self, delay_symbols: i32);

    /// Completes once the armed expiry has been reached, otherwise returns
    /// [`nb::Error::WouldBlock`].
    fn wait(&mut self) -> nb::Result<(), Infallible>;

    /// Stops the timer to save energy.
    fn stop(&mut self);
}

/// Watchdog kicked between bursts so long telegrams survive strict
/// supervision windows.
pub trait Watchdog {
    /// Resets the watchdog countdown.
    fn reset(&mut self);
}

/// Persistent 3-byte home for the extended packet counter image.
///
/// See [`crate::counter`] for the update policy and the uninitialized
/// sentinel handling.
pub trait CounterStore {
    /// Loads the stored counter image, `EPC[23:16], EPC[15:8], EPC[7:0]`.
    fn load(&mut self) -> [u8; 3];

    /// Stores a counter image.
    fn store(&mut self, bytes: &[u8; 3]);
}

/// Interrupt-safe expiry flag shared between a timer ISR and the
/// transmit loop.
///
/// Declare one as a `static`, call [`signal`](Self::signal) from the
/// compare-match ISR and poll [`take`](Self::take) from
/// [`SymbolTimer::wait`].
pub struct SymbolTimerFlag {
    flag: Mutex<RefCell<bool>>,
}

impl SymbolTimerFlag {
    /// Creates a cleared flag, usable in `static` context.
    pub const fn new() -> Self {
        Self {
            flag: Mutex::new(RefCell::new(false)),
        }
    }

    /// Marks the timer as expired. Intended to be called from the ISR.
    pub fn signal(&self) {
        critical_section::with(|cs| {
            *self.flag.borrow(cs).borrow_mut() = true;
        });
    }

    /// Returns whether the timer had expired, clearing the flag.
    pub fn take(&self) -> bool {
        critical_section::with(|cs| self.flag.borrow(cs).replace(false))
    }
}

impl Default for SymbolTimerFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for SymbolTimerFlag {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("SymbolTimerFlag { .. }")
    }
}

/// Timer ticks per TS-UNB symbol for a given timer clock, symbol-rate
/// multiplier and crystal offset.
///
/// `timer_hz` is the rate the hardware timer counts at (CPU clock divided
/// by its prescaler), `symbol_rate_mult` the multiple of
/// [`SYMBOL_RATE_STEP_HZ`] (48 for the standard 2380.371 sym/s mode) and
/// `xtal_offset_ppm` the measured crystal deviation.
pub fn symbol_period_ticks(timer_hz: u32, symbol_rate_mult: u16, xtal_offset_ppm: i16) -> f32 {
    let symbol_rate = SYMBOL_RATE_STEP_HZ * symbol_rate_mult as f64;
    (timer_hz as f64 / symbol_rate * (1.0 + 1.0e-6 * xtal_offset_ppm as f64)) as f32
}

/// Fractional-accumulating schedule turning symbol delays into 16-bit
/// compare-match values.
///
/// Keeping the running position as a float and rounding per compare value
/// keeps the emitted schedule within half a tick of the ideal timeline
/// over arbitrarily long telegrams.
#[derive(Debug)]
pub struct SymbolSchedule {
    period_ticks: f32,
    position: f32,
}

impl SymbolSchedule {
    /// Creates a schedule for the given symbol period in timer ticks.
    pub fn new(period_ticks: f32) -> Self {
        Self {
            period_ticks,
            position: 0.0,
        }
    }

    /// Restarts the schedule at tick zero.
    pub fn reset(&mut self) {
        self.position = 0.0;
    }

    /// Advances by `symbols` and returns the compare-match value for a
    /// free-running 16-bit timer.
    pub fn advance(&mut self, symbols: i32) -> u16 {
        self.position += self.period_ticks * symbols as f32;
        let compare = (libm::roundf(self.position) as i32) as u16;
        while self.position >= 65536.0 {
            self.position -= 65536.0;
        }
        compare
    }
}
