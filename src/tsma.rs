//! Telegram-Splitting Multiple Access hop patterns.
//!
//! The 24 core bursts of every telegram follow one of the standardized
//! time/frequency patterns of an uplink pattern group. UPG1 and UPG2 each
//! define 8 patterns; the low-latency UPG3 defines a single one. Extension
//! bursts beyond the core hop pseudo-randomly, driven by a Galois LFSR
//! seeded from the telegram's header and payload CRCs.

/// Uplink pattern group selecting the TSMA pattern family.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Upg {
    /// Uplink pattern group 1 (default spreading).
    Upg1,
    /// Uplink pattern group 2.
    Upg2,
    /// Uplink pattern group 3 (low latency, single pattern).
    Upg3,
}

/// Number of TSMA patterns in UPG1 and UPG2.
pub const NUM_PATTERNS: u8 = 8;

/// Length of the periodic TSMA pattern rotation cycle.
pub const PATTERN_CYCLE: u32 = 15;

/// Galois LFSR polynomial driving the extension-burst hops.
pub const EXT_FRAME_POLY: u16 = 0xB4F3;

/// Pattern rotation over consecutive packet counters, spreading load over
/// the first six patterns within each 15-packet window.
const PATTERN_ORDER: [u8; PATTERN_CYCLE as usize] =
    [0, 1, 2, 3, 0, 1, 2, 3, 4, 0, 1, 2, 3, 4, 5];

/// Carrier index sequences C_RB of the UPG1 patterns.
const CRB_UPG1: [[u8; 24]; 8] = [
    [5, 21, 13, 6, 22, 14, 1, 17, 9, 0, 16, 8, 7, 23, 15, 4, 20, 12, 3, 19, 11, 2, 18, 10],
    [4, 20, 12, 1, 17, 9, 0, 16, 8, 6, 22, 14, 7, 23, 15, 2, 18, 10, 5, 21, 13, 3, 19, 11],
    [4, 20, 12, 3, 19, 11, 6, 22, 14, 7, 23, 15, 0, 16, 8, 5, 21, 13, 2, 18, 10, 1, 17, 9],
    [6, 22, 14, 2, 18, 10, 7, 23, 15, 0, 16, 8, 1, 17, 9, 4, 20, 12, 5, 21, 13, 3, 19, 11],
    [7, 23, 15, 4, 20, 12, 3, 19, 11, 2, 18, 10, 6, 22, 14, 0, 16, 8, 1, 17, 9, 5, 21, 13],
    [3, 19, 11, 6, 22, 14, 2, 18, 10, 0, 16, 8, 7, 23, 15, 1, 17, 9, 4, 20, 12, 5, 21, 13],
    [3, 19, 11, 1, 17, 9, 5, 21, 13, 7, 23, 15, 0, 16, 8, 2, 18, 10, 6, 22, 14, 4, 20, 12],
    [0, 16, 8, 6, 22, 14, 3, 19, 11, 2, 18, 10, 4, 20, 12, 7, 23, 15, 5, 21, 13, 1, 17, 9],
];

/// Carrier index sequences C_RB of the UPG2 patterns.
const CRB_UPG2: [[u8; 24]; 8] = [
    [4, 20, 12, 0, 16, 8, 3, 19, 11, 5, 21, 13, 1, 17, 9, 7, 23, 15, 2, 18, 10, 6, 22, 14],
    [3, 19, 11, 7, 23, 15, 2, 18, 10, 5, 21, 13, 4, 20, 12, 0, 16, 8, 1, 17, 9, 6, 22, 14],
    [6, 22, 14, 0, 16, 8, 1, 17, 9, 4, 20, 12, 3, 19, 11, 5, 21, 13, 2, 18, 10, 7, 23, 15],
    [3, 19, 11, 1, 17, 9, 4, 20, 12, 5, 21, 13, 2, 18, 10, 7, 23, 15, 6, 22, 14, 0, 16, 8],
    [5, 21, 13, 2, 18, 10, 0, 16, 8, 6, 22, 14, 7, 23, 15, 1, 17, 9, 4, 20, 12, 3, 19, 11],
    [1, 17, 9, 3, 19, 11, 4, 20, 12, 6, 22, 14, 7, 23, 15, 5, 21, 13, 2, 18, 10, 0, 16, 8],
    [5, 21, 13, 1, 17, 9, 2, 18, 10, 4, 20, 12, 3, 19, 11, 0, 16, 8, 6, 22, 14, 7, 23, 15],
    [3, 19, 11, 6, 22, 14, 5, 21, 13, 1, 17, 9, 7, 23, 15, 2, 18, 10, 0, 16, 8, 4, 20, 12],
];

/// Carrier index sequence C_RB of the single UPG3 pattern.
const CRB_UPG3: [u8; 24] =
    [1, 5, 4, 3, 2, 17, 21, 20, 19, 18, 9, 13, 12, 11, 10, 6, 0, 7, 22, 16, 23, 14, 8, 15];

/// Every-third-position delays of the UPG1 patterns. Positions 0 and 1
/// (mod 3) are the fixed 330/387 symbol delays.
const TRB_UPG1: [[u16; 7]; 8] = [
    [388, 354, 356, 432, 352, 467, 620],
    [435, 409, 398, 370, 361, 472, 522],
    [356, 439, 413, 352, 485, 397, 444],
    [352, 382, 381, 365, 595, 604, 352],
    [380, 634, 360, 393, 352, 373, 490],
    [364, 375, 474, 355, 478, 464, 513],
    [472, 546, 501, 356, 359, 359, 364],
    [391, 468, 512, 543, 354, 391, 368],
];

/// Every-third-position delays of the UPG2 patterns (fixed delays 373/319).
const TRB_UPG2: [[u16; 7]; 8] = [
    [545, 443, 349, 454, 578, 436, 398],
    [371, 410, 363, 354, 379, 657, 376],
    [414, 502, 433, 540, 428, 467, 409],
    [396, 516, 631, 471, 457, 416, 354],
    [655, 416, 367, 400, 415, 342, 560],
    [370, 451, 465, 593, 545, 380, 365],
    [393, 374, 344, 353, 620, 503, 546],
    [367, 346, 584, 579, 519, 351, 486],
];

/// Delay sequence T_RB of the single UPG3 pattern.
const TRB_UPG3: [u16; 23] = [
    66, 66, 66, 66, 66, 66, 66, 66, 66, 123, 66, 66, 66, 66, 60, 66, 66, 198, 66, 66, 255, 66, 66,
];

/// Returns the TSMA pattern to use for a given packet counter, rotating
/// over a 15-packet cycle.
pub fn pattern_for_counter(counter: u32) -> u8 {
    PATTERN_ORDER[(counter % PATTERN_CYCLE) as usize]
}

/// Carrier index C_RB (0..=23) of core burst `burst_idx` under `pattern`.
pub fn carrier_index(upg: Upg, pattern: u8, burst_idx: usize) -> u8 {
    match upg {
        Upg::Upg1 => CRB_UPG1[pattern as usize][burst_idx],
        Upg::Upg2 => CRB_UPG2[pattern as usize][burst_idx],
        Upg::Upg3 => CRB_UPG3[burst_idx],
    }
}

/// Delay T_RB in symbols from core burst `burst_idx` to its successor
/// under `pattern`. Defined for burst indices 0..=22 and patterns 0..=7.
pub fn burst_delay(upg: Upg, pattern: u8, burst_idx: usize) -> u16 {
    if burst_idx >= 24 || pattern >= NUM_PATTERNS {
        return 0;
    }

    match upg {
        // In UPG1 and UPG2 only every third delay differs per pattern.
        Upg::Upg1 => match burst_idx % 3 {
            0 => 330,
            1 => 387,
            _ => TRB_UPG1[pattern as usize][burst_idx / 3],
        },
        Upg::Upg2 => match burst_idx % 3 {
            0 => 373,
            1 => 319,
            _ => TRB_UPG2[pattern as usize][burst_idx / 3],
        },
        Upg::Upg3 => TRB_UPG3[burst_idx],
    }
}

/// Base spacing in symbols between extension bursts.
pub fn extension_spacing(upg: Upg) -> u16 {
    match upg {
        Upg::Upg1 | Upg::Upg2 => 337,
        Upg::Upg3 => 66,
    }
}

/// Advances the extension-burst Galois LFSR by one step.
pub fn ext_lfsr(seed: u16) -> u16 {
    let lsb = seed & 1;
    let seed = seed >> 1;
    if lsb != 0 {
        seed ^ EXT_FRAME_POLY
    } else {
        seed
    }
}
