//! Power unit conversions and per-modulation bit error functions.

use serde::{Deserialize, Serialize};

pub fn dbm_to_mw(dbm: f64) -> f64 {
    10f64.powf(dbm / 10.0)
}

/// Non-positive power has no logarithm; callers floor before converting.
pub fn mw_to_dbm(mw: f64) -> f64 {
    10.0 * mw.log10()
}

/// Complementary error function, fractional error below 1.2e-7.
pub fn erfc(x: f64) -> f64 {
    let z = x.abs();
    let t = 1.0 / (1.0 + 0.5 * z);
    let poly = -z * z - 1.265_512_23
        + t * (1.000_023_68
            + t * (0.374_091_96
                + t * (0.096_784_18
                    + t * (-0.186_288_06
                        + t * (0.278_868_07
                            + t * (-1.135_203_98
                                + t * (1.488_515_87 + t * (-0.822_152_23 + t * 0.170_872_77))))))));
    let ans = t * poly.exp();
    if x >= 0.0 {
        ans
    } else {
        2.0 - ans
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Modulation {
    Bpsk,
    Qpsk,
    /// Error-free above `min_snr_db`, every bit lost below it.
    Threshold { min_snr_db: f64 },
}

impl Default for Modulation {
    fn default() -> Self {
        Modulation::Bpsk
    }
}

impl Modulation {
    /// Bit error probability at the given signal-to-noise ratio (dB).
    pub fn bit_error_rate(&self, snr_db: f64) -> f64 {
        let snr = dbm_to_mw(snr_db);
        let ber = match *self {
            Modulation::Bpsk => 0.5 * erfc(snr.sqrt()),
            Modulation::Qpsk => 0.5 * erfc((snr / 2.0).sqrt()),
            Modulation::Threshold { min_snr_db } => {
                if snr_db >= min_snr_db {
                    0.0
                } else {
                    1.0
                }
            }
        };
        ber.clamp(0.0, 1.0)
    }
}
