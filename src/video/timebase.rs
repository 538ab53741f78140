// Rational timebases and timestamp rescaling

use serde::{Deserialize, Serialize};

/// A timebase expressed as `num / den` seconds per tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rational {
    pub num: i32,
    pub den: i32,
}

/// Timebase every output stream is written in
pub const OUTPUT_TIME_BASE: Rational = Rational::new(1, 90_000);

impl Rational {
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// Number of ticks in `secs` seconds
    pub fn ticks_for_secs(&self, secs: f64) -> i64 {
        if self.num == 0 {
            return 0;
        }
        (secs * self.den as f64 / self.num as f64).round() as i64
    }

    pub fn as_secs(&self, ticks: i64) -> f64 {
        if self.den == 0 {
            return 0.0;
        }
        ticks as f64 * self.num as f64 / self.den as f64
    }
}

/// Rescale `value` from timebase `from` to timebase `to`.
///
/// Rounds to the nearest tick, halves away from zero.
pub fn rescale(value: i64, from: Rational, to: Rational) -> i64 {
    let numer = value as i128 * from.num as i128 * to.den as i128;
    let denom = from.den as i128 * to.num as i128;
    if denom == 0 {
        return 0;
    }
    let (numer, denom) = if denom < 0 { (-numer, -denom) } else { (numer, denom) };
    let half = denom / 2;
    let rounded = if numer >= 0 {
        (numer + half) / denom
    } else {
        (numer - half) / denom
    };
    rounded.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rescale_millis_to_output_base() {
        let ms = Rational::new(1, 1000);
        assert_eq!(rescale(1, ms, OUTPUT_TIME_BASE), 90);
        assert_eq!(rescale(1500, ms, OUTPUT_TIME_BASE), 135_000);
    }

    #[test]
    fn rescale_rounds_to_nearest() {
        let third = Rational::new(1, 3);
        let unit = Rational::new(1, 1);
        assert_eq!(rescale(1, third, unit), 0);
        assert_eq!(rescale(2, third, unit), 1);
        // 1.5 rounds away from zero on both sides
        let half = Rational::new(1, 2);
        assert_eq!(rescale(3, half, unit), 2);
        assert_eq!(rescale(-3, half, unit), -2);
    }

    #[test]
    fn ticks_for_secs_uses_stream_base() {
        let fps25 = Rational::new(1, 25);
        assert_eq!(fps25.ticks_for_secs(2.0), 50);
        assert_eq!(Rational::new(1, 1000).ticks_for_secs(0.4), 400);
        assert_eq!(OUTPUT_TIME_BASE.as_secs(180_000), 2.0);
    }
}
