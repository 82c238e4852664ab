//! Rational tick rates and conversions between them.
//!
//! Every rescale in this crate rounds to the nearest tick with ties away
//! from zero (`av_rescale_q` semantics). Seconds-to-ticks uses the same rule.

use crate::error::{Error, Result};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::Rescale;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Duration of one timestamp tick, as `num / den` seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawTimeBase", into = "RawTimeBase")]
pub struct TimeBase {
    num: i32,
    den: i32,
}

#[derive(Serialize, Deserialize)]
struct RawTimeBase {
    num: i32,
    den: i32,
}

impl TimeBase {
    /// The reference time base frames and encoder packets travel in.
    pub const MICROSECONDS: TimeBase = TimeBase {
        num: 1,
        den: 1_000_000,
    };

    /// Millisecond ticks, used by several containers.
    pub const MILLISECONDS: TimeBase = TimeBase { num: 1, den: 1000 };

    pub fn new(num: i32, den: i32) -> Result<Self> {
        if den <= 0 || num <= 0 {
            return Err(Error::Format(format!("invalid time base {}/{}", num, den)));
        }
        Ok(Self { num, den })
    }

    /// Time base of one sample at `rate` Hz.
    pub fn for_sample_rate(rate: u32) -> Result<Self> {
        Self::new(1, rate as i32)
    }

    pub fn num(&self) -> i32 {
        self.num
    }

    pub fn den(&self) -> i32 {
        self.den
    }

    /// Convert `ticks` in this time base into ticks of `to`.
    pub fn rescale(&self, ticks: i64, to: TimeBase) -> i64 {
        if *self == to {
            return ticks;
        }
        ticks.rescale(*self, to)
    }

    /// Rescale an optional timestamp, keeping `None` as `None`.
    pub fn rescale_opt(&self, ticks: Option<i64>, to: TimeBase) -> Option<i64> {
        ticks.map(|t| self.rescale(t, to))
    }

    pub fn to_seconds(&self, ticks: i64) -> f64 {
        ticks as f64 * self.num as f64 / self.den as f64
    }

    pub fn from_seconds(&self, seconds: f64) -> i64 {
        (seconds * self.den as f64 / self.num as f64).round() as i64
    }

    /// Length of a single tick in seconds.
    pub fn tick_seconds(&self) -> f64 {
        self.num as f64 / self.den as f64
    }

    /// The finer (shorter tick) of two time bases.
    pub fn finer(self, other: TimeBase) -> TimeBase {
        // a/b < c/d  <=>  a*d < c*b  (all positive)
        let lhs = self.num as i64 * other.den as i64;
        let rhs = other.num as i64 * self.den as i64;
        if lhs <= rhs {
            self
        } else {
            other
        }
    }
}

impl fmt::Display for TimeBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

impl From<TimeBase> for ffmpeg::Rational {
    fn from(tb: TimeBase) -> Self {
        ffmpeg::Rational::new(tb.num, tb.den)
    }
}

impl TryFrom<ffmpeg::Rational> for TimeBase {
    type Error = Error;

    fn try_from(r: ffmpeg::Rational) -> Result<Self> {
        TimeBase::new(r.numerator(), r.denominator())
    }
}

impl TryFrom<RawTimeBase> for TimeBase {
    type Error = Error;

    fn try_from(raw: RawTimeBase) -> Result<Self> {
        TimeBase::new(raw.num, raw.den)
    }
}

impl From<TimeBase> for RawTimeBase {
    fn from(tb: TimeBase) -> Self {
        RawTimeBase {
            num: tb.num,
            den: tb.den,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_positive_denominator() {
        assert!(TimeBase::new(1, 0).is_err());
        assert!(TimeBase::new(1, -25).is_err());
        assert!(TimeBase::new(0, 25).is_err());
        assert!(TimeBase::new(1, 25).is_ok());
    }

    #[test]
    fn test_rescale_basic() {
        let ms = TimeBase::MILLISECONDS;
        let fps25 = TimeBase::new(1, 25).unwrap();
        assert_eq!(fps25.rescale(25, ms), 1000);
        assert_eq!(ms.rescale(40, fps25), 1);
        assert_eq!(fps25.rescale(3, TimeBase::MICROSECONDS), 120_000);
    }

    #[test]
    fn test_rescale_rounds_to_nearest() {
        let a = TimeBase::new(1, 3).unwrap();
        let b = TimeBase::new(1, 2).unwrap();
        // 1/3 s = 0.666 ticks of 1/2 -> 1
        assert_eq!(a.rescale(1, b), 1);
        // 1/6 s in 1/2 ticks = 0.333 -> 0
        let c = TimeBase::new(1, 6).unwrap();
        assert_eq!(c.rescale(1, b), 0);
        // exact half rounds away from zero
        let d = TimeBase::new(1, 4).unwrap();
        assert_eq!(d.rescale(1, b), 1);
        assert_eq!(d.rescale(-1, b), -1);
    }

    #[test]
    fn test_round_trip_within_one_tick() {
        let pairs = [
            (TimeBase::new(1, 90_000).unwrap(), TimeBase::new(1, 48_000).unwrap()),
            (TimeBase::new(1001, 30_000).unwrap(), TimeBase::MILLISECONDS),
            (TimeBase::new(1, 44_100).unwrap(), TimeBase::new(1, 25).unwrap()),
            (TimeBase::MICROSECONDS, TimeBase::new(1, 1000).unwrap()),
        ];
        for (a, b) in pairs {
            for ticks in [0i64, 1, 7, 1023, 48_000, 1_234_567, -3_333] {
                let there = a.rescale(ticks, b);
                let back = b.rescale(there, a);
                // Each leg rounds by at most half a tick of its target base.
                let bound = (a.tick_seconds() + b.tick_seconds()) / 2.0;
                let error = a.to_seconds((back - ticks).abs());
                assert!(
                    error <= bound + 1e-12,
                    "{} -> {} -> {} ({} / {}): error {}s exceeds {}s",
                    ticks,
                    there,
                    back,
                    a,
                    b,
                    error,
                    bound
                );
            }
        }
    }

    #[test]
    fn test_round_trip_same_ratio_is_exact() {
        let a = TimeBase::new(1, 48_000).unwrap();
        let b = TimeBase::new(2, 96_000).unwrap();
        for ticks in [0i64, 1, 1024, 47_999] {
            assert_eq!(b.rescale(a.rescale(ticks, b), a), ticks);
        }
    }

    #[test]
    fn test_seconds_conversion() {
        let tb = TimeBase::new(1, 48_000).unwrap();
        assert_eq!(tb.to_seconds(48_000), 1.0);
        assert_eq!(tb.from_seconds(0.5), 24_000);
        assert_eq!(TimeBase::MILLISECONDS.from_seconds(1.0006), 1001);
    }

    #[test]
    fn test_finer() {
        let sr = TimeBase::for_sample_rate(48_000).unwrap();
        assert_eq!(sr.finer(TimeBase::MILLISECONDS), sr);
        assert_eq!(TimeBase::MILLISECONDS.finer(sr), sr);
        assert_eq!(sr.finer(TimeBase::MICROSECONDS), TimeBase::MICROSECONDS);
    }

    #[test]
    fn test_serde_validates() {
        let tb: TimeBase = serde_json::from_str(r#"{"num":1,"den":25}"#).unwrap();
        assert_eq!(tb, TimeBase::new(1, 25).unwrap());
        assert!(serde_json::from_str::<TimeBase>(r#"{"num":1,"den":0}"#).is_err());
    }
}
