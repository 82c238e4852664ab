//! FFmpeg utility functions

use ffmpeg_next as ffmpeg;

/// Convert a rational (frame rate, aspect ratio) to f64, with 0 for an
/// unset `0/0` value.
pub fn rational_to_f64(r: ffmpeg::Rational) -> f64 {
    if r.denominator() == 0 {
        0.0
    } else {
        r.numerator() as f64 / r.denominator() as f64
    }
}

/// Convert an `AV_TIME_BASE` duration to seconds, or 0 when unknown.
pub fn av_time_to_seconds(value: i64) -> f64 {
    if value == ffmpeg::ffi::AV_NOPTS_VALUE || value < 0 {
        0.0
    } else {
        value as f64 / ffmpeg::ffi::AV_TIME_BASE as f64
    }
}

/// Convert a stream-relative timestamp to seconds, or 0 when unknown.
pub fn stream_time_to_seconds(value: i64, time_base: ffmpeg::Rational) -> f64 {
    if value == ffmpeg::ffi::AV_NOPTS_VALUE {
        0.0
    } else {
        value as f64 * rational_to_f64(time_base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rational_to_f64() {
        assert_eq!(rational_to_f64(ffmpeg::Rational::new(25, 1)), 25.0);
        assert!((rational_to_f64(ffmpeg::Rational::new(30000, 1001)) - 29.97).abs() < 0.01);
        assert_eq!(rational_to_f64(ffmpeg::Rational::new(0, 0)), 0.0);
    }

    #[test]
    fn test_time_conversions() {
        assert_eq!(av_time_to_seconds(1_500_000), 1.5);
        assert_eq!(av_time_to_seconds(ffmpeg::ffi::AV_NOPTS_VALUE), 0.0);
        assert_eq!(
            stream_time_to_seconds(90_000, ffmpeg::Rational::new(1, 90_000)),
            1.0
        );
        assert_eq!(
            stream_time_to_seconds(ffmpeg::ffi::AV_NOPTS_VALUE, ffmpeg::Rational::new(1, 1000)),
            0.0
        );
    }
}
