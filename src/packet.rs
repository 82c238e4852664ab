//! Compressed data unit exchanged between container and codec layers.

use crate::timebase::TimeBase;
use ffmpeg_next as ffmpeg;
use std::fmt;

/// An owned compressed packet.
///
/// Timestamps are tick counts in whichever time base the holding stage
/// currently uses; the packet itself does not record it.
pub struct Packet {
    inner: ffmpeg::Packet,
}

impl Packet {
    /// Create a packet owning a copy of `data`.
    pub fn new(data: &[u8]) -> Self {
        Self {
            inner: ffmpeg::Packet::copy(data),
        }
    }

    /// The canonical end-of-stream signal: empty payload, no timestamps.
    pub fn flush() -> Self {
        Self {
            inner: ffmpeg::Packet::empty(),
        }
    }

    pub fn is_flush(&self) -> bool {
        self.inner.size() == 0 && self.inner.pts().is_none() && self.inner.dts().is_none()
    }

    pub fn with_pts(mut self, pts: Option<i64>) -> Self {
        self.inner.set_pts(pts);
        self
    }

    pub fn with_dts(mut self, dts: Option<i64>) -> Self {
        self.inner.set_dts(dts);
        self
    }

    pub fn with_duration(mut self, duration: i64) -> Self {
        self.inner.set_duration(duration);
        self
    }

    pub fn with_stream_index(mut self, index: usize) -> Self {
        self.inner.set_stream(index);
        self
    }

    pub fn with_key(mut self, key: bool) -> Self {
        self.set_key(key);
        self
    }

    /// The payload bytes; empty for a flush packet.
    pub fn data(&self) -> &[u8] {
        self.inner.data().unwrap_or(&[])
    }

    pub fn size(&self) -> usize {
        self.inner.size()
    }

    pub fn pts(&self) -> Option<i64> {
        self.inner.pts()
    }

    pub fn set_pts(&mut self, pts: Option<i64>) {
        self.inner.set_pts(pts);
    }

    pub fn dts(&self) -> Option<i64> {
        self.inner.dts()
    }

    pub fn set_dts(&mut self, dts: Option<i64>) {
        self.inner.set_dts(dts);
    }

    pub fn duration(&self) -> i64 {
        self.inner.duration()
    }

    pub fn set_duration(&mut self, duration: i64) {
        self.inner.set_duration(duration);
    }

    pub fn stream_index(&self) -> usize {
        self.inner.stream()
    }

    pub fn set_stream_index(&mut self, index: usize) {
        self.inner.set_stream(index);
    }

    pub fn is_key(&self) -> bool {
        self.inner.is_key()
    }

    pub fn set_key(&mut self, key: bool) {
        let mut flags = self.inner.flags();
        flags.set(ffmpeg::codec::packet::Flags::KEY, key);
        self.inner.set_flags(flags);
    }

    /// Rescale pts, dts and duration from `from` into `to`.
    ///
    /// Unset timestamps stay unset.
    pub fn rescale(&mut self, from: TimeBase, to: TimeBase) {
        if from != to {
            self.inner.rescale_ts(from, to);
        }
    }

    pub(crate) fn from_inner(inner: ffmpeg::Packet) -> Self {
        Self { inner }
    }

    pub(crate) fn as_inner(&self) -> &ffmpeg::Packet {
        &self.inner
    }

    pub(crate) fn as_inner_mut(&mut self) -> &mut ffmpeg::Packet {
        &mut self.inner
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("stream_index", &self.stream_index())
            .field("size", &self.size())
            .field("pts", &self.pts())
            .field("dts", &self.dts())
            .field("duration", &self.duration())
            .field("key", &self.is_key())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flush_packet() {
        let p = Packet::flush();
        assert!(p.is_flush());
        assert_eq!(p.size(), 0);
        assert!(p.data().is_empty());

        let p = Packet::flush().with_pts(Some(0));
        assert!(!p.is_flush());
    }

    #[test]
    fn test_payload_is_copied() {
        let mut src = vec![1u8, 2, 3, 4];
        let p = Packet::new(&src);
        src[0] = 9;
        assert_eq!(p.data(), &[1, 2, 3, 4]);
        assert!(!p.is_flush());
    }

    #[test]
    fn test_builder_fields() {
        let p = Packet::new(&[0u8; 8])
            .with_pts(Some(10))
            .with_dts(Some(8))
            .with_duration(2)
            .with_stream_index(3)
            .with_key(true);
        assert_eq!(p.pts(), Some(10));
        assert_eq!(p.dts(), Some(8));
        assert_eq!(p.duration(), 2);
        assert_eq!(p.stream_index(), 3);
        assert!(p.is_key());

        let p = p.with_key(false);
        assert!(!p.is_key());
    }

    #[test]
    fn test_rescale_keeps_missing_timestamps() {
        let mut p = Packet::new(&[0u8; 4]).with_pts(Some(25)).with_duration(1);
        let from = TimeBase::new(1, 25).unwrap();
        p.rescale(from, TimeBase::MILLISECONDS);
        assert_eq!(p.pts(), Some(1000));
        assert_eq!(p.dts(), None);
        assert_eq!(p.duration(), 40);
    }
}
