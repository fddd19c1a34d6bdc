use bytes::{Buf, Bytes, BytesMut};

pub const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];
pub const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];

/// Largest open frame the demuxer will hold before giving up on it.
pub const MAX_FRAME_BYTES: usize = 2 * 1024 * 1024;

/// Bytes kept when no start marker is buffered, enough to catch a marker split
/// across two reads.
const MARKER_TAIL: usize = JPEG_SOI.len() - 1;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DemuxStats {
    pub frames: u64,
    pub discarded_bytes: u64,
    pub overflow_resets: u64,
}

/// Splits an unbounded byte stream of concatenated JPEG images into frames.
///
/// Only the SOI/EOI markers are looked at, the payload in between is never
/// validated. Anything before a start marker is treated as noise.
pub struct JpegDemuxer {
    buffer: BytesMut,
    /// Where the end-marker search resumes inside an open frame.
    scan_from: usize,
    max_frame_bytes: usize,
    stats: DemuxStats,
}

impl JpegDemuxer {
    pub fn new() -> Self {
        Self::with_max_frame_bytes(MAX_FRAME_BYTES)
    }

    pub fn with_max_frame_bytes(max_frame_bytes: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            scan_from: JPEG_SOI.len(),
            max_frame_bytes,
            stats: DemuxStats::default(),
        }
    }

    /// Append `chunk` and return the frames it completes.
    ///
    /// The iterator is lazy; frames not pulled from it stay buffered and are
    /// returned by the next call.
    pub fn feed(&mut self, chunk: &[u8]) -> Frames<'_> {
        self.buffer.extend_from_slice(chunk);
        Frames { demuxer: self }
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn stats(&self) -> DemuxStats {
        self.stats
    }

    fn next_frame(&mut self) -> Option<Bytes> {
        let Some(start) = find_marker(&self.buffer, &JPEG_SOI) else {
            if self.buffer.len() > MARKER_TAIL {
                let drop = self.buffer.len() - MARKER_TAIL;
                self.discard(drop);
            }
            return None;
        };

        if start > 0 {
            self.discard(start);
        }

        match find_marker(&self.buffer[self.scan_from..], &JPEG_EOI) {
            Some(offset) => {
                let end = self.scan_from + offset + JPEG_EOI.len();
                self.scan_from = JPEG_SOI.len();
                self.stats.frames += 1;
                Some(self.buffer.split_to(end).freeze())
            }
            None => {
                if self.buffer.len() > self.max_frame_bytes {
                    self.drop_open_frame();
                } else {
                    // keep the last byte, it may be the first half of an end marker
                    self.scan_from = (self.buffer.len() - 1).max(JPEG_SOI.len());
                }
                None
            }
        }
    }

    /// Give up on an oversized open frame. A later start marker, or the possible
    /// first half of one at the very end, survives so parsing resumes there.
    fn drop_open_frame(&mut self) {
        let keep_from = match rfind_marker(&self.buffer[1..], &JPEG_SOI) {
            Some(offset) => offset + 1,
            None => self.buffer.len() - MARKER_TAIL,
        };
        log::warn!(
            "demux: open frame exceeded {} bytes without an end marker, dropping {} bytes",
            self.max_frame_bytes,
            keep_from
        );
        self.stats.overflow_resets += 1;
        self.discard(keep_from);
    }

    fn discard(&mut self, count: usize) {
        self.stats.discarded_bytes += count as u64;
        self.buffer.advance(count);
        self.scan_from = JPEG_SOI.len();
    }
}

impl Default for JpegDemuxer {
    fn default() -> Self {
        Self::new()
    }
}

/// Frames completed by one [`JpegDemuxer::feed`] call.
pub struct Frames<'a> {
    demuxer: &'a mut JpegDemuxer,
}

impl Iterator for Frames<'_> {
    type Item = Bytes;

    fn next(&mut self) -> Option<Self::Item> {
        self.demuxer.next_frame()
    }
}

fn find_marker(buffer: &[u8], marker: &[u8; 2]) -> Option<usize> {
    buffer.windows(2).position(|w| w == marker)
}

fn rfind_marker(buffer: &[u8], marker: &[u8; 2]) -> Option<usize> {
    buffer.windows(2).rposition(|w| w == marker)
}

#[cfg(test)]
#[path = "demux_test.rs"]
mod demux_test;
