//! Per-tab output queue and drain pass bookkeeping.
//!
//! Pushed chunks are queued still base64-encoded. A drain pass decodes from
//! the cursor into one buffer bounded by [`DrainLimits`]; the buffer is the
//! only thing handed to the sink, and the next pass waits for the sink to
//! finish with it.

use data_encoding::BASE64;
use tokio::time::Instant;
use tracing::debug;

use crate::config::DrainLimits;

#[derive(Debug)]
enum Queued {
    Encoded(String),
    /// Remainder of a chunk that was split across passes.
    Decoded(Vec<u8>),
}

#[derive(Debug, Default)]
pub struct OutputQueue {
    entries: Vec<Queued>,
    cursor: usize,
    writing: bool,
    drain_scheduled: bool,
}

impl OutputQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a chunk. Returns true if the caller should schedule a drain.
    pub fn push(&mut self, data_b64: String) -> bool {
        self.entries.push(Queued::Encoded(data_b64));
        self.request_drain()
    }

    fn request_drain(&mut self) -> bool {
        if self.drain_scheduled || self.writing || !self.has_pending() {
            return false;
        }
        self.drain_scheduled = true;
        true
    }

    /// Run one drain pass. Returns the bytes to write, if any; the queue is
    /// then marked as writing until [`OutputQueue::write_finished`].
    pub fn take_pass(&mut self, limits: DrainLimits) -> Option<Vec<u8>> {
        self.drain_scheduled = false;
        if self.writing {
            return None;
        }

        // Every pass takes something, whatever the limits say.
        let max_bytes = limits.max_bytes.max(1);
        let started = Instant::now();
        let mut buf = Vec::new();
        while self.cursor < self.entries.len() {
            if !buf.is_empty()
                && (buf.len() >= max_bytes || started.elapsed() >= limits.max_duration)
            {
                break;
            }
            let entry = std::mem::replace(&mut self.entries[self.cursor], Queued::Decoded(Vec::new()));
            let bytes = match entry {
                Queued::Decoded(bytes) => bytes,
                Queued::Encoded(text) => match BASE64.decode(text.as_bytes()) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        debug!("dropping undecodable output chunk: {}", e);
                        self.cursor += 1;
                        continue;
                    }
                },
            };

            let room = max_bytes - buf.len();
            if bytes.len() > room {
                buf.extend_from_slice(&bytes[..room]);
                self.entries[self.cursor] = Queued::Decoded(bytes[room..].to_vec());
                break;
            }
            buf.extend_from_slice(&bytes);
            self.cursor += 1;
        }

        self.entries.drain(..self.cursor);
        self.cursor = 0;

        if buf.is_empty() {
            return None;
        }
        self.writing = true;
        Some(buf)
    }

    /// The sink finished the last write. Returns true if another pass
    /// should be scheduled.
    pub fn write_finished(&mut self) -> bool {
        self.writing = false;
        self.request_drain()
    }

    pub fn has_pending(&self) -> bool {
        self.cursor < self.entries.len()
    }

    pub fn is_writing(&self) -> bool {
        self.writing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn limits(max_bytes: usize) -> DrainLimits {
        DrainLimits {
            max_bytes,
            max_duration: Duration::from_secs(60),
        }
    }

    fn enc(bytes: &[u8]) -> String {
        BASE64.encode(bytes)
    }

    #[tokio::test(start_paused = true)]
    async fn two_chunks_reach_the_sink_as_one_write() {
        let mut q = OutputQueue::new();
        assert!(q.push(enc(b"AB")));
        assert!(!q.push(enc(b"CD")), "drain already scheduled");
        assert_eq!(q.take_pass(limits(1024)).as_deref(), Some(&b"ABCD"[..]));
        assert!(!q.write_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_chunk_is_split_without_reordering() {
        let mut q = OutputQueue::new();
        q.push(enc(b"0123456789"));
        q.push(enc(b"ab"));

        let mut seen = Vec::new();
        while let Some(buf) = q.take_pass(limits(4)) {
            assert!(buf.len() <= 4);
            seen.extend(buf);
            q.write_finished();
        }
        assert_eq!(seen, b"0123456789ab");
    }

    #[tokio::test(start_paused = true)]
    async fn arbitrary_chunking_preserves_order() {
        let payload: Vec<u8> = (0..5000u32).map(|i| (i * 31 % 251) as u8).collect();
        let sizes = [1usize, 7, 300, 2, 999, 13, 4096];
        let mut q = OutputQueue::new();
        let mut offset = 0;
        let mut i = 0;
        while offset < payload.len() {
            let end = (offset + sizes[i % sizes.len()]).min(payload.len());
            q.push(enc(&payload[offset..end]));
            offset = end;
            i += 1;
        }

        let mut seen = Vec::new();
        while let Some(buf) = q.take_pass(limits(512)) {
            assert!(buf.len() <= 512);
            seen.extend(buf);
            q.write_finished();
        }
        assert_eq!(seen, payload);
    }

    #[tokio::test(start_paused = true)]
    async fn no_pass_while_writing() {
        let mut q = OutputQueue::new();
        q.push(enc(b"one"));
        assert!(q.take_pass(limits(1024)).is_some());
        assert!(!q.push(enc(b"two")), "sink busy, no drain scheduled");
        assert!(q.take_pass(limits(1024)).is_none());
        assert!(q.write_finished(), "pending data schedules the next pass");
        assert_eq!(q.take_pass(limits(1024)).as_deref(), Some(&b"two"[..]));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_limits_still_make_progress() {
        let mut q = OutputQueue::new();
        q.push(enc(b"xyz"));
        let zero = DrainLimits {
            max_bytes: 0,
            max_duration: Duration::ZERO,
        };
        let mut seen = Vec::new();
        while let Some(buf) = q.take_pass(zero) {
            assert_eq!(buf.len(), 1);
            seen.extend(buf);
            q.write_finished();
        }
        assert_eq!(seen, b"xyz");

        q.push(enc(b"ab"));
        let no_time = DrainLimits {
            max_bytes: 1024,
            max_duration: Duration::ZERO,
        };
        assert_eq!(q.take_pass(no_time).as_deref(), Some(&b"ab"[..]));
    }

    #[tokio::test(start_paused = true)]
    async fn undecodable_chunk_is_skipped() {
        let mut q = OutputQueue::new();
        q.push(enc(b"a"));
        q.push("%%not base64%%".into());
        q.push(enc(b"b"));
        assert_eq!(q.take_pass(limits(1024)).as_deref(), Some(&b"ab"[..]));
        assert!(!q.has_pending());
    }
}
