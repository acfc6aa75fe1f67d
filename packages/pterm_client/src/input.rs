//! Keystroke coalescing for one tab.
//!
//! Bytes accumulate until a carriage return shows up or the batching timer
//! expires, then go out as a single `input` request. Only one request per
//! tab is ever in flight; anything typed meanwhile waits for it.

/// What the caller should do after appending bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Append {
    /// A carriage return is pending: flush now.
    Flush,
    /// (Re)arm the batching timer with this generation.
    ArmTimer(u64),
}

#[derive(Debug, Default)]
pub struct InputQueue {
    pending: Vec<u8>,
    in_flight: bool,
    generation: u64,
}

impl InputQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, bytes: &[u8]) -> Append {
        self.pending.extend_from_slice(bytes);
        // Bumping the generation invalidates any armed timer.
        self.generation += 1;
        if self.pending.contains(&b'\r') {
            Append::Flush
        } else {
            Append::ArmTimer(self.generation)
        }
    }

    /// True if the expiry for `generation` should flush.
    pub fn timer_fired(&self, generation: u64) -> bool {
        generation == self.generation && !self.pending.is_empty()
    }

    /// Take everything pending for sending, unless a request is in flight.
    pub fn take_batch(&mut self) -> Option<Vec<u8>> {
        if self.in_flight || self.pending.is_empty() {
            return None;
        }
        self.in_flight = true;
        Some(std::mem::take(&mut self.pending))
    }

    /// The in-flight request resolved, successfully or not.
    pub fn complete(&mut self) {
        self.in_flight = false;
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn carriage_return_requests_flush() {
        let mut q = InputQueue::new();
        assert!(matches!(q.append(b"ls"), Append::ArmTimer(_)));
        assert_eq!(q.append(b"\r"), Append::Flush);
        assert_eq!(q.take_batch().as_deref(), Some(&b"ls\r"[..]));
    }

    #[test]
    fn stale_timer_generation_is_ignored() {
        let mut q = InputQueue::new();
        let Append::ArmTimer(first) = q.append(b"a") else {
            panic!("expected timer");
        };
        let Append::ArmTimer(second) = q.append(b"b") else {
            panic!("expected timer");
        };
        assert!(!q.timer_fired(first));
        assert!(q.timer_fired(second));
    }

    #[test]
    fn single_flight_keeps_bytes_queued() {
        let mut q = InputQueue::new();
        q.append(b"a");
        assert_eq!(q.take_batch().as_deref(), Some(&b"a"[..]));
        q.append(b"b");
        q.append(b"c");
        assert_eq!(q.take_batch(), None);
        assert_eq!(q.pending_len(), 2);
        q.complete();
        assert_eq!(q.take_batch().as_deref(), Some(&b"bc"[..]));
    }

    #[test]
    fn empty_queue_yields_nothing() {
        let mut q = InputQueue::new();
        assert_eq!(q.take_batch(), None);
        assert!(!q.in_flight());
    }
}
