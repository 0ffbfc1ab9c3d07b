//! Control-event ring between the audio callback and housekeeping.
//!
//! The only channel out of the real-time domain is this ring: the driver's
//! callback side posts fixed-size event codes, a low-frequency housekeeping
//! task drains them and runs the heavyweight reaction (stop, teardown and
//! rebuild). Neither side ever blocks or allocates after construction.
//!
//! Records are 4-byte four-cc codes. A post that does not fit is dropped
//! whole; that is acceptable because every control event is either
//! idempotent (reset) or advisory (overload), and the driver re-issues reset
//! requests that go unanswered.

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_utils::CachePadded;

/// Bytes per event record.
const EVENT_SIZE: usize = 4;

/// Smallest ring the channel will allocate, in bytes.
const MIN_CAPACITY: usize = 1024;

/// Events carried from the callback side to housekeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    /// Playback should stop.
    StopPlayback,
    /// The driver asked for a teardown/rebuild cycle.
    ResetNeeded,
    /// The driver reported a processing overload.
    Overload,
}

impl ControlEvent {
    /// Wire code of the event.
    pub fn code(self) -> u32 {
        match self {
            Self::StopPlayback => u32::from_be_bytes(*b"stop"),
            Self::ResetNeeded => u32::from_be_bytes(*b"rest"),
            Self::Overload => u32::from_be_bytes(*b"ovld"),
        }
    }

    /// Resolves a wire code back to an event.
    pub fn from_code(code: u32) -> Option<Self> {
        match &code.to_be_bytes() {
            b"stop" => Some(Self::StopPlayback),
            b"rest" => Some(Self::ResetNeeded),
            b"ovld" => Some(Self::Overload),
            _ => None,
        }
    }
}

/// Errors surfaced while draining the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RecvError {
    /// Fewer bytes than one record were available: the ring is corrupt and
    /// the drain cycle must be abandoned.
    #[error("truncated event record in ring")]
    Truncated,

    /// A full record carried a code this crate does not know. The record
    /// has been consumed; draining may continue.
    #[error("unknown event code {0:#010x}")]
    UnknownCode(u32),
}

/// Fixed-capacity byte ring with single-producer/single-consumer publishing.
struct Ring {
    slots: Box<[AtomicU8]>,
    /// Total bytes ever written; published after a whole record lands.
    head: CachePadded<AtomicUsize>,
    /// Total bytes ever read.
    tail: CachePadded<AtomicUsize>,
}

impl Ring {
    fn new(capacity: usize) -> Self {
        let slots = (0..capacity).map(|_| AtomicU8::new(0)).collect();
        Self {
            slots,
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    fn write(&self, bytes: &[u8]) -> bool {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        let free = self.slots.len() - (head - tail);
        if free < bytes.len() {
            return false;
        }

        for (offset, &byte) in bytes.iter().enumerate() {
            let slot = (head + offset) % self.slots.len();
            self.slots[slot].store(byte, Ordering::Relaxed);
        }
        self.head.store(head + bytes.len(), Ordering::Release);
        true
    }

    fn read_record(&self) -> Result<Option<[u8; EVENT_SIZE]>, RecvError> {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Relaxed);
        let available = head - tail;
        if available == 0 {
            return Ok(None);
        }
        if available < EVENT_SIZE {
            return Err(RecvError::Truncated);
        }

        let mut record = [0u8; EVENT_SIZE];
        for (offset, byte) in record.iter_mut().enumerate() {
            let slot = (tail + offset) % self.slots.len();
            *byte = self.slots[slot].load(Ordering::Relaxed);
        }
        self.tail.store(tail + EVENT_SIZE, Ordering::Release);
        Ok(Some(record))
    }
}

/// Posting side of the control-event ring.
///
/// Cloned into the callback adapter. Posts never block; a full ring drops
/// the record. The ring is written single-producer: the driver serializes
/// its message callbacks, and a stop request racing one of them garbles at
/// most a single record, which the drain cycle detects and discards.
#[derive(Clone)]
pub struct EventSender {
    ring: Arc<Ring>,
}

impl EventSender {
    /// Posts an event. Returns `false` if the ring was full and the event
    /// was dropped.
    pub fn post(&self, event: ControlEvent) -> bool {
        self.ring.write(&event.code().to_be_bytes())
    }

    #[cfg(test)]
    fn post_raw(&self, bytes: &[u8]) -> bool {
        self.ring.write(bytes)
    }
}

/// Draining side of the control-event ring.
pub struct EventReceiver {
    ring: Arc<Ring>,
}

impl EventReceiver {
    /// Pops the oldest event.
    ///
    /// `Ok(None)` when the ring is empty. [`RecvError::Truncated`] means the
    /// drain cycle must be abandoned; [`RecvError::UnknownCode`] consumes
    /// the bad record and draining may continue.
    pub fn try_recv(&mut self) -> Result<Option<ControlEvent>, RecvError> {
        match self.ring.read_record()? {
            None => Ok(None),
            Some(record) => {
                let code = u32::from_be_bytes(record);
                ControlEvent::from_code(code)
                    .map(Some)
                    .ok_or(RecvError::UnknownCode(code))
            }
        }
    }
}

/// Creates a control-event ring of at least `capacity` bytes (1024 minimum).
pub fn channel(capacity: usize) -> (EventSender, EventReceiver) {
    let ring = Arc::new(Ring::new(capacity.max(MIN_CAPACITY)));
    (
        EventSender {
            ring: Arc::clone(&ring),
        },
        EventReceiver { ring },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_codes_round_trip() {
        for event in [
            ControlEvent::StopPlayback,
            ControlEvent::ResetNeeded,
            ControlEvent::Overload,
        ] {
            assert_eq!(ControlEvent::from_code(event.code()), Some(event));
        }
    }

    #[test]
    fn test_fifo_order() {
        let (sender, mut receiver) = channel(1024);
        assert!(sender.post(ControlEvent::Overload));
        assert!(sender.post(ControlEvent::ResetNeeded));
        assert!(sender.post(ControlEvent::StopPlayback));

        assert_eq!(receiver.try_recv().unwrap(), Some(ControlEvent::Overload));
        assert_eq!(receiver.try_recv().unwrap(), Some(ControlEvent::ResetNeeded));
        assert_eq!(receiver.try_recv().unwrap(), Some(ControlEvent::StopPlayback));
        assert_eq!(receiver.try_recv().unwrap(), None);
    }

    #[test]
    fn test_full_ring_drops_whole_records() {
        let (sender, mut receiver) = channel(1024);
        for _ in 0..256 {
            assert!(sender.post(ControlEvent::Overload));
        }
        // 257th record does not fit and is dropped whole.
        assert!(!sender.post(ControlEvent::ResetNeeded));

        let mut drained = 0;
        while receiver.try_recv().unwrap().is_some() {
            drained += 1;
        }
        assert_eq!(drained, 256);
    }

    #[test]
    fn test_drained_capacity_is_reusable() {
        let (sender, mut receiver) = channel(1024);
        for _ in 0..300 {
            assert!(sender.post(ControlEvent::Overload));
            assert_eq!(receiver.try_recv().unwrap(), Some(ControlEvent::Overload));
        }
        assert_eq!(receiver.try_recv().unwrap(), None);
    }

    #[test]
    fn test_truncated_record_reported() {
        let (sender, mut receiver) = channel(1024);
        assert!(sender.post_raw(&[0x73, 0x74]));
        assert_eq!(receiver.try_recv(), Err(RecvError::Truncated));
    }

    #[test]
    fn test_unknown_code_consumed_and_reported() {
        let (sender, mut receiver) = channel(1024);
        assert!(sender.post_raw(&u32::from_be_bytes(*b"zzzz").to_be_bytes()));
        assert!(sender.post(ControlEvent::StopPlayback));

        assert_eq!(
            receiver.try_recv(),
            Err(RecvError::UnknownCode(u32::from_be_bytes(*b"zzzz")))
        );
        // The bad record was consumed; the next one is intact.
        assert_eq!(receiver.try_recv().unwrap(), Some(ControlEvent::StopPlayback));
    }

    #[test]
    fn test_cross_thread_posting() {
        let (sender, mut receiver) = channel(1024);
        let poster = std::thread::spawn(move || {
            for _ in 0..100 {
                while !sender.post(ControlEvent::Overload) {
                    std::thread::yield_now();
                }
            }
        });

        let mut seen = 0;
        while seen < 100 {
            match receiver.try_recv() {
                Ok(Some(_)) => seen += 1,
                Ok(None) => std::thread::yield_now(),
                Err(err) => panic!("unexpected ring error: {err}"),
            }
        }
        poster.join().unwrap();
    }
}
