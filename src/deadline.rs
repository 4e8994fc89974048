//! Deadline Management
//!
//! A request may carry a `grpc-timeout` header: an integer followed by a
//! one-character unit. The engine converts it to an absolute deadline at
//! dispatch time and tracks all armed deadlines in a per-connection queue.
//! The embedder asks [`DeadlineQueue::next_deadline`] when to wake up and
//! feeds the clock back through the connection's `tick`.
//!
//! Disarming is lazy: entries stay in the heap and are dropped when they
//! surface, after checking against the call's live deadline slot. This
//! keeps disarm O(1) and idempotent on every completion path.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

/// Parse grpc-timeout header value
///
/// Format: `<value><unit>`
/// - H: hours
/// - M: minutes
/// - S: seconds
/// - m: milliseconds
/// - u: microseconds
/// - n: nanoseconds
///
/// Examples: "10S" = 10 seconds, "100m" = 100 milliseconds
pub fn parse_grpc_timeout(value: &[u8]) -> Option<Duration> {
    if value.is_empty() {
        return None;
    }

    let s = std::str::from_utf8(value).ok()?;
    let (num_str, unit) = s.split_at(s.len() - 1);
    let num: u64 = num_str.parse().ok()?;

    match unit {
        "H" => Some(Duration::from_secs(num * 3600)),
        "M" => Some(Duration::from_secs(num * 60)),
        "S" => Some(Duration::from_secs(num)),
        "m" => Some(Duration::from_millis(num)),
        "u" => Some(Duration::from_micros(num)),
        "n" => Some(Duration::from_nanos(num)),
        _ => None,
    }
}

/// Format duration as grpc-timeout header value
///
/// Chooses the largest unit that represents the duration exactly
pub fn format_grpc_timeout(duration: Duration) -> String {
    let nanos = duration.as_nanos();

    if nanos == 0 {
        return "0n".to_string();
    }

    let hours = duration.as_secs() / 3600;
    if hours > 0 && duration.as_secs() % 3600 == 0 && duration.subsec_nanos() == 0 {
        return format!("{}H", hours);
    }

    let minutes = duration.as_secs() / 60;
    if minutes > 0 && duration.as_secs() % 60 == 0 && duration.subsec_nanos() == 0 {
        return format!("{}M", minutes);
    }

    let secs = duration.as_secs();
    if secs > 0 && duration.subsec_nanos() == 0 {
        return format!("{}S", secs);
    }

    let millis = duration.as_millis();
    if millis > 0 && nanos % 1_000_000 == 0 {
        return format!("{}m", millis);
    }

    let micros = duration.as_micros();
    if micros > 0 && nanos % 1000 == 0 {
        return format!("{}u", micros);
    }

    format!("{}n", nanos)
}

/// Per-connection queue of armed call deadlines, earliest first
#[derive(Debug, Default)]
pub struct DeadlineQueue {
    heap: BinaryHeap<Reverse<(Instant, u32)>>,
}

impl DeadlineQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a deadline for a stream
    pub fn arm(&mut self, stream: u32, at: Instant) {
        self.heap.push(Reverse((at, stream)));
    }

    /// Earliest armed deadline, if any
    ///
    /// May point at a lazily-disarmed entry; a spurious wakeup at that
    /// instant is harmless because `expired` revalidates each stream.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|Reverse((at, _))| *at)
    }

    /// Pop every entry due at or before `now`
    ///
    /// The caller must check each stream against its live deadline slot;
    /// entries for completed calls surface here and are simply dropped.
    pub fn expired(&mut self, now: Instant) -> Vec<(u32, Instant)> {
        let mut due = Vec::new();
        while let Some(Reverse((at, stream))) = self.heap.peek().copied() {
            if at > now {
                break;
            }
            self.heap.pop();
            due.push((stream, at));
        }
        due
    }

    /// Number of (possibly stale) entries
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Whether the queue holds no entries
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
