//! Streaming Pump
//!
//! Two format-agnostic halves shared by all four RPC cardinalities:
//!
//! - [`InboundPump`]: feeds raw body bytes through the frame decoder and
//!   hands decoded messages out in strict arrival order. The handler can
//!   pause delivery; frames buffer here until resume, and the embedder is
//!   expected to mirror the pause into HTTP/2 flow control rather than
//!   keep feeding. Half-close is delivered as an event after the last
//!   buffered message, never before.
//! - [`WriteQueue`]: byte accounting for the outbound side. Writes report
//!   [`WriteOutcome::Full`] once the high watermark is reached; when the
//!   embedder drains the queue below the low watermark the handler gets a
//!   drain callback and may produce more.

use std::collections::VecDeque;

use crate::error::GrpcError;
use crate::framing::{FrameDecoder, GrpcFrame};

/// Result of queueing one outbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Queued; capacity remains
    Accepted,
    /// Queued, but the queue is saturated — stop producing until drained
    Full,
}

/// Inbound event delivered to the handler, in order
#[derive(Debug)]
pub enum InboundEvent {
    /// One decoded message frame
    Message(GrpcFrame),
    /// The peer half-closed; no more messages will arrive
    End,
}

/// Inbound half of the pump: decode, buffer, deliver in order
#[derive(Debug)]
pub struct InboundPump {
    decoder: FrameDecoder,
    ready: VecDeque<GrpcFrame>,
    paused: bool,
    ended: bool,
    end_delivered: bool,
}

impl InboundPump {
    /// Create a pump with the given max message size
    pub fn new(max_message_size: usize) -> Self {
        Self {
            decoder: FrameDecoder::with_max_size(max_message_size),
            ready: VecDeque::new(),
            paused: false,
            ended: false,
            end_delivered: false,
        }
    }

    /// Feed body bytes; decodes every complete envelope into the ready queue
    pub fn feed(&mut self, data: &[u8]) -> Result<(), GrpcError> {
        self.decoder.feed(data);
        while let Some(frame) = self.decoder.decode_next()? {
            self.ready.push_back(frame);
        }
        Ok(())
    }

    /// Record the peer's half-close
    pub fn end(&mut self) {
        self.ended = true;
    }

    /// Stop delivering messages until [`resume`](Self::resume)
    pub fn pause(&mut self) {
        self.paused = true;
    }

    /// Resume delivery
    pub fn resume(&mut self) {
        self.paused = false;
    }

    /// Whether delivery is paused
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Whether the peer half-closed and everything was delivered
    pub fn is_drained(&self) -> bool {
        self.end_delivered
    }

    /// Whether a partial envelope is still buffered
    pub fn has_partial_frame(&self) -> bool {
        self.decoder.has_pending()
    }

    /// Whether the peer already half-closed
    pub fn remote_ended(&self) -> bool {
        self.ended
    }

    /// Number of decoded messages waiting for delivery
    pub fn buffered(&self) -> usize {
        self.ready.len()
    }

    /// Next deliverable event, honoring pause
    ///
    /// `End` is emitted exactly once, strictly after the last buffered
    /// message.
    pub fn next_event(&mut self) -> Option<InboundEvent> {
        if self.paused {
            return None;
        }
        if let Some(frame) = self.ready.pop_front() {
            return Some(InboundEvent::Message(frame));
        }
        if self.ended && !self.end_delivered && !self.decoder.has_pending() {
            self.end_delivered = true;
            return Some(InboundEvent::End);
        }
        None
    }
}

/// Outbound write-queue accounting with high/low watermarks
#[derive(Debug)]
pub struct WriteQueue {
    queued: usize,
    high: usize,
    low: usize,
    saturated: bool,
}

impl WriteQueue {
    /// Create with the given watermarks
    pub fn new(high: usize, low: usize) -> Self {
        Self {
            queued: 0,
            high,
            low: low.min(high),
            saturated: false,
        }
    }

    /// Account for one queued write
    pub fn push(&mut self, bytes: usize) -> WriteOutcome {
        self.queued += bytes;
        if self.queued >= self.high {
            self.saturated = true;
            WriteOutcome::Full
        } else {
            WriteOutcome::Accepted
        }
    }

    /// Account for one write handed to the transport
    ///
    /// Returns true when this completion drained a saturated queue below
    /// the low watermark — the moment to fire the handler's drain callback.
    pub fn complete(&mut self, bytes: usize) -> bool {
        self.queued = self.queued.saturating_sub(bytes);
        if self.saturated && self.queued <= self.low {
            self.saturated = false;
            return true;
        }
        false
    }

    /// Bytes currently queued
    pub fn queued(&self) -> usize {
        self.queued
    }

    /// Whether the queue is above the high watermark
    pub fn is_saturated(&self) -> bool {
        self.saturated
    }
}
