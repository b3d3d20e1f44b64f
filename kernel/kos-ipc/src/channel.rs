//! The request/response demultiplexer sitting on top of the framed wire
//! format, per spec.md §4.8/§6: correlation ids match responses to
//! requests, with a 30-second default response timeout.
//!
//! This layer is transport-agnostic: it doesn't own a socket or a pipe.
//! Something else (an actual transport, or `kos-kernel`'s dispatch loop for
//! an in-process peer) reads bytes off the wire, decodes frames with
//! [`crate::wire::decode_frame`], and calls [`RequestChannel::complete`]
//! with the result. This mirrors the teacher's preference for keeping
//! protocol state machines separate from the I/O that drives them (see how
//! `hadron-kernel`'s pipe endpoints only touch a `WaitQueue`, never a raw
//! fd).

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;

use kos_core::error::{KError, KResult};
use kos_core::id::IdGenerator;
use kos_core::sync::WaitQueue;

use crate::wire::Frame;

/// Default response timeout, per spec.md §6.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

struct PendingSlot {
    response: Mutex<Option<Frame>>,
    wq: WaitQueue,
}

/// Matches responses to outstanding requests by correlation id.
pub struct RequestChannel {
    ids: IdGenerator,
    pending: Mutex<HashMap<u64, std::sync::Arc<PendingSlot>>>,
}

impl RequestChannel {
    #[must_use]
    pub fn new() -> Self {
        Self {
            ids: IdGenerator::new(),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Allocates a fresh correlation id and registers a waiter for its
    /// response. The caller is responsible for actually writing the
    /// request frame (with this id attached in its header) to the wire.
    #[must_use]
    pub fn begin_request(&self) -> u64 {
        let id = self.ids.next();
        self.pending.lock().insert(
            id,
            std::sync::Arc::new(PendingSlot {
                response: Mutex::new(None),
                wq: WaitQueue::new(),
            }),
        );
        id
    }

    /// Blocks until `correlation_id`'s response arrives or `timeout`
    /// elapses.
    ///
    /// # Errors
    /// Returns [`KError::Timeout`] if no response arrives in time,
    /// [`KError::NotFound`] if `correlation_id` was never registered (or
    /// was already consumed).
    pub fn wait_response(&self, correlation_id: u64, timeout: Duration) -> KResult<Frame> {
        let slot = self
            .pending
            .lock()
            .get(&correlation_id)
            .cloned()
            .ok_or(KError::NotFound)?;
        loop {
            if let Some(frame) = slot.response.lock().take() {
                self.pending.lock().remove(&correlation_id);
                return Ok(frame);
            }
            if !slot.wq.wait_timeout(timeout) {
                self.pending.lock().remove(&correlation_id);
                return Err(KError::Timeout);
            }
        }
    }

    /// Delivers a received response frame for `correlation_id`, waking
    /// whoever is blocked in [`RequestChannel::wait_response`]. A response
    /// for an unknown or already-consumed correlation id is silently
    /// dropped (the requester gave up or never asked).
    pub fn complete(&self, correlation_id: u64, frame: Frame) {
        if let Some(slot) = self.pending.lock().get(&correlation_id).cloned() {
            *slot.response.lock() = Some(frame);
            slot.wq.wake_all();
        }
    }

    /// Abandons a request without waiting for its response, e.g. the
    /// caller was interrupted.
    pub fn cancel(&self, correlation_id: u64) {
        self.pending.lock().remove(&correlation_id);
    }
}

impl Default for RequestChannel {
    fn default() -> Self {
        Self::new()
    }
}
