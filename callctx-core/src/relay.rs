//! Call signaling relay
//!
//! Out-of-band signaling between the two engines travels through the session
//! layer. The call context only hands payloads over; ordering and
//! de-duplication are the engine's business.

use crate::types::{CallSessionInternalId, CallType};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Handler for inbound signaling batches, invoked on the relay's thread
pub type SignalingHandler = Box<dyn Fn(Vec<Bytes>) + Send + Sync>;

/// Idempotent cancel handle; disposes on drop
pub struct Subscription {
    dispose: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Subscription {
    /// Run `dispose` once, on [`Subscription::dispose`] or drop
    pub fn new(dispose: impl FnOnce() + Send + 'static) -> Self {
        Self {
            dispose: Mutex::new(Some(Box::new(dispose))),
        }
    }

    /// Subscription with nothing to cancel
    pub fn empty() -> Self {
        Self {
            dispose: Mutex::new(None),
        }
    }

    /// Cancel; later calls do nothing
    pub fn dispose(&self) {
        let dispose = self.dispose.lock().take();
        if let Some(dispose) = dispose {
            dispose();
        }
    }

    /// Check whether the subscription was cancelled
    pub fn is_disposed(&self) -> bool {
        self.dispose.lock().is_none()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Session-layer services a call context relies on
pub trait CallSessionRelay: Send + Sync {
    /// Send an outbound signaling payload for `internal_id`
    fn send_signaling_data(&self, internal_id: CallSessionInternalId, data: Bytes);

    /// Deliver inbound signaling for `internal_id` to `handler` until the
    /// returned subscription is disposed
    fn begin_receiving_signaling_data(
        &self,
        internal_id: CallSessionInternalId,
        handler: SignalingHandler,
    ) -> Subscription;

    /// Update the call type recorded for `internal_id`
    fn update_call_type(&self, internal_id: CallSessionInternalId, call_type: CallType);
}

#[derive(Default)]
struct RelayState {
    next_handler_id: u64,
    handlers: HashMap<CallSessionInternalId, HashMap<u64, Arc<SignalingHandler>>>,
    sent: Vec<(CallSessionInternalId, Bytes)>,
    call_types: HashMap<CallSessionInternalId, CallType>,
    call_type_updates: usize,
}

/// In-process relay
///
/// Records outbound payloads and call type updates, and delivers injected
/// inbound batches to live subscribers. Used by the simulator and tests.
#[derive(Clone, Default)]
pub struct InMemoryRelay {
    state: Arc<Mutex<RelayState>>,
    deliveries: Arc<AtomicU64>,
}

impl InMemoryRelay {
    /// Create an empty relay
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an inbound batch to every subscriber of `internal_id`
    ///
    /// Returns the number of handlers reached.
    pub fn deliver(&self, internal_id: CallSessionInternalId, batch: Vec<Bytes>) -> usize {
        let handlers: Vec<Arc<SignalingHandler>> = self
            .state
            .lock()
            .handlers
            .get(&internal_id)
            .map(|handlers| handlers.values().cloned().collect())
            .unwrap_or_default();

        for handler in &handlers {
            (**handler)(batch.clone());
        }
        self.deliveries.fetch_add(handlers.len() as u64, Ordering::Relaxed);
        handlers.len()
    }

    /// Outbound payloads sent so far
    pub fn sent(&self) -> Vec<(CallSessionInternalId, Bytes)> {
        self.state.lock().sent.clone()
    }

    /// Call type last recorded for `internal_id`
    pub fn call_type(&self, internal_id: CallSessionInternalId) -> Option<CallType> {
        self.state.lock().call_types.get(&internal_id).copied()
    }

    /// Number of call type updates received
    pub fn call_type_updates(&self) -> usize {
        self.state.lock().call_type_updates
    }

    /// Number of live subscribers for `internal_id`
    pub fn subscriber_count(&self, internal_id: CallSessionInternalId) -> usize {
        self.state
            .lock()
            .handlers
            .get(&internal_id)
            .map_or(0, HashMap::len)
    }

    /// Total handler invocations
    pub fn deliveries(&self) -> u64 {
        self.deliveries.load(Ordering::Relaxed)
    }
}

impl CallSessionRelay for InMemoryRelay {
    fn send_signaling_data(&self, internal_id: CallSessionInternalId, data: Bytes) {
        tracing::trace!(%internal_id, len = data.len(), "Relaying outbound signaling");
        self.state.lock().sent.push((internal_id, data));
    }

    fn begin_receiving_signaling_data(
        &self,
        internal_id: CallSessionInternalId,
        handler: SignalingHandler,
    ) -> Subscription {
        let handler_id = {
            let mut state = self.state.lock();
            let handler_id = state.next_handler_id;
            state.next_handler_id += 1;
            state
                .handlers
                .entry(internal_id)
                .or_default()
                .insert(handler_id, Arc::new(handler));
            handler_id
        };

        let state = Arc::clone(&self.state);
        Subscription::new(move || {
            let mut state = state.lock();
            if let Some(handlers) = state.handlers.get_mut(&internal_id) {
                handlers.remove(&handler_id);
                if handlers.is_empty() {
                    state.handlers.remove(&internal_id);
                }
            }
        })
    }

    fn update_call_type(&self, internal_id: CallSessionInternalId, call_type: CallType) {
        let mut state = self.state.lock();
        state.call_types.insert(internal_id, call_type);
        state.call_type_updates += 1;
    }
}
