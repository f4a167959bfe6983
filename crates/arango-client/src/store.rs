//! In-flight request records and the message store.
//!
//! A `RequestItem` is created on the submitting thread with its wire form
//! already serialized, travels through the write queue into the store, and
//! is destroyed after its callback ran. The store is touched only by the
//! serve task; an item is present in it exactly while its callback has not
//! been invoked.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use arango_protocol::{ErrorCondition, MessageId, Request, Response};
use bytes::{Bytes, BytesMut};
use hashbrown::HashMap;
use smallvec::SmallVec;

use crate::error::Error;

/// Callback invoked exactly once per submitted request. The original
/// request is handed back so the caller can resubmit on failure.
pub type RequestCallback = Box<dyn FnOnce(Request, Result<Response, Error>) + Send + 'static>;

/// Serialized wire form of a request, produced at submission time.
#[derive(Debug)]
pub(crate) enum WireForm {
    /// HTTP: the request line and headers; payload buffers follow.
    Http {
        /// Serialized head, including the blank line.
        head: Bytes,
    },
    /// VelocyStream: fully framed chunks.
    Vst {
        /// Framed chunk buffers in transmission order.
        chunks: SmallVec<[Bytes; 4]>,
    },
}

/// One in-flight request.
pub(crate) struct RequestItem {
    pub(crate) request: Request,
    pub(crate) wire: WireForm,
    callback: Option<RequestCallback>,
    requests_left: Arc<AtomicUsize>,
    /// VelocyStream response reassembly buffer.
    pub(crate) response_buffer: BytesMut,
    /// Chunks received so far for the response.
    pub(crate) chunks_received: u32,
    /// Total chunks announced by the response's first chunk.
    pub(crate) chunks_expected: u32,
}

impl RequestItem {
    pub(crate) fn new(
        request: Request,
        wire: WireForm,
        callback: RequestCallback,
        requests_left: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            request,
            wire,
            callback: Some(callback),
            requests_left,
            response_buffer: BytesMut::new(),
            chunks_received: 0,
            chunks_expected: 0,
        }
    }

    pub(crate) fn message_id(&self) -> MessageId {
        self.request.message_id
    }

    /// Deliver a successful response. No-op if the callback already ran.
    pub(crate) fn complete(mut self, response: Response) {
        if let Some(callback) = self.callback.take() {
            self.requests_left.fetch_sub(1, Ordering::AcqRel);
            callback(self.request, Ok(response));
        }
    }

    /// Deliver a transport failure. No-op if the callback already ran.
    pub(crate) fn fail(mut self, condition: ErrorCondition) {
        if let Some(callback) = self.callback.take() {
            self.requests_left.fetch_sub(1, Ordering::AcqRel);
            callback(
                self.request,
                Err(Error::from_condition(condition, condition.message())),
            );
        }
    }
}

impl std::fmt::Debug for RequestItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestItem")
            .field("message_id", &self.request.message_id)
            .field("chunks_received", &self.chunks_received)
            .field("chunks_expected", &self.chunks_expected)
            .finish_non_exhaustive()
    }
}

/// Mapping from message id to in-flight request record.
#[derive(Debug, Default)]
pub(crate) struct MessageStore {
    map: HashMap<MessageId, RequestItem>,
}

impl MessageStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Insert an item under its message id.
    pub(crate) fn add(&mut self, item: RequestItem) {
        self.map.insert(item.message_id(), item);
    }

    /// Remove and return the item for `id`, if present.
    pub(crate) fn remove_by_id(&mut self, id: MessageId) -> Option<RequestItem> {
        self.map.remove(&id)
    }

    /// Mutable access to the item for `id`.
    pub(crate) fn get_mut(&mut self, id: MessageId) -> Option<&mut RequestItem> {
        self.map.get_mut(&id)
    }

    /// Drain the store, failing every item with `condition`.
    pub(crate) fn cancel_all(&mut self, condition: ErrorCondition) {
        if !self.map.is_empty() {
            tracing::debug!(
                count = self.map.len(),
                ?condition,
                "canceling in-flight requests"
            );
        }
        for (_, item) in self.map.drain() {
            item.fail(condition);
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub(crate) fn size(&self) -> usize {
        self.map.len()
    }

    /// Message ids currently in flight (diagnostics).
    #[allow(dead_code)]
    pub(crate) fn keys(&self) -> Vec<MessageId> {
        self.map.keys().copied().collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use arango_protocol::RestVerb;
    use std::sync::Mutex;

    fn item(
        id: MessageId,
        counter: &Arc<AtomicUsize>,
        log: &Arc<Mutex<Vec<(MessageId, u32)>>>,
    ) -> RequestItem {
        let mut request = Request::new(RestVerb::Get, "/_api/version");
        request.message_id = id;
        counter.fetch_add(1, Ordering::AcqRel);
        let log = Arc::clone(log);
        RequestItem::new(
            request,
            WireForm::Http {
                head: Bytes::new(),
            },
            Box::new(move |request, result| {
                let code = match result {
                    Ok(_) => 0,
                    Err(e) => e.condition() as u32,
                };
                log.lock().unwrap().push((request.message_id, code));
            }),
            Arc::clone(counter),
        )
    }

    #[test]
    fn test_add_remove() {
        let counter = Arc::new(AtomicUsize::new(0));
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut store = MessageStore::new();

        store.add(item(1, &counter, &log));
        store.add(item(2, &counter, &log));
        assert_eq!(store.size(), 2);

        let removed = store.remove_by_id(1).unwrap();
        assert_eq!(removed.message_id(), 1);
        assert!(store.remove_by_id(1).is_none());
        assert_eq!(store.size(), 1);

        removed.fail(ErrorCondition::WriteError);
        assert_eq!(counter.load(Ordering::Acquire), 1);
    }

    #[test]
    fn test_cancel_all_invokes_each_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut store = MessageStore::new();
        for id in 1..=5 {
            store.add(item(id, &counter, &log));
        }

        store.cancel_all(ErrorCondition::Canceled);
        assert!(store.is_empty());
        assert_eq!(counter.load(Ordering::Acquire), 0);

        let entries = log.lock().unwrap();
        assert_eq!(entries.len(), 5);
        assert!(
            entries
                .iter()
                .all(|(_, code)| *code == ErrorCondition::Canceled as u32)
        );
    }

    #[test]
    fn test_remove_then_cancel_does_not_double_invoke() {
        let counter = Arc::new(AtomicUsize::new(0));
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut store = MessageStore::new();
        store.add(item(1, &counter, &log));

        let removed = store.remove_by_id(1).unwrap();
        removed.complete(Response::new(1));
        store.cancel_all(ErrorCondition::Canceled);

        let entries = log.lock().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0], (1, 0));
    }
}
