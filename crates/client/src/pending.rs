//! In-flight request bookkeeping.
//!
//! Each entry owns the reply channel of one caller. Removing the entry from
//! the map is what retires it, so whichever of response, timeout or flush
//! gets there first settles the request and the others find nothing.

use std::collections::HashMap;

use {serde_json::Value, tokio::sync::oneshot, tokio::task::AbortHandle};

use crate::error::{Error, Result};

/// Who is waiting for the outcome of a request.
#[derive(Debug)]
pub enum Reply {
    Caller(oneshot::Sender<Result<Value>>),
    /// The `connect` request of socket `generation`; its outcome drives the
    /// handshake instead of a caller.
    Handshake { generation: u64 },
}

/// Outcome of a handshake request, handed back by [`PendingRequest::settle`].
#[derive(Debug)]
pub struct HandshakeOutcome {
    pub generation: u64,
    pub result: Result<Value>,
}

#[derive(Debug)]
pub struct PendingRequest {
    method: String,
    reply: Reply,
    deadline: Option<AbortHandle>,
}

impl PendingRequest {
    pub fn new(method: impl Into<String>, reply: Reply) -> Self {
        Self {
            method: method.into(),
            reply,
            deadline: None,
        }
    }

    pub fn caller(method: impl Into<String>, reply: oneshot::Sender<Result<Value>>) -> Self {
        Self::new(method, Reply::Caller(reply))
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Deliver the outcome and silence the deadline timer.
    ///
    /// Handshake requests have no caller; their outcome is returned instead.
    pub fn settle(self, outcome: Result<Value>) -> Option<HandshakeOutcome> {
        if let Some(deadline) = self.deadline {
            deadline.abort();
        }
        match self.reply {
            Reply::Caller(reply) => {
                // The caller may have stopped waiting; nothing to do then.
                let _ = reply.send(outcome);
                None
            },
            Reply::Handshake { generation } => Some(HandshakeOutcome {
                generation,
                result: outcome,
            }),
        }
    }
}

#[derive(Debug, Default)]
pub struct PendingRequests {
    entries: HashMap<u64, PendingRequest>,
}

impl PendingRequests {
    /// Track a new request. Returns `false` if `id` is already outstanding.
    pub fn insert(&mut self, id: u64, request: PendingRequest) -> bool {
        if self.entries.contains_key(&id) {
            return false;
        }
        self.entries.insert(id, request);
        true
    }

    /// Attach the deadline timer of an already tracked request.
    ///
    /// If the request was retired in the meantime the timer is aborted.
    pub fn set_deadline(&mut self, id: u64, deadline: AbortHandle) {
        match self.entries.get_mut(&id) {
            Some(entry) => entry.deadline = Some(deadline),
            None => deadline.abort(),
        }
    }

    /// Retire `id`, if it is still outstanding.
    pub fn take(&mut self, id: u64) -> Option<PendingRequest> {
        self.entries.remove(&id)
    }

    /// Retire every outstanding request.
    pub fn drain(&mut self) -> Vec<PendingRequest> {
        self.entries.drain().map(|(_, request)| request).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Reject every request in `flushed` with [`Error::Disconnected`].
///
/// A flushed handshake needs no follow-up: its socket is already gone.
pub fn reject_all(flushed: Vec<PendingRequest>) {
    for request in flushed {
        let _ = request.settle(Err(Error::Disconnected));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use {super::*, serde_json::json};

    #[test]
    fn response_settles_once() {
        let mut pending = PendingRequests::default();
        let (tx, mut rx) = oneshot::channel();
        assert!(pending.insert(1, PendingRequest::caller("health", tx)));

        assert!(pending.take(1).unwrap().settle(Ok(json!({ "ok": true }))).is_none());
        assert!(pending.take(1).is_none(), "second retirement finds nothing");
        assert_eq!(rx.try_recv().unwrap().unwrap(), json!({ "ok": true }));
    }

    #[test]
    fn duplicate_id_rejected() {
        let mut pending = PendingRequests::default();
        let (tx1, _rx1) = oneshot::channel();
        let (tx2, _rx2) = oneshot::channel();
        assert!(pending.insert(7, PendingRequest::caller("a", tx1)));
        assert!(!pending.insert(7, PendingRequest::caller("b", tx2)));
        assert_eq!(pending.take(7).unwrap().method(), "a");
    }

    #[test]
    fn drain_rejects_everything() {
        let mut pending = PendingRequests::default();
        let mut receivers = Vec::new();
        for id in 1..=3 {
            let (tx, rx) = oneshot::channel();
            pending.insert(id, PendingRequest::caller("sessions.list", tx));
            receivers.push(rx);
        }
        reject_all(pending.drain());
        assert!(pending.is_empty());
        for mut rx in receivers {
            assert!(matches!(rx.try_recv().unwrap(), Err(Error::Disconnected)));
        }
    }

    #[test]
    fn settle_with_dropped_receiver_is_silent() {
        let (tx, rx) = oneshot::channel();
        drop(rx);
        assert!(
            PendingRequest::caller("health", tx)
                .settle(Ok(Value::Null))
                .is_none()
        );
    }

    #[test]
    fn handshake_outcome_is_returned() {
        let request = PendingRequest::new("connect", Reply::Handshake { generation: 4 });
        let outcome = request.settle(Err(Error::timeout("connect"))).unwrap();
        assert_eq!(outcome.generation, 4);
        assert!(matches!(outcome.result, Err(Error::Timeout { .. })));
    }

    #[tokio::test]
    async fn deadline_aborted_on_settle() {
        let mut pending = PendingRequests::default();
        let (tx, _rx) = oneshot::channel();
        pending.insert(1, PendingRequest::caller("health", tx));
        let timer = tokio::spawn(std::future::pending::<()>());
        pending.set_deadline(1, timer.abort_handle());

        let _ = pending.take(1).unwrap().settle(Ok(Value::Null));
        assert!(timer.await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn deadline_for_retired_request_is_aborted() {
        let mut pending = PendingRequests::default();
        let timer = tokio::spawn(std::future::pending::<()>());
        pending.set_deadline(42, timer.abort_handle());
        assert!(timer.await.unwrap_err().is_cancelled());
    }
}
