//! Request/response message passing between isolated execution contexts.
//!
//! A [`Router`] connects named endpoints; each endpoint is a [`Messenger`].
//! Requests open a private, single-use reply path (a `oneshot` channel, the
//! transport-level reference that never serializes with the envelope), so
//! concurrent requests correlate only through their own reply paths and may
//! complete out of send order.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex as StdMutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Notify};
use tracing::{debug, warn};

use crate::errors::{ErrorPayload, HoldfastError};

/// Reserved liveness probe kind, answered by the dispatch loop itself.
pub const PING_KIND: &str = "ping";

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(10_000);
pub const PING_TIMEOUT: Duration = Duration::from_millis(500);
pub const DEFAULT_PING_ATTEMPTS: u32 = 20;

const PING_RETRY_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub from: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// JSON-encoded payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// JSON-encoded [`ErrorPayload`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

type ReplySender = oneshot::Sender<Envelope>;

/// One hop on the wire: the envelope plus the reply path for requests.
struct Delivery {
    envelope: Envelope,
    reply: Option<ReplySender>,
}

fn data_envelope(from: &str, value: &Value) -> Envelope {
    Envelope {
        from: from.to_owned(),
        to: None,
        kind: None,
        data: Some(value.to_string()),
        error: None,
    }
}

fn error_envelope(from: &str, payload: &ErrorPayload) -> Envelope {
    Envelope {
        from: from.to_owned(),
        to: None,
        kind: None,
        data: None,
        error: Some(serde_json::to_string(payload).unwrap_or_else(|_e| {
            "{\"code\":\"internal_error\",\"message\":\"failed to serialize error\"}".into()
        })),
    }
}

fn lock_unpoisoned<T>(m: &StdMutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A reply carrying an error rejects with that error, never resolves.
fn decode_reply(reply: &Envelope) -> Result<Value, HoldfastError> {
    if let Some(error) = reply.error.as_deref() {
        return Err(HoldfastError::from_wire(error));
    }
    match reply.data.as_deref() {
        Some(data) => serde_json::from_str(data)
            .map_err(|e| HoldfastError::Internal(format!("undecodable reply: {e}"))),
        None => Ok(Value::Null),
    }
}

#[derive(Clone, Default)]
pub struct Router {
    endpoints: Arc<StdMutex<HashMap<String, mpsc::UnboundedSender<Delivery>>>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new endpoint under `id` and spawn its dispatch loop. The
    /// latest registration for an id wins.
    pub fn register(&self, id: &str) -> Messenger {
        let (tx, rx) = mpsc::unbounded_channel();
        lock_unpoisoned(&self.endpoints).insert(id.to_owned(), tx.clone());
        let shared = Arc::new(MessengerShared {
            id: id.to_owned(),
            cancelled: AtomicBool::new(false),
            cancel: Notify::new(),
            local_tx: StdMutex::new(Some(tx)),
            on_message: StdMutex::new(None),
            on_request: StdMutex::new(None),
            allowed_origins: StdMutex::new(None),
        });
        drop(tokio::spawn(dispatch_loop(rx, Arc::clone(&shared))));
        Messenger {
            router: self.clone(),
            shared,
        }
    }

    fn route(&self, target: &str, delivery: Delivery) -> Result<(), HoldfastError> {
        let guard = lock_unpoisoned(&self.endpoints);
        let Some(tx) = guard.get(target) else {
            return Err(HoldfastError::Unreachable);
        };
        if tx.send(delivery).is_err() {
            return Err(HoldfastError::Unreachable);
        }
        Ok(())
    }

    fn unregister(&self, id: &str, tx: &mpsc::UnboundedSender<Delivery>) {
        let mut guard = lock_unpoisoned(&self.endpoints);
        if guard.get(id).is_some_and(|current| current.same_channel(tx)) {
            guard.remove(id);
        }
    }
}

type MessageHandler = Arc<dyn Fn(String, Value) + Send + Sync>;
type RequestHandler = Arc<dyn Fn(String, Value, Responder) + Send + Sync>;

struct MessengerShared {
    id: String,
    cancelled: AtomicBool,
    cancel: Notify,
    /// Kept so `remove_listener` can tell its own routing entry from a
    /// replacement, and so dropping it ends the dispatch loop.
    local_tx: StdMutex<Option<mpsc::UnboundedSender<Delivery>>>,
    on_message: StdMutex<Option<MessageHandler>>,
    on_request: StdMutex<Option<RequestHandler>>,
    allowed_origins: StdMutex<Option<HashSet<String>>>,
}

impl MessengerShared {
    fn origin_allowed(&self, from: &str) -> bool {
        lock_unpoisoned(&self.allowed_origins)
            .as_ref()
            .is_none_or(|allowed| allowed.contains(from))
    }
}

/// The single-use reply path handed to a request handler. Consuming methods
/// make the one-reply rule a move-semantics fact.
pub struct Responder {
    from: String,
    tx: ReplySender,
}

impl Responder {
    pub fn send_data(self, value: Value) {
        let reply = data_envelope(&self.from, &value);
        drop(value);
        drop(self.tx.send(reply));
    }

    pub fn send_error(self, error: &HoldfastError) {
        drop(self.tx.send(error_envelope(&self.from, &error.to_payload())));
    }
}

async fn dispatch_loop(mut rx: mpsc::UnboundedReceiver<Delivery>, shared: Arc<MessengerShared>) {
    while let Some(delivery) = rx.recv().await {
        if shared.cancelled.load(Ordering::SeqCst) {
            break;
        }
        let Delivery { envelope, reply } = delivery;
        let from = envelope.from;

        if !shared.origin_allowed(&from) {
            warn!(endpoint = %shared.id, %from, "dropping envelope from filtered origin");
            if let Some(tx) = reply {
                drop(tx.send(error_envelope(&shared.id, &ErrorPayload {
                    code: "unauthorized_origin".into(),
                    message: format!("origin not allowed: {from}"),
                })));
            }
            continue;
        }

        let payload = match envelope.data.as_deref() {
            Some(data) => match serde_json::from_str::<Value>(data) {
                Ok(v) => v,
                Err(e) => {
                    warn!(endpoint = %shared.id, %from, error = %e, "undecodable payload");
                    if let Some(tx) = reply {
                        drop(tx.send(error_envelope(
                            &shared.id,
                            &HoldfastError::InvalidRequest("undecodable payload".into())
                                .to_payload(),
                        )));
                    }
                    continue;
                }
            },
            None => Value::Null,
        };

        match reply {
            Some(tx) => {
                if envelope.kind.as_deref() == Some(PING_KIND) {
                    drop(tx.send(data_envelope(&shared.id, &Value::Null)));
                    continue;
                }
                let handler = lock_unpoisoned(&shared.on_request).clone();
                match handler {
                    Some(h) => h(from, payload, Responder {
                        from: shared.id.clone(),
                        tx,
                    }),
                    None => {
                        debug!(endpoint = %shared.id, %from, "request with no handler");
                        drop(tx.send(error_envelope(
                            &shared.id,
                            &HoldfastError::Unreachable.to_payload(),
                        )));
                    }
                }
            }
            None => {
                let handler = lock_unpoisoned(&shared.on_message).clone();
                if let Some(h) = handler {
                    h(from, payload);
                } else {
                    debug!(endpoint = %shared.id, %from, "message with no handler");
                }
            }
        }
    }
}

#[derive(Clone)]
pub struct Messenger {
    router: Router,
    shared: Arc<MessengerShared>,
}

impl Messenger {
    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub const fn router(&self) -> &Router {
        &self.router
    }

    /// Restrict incoming traffic to the given sender identities.
    pub fn allow_origins<I, S>(&self, origins: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set: HashSet<String> = origins.into_iter().map(Into::into).collect();
        *lock_unpoisoned(&self.shared.allowed_origins) = Some(set);
    }

    /// At most one message handler; a later call replaces the earlier one.
    pub fn on_message<F>(&self, handler: F)
    where
        F: Fn(String, Value) + Send + Sync + 'static,
    {
        *lock_unpoisoned(&self.shared.on_message) = Some(Arc::new(handler));
    }

    /// At most one request handler; a later call replaces the earlier one.
    pub fn on_request<F>(&self, handler: F)
    where
        F: Fn(String, Value, Responder) + Send + Sync + 'static,
    {
        *lock_unpoisoned(&self.shared.on_request) = Some(Arc::new(handler));
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::SeqCst)
    }

    /// One-way send, no acknowledgment.
    pub fn send_message<T: Serialize>(
        &self,
        target: &str,
        kind: &str,
        payload: &T,
    ) -> Result<(), HoldfastError> {
        if self.is_cancelled() {
            return Err(HoldfastError::Cancelled);
        }
        let envelope = self.envelope(target, kind, payload)?;
        self.router.route(target, Delivery {
            envelope,
            reply: None,
        })
    }

    /// Send a request and race the private reply path against `timeout`.
    pub async fn send_request<T: Serialize>(
        &self,
        target: &str,
        kind: &str,
        payload: &T,
        timeout: Duration,
    ) -> Result<Value, HoldfastError> {
        if self.is_cancelled() {
            return Err(HoldfastError::Cancelled);
        }
        let envelope = self.envelope(target, kind, payload)?;
        let (tx, rx) = oneshot::channel();
        self.router.route(target, Delivery {
            envelope,
            reply: Some(tx),
        })?;
        match tokio::time::timeout(timeout, rx).await {
            Err(_elapsed) => Err(HoldfastError::Timeout),
            // Reply path torn down without a reply.
            Ok(Err(_closed)) => Err(HoldfastError::Cancelled),
            Ok(Ok(reply)) => decode_reply(&reply),
        }
    }

    /// Probe `target` with short-deadline requests, up to `attempts` times.
    /// Resolves with the attempt number that answered; exhaustion fails
    /// `Unreachable`; cancellation aborts the retry loop immediately.
    pub async fn ping(&self, target: &str, attempts: u32) -> Result<u32, HoldfastError> {
        let probe_payload = Value::Null;
        for attempt in 1..=attempts {
            if self.is_cancelled() {
                return Err(HoldfastError::Cancelled);
            }
            let probe = self.send_request(target, PING_KIND, &probe_payload, PING_TIMEOUT);
            tokio::select! {
                () = self.shared.cancel.notified() => return Err(HoldfastError::Cancelled),
                res = probe => match res {
                    Ok(_) => return Ok(attempt),
                    Err(HoldfastError::Cancelled) if self.is_cancelled() => {
                        return Err(HoldfastError::Cancelled);
                    }
                    Err(e) => debug!(target, attempt, error = %e, "ping attempt failed"),
                },
            }
            if attempt < attempts {
                tokio::select! {
                    () = self.shared.cancel.notified() => return Err(HoldfastError::Cancelled),
                    () = tokio::time::sleep(PING_RETRY_DELAY) => {}
                }
            }
        }
        Err(HoldfastError::Unreachable)
    }

    /// Detach handlers, deregister the endpoint and mark this instance
    /// cancelled; pending ping loops fail immediately.
    pub fn remove_listener(&self) {
        self.shared.cancelled.store(true, Ordering::SeqCst);
        self.shared.cancel.notify_waiters();
        if let Some(tx) = lock_unpoisoned(&self.shared.local_tx).take() {
            self.router.unregister(&self.shared.id, &tx);
        }
        *lock_unpoisoned(&self.shared.on_message) = None;
        *lock_unpoisoned(&self.shared.on_request) = None;
    }

    fn envelope<T: Serialize>(
        &self,
        target: &str,
        kind: &str,
        payload: &T,
    ) -> Result<Envelope, HoldfastError> {
        let data = serde_json::to_string(payload)
            .map_err(|e| HoldfastError::Internal(format!("encode payload: {e}")))?;
        Ok(Envelope {
            from: self.shared.id.clone(),
            to: Some(target.to_owned()),
            kind: Some(kind.to_owned()),
            data: Some(data),
            error: None,
        })
    }
}
