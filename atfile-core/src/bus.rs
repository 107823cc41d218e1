use crate::protocol::{Envelope, Request, RequestId, RequestKind, Response, ResponseKind};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(30_000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusConfig {
    /// `None` waits forever.
    pub request_timeout: Option<Duration>,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("request {id} ({kind:?}) timed out after {elapsed:?}")]
    Timeout {
        id: RequestId,
        kind: RequestKind,
        elapsed: Duration,
    },
    #[error("request {0} was cancelled")]
    Cancelled(RequestId),
    #[error("message bus has been disposed")]
    Disposed,
    #[error("transport closed")]
    TransportClosed,
    #[error("expected {expected} but host replied {got:?}")]
    Unexpected {
        expected: &'static str,
        got: ResponseKind,
    },
}

/// A request still waiting for its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingRequest {
    pub id: RequestId,
    pub kind: RequestKind,
    pub created_at: Instant,
}

type Handler = Arc<dyn Fn(&Response) + Send + Sync>;

struct Waiter {
    info: PendingRequest,
    tx: oneshot::Sender<Result<Response, BusError>>,
}

struct BusInner {
    outbound: mpsc::UnboundedSender<Envelope<Request>>,
    next_id: AtomicU64,
    waiters: Mutex<HashMap<RequestId, Waiter>>,
    handlers: Mutex<HashMap<ResponseKind, Vec<Handler>>>,
    disposed: AtomicBool,
    config: BusConfig,
}

/// UI side of the request/response protocol.
///
/// Requests get a fresh id and a one-shot waiter; inbound envelopes carrying
/// an id complete that waiter, envelopes without one fan out to the handlers
/// registered for their type. The bus knows nothing about the transport
/// beyond the outbound channel and whatever feeds [`MessageBus::dispatch`].
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<BusInner>,
}

impl MessageBus {
    pub fn new(outbound: mpsc::UnboundedSender<Envelope<Request>>, config: BusConfig) -> Self {
        Self {
            inner: Arc::new(BusInner {
                outbound,
                next_id: AtomicU64::new(1),
                waiters: Mutex::new(HashMap::new()),
                handlers: Mutex::new(HashMap::new()),
                disposed: AtomicBool::new(false),
                config,
            }),
        }
    }

    /// Creates a bus together with the receiving end of its outbound channel.
    pub fn channel(config: BusConfig) -> (Self, mpsc::UnboundedReceiver<Envelope<Request>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx, config), rx)
    }

    pub fn config(&self) -> BusConfig {
        self.inner.config
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Sends `request` and returns a handle for its response. The request is
    /// on the wire when this returns.
    pub fn send(&self, request: Request) -> Result<PendingResponse, BusError> {
        if self.is_disposed() {
            return Err(BusError::Disposed);
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let kind = request.kind();
        let info = PendingRequest {
            id,
            kind,
            created_at: Instant::now(),
        };
        let (tx, rx) = oneshot::channel();
        self.waiters().insert(id, Waiter { info, tx });

        if self.inner.outbound.send(Envelope::request(id, request)).is_err() {
            self.waiters().remove(&id);
            return Err(BusError::TransportClosed);
        }
        trace!(id, ?kind, "Sent request");

        Ok(PendingResponse {
            id,
            kind,
            created_at: info.created_at,
            timeout: self.inner.config.request_timeout,
            rx,
            bus: self.clone(),
        })
    }

    pub async fn request(&self, request: Request) -> Result<Response, BusError> {
        self.send(request)?.response().await
    }

    /// Sends `request` without an id; nothing waits for a reply.
    pub fn notify(&self, request: Request) -> Result<(), BusError> {
        if self.is_disposed() {
            return Err(BusError::Disposed);
        }
        self.inner
            .outbound
            .send(Envelope::broadcast(request))
            .map_err(|_| BusError::TransportClosed)
    }

    /// Registers `handler` for unsolicited messages of `kind`.
    pub fn on<F>(&self, kind: ResponseKind, handler: F)
    where
        F: Fn(&Response) + Send + Sync + 'static,
    {
        if self.is_disposed() {
            warn!(?kind, "Ignoring handler registration on disposed bus");
            return;
        }
        self.handlers()
            .entry(kind)
            .or_default()
            .push(Arc::new(handler));
    }

    /// Routes one inbound envelope.
    pub fn dispatch(&self, envelope: Envelope<Response>) {
        if self.is_disposed() {
            trace!("Dropping inbound message after dispose");
            return;
        }

        let Envelope { id, body } = envelope;
        match id {
            Some(id) => {
                let Some(waiter) = self.waiters().remove(&id) else {
                    trace!(id, kind = ?body.kind(), "Dropping response for unknown request");
                    return;
                };
                trace!(
                    id,
                    kind = ?body.kind(),
                    elapsed = ?waiter.info.created_at.elapsed(),
                    "Completing request"
                );
                // The caller may have stopped waiting; that is not an error.
                let _ = waiter.tx.send(Ok(body));
            }
            None => {
                let kind = body.kind();
                let handlers = self.handlers().get(&kind).cloned().unwrap_or_default();
                if handlers.is_empty() {
                    trace!(?kind, "No handler for broadcast");
                }
                for handler in handlers {
                    handler(&body);
                }
            }
        }
    }

    /// Retires request `id` locally. No message is sent to the host; a late
    /// response is dropped as unknown.
    pub fn cancel(&self, id: RequestId) -> bool {
        match self.waiters().remove(&id) {
            Some(waiter) => {
                debug!(id, kind = ?waiter.info.kind, "Cancelled request");
                let _ = waiter.tx.send(Err(BusError::Cancelled(id)));
                true
            }
            None => false,
        }
    }

    /// Outstanding requests, oldest first.
    pub fn pending(&self) -> Vec<PendingRequest> {
        let mut pending: Vec<_> = self.waiters().values().map(|w| w.info).collect();
        pending.sort_by_key(|p| p.id);
        pending
    }

    /// Fails every outstanding request and drops all handlers. Later sends
    /// return [`BusError::Disposed`].
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.fail_all(BusError::Disposed);
        self.handlers().clear();
        debug!("Message bus disposed");
    }

    /// Dispatches everything arriving on `inbound` until the channel closes,
    /// then fails whatever is still waiting.
    pub async fn pump(&self, mut inbound: mpsc::UnboundedReceiver<Envelope<Response>>) {
        while let Some(envelope) = inbound.recv().await {
            self.dispatch(envelope);
        }
        debug!("Inbound transport closed");
        self.fail_all(BusError::TransportClosed);
    }

    fn fail_all(&self, error: BusError) {
        let waiters: Vec<Waiter> = self.waiters().drain().map(|(_, w)| w).collect();
        for waiter in waiters {
            let _ = waiter.tx.send(Err(error.clone()));
        }
    }

    /// Runs from `Drop`, so a poisoned table is skipped rather than panicking.
    fn retire(&self, id: RequestId) {
        if let Ok(mut waiters) = self.inner.waiters.lock() {
            if waiters.remove(&id).is_some() {
                trace!(id, "Retired abandoned request");
            }
        }
    }

    fn waiters(&self) -> std::sync::MutexGuard<'_, HashMap<RequestId, Waiter>> {
        self.inner.waiters.lock().expect("bus waiter lock poisoned")
    }

    fn handlers(&self) -> std::sync::MutexGuard<'_, HashMap<ResponseKind, Vec<Handler>>> {
        self.inner.handlers.lock().expect("bus handler lock poisoned")
    }
}

/// Handle to the response of one request. Dropping it before the response
/// arrives retires the waiter.
pub struct PendingResponse {
    id: RequestId,
    kind: RequestKind,
    created_at: Instant,
    timeout: Option<Duration>,
    rx: oneshot::Receiver<Result<Response, BusError>>,
    bus: MessageBus,
}

impl PendingResponse {
    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    pub async fn response(mut self) -> Result<Response, BusError> {
        let received = match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, &mut self.rx).await {
                Ok(received) => received,
                Err(_) => {
                    warn!(id = self.id, kind = ?self.kind, "Request timed out");
                    return Err(BusError::Timeout {
                        id: self.id,
                        kind: self.kind,
                        elapsed: self.created_at.elapsed(),
                    });
                }
            },
            None => (&mut self.rx).await,
        };
        received.unwrap_or(Err(BusError::Disposed))
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        self.bus.retire(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::WorkspaceFile;

    fn files_response(paths: &[&str]) -> Response {
        Response::WorkspaceFiles {
            files: paths.iter().map(|p| WorkspaceFile::new(*p)).collect(),
        }
    }

    #[tokio::test]
    async fn test_ids_are_monotonic_and_unique() {
        let (bus, mut outbound) = MessageBus::channel(BusConfig::default());
        let first = bus.send(Request::GetWorkspaceFiles).unwrap();
        let second = bus.send(Request::GetCurrentFile).unwrap();
        assert!(second.id() > first.id());

        assert_eq!(outbound.recv().await.unwrap().id, Some(first.id()));
        assert_eq!(outbound.recv().await.unwrap().id, Some(second.id()));
        assert_eq!(bus.pending().len(), 2);
    }

    #[tokio::test]
    async fn test_out_of_order_responses_reach_their_callers() {
        let (bus, _outbound) = MessageBus::channel(BusConfig::default());
        let a = bus
            .send(Request::GetFileContent {
                filename: "a.rs".to_string(),
            })
            .unwrap();
        let b = bus
            .send(Request::GetFileContent {
                filename: "b.rs".to_string(),
            })
            .unwrap();
        let (a_id, b_id) = (a.id(), b.id());

        bus.dispatch(Envelope::request(
            b_id,
            Response::FileContent {
                filename: "b.rs".to_string(),
                content: Some("b".to_string()),
            },
        ));
        bus.dispatch(Envelope::request(
            a_id,
            Response::FileContent {
                filename: "a.rs".to_string(),
                content: Some("a".to_string()),
            },
        ));

        let Response::FileContent { filename, .. } = a.response().await.unwrap() else {
            panic!("wrong response kind");
        };
        assert_eq!(filename, "a.rs");
        let Response::FileContent { filename, .. } = b.response().await.unwrap() else {
            panic!("wrong response kind");
        };
        assert_eq!(filename, "b.rs");
        assert!(bus.pending().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_id_is_dropped() {
        let (bus, _outbound) = MessageBus::channel(BusConfig::default());
        let called = Arc::new(AtomicBool::new(false));
        let flag = called.clone();
        bus.on(ResponseKind::WorkspaceFiles, move |_| {
            flag.store(true, Ordering::SeqCst)
        });

        bus.dispatch(Envelope::request(999, files_response(&["a"])));
        assert!(!called.load(Ordering::SeqCst));
        assert!(bus.pending().is_empty());
    }

    #[tokio::test]
    async fn test_broadcasts_route_by_kind() {
        let (bus, _outbound) = MessageBus::channel(BusConfig::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bus.on(ResponseKind::WorkspaceFiles, move |response| {
            if let Response::WorkspaceFiles { files } = response {
                sink.lock().unwrap().push(files.len());
            }
        });

        bus.dispatch(Envelope::broadcast(files_response(&["a", "b"])));
        bus.dispatch(Envelope::broadcast(Response::error("ignored")));
        assert_eq!(*seen.lock().unwrap(), vec![2]);
    }

    #[tokio::test]
    async fn test_timeout_retires_waiter() {
        let (bus, _outbound) = MessageBus::channel(BusConfig {
            request_timeout: Some(Duration::from_millis(20)),
        });
        let pending = bus.send(Request::GetCurrentFile).unwrap();
        let id = pending.id();

        let err = pending.response().await.unwrap_err();
        assert!(matches!(err, BusError::Timeout { id: timed_out, kind: RequestKind::GetCurrentFile, .. } if timed_out == id));
        assert!(bus.pending().is_empty());

        // a late reply is just an unknown id now
        bus.dispatch(Envelope::request(id, Response::error("late")));
    }

    #[tokio::test]
    async fn test_dropped_handle_retires_waiter() {
        let (bus, _outbound) = MessageBus::channel(BusConfig { request_timeout: None });
        let kept = bus.send(Request::GetCurrentFile).unwrap();
        drop(bus.send(Request::GetWorkspaceFiles).unwrap());
        assert_eq!(bus.pending().len(), 1);
        assert_eq!(bus.pending()[0].id, kept.id());

        // an abandoned `request` future is dropped mid-await
        let abandoned =
            tokio::time::timeout(Duration::from_millis(5), bus.request(Request::GetCurrentFile))
                .await;
        assert!(abandoned.is_err());
        assert_eq!(bus.pending().len(), 1);

        drop(kept);
        assert!(bus.pending().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_completes_with_cancelled() {
        let (bus, mut outbound) = MessageBus::channel(BusConfig::default());
        let pending = bus.send(Request::GetWorkspaceFiles).unwrap();
        let id = pending.id();
        outbound.recv().await.unwrap();

        assert!(bus.cancel(id));
        assert!(!bus.cancel(id));
        assert_eq!(pending.response().await, Err(BusError::Cancelled(id)));
        assert!(outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dispose_fails_pending_and_rejects_new_requests() {
        let (bus, _outbound) = MessageBus::channel(BusConfig { request_timeout: None });
        let pending = bus.send(Request::GetWorkspaceFiles).unwrap();

        bus.dispose();
        assert_eq!(pending.response().await, Err(BusError::Disposed));
        assert!(matches!(
            bus.send(Request::GetCurrentFile),
            Err(BusError::Disposed)
        ));
        assert_eq!(bus.notify(Request::GetCurrentFile), Err(BusError::Disposed));
    }

    #[tokio::test]
    async fn test_notify_has_no_id() {
        let (bus, mut outbound) = MessageBus::channel(BusConfig::default());
        bus.notify(Request::ReloadIgnoreRules).unwrap();
        let envelope = outbound.recv().await.unwrap();
        assert_eq!(envelope.id, None);
        assert_eq!(envelope.body, Request::ReloadIgnoreRules);
        assert!(bus.pending().is_empty());
    }

    #[tokio::test]
    async fn test_closed_transport() {
        let (bus, outbound) = MessageBus::channel(BusConfig::default());
        drop(outbound);
        assert!(matches!(
            bus.send(Request::GetWorkspaceFiles),
            Err(BusError::TransportClosed)
        ));
        assert!(bus.pending().is_empty());
    }

    #[tokio::test]
    async fn test_pump_fails_waiters_when_inbound_closes() {
        let (bus, _outbound) = MessageBus::channel(BusConfig { request_timeout: None });
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let pending = bus.send(Request::GetWorkspaceFiles).unwrap();
        let id = pending.id();

        inbound_tx
            .send(Envelope::request(id + 100, files_response(&[])))
            .unwrap();
        drop(inbound_tx);
        bus.pump(inbound_rx).await;

        assert_eq!(pending.response().await, Err(BusError::TransportClosed));
    }
}
