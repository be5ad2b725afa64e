//! Keyed registry of live channel sessions, one per sender.
//!
//! Adapter callbacks arrive concurrently with explicit API calls, so each
//! session's state transitions are owned by a single event-loop task fed
//! from the adapter's event queue. The registry map itself is the only
//! shared structure, guarded by one lock.

use std::{
    collections::HashMap,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, Ordering},
    },
};

use {
    async_trait::async_trait,
    chrono::Utc,
    tokio::{
        sync::{RwLock, mpsc},
        task::JoinHandle,
    },
    tracing::{debug, info, warn},
};

use {
    volley_common::SenderId,
    volley_store::{ConnectionStatus, Store},
};

use crate::{
    adapter::{AdapterEvent, AdapterFactory, ChannelAdapter},
    error::{Error, Result},
    normalize::normalize_destination,
};

/// Buffered adapter events per session before backpressure.
const EVENT_QUEUE_DEPTH: usize = 32;

/// Synchronous acknowledgment of an `initialize` call. Authentication
/// completes asynchronously via adapter events, never via this value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitializeAck {
    /// A live session already reports ready; nothing was done.
    AlreadyConnected,
    /// A session was created and is authenticating in the background.
    Initializing,
}

/// Send capability consumed by the dispatch loop.
#[async_trait]
pub trait Outbound: Send + Sync {
    /// Send one message through a sender's live session.
    async fn send(&self, sender_id: SenderId, destination: &str, body: &str) -> Result<()>;

    /// Whether the sender's session currently reports ready. Pure query.
    async fn is_connected(&self, sender_id: SenderId) -> bool;
}

struct SessionHandle {
    adapter: Arc<dyn ChannelAdapter>,
    connected: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

struct Inner {
    sessions: RwLock<HashMap<SenderId, SessionHandle>>,
    store: Arc<dyn Store>,
    adapters: Arc<dyn AdapterFactory>,
}

/// Registry of live channel sessions keyed by sender id.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<Inner>,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn Store>, adapters: Arc<dyn AdapterFactory>) -> Self {
        Self {
            inner: Arc::new(Inner {
                sessions: RwLock::new(HashMap::new()),
                store,
                adapters,
            }),
        }
    }

    /// Create a session for a sender and begin asynchronous authentication.
    ///
    /// No-op when the sender already has a ready session. A stale
    /// not-yet-ready session is torn down and replaced. Clears any pairing
    /// token left over from a previous attempt.
    ///
    /// The check-replace-insert sequence holds the registry write lock, so
    /// concurrent calls for one sender serialize: a session is only ever
    /// displaced after its event-loop task is aborted and its adapter
    /// destroyed, never silently dropped.
    pub async fn initialize(&self, sender_id: SenderId) -> Result<InitializeAck> {
        {
            let sessions = self.inner.sessions.read().await;
            if let Some(handle) = sessions.get(&sender_id)
                && handle.connected.load(Ordering::SeqCst)
            {
                debug!(sender_id, "session already connected");
                return Ok(InitializeAck::AlreadyConnected);
            }
        }

        let sender = self
            .inner
            .store
            .sender(sender_id)
            .await?
            .ok_or(Error::SenderNotFound { sender_id })?;

        let adapter = {
            let mut sessions = self.inner.sessions.write().await;

            // Re-check under the write lock: a racing initialize may have
            // connected the session since the fast-path read.
            if let Some(handle) = sessions.get(&sender_id)
                && handle.connected.load(Ordering::SeqCst)
            {
                debug!(sender_id, "session already connected");
                return Ok(InitializeAck::AlreadyConnected);
            }

            // Replace a stale session from an earlier attempt.
            if let Some(old) = sessions.remove(&sender_id) {
                old.task.abort();
                if let Err(error) = old.adapter.destroy().await {
                    warn!(sender_id, %error, "failed to destroy stale adapter");
                }
            }

            self.inner
                .store
                .set_sender_connection(sender_id, ConnectionStatus::Connecting, false)
                .await?;
            self.inner.store.set_pairing_token(sender_id, None).await?;

            let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
            let adapter = self
                .inner
                .adapters
                .create(&sender, events_tx)
                .await
                .map_err(|e| Error::adapter("create adapter", e))?;

            let connected = Arc::new(AtomicBool::new(false));
            let task = tokio::spawn(session_event_loop(
                Arc::downgrade(&self.inner),
                sender_id,
                events_rx,
                Arc::clone(&connected),
            ));

            sessions.insert(sender_id, SessionHandle {
                adapter: Arc::clone(&adapter),
                connected,
                task,
            });
            adapter
        };

        info!(sender_id, "initializing channel session");
        if let Err(e) = adapter.initialize().await {
            self.remove_session(sender_id).await;
            if let Err(error) = self
                .inner
                .store
                .set_sender_connection(sender_id, ConnectionStatus::Disconnected, false)
                .await
            {
                warn!(sender_id, %error, "failed to persist disconnect after failed initialize");
            }
            return Err(Error::adapter("initialize adapter", e));
        }

        Ok(InitializeAck::Initializing)
    }

    /// Tear down a sender's session. Idempotent: succeeds with no live
    /// session, and always leaves the sender row `inactive`/not connected
    /// with no pairing token.
    pub async fn disconnect(&self, sender_id: SenderId) -> Result<()> {
        let removed = self.inner.sessions.write().await.remove(&sender_id);
        if let Some(handle) = removed {
            handle.connected.store(false, Ordering::SeqCst);
            handle.task.abort();
            if let Err(error) = handle.adapter.destroy().await {
                warn!(sender_id, %error, "adapter destroy failed during disconnect");
            }
        }

        if self.inner.store.sender(sender_id).await?.is_some() {
            self.inner
                .store
                .set_sender_connection(sender_id, ConnectionStatus::Inactive, false)
                .await?;
            self.inner.store.set_pairing_token(sender_id, None).await?;
        }

        info!(sender_id, "channel session disconnected");
        Ok(())
    }

    /// Current pairing token for a sender, if its session is mid-pairing.
    pub async fn pairing_token(&self, sender_id: SenderId) -> Result<Option<String>> {
        let sender = self
            .inner
            .store
            .sender(sender_id)
            .await?
            .ok_or(Error::SenderNotFound { sender_id })?;
        Ok(sender.pairing_token)
    }

    async fn remove_session(&self, sender_id: SenderId) {
        if let Some(handle) = self.inner.sessions.write().await.remove(&sender_id) {
            handle.task.abort();
        }
    }
}

#[async_trait]
impl Outbound for SessionRegistry {
    async fn send(&self, sender_id: SenderId, destination: &str, body: &str) -> Result<()> {
        let adapter = {
            let sessions = self.inner.sessions.read().await;
            let handle = sessions
                .get(&sender_id)
                .ok_or(Error::NotInitialized { sender_id })?;
            if !handle.connected.load(Ordering::SeqCst) {
                return Err(Error::NotConnected { sender_id });
            }
            Arc::clone(&handle.adapter)
        };

        let address = normalize_destination(destination, adapter.address_suffix())?;
        adapter
            .send_text(&address, body)
            .await
            .map_err(|e| Error::adapter("send message", e))
    }

    async fn is_connected(&self, sender_id: SenderId) -> bool {
        let sessions = self.inner.sessions.read().await;
        sessions
            .get(&sender_id)
            .is_some_and(|h| h.connected.load(Ordering::SeqCst))
    }
}

/// Single writer for one sender's session state. Consumes adapter events
/// until the session dies or the registry is dropped.
async fn session_event_loop(
    inner: Weak<Inner>,
    sender_id: SenderId,
    mut events: mpsc::Receiver<AdapterEvent>,
    connected: Arc<AtomicBool>,
) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        match event {
            AdapterEvent::PairingChallenge { token } => {
                info!(sender_id, "pairing challenge received");
                if let Err(error) = inner
                    .store
                    .set_pairing_token(sender_id, Some(token))
                    .await
                {
                    warn!(sender_id, %error, "failed to persist pairing token");
                }
            },
            AdapterEvent::Authenticated => {
                debug!(sender_id, "session authenticated, waiting for ready");
            },
            AdapterEvent::Ready => {
                if let Err(error) = inner.store.mark_sender_ready(sender_id, Utc::now()).await {
                    warn!(sender_id, %error, "failed to persist ready transition");
                }
                connected.store(true, Ordering::SeqCst);
                info!(sender_id, "channel session ready");
            },
            AdapterEvent::AuthFailure { reason } => {
                warn!(sender_id, reason, "channel authentication failed");
                end_session(&inner, sender_id, &connected).await;
                return;
            },
            AdapterEvent::Disconnected { reason } => {
                info!(sender_id, reason, "channel session dropped");
                end_session(&inner, sender_id, &connected).await;
                return;
            },
            AdapterEvent::Inbound { from, .. } => {
                debug!(sender_id, from, "ignoring inbound message");
            },
        }
    }
}

/// Terminal transition: the sender must re-initialize to reconnect.
async fn end_session(inner: &Arc<Inner>, sender_id: SenderId, connected: &AtomicBool) {
    connected.store(false, Ordering::SeqCst);
    if let Err(error) = inner
        .store
        .set_sender_connection(sender_id, ConnectionStatus::Disconnected, false)
        .await
    {
        warn!(sender_id, %error, "failed to persist disconnect");
    }
    inner.sessions.write().await.remove(&sender_id);
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::{
        sync::{Mutex, atomic::AtomicUsize},
        time::Duration,
    };

    use {anyhow::anyhow, volley_store::InMemoryStore};

    use {super::*, crate::adapter::AdapterEventSender};

    struct MockAdapter {
        events: AdapterEventSender,
        sent: Mutex<Vec<(String, String)>>,
        fail_sends: AtomicBool,
        fail_initialize: AtomicBool,
        destroyed: AtomicBool,
    }

    impl MockAdapter {
        async fn emit(&self, event: AdapterEvent) {
            self.events.send(event).await.unwrap();
        }

        fn sent(&self) -> Vec<(String, String)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChannelAdapter for MockAdapter {
        async fn initialize(&self) -> anyhow::Result<()> {
            if self.fail_initialize.load(Ordering::SeqCst) {
                return Err(anyhow!("pairing service unavailable"));
            }
            Ok(())
        }

        async fn send_text(&self, address: &str, body: &str) -> anyhow::Result<()> {
            if self.fail_sends.load(Ordering::SeqCst) {
                return Err(anyhow!("network unreachable"));
            }
            self.sent
                .lock()
                .unwrap()
                .push((address.to_string(), body.to_string()));
            Ok(())
        }

        async fn destroy(&self) -> anyhow::Result<()> {
            self.destroyed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockFactory {
        adapters: Mutex<HashMap<SenderId, Arc<MockAdapter>>>,
        history: Mutex<Vec<Arc<MockAdapter>>>,
        created: AtomicUsize,
        fail_initialize: AtomicBool,
    }

    impl MockFactory {
        fn adapter(&self, sender_id: SenderId) -> Arc<MockAdapter> {
            Arc::clone(self.adapters.lock().unwrap().get(&sender_id).unwrap())
        }

        fn history(&self) -> Vec<Arc<MockAdapter>> {
            self.history.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AdapterFactory for MockFactory {
        async fn create(
            &self,
            sender: &volley_store::Sender,
            events: AdapterEventSender,
        ) -> anyhow::Result<Arc<dyn ChannelAdapter>> {
            // Yield so concurrent initialize calls interleave here.
            tokio::task::yield_now().await;
            let adapter = Arc::new(MockAdapter {
                events,
                sent: Mutex::new(Vec::new()),
                fail_sends: AtomicBool::new(false),
                fail_initialize: AtomicBool::new(self.fail_initialize.load(Ordering::SeqCst)),
                destroyed: AtomicBool::new(false),
            });
            self.adapters
                .lock()
                .unwrap()
                .insert(sender.id, Arc::clone(&adapter));
            self.history.lock().unwrap().push(Arc::clone(&adapter));
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(adapter)
        }
    }

    struct Fixture {
        store: Arc<InMemoryStore>,
        factory: Arc<MockFactory>,
        registry: SessionRegistry,
        sender_id: SenderId,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let sender_id = store.insert_sender(None, "main", "5215550001");
        let factory = Arc::new(MockFactory::default());
        let registry = SessionRegistry::new(
            Arc::clone(&store) as Arc<dyn Store>,
            Arc::clone(&factory) as Arc<dyn AdapterFactory>,
        );
        Fixture {
            store,
            factory,
            registry,
            sender_id,
        }
    }

    /// Adapter events are applied by a background task, so observations of
    /// their effects need a grace period.
    async fn wait_sender(
        store: &InMemoryStore,
        sender_id: SenderId,
        check: impl Fn(&volley_store::Sender) -> bool,
    ) -> volley_store::Sender {
        for _ in 0..200 {
            if let Ok(Some(sender)) = store.sender(sender_id).await
                && check(&sender)
            {
                return sender;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("sender state not reached in time");
    }

    async fn wait_connected(registry: &SessionRegistry, sender_id: SenderId, want: bool) {
        for _ in 0..200 {
            if registry.is_connected(sender_id).await == want {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("connection state never became {want}");
    }

    #[tokio::test]
    async fn initialize_unknown_sender_fails() {
        let f = fixture();
        let result = f.registry.initialize(999).await;
        assert!(matches!(result, Err(Error::SenderNotFound { .. })));
    }

    #[tokio::test]
    async fn initialize_transitions_to_connecting() {
        let f = fixture();
        let ack = f.registry.initialize(f.sender_id).await.unwrap();
        assert_eq!(ack, InitializeAck::Initializing);

        let sender = f.store.sender(f.sender_id).await.unwrap().unwrap();
        assert_eq!(sender.status, ConnectionStatus::Connecting);
        assert!(!sender.is_connected);
        assert!(!f.registry.is_connected(f.sender_id).await);
    }

    #[tokio::test]
    async fn pairing_challenge_persists_token() {
        let f = fixture();
        f.registry.initialize(f.sender_id).await.unwrap();

        f.factory
            .adapter(f.sender_id)
            .emit(AdapterEvent::PairingChallenge {
                token: "qr-blob".into(),
            })
            .await;

        let sender = wait_sender(&f.store, f.sender_id, |s| {
            s.pairing_token.as_deref() == Some("qr-blob")
        })
        .await;

        // Still connecting; the token does not make the session ready.
        assert_eq!(sender.status, ConnectionStatus::Connecting);
        assert_eq!(
            f.registry
                .pairing_token(f.sender_id)
                .await
                .unwrap()
                .as_deref(),
            Some("qr-blob")
        );
    }

    #[tokio::test]
    async fn ready_event_connects_and_clears_token() {
        let f = fixture();
        f.registry.initialize(f.sender_id).await.unwrap();

        let adapter = f.factory.adapter(f.sender_id);
        adapter
            .emit(AdapterEvent::PairingChallenge { token: "qr".into() })
            .await;
        adapter.emit(AdapterEvent::Authenticated).await;
        adapter.emit(AdapterEvent::Ready).await;

        wait_connected(&f.registry, f.sender_id, true).await;

        let sender = f.store.sender(f.sender_id).await.unwrap().unwrap();
        assert_eq!(sender.status, ConnectionStatus::Connected);
        assert!(sender.is_connected);
        assert!(sender.last_connected.is_some());
        assert!(sender.pairing_token.is_none());
    }

    #[tokio::test]
    async fn initialize_is_noop_when_connected() {
        let f = fixture();
        f.registry.initialize(f.sender_id).await.unwrap();
        f.factory
            .adapter(f.sender_id)
            .emit(AdapterEvent::Ready)
            .await;
        wait_connected(&f.registry, f.sender_id, true).await;

        let ack = f.registry.initialize(f.sender_id).await.unwrap();
        assert_eq!(ack, InitializeAck::AlreadyConnected);
        assert_eq!(f.factory.created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn send_requires_initialized_session() {
        let f = fixture();
        let result = f.registry.send(f.sender_id, "5215550100", "hi").await;
        assert!(matches!(result, Err(Error::NotInitialized { .. })));
    }

    #[tokio::test]
    async fn send_requires_ready_session() {
        let f = fixture();
        f.registry.initialize(f.sender_id).await.unwrap();
        let result = f.registry.send(f.sender_id, "5215550100", "hi").await;
        assert!(matches!(result, Err(Error::NotConnected { .. })));
    }

    #[tokio::test]
    async fn send_normalizes_destination() {
        let f = fixture();
        f.registry.initialize(f.sender_id).await.unwrap();
        let adapter = f.factory.adapter(f.sender_id);
        adapter.emit(AdapterEvent::Ready).await;
        wait_connected(&f.registry, f.sender_id, true).await;

        f.registry
            .send(f.sender_id, "+52 1555-0100", "hola")
            .await
            .unwrap();

        assert_eq!(adapter.sent(), vec![(
            "5215550100@c.us".to_string(),
            "hola".to_string()
        )]);
    }

    #[tokio::test]
    async fn send_surfaces_adapter_failure() {
        let f = fixture();
        f.registry.initialize(f.sender_id).await.unwrap();
        let adapter = f.factory.adapter(f.sender_id);
        adapter.emit(AdapterEvent::Ready).await;
        wait_connected(&f.registry, f.sender_id, true).await;

        adapter.fail_sends.store(true, Ordering::SeqCst);
        let result = f.registry.send(f.sender_id, "5215550100", "hi").await;
        assert!(matches!(result, Err(Error::Adapter { .. })));
    }

    #[tokio::test]
    async fn disconnect_event_removes_session() {
        let f = fixture();
        f.registry.initialize(f.sender_id).await.unwrap();
        let adapter = f.factory.adapter(f.sender_id);
        adapter.emit(AdapterEvent::Ready).await;
        wait_connected(&f.registry, f.sender_id, true).await;

        adapter
            .emit(AdapterEvent::Disconnected {
                reason: "phone offline".into(),
            })
            .await;
        wait_connected(&f.registry, f.sender_id, false).await;

        let sender = wait_sender(&f.store, f.sender_id, |s| {
            s.status == ConnectionStatus::Disconnected
        })
        .await;
        assert!(!sender.is_connected);

        // Must re-initialize to reconnect.
        let result = f.registry.send(f.sender_id, "5215550100", "hi").await;
        assert!(matches!(result, Err(Error::NotInitialized { .. })));
    }

    #[tokio::test]
    async fn auth_failure_removes_session() {
        let f = fixture();
        f.registry.initialize(f.sender_id).await.unwrap();
        f.factory
            .adapter(f.sender_id)
            .emit(AdapterEvent::AuthFailure {
                reason: "session expired".into(),
            })
            .await;

        wait_sender(&f.store, f.sender_id, |s| {
            s.status == ConnectionStatus::Disconnected
        })
        .await;

        let result = f.registry.send(f.sender_id, "5215550100", "hi").await;
        assert!(matches!(result, Err(Error::NotInitialized { .. })));
    }

    #[tokio::test]
    async fn concurrent_initializes_leave_single_writer() {
        let f = fixture();
        let first = f.registry.clone();
        let second = f.registry.clone();
        let id = f.sender_id;

        let (a, b) = tokio::join!(first.initialize(id), second.initialize(id));
        assert_eq!(a.unwrap(), InitializeAck::Initializing);
        assert_eq!(b.unwrap(), InitializeAck::Initializing);

        // The later call replaced the earlier session; the displaced adapter
        // was destroyed rather than silently dropped.
        let adapters = f.factory.history();
        assert_eq!(adapters.len(), 2);
        assert!(adapters[0].destroyed.load(Ordering::SeqCst));
        assert!(!adapters[1].destroyed.load(Ordering::SeqCst));

        f.registry.disconnect(id).await.unwrap();

        // A late event from the displaced adapter has no writer left to act
        // on it; the torn-down sender row must stay torn down.
        let _ = adapters[0]
            .events
            .send(AdapterEvent::PairingChallenge {
                token: "ghost".into(),
            })
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let sender = f.store.sender(id).await.unwrap().unwrap();
        assert_eq!(sender.status, ConnectionStatus::Inactive);
        assert!(!sender.is_connected);
        assert!(sender.pairing_token.is_none());
    }

    #[tokio::test]
    async fn failed_adapter_initialize_tears_down_session() {
        let f = fixture();
        f.factory.fail_initialize.store(true, Ordering::SeqCst);

        let result = f.registry.initialize(f.sender_id).await;
        assert!(matches!(result, Err(Error::Adapter { .. })));

        let sender = f.store.sender(f.sender_id).await.unwrap().unwrap();
        assert_eq!(sender.status, ConnectionStatus::Disconnected);
        assert!(!sender.is_connected);

        // No half-built session remains.
        let send = f.registry.send(f.sender_id, "5215550100", "hi").await;
        assert!(matches!(send, Err(Error::NotInitialized { .. })));
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let f = fixture();
        f.registry.disconnect(f.sender_id).await.unwrap();
        f.registry.disconnect(f.sender_id).await.unwrap();

        let sender = f.store.sender(f.sender_id).await.unwrap().unwrap();
        assert_eq!(sender.status, ConnectionStatus::Inactive);
        assert!(!sender.is_connected);
    }

    #[tokio::test]
    async fn disconnect_tears_down_live_session() {
        let f = fixture();
        f.registry.initialize(f.sender_id).await.unwrap();
        let adapter = f.factory.adapter(f.sender_id);
        adapter.emit(AdapterEvent::Ready).await;
        wait_connected(&f.registry, f.sender_id, true).await;

        f.registry.disconnect(f.sender_id).await.unwrap();

        assert!(!f.registry.is_connected(f.sender_id).await);
        let sender = f.store.sender(f.sender_id).await.unwrap().unwrap();
        assert_eq!(sender.status, ConnectionStatus::Inactive);
    }
}
