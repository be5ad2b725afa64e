//! The channel adapter contract.
//!
//! The adapter is the opaque component that speaks the actual messaging
//! network protocol. It authenticates asynchronously and reports progress
//! through [`AdapterEvent`]s delivered over the mpsc channel handed to the
//! factory at session creation.

use std::sync::Arc;

use {anyhow::Result, async_trait::async_trait, tokio::sync::mpsc};

use volley_store::Sender;

/// Asynchronous lifecycle events emitted by a channel adapter.
#[derive(Debug, Clone)]
pub enum AdapterEvent {
    /// An out-of-band pairing credential (e.g. a scannable code) the
    /// operator must present to authenticate the session.
    PairingChallenge { token: String },
    /// Credentials accepted; the session is not yet usable for sending.
    Authenticated,
    /// The session is fully established and may send.
    Ready,
    /// Authentication failed; the session is dead.
    AuthFailure { reason: String },
    /// The session dropped after being established.
    Disconnected { reason: String },
    /// An inbound message arrived. Ignored by this engine.
    Inbound { from: String, body: String },
}

/// Sender half of a session's adapter event queue.
pub type AdapterEventSender = mpsc::Sender<AdapterEvent>;

/// One authenticated connection to the messaging network.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Begin asynchronous authentication. Returns once the attempt is
    /// underway; completion is reported via [`AdapterEvent`]s.
    async fn initialize(&self) -> Result<()>;

    /// Send one message to a normalized destination address.
    async fn send_text(&self, address: &str, body: &str) -> Result<()>;

    /// Tear the session down. The adapter must stop emitting events after
    /// this returns.
    async fn destroy(&self) -> Result<()>;

    /// Adapter-specific suffix appended to digits-only destinations.
    fn address_suffix(&self) -> &str {
        "@c.us"
    }
}

/// Builds one adapter instance per sender.
#[async_trait]
pub trait AdapterFactory: Send + Sync {
    async fn create(
        &self,
        sender: &Sender,
        events: AdapterEventSender,
    ) -> Result<Arc<dyn ChannelAdapter>>;
}
