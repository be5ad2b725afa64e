//! Channel session registry.
//!
//! Owns one stateful channel-adapter session per sender, translates the
//! adapter's asynchronous callbacks into an explicit per-sender state
//! machine, and exposes send capability once a session reports ready.

pub mod adapter;
pub mod error;
pub mod normalize;
pub mod registry;

pub use {
    adapter::{AdapterEvent, AdapterEventSender, AdapterFactory, ChannelAdapter},
    error::{Error, Result},
    normalize::normalize_destination,
    registry::{InitializeAck, Outbound, SessionRegistry},
};
