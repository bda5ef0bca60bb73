use std::fmt::{Debug, Display};
use std::time::Duration;
use async_trait::async_trait;
use futures::stream::BoxStream;
use uuid::Uuid;

use crate::error::DeviceError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Notification(Vec<u8>),
    Disconnected,
}

/// Notifications of one characteristic, interleaved with disconnect signals of the peripheral.
/// Ends when the peripheral goes away.
pub type LinkEvents = BoxStream<'static, LinkEvent>;

/// The bluetooth backend used by sessions.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    type Address: Clone + Debug + Display + Send + Sync + 'static;
    type Link: Link;

    /// Looks for a peripheral advertising `name` for at most `window`.
    /// `Ok(None)` means nothing matched in that time.
    async fn find(&self, name: &str, window: Duration) -> Result<Option<Self::Address>, DeviceError>;

    async fn connect(&self, address: &Self::Address) -> Result<Self::Link, DeviceError>;

    /// Releases backend resources once no session uses the transport any more.
    async fn close(&self) {}
}

/// A connected peripheral.
#[async_trait]
pub trait Link: Send + Sync + 'static {
    async fn subscribe(&self, service: Uuid, characteristic: Uuid) -> Result<LinkEvents, DeviceError>;

    async fn unsubscribe(&self, service: Uuid, characteristic: Uuid) -> Result<(), DeviceError>;

    async fn is_connected(&self) -> Result<bool, DeviceError>;

    async fn disconnect(&self) -> Result<(), DeviceError>;
}
