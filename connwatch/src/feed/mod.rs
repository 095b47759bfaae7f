//! Sources of device connectivity events.
//!
//! A [`Monitor`](crate::Monitor) consumes an [`EventFeed`]: a long-lived
//! session to the management service that yields [`ConnectivityEvent`]s on its
//! own timeline. Feeds are shared; each monitor takes its own subscription and
//! releases it by dropping the returned stream.

use futures::future::BoxFuture;
use futures::stream::BoxStream;

use crate::device::DeviceId;
use crate::error::FeedError;
use crate::messages::ConnectivityEvent;

mod nats;
pub use nats::NatsFeed;

#[cfg(any(test, feature = "test-utils"))]
mod memory;
#[cfg(any(test, feature = "test-utils"))]
pub use memory::MemoryFeed;

/// A lazy, unbounded, non-restartable sequence of events.
///
/// An `Err` item or the end of the stream means the subscription is gone and
/// has to be re-established with [`EventFeed::subscribe`].
pub type EventStream = BoxStream<'static, Result<ConnectivityEvent, FeedError>>;

pub trait EventFeed: Send + Sync + 'static {
    /// Subscribe to connectivity events for `device`.
    ///
    /// Implementations may deliver events for other devices as well; the
    /// consumer filters them.
    fn subscribe<'a>(&'a self, device: &'a DeviceId) -> BoxFuture<'a, Result<EventStream, FeedError>>;

    /// Whether the session behind the feed is currently up. A subscription
    /// taken while this is false would never deliver anything.
    fn is_available(&self) -> bool {
        true
    }
}
